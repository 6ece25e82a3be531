//! Candidate access keys for the Apps Script backend.
//!
//! The key stored in the script has historically been pasted with stray
//! trailing apostrophes, asterisks or quotes.  Rather than failing on the
//! first mismatch, the proxy derives a small ordered set of plausible
//! variants from each configured key and tries them in turn.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Separators between keys when several are configured at once.
static KEY_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\r\n,;]+").unwrap());

/// A pure rewrite of one configured key.  `None` means the rule does not
/// apply to that key.
pub type KeyTransform = fn(&str) -> Option<String>;

/// Ordered rewrite rules applied to every configured key.  The order is the
/// order in which candidates are tried against the backend.
pub const KEY_TRANSFORMS: &[(&str, KeyTransform)] = &[
    ("as_configured", as_configured),
    ("append_apostrophe", append_apostrophe),
    ("drop_trailing_apostrophe", drop_trailing_apostrophe),
    ("append_asterisk", append_asterisk),
    ("drop_trailing_asterisk", drop_trailing_asterisk),
    ("root", root),
    ("root_apostrophe", root_apostrophe),
    ("root_asterisk", root_asterisk),
    ("root_apostrophe_asterisk", root_apostrophe_asterisk),
    ("root_asterisk_apostrophe", root_asterisk_apostrophe),
    ("root_unquoted", root_unquoted),
];

fn as_configured(key: &str) -> Option<String> {
    Some(key.to_string())
}

fn append_apostrophe(key: &str) -> Option<String> {
    Some(format!("{key}'"))
}

fn drop_trailing_apostrophe(key: &str) -> Option<String> {
    key.strip_suffix('\'').map(str::to_string)
}

fn append_asterisk(key: &str) -> Option<String> {
    Some(format!("{key}*"))
}

fn drop_trailing_asterisk(key: &str) -> Option<String> {
    key.strip_suffix('*').map(str::to_string)
}

fn root(key: &str) -> Option<String> {
    Some(root_of(key).to_string())
}

fn root_apostrophe(key: &str) -> Option<String> {
    Some(format!("{}'", root_of(key)))
}

fn root_asterisk(key: &str) -> Option<String> {
    Some(format!("{}*", root_of(key)))
}

fn root_apostrophe_asterisk(key: &str) -> Option<String> {
    Some(format!("{}'*", root_of(key)))
}

fn root_asterisk_apostrophe(key: &str) -> Option<String> {
    Some(format!("{}*'", root_of(key)))
}

fn root_unquoted(key: &str) -> Option<String> {
    Some(unquoted(root_of(key)))
}

/// A key with any trailing run of apostrophes and asterisks removed.
pub fn root_of(key: &str) -> &str {
    key.trim_end_matches(['\'', '*'])
}

fn unquoted(key: &str) -> String {
    key.chars().filter(|c| !matches!(c, '\'' | '"')).collect()
}

/// Split raw key material into the configured base keys: pieces separated by
/// newlines, commas or semicolons, trimmed and stripped of wrapping quotes.
pub fn split_configured_keys(raw: &str) -> Vec<String> {
    KEY_SEPARATORS
        .split(raw)
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(|piece| piece.trim_matches(['\'', '"']).to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}

/// Expand raw key material into the ordered, de-duplicated candidate set.
///
/// Base keys whose root is nothing but punctuation contribute no candidates;
/// the remaining base keys are still expanded.
pub fn expand(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for base in split_configured_keys(raw) {
        if unquoted(root_of(&base)).trim().is_empty() {
            tracing::debug!("skipping configured key without usable characters");
            continue;
        }
        for (_, transform) in KEY_TRANSFORMS {
            if let Some(candidate) = transform(&base) {
                let candidate = candidate.trim();
                if !candidate.is_empty() && seen.insert(candidate.to_string()) {
                    out.push(candidate.to_string());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(name: &str, key: &str) -> Option<String> {
        let (_, transform) = KEY_TRANSFORMS
            .iter()
            .find(|(n, _)| *n == name)
            .expect("transform exists");
        transform(key)
    }

    #[test]
    fn transforms_are_individually_pure() {
        assert_eq!(apply("drop_trailing_apostrophe", "abc"), None);
        assert_eq!(apply("drop_trailing_apostrophe", "abc'").as_deref(), Some("abc"));
        assert_eq!(apply("drop_trailing_asterisk", "abc*").as_deref(), Some("abc"));
        assert_eq!(apply("root", "abc'**'").as_deref(), Some("abc"));
        assert_eq!(apply("root_asterisk_apostrophe", "abc'").as_deref(), Some("abc*'"));
        assert_eq!(apply("root_unquoted", "a\"b'c*").as_deref(), Some("abc"));
    }

    #[test]
    fn splits_on_separator_runs_and_strips_quotes() {
        assert_eq!(
            split_configured_keys("\"one\",\r\n'two';;three, ,"),
            vec!["one", "two", "three"]
        );
        assert!(split_configured_keys(" ,;\n").is_empty());
    }

    #[test]
    fn plain_key_expands_in_rule_order() {
        assert_eq!(expand("abc"), vec!["abc", "abc'", "abc*", "abc'*", "abc*'"]);
    }

    #[test]
    fn noisy_key_yields_clean_root() {
        let candidates = expand("\"abc'*,\"");
        assert_eq!(candidates.first().map(String::as_str), Some("abc'*"));
        assert!(candidates.contains(&"abc".to_string()));
        assert_eq!(
            candidates,
            vec!["abc'*", "abc'*'", "abc'**", "abc'", "abc", "abc*", "abc*'"]
        );
    }

    #[test]
    fn never_duplicates_and_is_stable() {
        let raw = "k1*\nk1'\nk1";
        let first = expand(raw);
        let second = expand(raw);
        assert_eq!(first, second);
        let unique: HashSet<_> = first.iter().collect();
        assert_eq!(unique.len(), first.len());
        assert_eq!(first[0], "k1*");
    }

    #[test]
    fn punctuation_only_entries_are_skipped() {
        assert_eq!(expand("'*',valid"), expand("valid"));
        assert!(expand("**").is_empty());
        assert!(expand("").is_empty());
    }
}
