//! Static entry point and the build-time checks guarding it.
//!
//! The calendar UI is a single `index.html`.  Copies of it have drifted in
//! the past, and editors have saved it with a BOM or double-encoded accents,
//! so `check-assets` asserts that every other `index.html` in the tree is
//! byte-identical to the canonical one and that text assets are clean UTF-8.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

/// Canonical location of the entry page, relative to the repository root.
pub const CANONICAL_INDEX: &str = "static/index.html";

const IGNORED_DIRS: [&str; 4] = [".git", "target", "node_modules", ".next"];

const TEXT_EXTENSIONS: [&str; 13] = [
    "html", "js", "mjs", "ts", "tsx", "json", "css", "md", "yml", "yaml", "txt", "rs", "toml",
];

/// Sequences left behind when UTF-8 text is decoded as Latin-1/Windows-1252
/// and saved again.
const MOJIBAKE: [&str; 17] = [
    "Ã¡", "Ã¢", "Ã£", "Ã§", "Ã©", "Ãª", "Ã\u{AD}", "Ã³", "Ãº", "Ã‡", "Ã•", "Â ", "â€”", "â€¢", "â€œ",
    "ï¿½", "\u{FFFD}",
];

static MOJIBAKE_MATCHER: Lazy<AhoCorasick> =
    Lazy::new(|| AhoCorasick::new(MOJIBAKE).expect("static patterns compile"));

/// Read the canonical entry page from the static directory.
pub async fn read_index(static_dir: &Path) -> io::Result<String> {
    tokio::fs::read_to_string(static_dir.join("index.html")).await
}

/// One problem found by the asset checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetIssue {
    MissingCanonical(String),
    DivergentIndex(String),
    Bom(String),
    NotUtf8(String),
    ControlCharacter(String),
    Mojibake(String),
}

impl fmt::Display for AssetIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetIssue::MissingCanonical(p) => write!(f, "{p}: canonical index.html not found"),
            AssetIssue::DivergentIndex(p) => {
                write!(f, "{p}: index.html differs from {CANONICAL_INDEX}")
            }
            AssetIssue::Bom(p) => write!(f, "{p}: UTF-8 BOM found (save without BOM)"),
            AssetIssue::NotUtf8(p) => write!(f, "{p}: not valid UTF-8"),
            AssetIssue::ControlCharacter(p) => write!(f, "{p}: invalid control character"),
            AssetIssue::Mojibake(p) => {
                write!(f, "{p}: likely mis-decoded text (e.g. Ã, Â, â€)")
            }
        }
    }
}

/// Walk `root`, returning repository-relative paths (with `/` separators)
/// of the files accepted by `keep`.
fn walk(root: &Path, keep: &dyn Fn(&Path) -> bool) -> io::Result<Vec<String>> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                let name = entry.file_name();
                if !IGNORED_DIRS.iter().any(|d| name == *d) {
                    pending.push(path);
                }
            } else if file_type.is_file() && keep(&path) {
                out.push(relative(root, &path));
            }
        }
    }
    out.sort();
    Ok(out)
}

fn relative(root: &Path, path: &Path) -> String {
    let rel: PathBuf = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn sha256_file(path: &Path) -> io::Result<[u8; 32]> {
    let bytes = fs::read(path)?;
    Ok(Sha256::digest(&bytes).into())
}

/// Check that every `index.html` other than the canonical one is an exact
/// copy of it.
pub fn check_index_copies(root: &Path) -> io::Result<Vec<AssetIssue>> {
    let canonical = root.join(CANONICAL_INDEX);
    if !canonical.is_file() {
        return Ok(vec![AssetIssue::MissingCanonical(CANONICAL_INDEX.to_string())]);
    }
    let expected = sha256_file(&canonical)?;
    let copies = walk(root, &|p: &Path| {
        p.file_name()
            .map(|n| n.to_string_lossy().eq_ignore_ascii_case("index.html"))
            .unwrap_or(false)
    })?;

    let mut issues = Vec::new();
    for rel in copies.into_iter().filter(|r| r != CANONICAL_INDEX) {
        if sha256_file(&root.join(&rel))? != expected {
            issues.push(AssetIssue::DivergentIndex(rel));
        }
    }
    Ok(issues)
}

fn is_text_asset(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name == ".env.local" || name == ".env.example" {
        return true;
    }
    path.extension()
        .map(|e| {
            let ext = e.to_string_lossy().to_ascii_lowercase();
            TEXT_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn has_invalid_control(text: &str) -> bool {
    text.chars()
        .any(|c| matches!(c, '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}'))
}

/// Whether the text contains typical double-encoding artifacts.
pub fn has_mojibake(text: &str) -> bool {
    MOJIBAKE_MATCHER.is_match(text)
}

/// Check encoding of every text asset under `root`.  The mojibake scan
/// only applies to the canonical entry page.
pub fn check_encoding(root: &Path) -> io::Result<Vec<AssetIssue>> {
    let mut issues = Vec::new();
    for rel in walk(root, &is_text_asset)? {
        let bytes = fs::read(root.join(&rel))?;
        if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
            issues.push(AssetIssue::Bom(rel.clone()));
        }
        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => text,
            Err(_) => {
                issues.push(AssetIssue::NotUtf8(rel));
                continue;
            }
        };
        if has_invalid_control(text) {
            issues.push(AssetIssue::ControlCharacter(rel.clone()));
        }
        if rel == CANONICAL_INDEX && has_mojibake(text) {
            issues.push(AssetIssue::Mojibake(rel));
        }
    }
    Ok(issues)
}
