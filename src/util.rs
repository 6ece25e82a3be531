//! Utility helpers shared by the read and write endpoints.
//!
//! Text coming from environment variables, spreadsheet cells and browser
//! forms is inconsistently quoted, accented and padded.  The helpers here
//! fold it into comparable forms, plus the deadline used to bound a write
//! request across all of its upstream attempts.

use std::time::{Duration, Instant};

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Characters stripped in runs from both ends of configured values.
const WRAPPING_QUOTES: [char; 2] = ['\'', '"'];

/// Trim a configured value and strip any wrapping runs of single or double
/// quotes, as left behind by dashboards that store `"value"` literally.
pub fn clean_setting(raw: &str) -> String {
    raw.trim().trim_matches(&WRAPPING_QUOTES[..]).to_string()
}

/// Normalize a shared secret for comparison: clean it, apply NFKC and drop
/// zero-width characters (U+200B..U+200D and the BOM).
pub fn normalize_secret(raw: &str) -> String {
    clean_setting(raw)
        .nfkc()
        .filter(|c| !matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .collect()
}

/// Lower-case, trim and remove diacritics (NFD then drop combining marks).
pub fn fold_accents(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

/// Folded form used to compare department names: accents and all
/// whitespace removed.
pub fn fold_department(raw: &str) -> String {
    fold_accents(raw)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Map a free-form department value onto the fixed vocabulary.  Anything not
/// recognised becomes the empty string rather than being passed through.
pub fn department_label(raw: &str) -> &'static str {
    match fold_department(raw).as_str() {
        "musica" => "Música",
        "ministerio" => "Ministério",
        _ => "",
    }
}

/// Render a loosely typed JSON form value the way a browser would stringify
/// it: strings verbatim, null/missing as empty, everything else as JSON text.
pub fn value_as_text(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Truncate to at most `max` characters (not bytes).
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Deadline structure bounding the total time spent on one request.  Calls
/// to `exceeded()` return true once the budget has been spent.
#[derive(Clone, Debug)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new_ms(ms: u64) -> Self {
        Deadline {
            start: Instant::now(),
            budget: Duration::from_millis(ms),
        }
    }

    /// Returns true if the budget has already been exhausted.
    pub fn exceeded(&self) -> bool {
        self.start.elapsed() >= self.budget
    }

    /// Time left before the deadline, zero once exceeded.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }

    /// The smaller of `cap` and the remaining budget.
    pub fn clamp(&self, cap: Duration) -> Duration {
        cap.min(self.remaining())
    }
}
