//! Verdicts on upstream replies.
//!
//! The backend signals problems inconsistently: a JSON object with an
//! `error` message (often under HTTP 200), an HTML error page from the
//! hosting platform, or a plain-text notice that the script has no entry
//! function.  `classify` folds all of these into one `Outcome`.
//!
//! Invalid-key detection matches the backend's Portuguese wording
//! ("Chave inválida").  This is tied to the script's message text; a
//! structured error code from the backend should replace it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::util::value_as_text;

/// Result of one upstream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The backend accepted the write.
    Success,
    /// The backend rejected the access key; the next candidate may work.
    InvalidKey,
    /// The URL does not point at a working web-app deployment.
    DeploymentInvalid,
    /// Any other failure reported by the backend.
    GenericFailure,
    /// No reply at all (connection, DNS, timeout).
    NetworkError,
}

impl Outcome {
    /// Whether a failure with this outcome justifies trying the fallback
    /// backend.
    pub fn warrants_fallback(self) -> bool {
        matches!(
            self,
            Outcome::InvalidKey | Outcome::DeploymentInvalid | Outcome::NetworkError
        )
    }
}

const INVALID_KEY_MARKER: &str = "chave inv";

static HTML_DOCUMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(<!doctype html|<html)").unwrap());

static MISSING_ENTRY_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Fun..o de script n.o encontrada:\s*(doPost|doGet)").unwrap()
});

static DEPLOYMENT_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Apps Script invalido|implantacao web|doPost|doGet").unwrap()
});

static NOT_FOUND: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)NOT_FOUND").unwrap());

/// The `error` member of a decoded object body, rendered as text.
pub fn error_field(parsed: Option<&Value>) -> Option<String> {
    let err = parsed?.as_object()?.get("error")?;
    Some(value_as_text(Some(err))).filter(|s| !s.is_empty())
}

/// Whether a message carries the backend's invalid-key wording.
pub fn is_invalid_key_message(message: &str) -> bool {
    message.to_lowercase().contains(INVALID_KEY_MARKER)
}

pub fn looks_like_html(text: &str) -> bool {
    HTML_DOCUMENT.is_match(text)
}

/// Plain-text notice that the deployed script lacks `doPost`/`doGet`.
pub fn mentions_missing_entry_function(text: &str) -> bool {
    MISSING_ENTRY_FUNCTION.is_match(text)
}

/// Classify one reply.  The first matching rule wins:
///
/// 1. an object whose `error` mentions an invalid key, whatever the status;
/// 2. any 2xx status;
/// 3. an HTML page or a message pointing at a broken deployment;
/// 4. 404 or a `NOT_FOUND` message;
/// 5. anything else.
pub fn classify(status: u16, parsed: Option<&Value>, text: &str) -> Outcome {
    let error = error_field(parsed);
    if error.as_deref().is_some_and(is_invalid_key_message) {
        return Outcome::InvalidKey;
    }
    if (200..300).contains(&status) {
        return Outcome::Success;
    }
    let message = error.as_deref().unwrap_or(text);
    if looks_like_html(text)
        || mentions_missing_entry_function(text)
        || DEPLOYMENT_HINT.is_match(message)
    {
        return Outcome::DeploymentInvalid;
    }
    if status == 404 || NOT_FOUND.is_match(message) {
        return Outcome::DeploymentInvalid;
    }
    Outcome::GenericFailure
}
