//! Admin write proxy.
//!
//! Authenticates the caller against the shared password, then forwards the
//! create/update/delete payload to the Apps Script backend, trying each
//! candidate access key in turn and, when the primary deployment looks
//! unusable, the fallback deployment.  Attempts are strictly sequential: the
//! first success ends the request and no write is ever sent twice in
//! parallel.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{Map, Value};

use crate::keys;
use crate::upstream::{classify, Outcome, Transport, UpstreamReply};
use crate::util::{department_label, normalize_secret, value_as_text, Deadline};

pub mod outcome;

/// Secondary deployment tried when the primary one is unreachable or
/// rejects every key.  Its keys are sent verbatim.
#[derive(Debug, Clone)]
pub struct FallbackBackend {
    pub url: String,
    pub keys: Vec<String>,
}

/// Settings for the write proxy.  Required values are optional here: their
/// absence is reported per request, not at startup.
#[derive(Debug, Clone)]
pub struct AdminSettings {
    pub script_url: Option<String>,
    pub admin_key: Option<String>,
    pub password: Option<String>,
    pub fallback: Option<FallbackBackend>,
    pub attempt_timeout_ms: u64,
    pub request_deadline_ms: u64,
}

/// Failures that end a write request before any upstream call.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("{0} nao configurada.")]
    MissingSetting(&'static str),
    #[error("Senha invalida.")]
    InvalidPassword,
}

impl AdminError {
    pub fn status(&self) -> StatusCode {
        match self {
            AdminError::MissingSetting(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AdminError::InvalidPassword => StatusCode::UNAUTHORIZED,
        }
    }
}

/// What happened across all attempts of one write request.
#[derive(Debug, Clone)]
pub struct WriteReport {
    /// Last reply actually received, from either backend.
    pub last_reply: Option<UpstreamReply>,
    /// Verdict of the last attempt made, if any.
    pub last_outcome: Option<Outcome>,
    /// Size of the primary candidate key set.
    pub tried_keys: usize,
    pub attempts: usize,
    pub used_fallback: bool,
}

pub struct AdminProxy {
    settings: AdminSettings,
    transport: Arc<dyn Transport>,
}

/// Resolved, validated settings for one request.
struct Resolved<'a> {
    script_url: &'a str,
    candidates: Vec<String>,
    password: String,
}

impl AdminProxy {
    pub fn new(settings: AdminSettings, transport: Arc<dyn Transport>) -> Self {
        Self {
            settings,
            transport,
        }
    }

    pub fn settings(&self) -> &AdminSettings {
        &self.settings
    }

    /// True when every required setting is present.
    pub fn is_configured(&self) -> bool {
        self.resolve().is_ok()
    }

    fn resolve(&self) -> Result<Resolved<'_>, AdminError> {
        let script_url = self
            .settings
            .script_url
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(AdminError::MissingSetting("APPS_SCRIPT_URL"))?;
        let candidates = self
            .settings
            .admin_key
            .as_deref()
            .map(keys::expand)
            .unwrap_or_default();
        if candidates.is_empty() {
            return Err(AdminError::MissingSetting("ADMIN_KEY"));
        }
        let password = self
            .settings
            .password
            .as_deref()
            .map(normalize_secret)
            .filter(|s| !s.is_empty())
            .ok_or(AdminError::MissingSetting("ADMIN_PASSWORD"))?;
        Ok(Resolved {
            script_url,
            candidates,
            password,
        })
    }

    /// Handle one write request body.  Configuration and password problems
    /// are returned as errors; upstream failures are absorbed into the
    /// report so the caller can render the final outcome.
    pub async fn handle_write(
        &self,
        mut body: Map<String, Value>,
    ) -> Result<WriteReport, AdminError> {
        let resolved = self.resolve()?;

        let incoming = normalize_secret(&value_as_text(body.get("password")));
        if incoming != resolved.password {
            tracing::info!("admin write rejected: password mismatch");
            return Err(AdminError::InvalidPassword);
        }

        body.remove("password");
        if let Some(dept) = body.get_mut("departamento") {
            *dept = Value::String(department_label(&value_as_text(Some(&*dept))).to_string());
        }

        let mut run = AttemptRun {
            transport: self.transport.as_ref(),
            deadline: Deadline::new_ms(self.settings.request_deadline_ms),
            attempt_timeout: Duration::from_millis(self.settings.attempt_timeout_ms),
            last_reply: None,
            attempts: 0,
        };

        let action = value_as_text(body.get("action"));
        let mut last = run
            .run("primary", resolved.script_url, &resolved.candidates, &body)
            .await;

        let mut used_fallback = false;
        if last.map_or(true, Outcome::warrants_fallback) {
            match &self.settings.fallback {
                Some(fallback) if !run.deadline.exceeded() => {
                    tracing::warn!(
                        outcome = ?last,
                        keys = fallback.keys.len(),
                        "primary backend failed, trying fallback backend"
                    );
                    used_fallback = true;
                    let fallback_outcome = run
                        .run("fallback", &fallback.url, &fallback.keys, &body)
                        .await;
                    if let Some(outcome) = fallback_outcome {
                        last = Some(outcome);
                    }
                }
                Some(_) => {
                    tracing::warn!("request deadline exceeded before fallback backend");
                }
                None => {
                    tracing::debug!(outcome = ?last, "fallback backend disabled");
                }
            }
        }

        tracing::info!(
            action = %action,
            attempts = run.attempts,
            used_fallback,
            outcome = ?last,
            "admin write finished"
        );

        Ok(WriteReport {
            last_reply: run.last_reply,
            last_outcome: last,
            tried_keys: resolved.candidates.len(),
            attempts: run.attempts,
            used_fallback,
        })
    }
}

/// Sequential attempts of one request, sharing its deadline.
struct AttemptRun<'a> {
    transport: &'a dyn Transport,
    deadline: Deadline,
    attempt_timeout: Duration,
    last_reply: Option<UpstreamReply>,
    attempts: usize,
}

impl AttemptRun<'_> {
    /// Try `keys` in order against `url`.  Moves on to the next key only on
    /// `InvalidKey`; any other verdict ends the loop.  Returns the verdict of
    /// the last attempt made, `None` when none was made.
    async fn run(
        &mut self,
        backend: &str,
        url: &str,
        keys: &[String],
        payload: &Map<String, Value>,
    ) -> Option<Outcome> {
        let mut last = None;
        for (index, key) in keys.iter().enumerate() {
            if self.deadline.exceeded() {
                tracing::warn!(
                    backend,
                    attempt = index,
                    "request deadline exceeded, abandoning attempts"
                );
                break;
            }
            let mut body = payload.clone();
            body.insert("key".to_string(), Value::String(key.clone()));
            let timeout = self.deadline.clamp(self.attempt_timeout);
            self.attempts += 1;

            let sent = self
                .transport
                .post_json(url, &Value::Object(body), timeout)
                .await;
            let outcome = match sent {
                Ok(reply) => {
                    let outcome = classify(reply.status, reply.parsed.as_ref(), &reply.text);
                    tracing::debug!(
                        backend,
                        attempt = index,
                        status = reply.status,
                        ?outcome,
                        "upstream replied"
                    );
                    self.last_reply = Some(reply);
                    outcome
                }
                Err(err) => {
                    tracing::warn!(backend, attempt = index, error = %err, "upstream attempt failed");
                    Outcome::NetworkError
                }
            };
            last = Some(outcome);
            if outcome != Outcome::InvalidKey {
                break;
            }
        }
        last
    }
}
