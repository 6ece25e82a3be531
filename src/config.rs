use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::admin::{AdminSettings, FallbackBackend};
use crate::keys::split_configured_keys;
use crate::util::clean_setting;

/// Fallback deployment of the agenda script, used when the configured one
/// stops answering.
pub const DEFAULT_FALLBACK_SCRIPT_URL: &str = "https://script.google.com/macros/s/AKfycbycS9Hn_apUDsvwrYjcLZKvK3PLeiuZ7I_b-Mr_g8AP3fyn_z9dWsp5OBq1iIj2Xrsa/exec";
pub const DEFAULT_FALLBACK_ADMIN_KEYS: &str = "123456,admin123";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub script_url: Option<String>,
    pub admin_key: Option<String>,
    pub admin_password: Option<String>,
    pub sheet_csv_url: Option<String>,
    pub fallback: Option<FallbackBackend>,
    pub attempt_timeout_ms: u64,
    pub request_deadline_ms: u64,
    pub max_request_bytes: Option<usize>,
    pub static_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let script_url = setting("APPS_SCRIPT_URL");
        let admin_key = setting("ADMIN_KEY");
        let admin_password = setting("ADMIN_PASSWORD").or_else(|| setting("ADMIN_PASS"));
        let sheet_csv_url = setting("SHEET_CSV_URL");

        let fallback = if parse_bool_env("AGENDA_FALLBACK_ENABLED")?.unwrap_or(true) {
            let url = setting("AGENDA_FALLBACK_SCRIPT_URL")
                .unwrap_or_else(|| DEFAULT_FALLBACK_SCRIPT_URL.to_string());
            let keys = split_configured_keys(
                &env::var("AGENDA_FALLBACK_ADMIN_KEYS")
                    .unwrap_or_else(|_| DEFAULT_FALLBACK_ADMIN_KEYS.to_string()),
            );
            if keys.is_empty() {
                return Err(anyhow!(
                    "AGENDA_FALLBACK_ADMIN_KEYS must list at least one key when the fallback is enabled"
                ));
            }
            Some(FallbackBackend { url, keys })
        } else {
            None
        };

        let attempt_timeout_ms = parse_optional_ms("AGENDA_ATTEMPT_TIMEOUT_MS")?.unwrap_or(10_000);
        let request_deadline_ms =
            parse_optional_ms("AGENDA_REQUEST_DEADLINE_MS")?.unwrap_or(25_000);
        let max_request_bytes = parse_optional_u64("AGENDA_MAX_REQUEST_BYTES")?
            .unwrap_or(1024 * 1024) as usize;
        let static_dir = setting("AGENDA_STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("static"));

        Ok(Self {
            script_url,
            admin_key,
            admin_password,
            sheet_csv_url,
            fallback,
            attempt_timeout_ms,
            request_deadline_ms,
            max_request_bytes: Some(max_request_bytes).filter(|n| *n > 0),
            static_dir,
        })
    }

    pub fn admin_settings(&self) -> AdminSettings {
        AdminSettings {
            script_url: self.script_url.clone(),
            admin_key: self.admin_key.clone(),
            password: self.admin_password.clone(),
            fallback: self.fallback.clone(),
            attempt_timeout_ms: self.attempt_timeout_ms,
            request_deadline_ms: self.request_deadline_ms,
        }
    }
}

/// A cleaned string setting; unset and blank values are both `None`.
fn setting(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|raw| clean_setting(&raw))
        .filter(|value| !value.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// A duration in milliseconds; zero would fail every upstream attempt.
fn parse_optional_ms(var: &str) -> Result<Option<u64>> {
    match parse_optional_u64(var)? {
        Some(0) => Err(anyhow!("{} must be a positive number of milliseconds", var)),
        other => Ok(other),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
