//! Read side: events from the published spreadsheet CSV.
//!
//! The sheet is the source of truth; each request fetches a fresh export
//! (cache-busted), parses it and maps rows to events by header name.  The
//! `row` of each event is its 1-based sheet row so the admin page can
//! address it in later update/delete writes.

use std::time::Duration;

use axum::http::StatusCode;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::util::{fold_accents, fold_department};

// ASCII digits only; `\d` would also admit other Unicode digits.
static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").unwrap());
static BR_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{2})/([0-9]{2})/([0-9]{4})$").unwrap());

const TRUTHY: [&str; 4] = ["sim", "s", "true", "1"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub row: usize,
    pub data: String,
    pub hora: String,
    pub evento: String,
    pub destaque: bool,
    pub departamento: String,
    pub departamento_label: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EventsError {
    #[error("SHEET_CSV_URL nao configurada.")]
    MissingUrl,
    #[error("Erro ao ler SHEET_CSV_URL: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("Falha ao buscar CSV ({0})")]
    Status(u16),
}

impl EventsError {
    pub fn status(&self) -> StatusCode {
        match self {
            EventsError::MissingUrl | EventsError::Fetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EventsError::Status(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Fetches and parses the published CSV.
pub struct EventSource {
    csv_url: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl EventSource {
    pub fn new(csv_url: Option<String>, client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            csv_url: csv_url.filter(|u| !u.is_empty()),
            client,
            timeout,
        }
    }

    pub async fn fetch(&self) -> Result<Vec<Event>, EventsError> {
        let base = self.csv_url.as_deref().ok_or(EventsError::MissingUrl)?;
        let url = cache_busted(base, chrono::Utc::now().timestamp_millis());
        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .header("accept", "text/csv,text/plain,*/*")
            .header("user-agent", "Mozilla/5.0")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "sheet export returned an error");
            return Err(EventsError::Status(status.as_u16()));
        }
        let text = resp.text().await?;
        let events = events_from_csv(&text);
        tracing::debug!(count = events.len(), "sheet events loaded");
        Ok(events)
    }
}

fn cache_busted(url: &str, stamp: i64) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}cb={stamp}")
}

/// Parse CSV text into rows.  Handles quoted fields containing commas,
/// newlines and doubled quotes; `\r`, `\n` and `\r\n` all end a row.  Rows
/// whose cells are all blank are dropped.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => row.push(std::mem::take(&mut cur)),
            '\n' | '\r' if !in_quotes => {
                if !cur.is_empty() || !row.is_empty() {
                    row.push(std::mem::take(&mut cur));
                    rows.push(std::mem::take(&mut row));
                }
            }
            other => cur.push(other),
        }
    }
    if !cur.is_empty() || !row.is_empty() {
        row.push(cur);
        rows.push(row);
    }

    rows.retain(|r| r.iter().any(|cell| !cell.trim().is_empty()));
    rows
}

/// Normalize `DD/MM/YYYY` to `YYYY-MM-DD`; ISO dates and anything
/// unrecognised are returned trimmed but otherwise unchanged.
pub fn to_iso_date(raw: &str) -> String {
    let value = raw.trim();
    if ISO_DATE.is_match(value) {
        return value.to_string();
    }
    match BR_DATE.captures(value) {
        Some(c) => format!("{}-{}-{}", &c[3], &c[2], &c[1]),
        None => value.to_string(),
    }
}

pub fn is_truthy(raw: &str) -> bool {
    let value = raw.trim();
    TRUTHY.iter().any(|t| value.eq_ignore_ascii_case(t))
}

/// Column positions looked up by folded header name.
struct Columns {
    data: Option<usize>,
    hora: Option<usize>,
    evento: Option<usize>,
    destaque: Option<usize>,
    departamento: Option<usize>,
}

impl Columns {
    fn from_header(header: &[String]) -> Self {
        let folded: Vec<String> = header.iter().map(|h| fold_accents(h)).collect();
        let find = |name: &str| folded.iter().position(|h| h == name);
        Self {
            data: find("data"),
            hora: find("hora"),
            evento: find("evento"),
            destaque: find("destaque"),
            departamento: find("departamento"),
        }
    }
}

fn cell(row: &[String], idx: Option<usize>) -> &str {
    idx.and_then(|i| row.get(i)).map(String::as_str).unwrap_or("")
}

/// Map parsed rows (header first) to events, dropping rows without a date
/// or a title.
pub fn events_from_rows(rows: &[Vec<String>]) -> Vec<Event> {
    let Some((header, body)) = rows.split_first() else {
        return Vec::new();
    };
    let cols = Columns::from_header(header);
    body.iter()
        .enumerate()
        .map(|(index, r)| {
            let dept = cell(r, cols.departamento).trim();
            Event {
                row: index + 2,
                data: to_iso_date(cell(r, cols.data)),
                hora: cell(r, cols.hora).trim().to_string(),
                evento: cell(r, cols.evento).trim().to_string(),
                destaque: is_truthy(cell(r, cols.destaque)),
                departamento: fold_department(dept),
                departamento_label: dept.to_string(),
            }
        })
        .filter(|e| !e.data.is_empty() && !e.evento.is_empty())
        .collect()
}

pub fn events_from_csv(text: &str) -> Vec<Event> {
    events_from_rows(&parse_csv(text))
}
