//! Talking to the Apps Script backend.
//!
//! A `Transport` posts one JSON payload and hands back an `UpstreamReply`
//! carrying the status, the full body text and its JSON decoding (if any).
//! Classification of that reply lives in `classify`.

use std::time::Duration;

use serde_json::Value;

pub mod classify;

pub use classify::{classify, Outcome};

/// Errors raised before a reply could be read in full.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

/// One upstream reply: status, raw body text and the body decoded as JSON
/// when it decodes at all.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamReply {
    pub status: u16,
    pub text: String,
    pub parsed: Option<Value>,
}

impl UpstreamReply {
    /// Build a reply from status and body text.  Decoding failures are not
    /// errors: `parsed` is simply `None`.
    pub fn new(status: u16, text: impl Into<String>) -> Self {
        let text = text.into();
        let parsed = if text.is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok()
        };
        Self {
            status,
            text,
            parsed,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The decoded body when it is a JSON object.
    pub fn object(&self) -> Option<&serde_json::Map<String, Value>> {
        self.parsed.as_ref().and_then(Value::as_object)
    }
}

/// Read the body of a response exactly once, whatever its status, so error
/// pages and JSON error objects stay available for classification.
pub async fn read_reply(resp: reqwest::Response) -> Result<UpstreamReply, TransportError> {
    let status = resp.status().as_u16();
    let text = resp.text().await?;
    Ok(UpstreamReply::new(status, text))
}

/// Sends one write payload to a backend URL.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<UpstreamReply, TransportError>;
}

/// `Transport` over a shared reqwest client.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<UpstreamReply, TransportError> {
        let send = async {
            let resp = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .json(payload)
                .send()
                .await?;
            read_reply(resp).await
        };
        // The client timeout covers the connection; this bounds the body read too.
        match tokio::time::timeout(timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }
}
