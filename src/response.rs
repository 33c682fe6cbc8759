use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::{ClientError, Result};

/// Fully-read HTTP response handed to the response interceptor chain.
///
/// Status, headers and body are materialized before interceptors run, so
/// every accessor works on a plain value with no live transport object
/// behind it.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Wall time from descriptor creation to the fully-read body.
    pub elapsed: Duration,
}

impl HttpResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// True when the server marked the body as a file download.
    pub fn is_attachment(&self) -> bool {
        self.headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim_start().starts_with("attachment"))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|err| ClientError::decode(format!("invalid JSON response: {err}")))
    }
}

/// Parsed response body.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
    /// Raw bytes of a file download (`Content-Disposition: attachment`).
    Binary(Bytes),
    /// 204 or an empty body.
    Empty,
}

impl Payload {
    /// Deserializes the JSON arm into a concrete type.
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Self::Json(value) => serde_json::from_value(value)
                .map_err(|err| ClientError::decode(format!("unexpected JSON shape: {err}"))),
            other => Err(ClientError::decode(format!(
                "expected JSON payload, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Empty => "empty",
        }
    }
}

/// Parses the body by content type: 204 resolves to [`Payload::Empty`]
/// without touching the body, attachments stay binary, `application/json`
/// is parsed, everything else is returned as text.
pub fn parse_payload(response: &HttpResponse) -> Result<Payload> {
    if response.status == StatusCode::NO_CONTENT || response.body.is_empty() {
        return Ok(Payload::Empty);
    }
    if response.is_attachment() {
        return Ok(Payload::Binary(response.body.clone()));
    }
    let content_type = response.content_type().unwrap_or("");
    if content_type.starts_with("application/json") {
        let value = serde_json::from_slice(&response.body)
            .map_err(|err| ClientError::decode(format!("invalid JSON response: {err}")))?;
        return Ok(Payload::Json(value));
    }
    Ok(Payload::Text(response.text()))
}

/// Extracts (message, code, details) from a non-2xx body.
///
/// Prefers the structured `{"error":{"message","code","details"}}` envelope,
/// then a bare `{"message"}`, then the raw body text.
pub fn error_envelope(
    status: u16,
    body: &[u8],
) -> (String, Option<String>, Option<serde_json::Value>) {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(error) = value.get("error") {
            if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
                let code = error
                    .get("code")
                    .and_then(|c| c.as_str())
                    .map(str::to_owned);
                let details = error.get("details").cloned();
                return (message.to_owned(), code, details);
            }
        }
        if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
            return (message.to_owned(), None, None);
        }
    }
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        (format!("HTTP {status}"), None, None)
    } else {
        (trimmed.to_owned(), None, None)
    }
}
