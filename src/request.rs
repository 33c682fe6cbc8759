use std::time::Instant;

use reqwest::header::HeaderMap;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, Url};
use tokio_util::sync::CancellationToken;

use crate::{ClientError, Result};

/// Query parameter value: a scalar or a list. Lists serialize as repeated
/// keys (`tag=a&tag=b`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryValue {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        Self::One(value.to_owned())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        Self::One(value.to_string())
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        Self::One(value.to_string())
    }
}

impl From<Vec<String>> for QueryValue {
    fn from(values: Vec<String>) -> Self {
        Self::Many(values)
    }
}

/// Ordered query string parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query(Vec<(String, QueryValue)>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(key, value)| {
            let values: Vec<&str> = match value {
                QueryValue::One(v) => vec![v.as_str()],
                QueryValue::Many(vs) => vs.iter().map(String::as_str).collect(),
            };
            values.into_iter().map(move |v| (key.as_str(), v))
        })
    }
}

/// Single file in a multipart upload.
#[derive(Clone, Debug)]
pub struct UploadFile {
    pub field_name: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: file_name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Multipart form payload: files plus plain text fields.
///
/// Kept as owned bytes so the form can be rebuilt for every retry attempt
/// (`reqwest::multipart::Form` is consumed on send).
#[derive(Clone, Debug, Default)]
pub struct UploadForm {
    pub files: Vec<UploadFile>,
    pub fields: Vec<(String, String)>,
}

impl UploadForm {
    pub(crate) fn to_form(&self) -> Result<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in &self.fields {
            form = form.text(name.clone(), value.clone());
        }
        for file in &self.files {
            let mut part = reqwest::multipart::Part::bytes(file.bytes.clone())
                .file_name(file.file_name.clone());
            if let Some(content_type) = &file.content_type {
                part = part.mime_str(content_type).map_err(|err| {
                    ClientError::invalid_argument(format!(
                        "invalid content type '{content_type}': {err}"
                    ))
                })?;
            }
            form = form.part(file.field_name.clone(), part);
        }
        Ok(form)
    }
}

/// Request body.
#[derive(Clone, Debug)]
pub enum Body {
    /// JSON-serialized with `Content-Type: application/json` unless the
    /// caller set an explicit content type.
    Json(serde_json::Value),
    /// Sent verbatim; content type is whatever the caller set.
    Text(String),
    /// Multipart form. No explicit `Content-Type` header is attached so the
    /// transport can set the boundary.
    Multipart(UploadForm),
}

impl Body {
    /// Serializes any value into a JSON body.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|err| ClientError::invalid_argument(format!("unserializable body: {err}")))?;
        Ok(Self::Json(value))
    }
}

/// Per-call options.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    pub query: Query,
    pub timeout_ms: Option<u64>,
    pub correlation_id: Option<String>,
    /// Caller-supplied cancellation; combined with the timeout, whichever
    /// fires first aborts the call.
    pub signal: Option<CancellationToken>,
    pub disable_retry: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Fixes the correlation id for this call instead of a generated one.
    /// Sent as `x-correlation-id` even when automatic generation is off.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn without_retry(mut self) -> Self {
        self.disable_retry = true;
        self
    }
}

/// Normalized request built per call and handed through the request
/// interceptor chain. Never shared across concurrent requests.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    pub timeout_ms: u64,
    pub correlation_id: Option<String>,
    pub started_at: Instant,
    pub signal: Option<CancellationToken>,
}

/// Joins base URL and path with a single slash and appends the serialized
/// query string.
pub fn build_url(base_url: &str, path: &str, query: &Query) -> Result<Url> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(ClientError::invalid_argument(
            "request path must be a non-empty string",
        ));
    }
    let joined = format!(
        "{}/{}",
        base_url.trim().trim_end_matches('/'),
        trimmed.trim_start_matches('/')
    );
    let mut url = Url::parse(&joined)
        .map_err(|err| ClientError::invalid_argument(format!("invalid URL '{joined}': {err}")))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query.pairs() {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::{build_url, Query};

    #[test]
    fn joins_base_and_path_with_single_slash() {
        let url = build_url("https://api.trackline.audio/", "/projects", &Query::new())
            .expect("must build");
        assert_eq!(url.as_str(), "https://api.trackline.audio/projects");
    }

    #[test]
    fn serializes_scalar_query_params_in_order() {
        let query = Query::new().param("page", 2i64).param("sort", "name");
        let url = build_url("https://api.trackline.audio", "tracks", &query).expect("must build");
        assert_eq!(url.query(), Some("page=2&sort=name"));
    }

    #[test]
    fn list_values_serialize_as_repeated_keys() {
        let query = Query::new().param("tag", vec!["synth".to_owned(), "drums".to_owned()]);
        let url = build_url("https://api.trackline.audio", "tracks", &query).expect("must build");
        assert_eq!(url.query(), Some("tag=synth&tag=drums"));
    }

    #[test]
    fn query_values_are_percent_encoded() {
        let query = Query::new().param("q", "kick & snare");
        let url = build_url("https://api.trackline.audio", "search", &query).expect("must build");
        assert_eq!(url.query(), Some("q=kick+%26+snare"));
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = build_url("https://api.trackline.audio", "   ", &Query::new())
            .expect_err("blank path must fail");
        assert!(err.to_string().contains("non-empty"));
    }
}
