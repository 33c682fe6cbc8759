use std::fmt;
use std::time::Duration;

use reqwest::Method;

/// Failure taxonomy for the client.
///
/// `Network` and `Timeout` are transport-level failures; `Status` carries a
/// non-2xx HTTP response together with whatever the server put in its error
/// envelope. `CircuitOpen` is produced locally without touching the network.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Caller passed a bad argument (empty path, unparseable URL). Fails
    /// before any network attempt and is never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The configured timeout elapsed before a response arrived.
    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    /// Transport-level failure (DNS, connection refused, TLS) from `reqwest`.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Non-2xx HTTP response with the server-supplied error envelope.
    #[error("http error {status}: {message}")]
    Status {
        status: u16,
        message: String,
        /// Machine-readable error code from the `{error:{code}}` envelope.
        code: Option<String>,
        /// Structured details from the `{error:{details}}` envelope.
        details: Option<serde_json::Value>,
    },
    /// The circuit breaker is open; the transport was not invoked.
    #[error("circuit breaker open, retry in {retry_in_ms} ms")]
    CircuitOpen { retry_in_ms: u64 },
    /// The caller-supplied cancellation signal fired.
    #[error("request cancelled")]
    Cancelled,
    /// Response body could not be decoded as its declared content type.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Per-request bookkeeping attached to errors after classification.
///
/// Carried alongside the error, not inside its `Display` output, so that
/// rendering an error for a user never leaks internal trace data.
#[derive(Clone, Debug)]
pub struct ErrorMeta {
    pub method: Method,
    pub url: String,
    pub correlation_id: Option<String>,
    /// Time elapsed since the request descriptor was created.
    pub elapsed: Duration,
}

/// Error type returned by this crate: a classified [`ErrorKind`] plus
/// optional correlation metadata.
#[derive(Debug)]
pub struct ClientError {
    kind: ErrorKind,
    meta: Option<ErrorMeta>,
}

impl ClientError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument(message.into()).into()
    }

    pub fn decode(message: impl Into<String>) -> Self {
        ErrorKind::Decode(message.into()).into()
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn meta(&self) -> Option<&ErrorMeta> {
        self.meta.as_ref()
    }

    /// HTTP status code, when the failure was a non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match &self.kind {
            ErrorKind::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the retry policy may re-attempt after this failure.
    ///
    /// Transient transport failures, timeouts and 5xx are retryable. 4xx
    /// responses, open-breaker rejections and cancellations are not.
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            ErrorKind::Timeout { .. } | ErrorKind::Network(_) => true,
            ErrorKind::Status { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    /// Attaches correlation metadata. Keeps the earliest metadata if some
    /// was already attached closer to the failure point.
    pub(crate) fn with_meta(mut self, meta: ErrorMeta) -> Self {
        if self.meta.is_none() {
            self.meta = Some(meta);
        }
        self
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<ErrorKind> for ClientError {
    fn from(kind: ErrorKind) -> Self {
        Self { kind, meta: None }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ErrorKind::Network(err).into()
    }
}
