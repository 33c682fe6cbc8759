use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;

use crate::{ClientError, RetryConfig};

/// Boxed error returned by token providers and refreshers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Hook invoked with every classified error, for user-facing notification.
pub type NotifyHook = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Hook invoked with every classified error, for analytics capture.
pub type AnalyticsHook = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Source of the access token attached to outgoing requests.
///
/// A provider failure is tolerated: the request proceeds without a token and
/// the server's 401 is the authoritative auth failure.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<Option<String>, BoxError>;
}

/// Refreshes an expired access token after a 401 response.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<Option<String>, BoxError>;
}

/// Default provider: resolves to no token.
pub struct NoToken;

#[async_trait]
impl TokenProvider for NoToken {
    async fn access_token(&self) -> Result<Option<String>, BoxError> {
        Ok(None)
    }
}

/// Provider holding a fixed token, e.g. one read from the environment.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<Option<String>, BoxError> {
        Ok(Some(self.0.clone()))
    }
}

/// Error-path configuration: recovery hooks, auth-refresh bound, and the
/// circuit breaker thresholds.
#[derive(Clone)]
pub struct ErrorConfig {
    /// Refreshes the token after a 401; at most [`ErrorConfig::max_auth_retries`]
    /// refresh-and-reissue attempts happen per logical request.
    pub refresh_token: Option<Arc<dyn TokenRefresher>>,
    /// Invoked with every classified error before it propagates.
    pub notify: Option<NotifyHook>,
    /// Invoked with every classified error, after `notify`.
    pub analytics: Option<AnalyticsHook>,
    pub max_auth_retries: u32,
    /// Consecutive transport failures before the breaker opens.
    pub breaker_threshold: u32,
    /// How long the breaker stays open before allowing a probe.
    pub breaker_reset_ms: u64,
    /// Emit `tracing::error!` for every classified failure.
    pub log_errors: bool,
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self {
            refresh_token: None,
            notify: None,
            analytics: None,
            max_auth_retries: 1,
            breaker_threshold: 5,
            breaker_reset_ms: 30_000,
            log_errors: true,
        }
    }
}

impl fmt::Debug for ErrorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorConfig")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<hook>"))
            .field("notify", &self.notify.as_ref().map(|_| "<hook>"))
            .field("analytics", &self.analytics.as_ref().map(|_| "<hook>"))
            .field("max_auth_retries", &self.max_auth_retries)
            .field("breaker_threshold", &self.breaker_threshold)
            .field("breaker_reset_ms", &self.breaker_reset_ms)
            .field("log_errors", &self.log_errors)
            .finish()
    }
}

/// Client-wide configuration. Immutable once the [`crate::ApiClient`] owning
/// it is constructed.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL all request paths are resolved against.
    pub base_url: String,
    /// Headers applied to every request; per-call headers override them.
    pub default_headers: HeaderMap,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    pub enable_retry: bool,
    pub retry: RetryConfig,
    /// Generate an `x-correlation-id` for every request. When disabled, no
    /// id is generated but a caller-supplied one is still propagated.
    pub enable_correlation: bool,
    pub token_provider: Arc<dyn TokenProvider>,
    pub error_config: ErrorConfig,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_headers: HeaderMap::new(),
            timeout_ms: 30_000,
            enable_retry: true,
            retry: RetryConfig::default(),
            enable_correlation: true,
            token_provider: Arc::new(NoToken),
            error_config: ErrorConfig::default(),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retry_enabled(mut self, enabled: bool) -> Self {
        self.enable_retry = enabled;
        self
    }

    pub fn with_correlation_enabled(mut self, enabled: bool) -> Self {
        self.enable_correlation = enabled;
        self
    }

    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = provider;
        self
    }

    pub fn with_error_config(mut self, error_config: ErrorConfig) -> Self {
        self.error_config = error_config;
        self
    }

    /// Construction-time self-check: the base URL must be a non-empty
    /// absolute `http`/`https` URL. Misconfiguration fails the very first
    /// call site instead of every request after it.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::invalid_argument("base URL must not be empty"));
        }
        let url = Url::parse(self.base_url.trim()).map_err(|err| {
            ClientError::invalid_argument(format!("invalid base URL '{}': {err}", self.base_url))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ClientError::invalid_argument(format!(
                "base URL must use http or https, got '{}'",
                url.scheme()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("default_headers", &self.default_headers)
            .field("timeout_ms", &self.timeout_ms)
            .field("enable_retry", &self.enable_retry)
            .field("retry", &self.retry)
            .field("enable_correlation", &self.enable_correlation)
            .field("token_provider", &"<provider>")
            .field("error_config", &self.error_config)
            .finish()
    }
}
