use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};

use crate::{ClientError, HttpResponse, RequestDescriptor, Result, TokenProvider};

/// Header carrying the per-request correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Transforms the request descriptor before it is sent. Invoked once per
/// logical request, in registration order, before the retry loop starts.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn on_request(&self, request: &mut RequestDescriptor) -> Result<()>;
}

/// Observes the outcome of a request, in registration order.
///
/// `on_response` runs on the success path over the fully-read response and
/// may fail the request; `on_error` runs on the error path after
/// classification and is purely observational.
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn on_response(
        &self,
        _request: &RequestDescriptor,
        _response: &HttpResponse,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_error(&self, _request: &RequestDescriptor, _error: &ClientError) {}
}

/// Injects the correlation id header when the descriptor carries one and the
/// caller has not already set the header.
pub struct CorrelationInterceptor;

#[async_trait]
impl RequestInterceptor for CorrelationInterceptor {
    async fn on_request(&self, request: &mut RequestDescriptor) -> Result<()> {
        let header = HeaderName::from_static(CORRELATION_HEADER);
        if request.headers.contains_key(&header) {
            return Ok(());
        }
        if let Some(correlation_id) = &request.correlation_id {
            if let Ok(value) = HeaderValue::from_str(correlation_id) {
                request.headers.insert(header, value);
            }
        }
        Ok(())
    }
}

/// Awaits the token provider and attaches `Authorization: Bearer <token>`.
///
/// A provider failure is tolerated: the request proceeds without a token and
/// the server's 401 decides. An `Authorization` header already present on
/// the descriptor wins.
pub struct AuthInterceptor {
    provider: Arc<dyn TokenProvider>,
}

impl AuthInterceptor {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl RequestInterceptor for AuthInterceptor {
    async fn on_request(&self, request: &mut RequestDescriptor) -> Result<()> {
        if request.headers.contains_key(AUTHORIZATION) {
            return Ok(());
        }
        match self.provider.access_token().await {
            Ok(Some(token)) => {
                let authorization = normalize_bearer_authorization(&token);
                match HeaderValue::from_str(&authorization) {
                    Ok(value) => {
                        request.headers.insert(AUTHORIZATION, value);
                    }
                    Err(err) => {
                        tracing::warn!("token is not a valid header value, proceeding without: {err}");
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("token provider failed, proceeding without token: {err}");
            }
        }
        Ok(())
    }
}

/// Logs elapsed time on the success path. Purely observational.
pub struct TimingInterceptor;

#[async_trait]
impl ResponseInterceptor for TimingInterceptor {
    async fn on_response(
        &self,
        request: &RequestDescriptor,
        response: &HttpResponse,
    ) -> Result<()> {
        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status = response.status.as_u16(),
            elapsed_ms = response.elapsed.as_millis() as u64,
            correlation_id = request.correlation_id.as_deref(),
            "request completed",
        );
        Ok(())
    }
}

/// Turns a raw token into an `Authorization` value, prefixing `Bearer `
/// unless the token already carries the scheme (case-insensitive).
pub(crate) fn normalize_bearer_authorization(token: &str) -> String {
    let token = token.trim();
    let has_scheme = token
        .get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("bearer "));
    if has_scheme {
        token.to_owned()
    } else {
        format!("Bearer {token}")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use async_trait::async_trait;
    use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
    use reqwest::Method;

    use super::{
        normalize_bearer_authorization, AuthInterceptor, CorrelationInterceptor,
        RequestInterceptor, CORRELATION_HEADER,
    };
    use crate::config::BoxError;
    use crate::{RequestDescriptor, StaticToken, TokenProvider};

    fn descriptor() -> RequestDescriptor {
        RequestDescriptor {
            method: Method::GET,
            url: "https://api.trackline.audio/projects".parse().unwrap(),
            headers: HeaderMap::new(),
            body: None,
            timeout_ms: 30_000,
            correlation_id: Some("corr-1".to_owned()),
            started_at: Instant::now(),
            signal: None,
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl TokenProvider for FailingProvider {
        async fn access_token(&self) -> Result<Option<String>, BoxError> {
            Err("token service unreachable".into())
        }
    }

    #[tokio::test]
    async fn correlation_header_is_injected_once() {
        let mut request = descriptor();
        CorrelationInterceptor
            .on_request(&mut request)
            .await
            .unwrap();
        assert_eq!(
            request.headers.get(CORRELATION_HEADER).unwrap(),
            &HeaderValue::from_static("corr-1")
        );
    }

    #[tokio::test]
    async fn existing_correlation_header_is_kept() {
        let mut request = descriptor();
        request.headers.insert(
            CORRELATION_HEADER,
            HeaderValue::from_static("caller-supplied"),
        );
        CorrelationInterceptor
            .on_request(&mut request)
            .await
            .unwrap();
        assert_eq!(
            request.headers.get(CORRELATION_HEADER).unwrap(),
            &HeaderValue::from_static("caller-supplied")
        );
    }

    #[tokio::test]
    async fn auth_interceptor_attaches_bearer_token() {
        let mut request = descriptor();
        AuthInterceptor::new(Arc::new(StaticToken::new("abc123")))
            .on_request(&mut request)
            .await
            .unwrap();
        assert_eq!(
            request.headers.get(AUTHORIZATION).unwrap(),
            &HeaderValue::from_static("Bearer abc123")
        );
    }

    #[tokio::test]
    async fn provider_failure_is_tolerated() {
        let mut request = descriptor();
        AuthInterceptor::new(Arc::new(FailingProvider))
            .on_request(&mut request)
            .await
            .expect("provider failure must not fail the request");
        assert!(request.headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn caller_supplied_authorization_wins() {
        let mut request = descriptor();
        request
            .headers
            .insert(AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        AuthInterceptor::new(Arc::new(StaticToken::new("abc123")))
            .on_request(&mut request)
            .await
            .unwrap();
        assert_eq!(
            request.headers.get(AUTHORIZATION).unwrap(),
            &HeaderValue::from_static("Basic xyz")
        );
    }

    #[test]
    fn bare_token_gains_bearer_scheme() {
        assert_eq!(
            normalize_bearer_authorization("tl_live_8f2c"),
            "Bearer tl_live_8f2c"
        );
    }

    #[test]
    fn existing_scheme_survives_any_casing() {
        assert_eq!(
            normalize_bearer_authorization("bearer tl_live_8f2c"),
            "bearer tl_live_8f2c"
        );
        assert_eq!(
            normalize_bearer_authorization("Bearer tl_live_8f2c"),
            "Bearer tl_live_8f2c"
        );
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        assert_eq!(
            normalize_bearer_authorization("  tl_live_8f2c\n"),
            "Bearer tl_live_8f2c"
        );
    }
}
