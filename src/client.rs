use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use tokio::time::sleep;
use uuid::Uuid;

use crate::interceptor::{
    normalize_bearer_authorization, AuthInterceptor, CorrelationInterceptor, TimingInterceptor,
};
use crate::request::build_url;
use crate::response::{error_envelope, parse_payload};
use crate::{
    Body, CircuitBreaker, ClientConfig, ClientError, ErrorKind, ErrorMeta, HttpResponse, Payload,
    RequestDescriptor, RequestInterceptor, RequestOptions, Result, ResponseInterceptor,
    StaticToken, UploadFile,
};

/// Shared HTTP client for the Trackline API.
///
/// One instance owns its configuration, interceptor chains and circuit
/// breaker; it is cheap to share behind an `Arc`. Each call builds a fresh
/// [`RequestDescriptor`], so no request-level state crosses concurrent
/// calls.
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
    breaker: CircuitBreaker,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url)
            .field("breaker", &self.breaker.state())
            .field("request_interceptors", &self.request_interceptors.len())
            .field("response_interceptors", &self.response_interceptors.len())
            .finish()
    }
}

impl ApiClient {
    /// Creates a client, running the construction-time self-check on the
    /// configuration. Built-in interceptors are registered here, ahead of
    /// any caller-registered ones: correlation, then auth on the request
    /// side; timing on the response side.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let breaker = CircuitBreaker::new(
            config.error_config.breaker_threshold,
            Duration::from_millis(config.error_config.breaker_reset_ms),
        );

        // The correlation interceptor is inert when the descriptor carries
        // no id; `enable_correlation` only gates id generation, so a
        // caller-supplied id is always sent.
        let request_interceptors: Vec<Arc<dyn RequestInterceptor>> = vec![
            Arc::new(CorrelationInterceptor),
            Arc::new(AuthInterceptor::new(config.token_provider.clone())),
        ];

        let response_interceptors: Vec<Arc<dyn ResponseInterceptor>> =
            vec![Arc::new(TimingInterceptor)];

        Ok(Self {
            http: reqwest::Client::new(),
            config,
            breaker,
            request_interceptors,
            response_interceptors,
        })
    }

    /// Creates a client from environment variables.
    ///
    /// Reads `TRACKLINE_API_URL` (required) and `TRACKLINE_API_TOKEN`
    /// (optional, used as a static bearer token).
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("TRACKLINE_API_URL").map_err(|_| {
            ClientError::invalid_argument("missing TRACKLINE_API_URL environment variable")
        })?;
        if base_url.trim().is_empty() {
            return Err(ClientError::invalid_argument(
                "TRACKLINE_API_URL is set but empty",
            ));
        }
        let mut config = ClientConfig::new(base_url);
        if let Ok(token) = std::env::var("TRACKLINE_API_TOKEN") {
            if !token.trim().is_empty() {
                config = config.with_token_provider(Arc::new(StaticToken::new(token)));
            }
        }
        Self::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Breaker owned by this client. Exposed for startup validation to
    /// force-open on a known structural defect.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Registers a request interceptor, invoked after the built-ins in
    /// registration order. Setup-time only.
    pub fn add_request_interceptor(&mut self, interceptor: Arc<dyn RequestInterceptor>) {
        self.request_interceptors.push(interceptor);
    }

    /// Registers a response interceptor, invoked after the built-ins in
    /// registration order on both the success and error paths.
    pub fn add_response_interceptor(&mut self, interceptor: Arc<dyn ResponseInterceptor>) {
        self.response_interceptors.push(interceptor);
    }

    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<Payload> {
        self.request(Method::GET, path, None, options).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<Payload> {
        self.request(Method::POST, path, body, options).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<Payload> {
        self.request(Method::PUT, path, body, options).await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<Payload> {
        self.request(Method::PATCH, path, body, options).await
    }

    pub async fn delete(
        &self,
        path: &str,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<Payload> {
        self.request(Method::DELETE, path, body, options).await
    }

    pub async fn head(&self, path: &str, options: RequestOptions) -> Result<Payload> {
        self.request(Method::HEAD, path, None, options).await
    }

    pub async fn options_request(&self, path: &str, options: RequestOptions) -> Result<Payload> {
        self.request(Method::OPTIONS, path, None, options).await
    }

    /// Multipart upload. No explicit `Content-Type` is set; the transport
    /// chooses the boundary.
    pub async fn upload(
        &self,
        path: &str,
        files: Vec<UploadFile>,
        fields: Vec<(String, String)>,
        options: RequestOptions,
    ) -> Result<Payload> {
        let form = crate::UploadForm { files, fields };
        self.request(Method::POST, path, Some(Body::Multipart(form)), options)
            .await
    }

    /// GET with the JSON payload deserialized into a concrete type.
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T> {
        self.get(path, options).await?.json()
    }

    /// POST a serializable body, deserializing the JSON response.
    pub async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T> {
        self.post(path, Some(Body::json(body)?), options)
            .await?
            .json()
    }

    /// Core request pipeline: validate → build descriptor → request
    /// interceptors → retry loop around the transport → response
    /// interceptors → parse.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<Payload> {
        let url = build_url(&self.config.base_url, path, &options.query)?;

        // GET/HEAD/OPTIONS never carry a body even if one was passed.
        let body = if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
            None
        } else {
            body
        };

        let correlation_id = if self.config.enable_correlation {
            Some(
                options
                    .correlation_id
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            )
        } else {
            options.correlation_id
        };

        let mut headers = self.config.default_headers.clone();
        for (name, value) in options.headers.iter() {
            headers.insert(name, value.clone());
        }

        let mut descriptor = RequestDescriptor {
            method,
            url,
            headers,
            body,
            timeout_ms: options.timeout_ms.unwrap_or(self.config.timeout_ms),
            correlation_id,
            started_at: Instant::now(),
            signal: options.signal,
        };

        for interceptor in &self.request_interceptors {
            if let Err(err) = interceptor.on_request(&mut descriptor).await {
                return Err(self.fail(&descriptor, err).await);
            }
        }

        let retry_enabled = self.config.enable_retry && !options.disable_retry;
        match self.send_with_retry(&mut descriptor, retry_enabled).await {
            Ok(response) => {
                for interceptor in &self.response_interceptors {
                    if let Err(err) = interceptor.on_response(&descriptor, &response).await {
                        return Err(self.fail(&descriptor, err).await);
                    }
                }
                match parse_payload(&response) {
                    Ok(payload) => Ok(payload),
                    Err(err) => Err(self.fail(&descriptor, err).await),
                }
            }
            Err(err) => Err(self.fail(&descriptor, err).await),
        }
    }

    /// Transport attempt loop. The breaker gates every attempt; only
    /// retryable errors re-enter the loop, with backoff. The 401
    /// refresh-and-reissue path is bounded per logical request and does not
    /// consume backoff attempts.
    async fn send_with_retry(
        &self,
        descriptor: &mut RequestDescriptor,
        retry_enabled: bool,
    ) -> Result<HttpResponse> {
        let max_retries = if retry_enabled {
            self.config.retry.max_retries
        } else {
            0
        };
        let mut attempt = 0usize;
        let mut auth_retries = 0u32;

        loop {
            self.breaker.check()?;

            match self.dispatch(descriptor).await {
                Ok(response) => {
                    // The transport worked; the client is structurally fine
                    // regardless of the HTTP status.
                    self.breaker.record_success();

                    if response.status.is_success() {
                        return Ok(response);
                    }

                    if response.status == StatusCode::UNAUTHORIZED
                        && auth_retries < self.config.error_config.max_auth_retries
                    {
                        if let Some(refresher) = &self.config.error_config.refresh_token {
                            auth_retries += 1;
                            match refresher.refresh().await {
                                Ok(Some(token)) => {
                                    let authorization = normalize_bearer_authorization(&token);
                                    if let Ok(value) = HeaderValue::from_str(&authorization) {
                                        descriptor.headers.insert(AUTHORIZATION, value);
                                        tracing::debug!(
                                            url = %descriptor.url,
                                            "token refreshed after 401, reissuing request",
                                        );
                                        continue;
                                    }
                                }
                                Ok(None) => {}
                                Err(err) => {
                                    tracing::warn!("token refresh failed: {err}");
                                }
                            }
                        }
                    }

                    let (message, code, details) =
                        error_envelope(response.status.as_u16(), &response.body);
                    let err: ClientError = ErrorKind::Status {
                        status: response.status.as_u16(),
                        message,
                        code,
                        details,
                    }
                    .into();

                    if err.is_retryable() && attempt < max_retries {
                        self.wait_before_retry(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
                Err(err) => {
                    if matches!(err.kind(), ErrorKind::Network(_)) {
                        self.breaker.record_failure();
                    }
                    if err.is_retryable() && attempt < max_retries {
                        self.wait_before_retry(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Single transport attempt: build the `reqwest` request from the
    /// descriptor, race it against the cancellation signal, and read the
    /// response fully.
    async fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<HttpResponse> {
        let mut headers = descriptor.headers.clone();
        if matches!(descriptor.body, Some(Body::Multipart(_))) {
            // The transport must set the multipart boundary itself.
            headers.remove(CONTENT_TYPE);
        }

        let mut builder = self
            .http
            .request(descriptor.method.clone(), descriptor.url.clone())
            .timeout(Duration::from_millis(descriptor.timeout_ms))
            .headers(headers);

        builder = match &descriptor.body {
            Some(Body::Json(value)) => builder.json(value),
            Some(Body::Text(text)) => builder.body(text.clone()),
            Some(Body::Multipart(form)) => builder.multipart(form.to_form()?),
            None => builder,
        };

        let send = builder.send();
        let response = match &descriptor.signal {
            Some(signal) => tokio::select! {
                _ = signal.cancelled() => return Err(ErrorKind::Cancelled.into()),
                outcome = send => outcome,
            },
            None => send.await,
        };
        let response = response.map_err(|err| self.classify_transport(err, descriptor))?;

        let status = response.status();
        let response_headers = response.headers().clone();
        let body = if status == StatusCode::NO_CONTENT {
            Bytes::new()
        } else {
            let read = response.bytes();
            let bytes = match &descriptor.signal {
                Some(signal) => tokio::select! {
                    _ = signal.cancelled() => return Err(ErrorKind::Cancelled.into()),
                    outcome = read => outcome,
                },
                None => read.await,
            };
            bytes.map_err(|err| self.classify_transport(err, descriptor))?
        };

        Ok(HttpResponse {
            status,
            headers: response_headers,
            body,
            elapsed: descriptor.started_at.elapsed(),
        })
    }

    fn classify_transport(
        &self,
        err: reqwest::Error,
        descriptor: &RequestDescriptor,
    ) -> ClientError {
        if err.is_timeout() {
            ErrorKind::Timeout {
                timeout_ms: descriptor.timeout_ms,
            }
            .into()
        } else {
            ErrorKind::Network(err).into()
        }
    }

    async fn wait_before_retry(&self, attempt: usize) {
        let delay = self.config.retry.backoff_delay(attempt);
        tracing::debug!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "retrying request after backoff",
        );
        sleep(delay).await;
    }

    /// Error exit: attach correlation metadata, run the error hooks, log,
    /// and hand the classified error back to the caller.
    async fn fail(&self, descriptor: &RequestDescriptor, err: ClientError) -> ClientError {
        let err = err.with_meta(ErrorMeta {
            method: descriptor.method.clone(),
            url: descriptor.url.to_string(),
            correlation_id: descriptor.correlation_id.clone(),
            elapsed: descriptor.started_at.elapsed(),
        });
        for interceptor in &self.response_interceptors {
            interceptor.on_error(descriptor, &err).await;
        }
        if let Some(notify) = &self.config.error_config.notify {
            notify(&err);
        }
        if let Some(analytics) = &self.config.error_config.analytics {
            analytics(&err);
        }
        if self.config.error_config.log_errors {
            tracing::error!(
                method = %descriptor.method,
                url = %descriptor.url,
                correlation_id = descriptor.correlation_id.as_deref(),
                error = %err,
                "request failed",
            );
        }
        err
    }
}
