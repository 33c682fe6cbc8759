//! `trackline-http` is the shared async HTTP client core for the Trackline
//! music-production API.
//!
//! The crate wraps a `reqwest` transport with the cross-cutting behavior
//! every Trackline API wrapper needs:
//! - a request pipeline with ordered [`RequestInterceptor`] /
//!   [`ResponseInterceptor`] chains (correlation ids, bearer auth, timing)
//! - bounded retry with exponential backoff and jitter ([`RetryConfig`])
//! - a per-client [`CircuitBreaker`] that fails fast when the transport is
//!   structurally broken
//! - a classified error taxonomy ([`ErrorKind`]) carrying correlation
//!   metadata outside the display path
//!
//! Entity-specific CRUD wrappers build on [`ApiClient::request`] and the
//! verb helpers; they live in their own crates.

mod breaker;
mod client;
mod config;
mod error;
mod interceptor;
mod request;
mod response;
mod retry;

pub use breaker::{CircuitBreaker, CircuitState};
pub use client::ApiClient;
pub use config::{
    AnalyticsHook, BoxError, ClientConfig, ErrorConfig, NoToken, NotifyHook, StaticToken,
    TokenProvider, TokenRefresher,
};
pub use error::{ClientError, ErrorKind, ErrorMeta};
pub use interceptor::{
    AuthInterceptor, CorrelationInterceptor, RequestInterceptor, ResponseInterceptor,
    TimingInterceptor, CORRELATION_HEADER,
};
pub use request::{
    build_url, Body, Query, QueryValue, RequestDescriptor, RequestOptions, UploadFile, UploadForm,
};
pub use response::{HttpResponse, Payload};
pub use retry::RetryConfig;

// Re-exported so callers do not need a direct `reqwest` dependency for the
// types that appear in this crate's API surface.
pub use reqwest::{header, Method, StatusCode, Url};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, ClientError>;
