//! The injected wire client.
//!
//! The pipeline never speaks HTTP itself: callers hand [`Api`](crate::Api) a [`Transport`] that
//! turns a [`TransportRequest`] into an [`ApiResponse`]. Header names in the response are
//! expected in lowercase.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::route::Method;

/// Status code the server uses for rate-limited responses.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// What the transport is asked to send.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    /// Path with its query string, exactly as the caller supplied it.
    pub url: String,
    pub body: Option<serde_json::Value>,
    pub headers: HashMap<String, String>,
}

/// A response as seen by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Lowercase header names.
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn new(status: u16) -> Self {
        Self { status, headers: HashMap::new(), body: serde_json::Value::Null }
    }

    /// Add a header, lowercasing its name.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == TOO_MANY_REQUESTS
    }
}

/// Sends one request and returns the server's response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<ApiResponse, TransportError>;
}

/// Future returned by closures wrapped in [`FnTransport`].
pub type BoxedSend =
    Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + Send + 'static>>;

/// Adapts an async closure into a [`Transport`].
pub struct FnTransport<F> {
    f: F,
}

impl<F> FnTransport<F>
where
    F: Fn(TransportRequest) -> BoxedSend + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnTransport<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Transport for FnTransport<F>
where
    F: Fn(TransportRequest) -> BoxedSend + Send + Sync,
{
    async fn send(&self, request: TransportRequest) -> Result<ApiResponse, TransportError> {
        (self.f)(request).await
    }
}
