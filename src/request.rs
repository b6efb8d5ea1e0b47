//! One outbound call: immutable identity plus the mutable state the dispatcher tracks for it.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::ApiError;
use crate::route::{bucket_hash_key, MajorParameters, Method};

/// Per-request dispatch policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// Return a deferred result instead of waiting on any rate limit.
    pub return_on_rate_limit: bool,
    /// Return a deferred result instead of waiting on the global rate limit.
    pub return_on_global_rate_limit: bool,
    /// Give up after this many rate-limit deferrals. `None` retries indefinitely.
    pub max_rate_limit_retry: Option<u32>,
    /// Skip the remote authority for this request.
    pub local: bool,
    /// Fall back to local admission when the remote authority is unreachable.
    pub allow_fallback: bool,
    /// JSON body handed to the transport.
    pub body: Option<serde_json::Value>,
    /// Extra headers handed to the transport.
    pub headers: HashMap<String, String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            return_on_rate_limit: false,
            return_on_global_rate_limit: false,
            max_rate_limit_retry: None,
            local: false,
            allow_fallback: true,
            body: None,
            headers: HashMap::new(),
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn return_on_rate_limit(mut self, enabled: bool) -> Self {
        self.return_on_rate_limit = enabled;
        self
    }

    pub fn return_on_global_rate_limit(mut self, enabled: bool) -> Self {
        self.return_on_global_rate_limit = enabled;
        self
    }

    pub fn max_rate_limit_retry(mut self, retries: u32) -> Self {
        self.max_rate_limit_retry = Some(retries);
        self
    }

    pub fn local(mut self, enabled: bool) -> Self {
        self.local = enabled;
        self
    }

    pub fn allow_fallback(mut self, enabled: bool) -> Self {
        self.allow_fallback = enabled;
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A request moving through the dispatch pipeline.
///
/// `rate_limit_key` stays `None` until the bucket hash for this route shape is known; once set
/// it is never changed.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: String,
    top_level_resource: String,
    top_level_id: String,
    bucket_hash_key: String,
    bucket_hash: Option<String>,
    rate_limit_key: Option<String>,
    wait_until: u64,
    retries: u32,
    running: bool,
    options: RequestOptions,
}

impl Request {
    /// Build a request, deriving its major parameters and bucket-hash key from `url`.
    pub fn new(
        method: Method,
        url: impl Into<String>,
        options: RequestOptions,
    ) -> Result<Self, ApiError> {
        let url = url.into();
        let key = bucket_hash_key(method, &url)?;
        let params = MajorParameters::from_path(&url)?;
        let top_level_resource = params.top_level_resource.to_string();
        let top_level_id = params.top_level_id.to_string();
        Ok(Self {
            method,
            url,
            top_level_resource,
            top_level_id,
            bucket_hash_key: key,
            bucket_hash: None,
            rate_limit_key: None,
            wait_until: 0,
            retries: 0,
            running: false,
            options,
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn top_level_resource(&self) -> &str {
        &self.top_level_resource
    }

    pub fn top_level_id(&self) -> &str {
        &self.top_level_id
    }

    pub fn bucket_hash_key(&self) -> &str {
        &self.bucket_hash_key
    }

    pub fn bucket_hash(&self) -> Option<&str> {
        self.bucket_hash.as_deref()
    }

    pub fn rate_limit_key(&self) -> Option<&str> {
        self.rate_limit_key.as_deref()
    }

    /// Epoch millis before which the request should not be retried.
    pub fn wait_until(&self) -> u64 {
        self.wait_until
    }

    /// Rate-limit deferrals so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Record the bucket hash for this request. A key that is already assigned is kept.
    pub(crate) fn assign_bucket_hash(&mut self, bucket_hash: &str) {
        if self.rate_limit_key.is_some() {
            return;
        }
        self.rate_limit_key =
            Some(rate_limit_key(&self.top_level_resource, &self.top_level_id, bucket_hash));
        self.bucket_hash = Some(bucket_hash.to_string());
    }

    /// Push `wait_until` out to `now + wait`, never pulling it in.
    pub(crate) fn defer_until(&mut self, now: u64, wait: Duration) {
        let candidate = now.saturating_add(u64::try_from(wait.as_millis()).unwrap_or(u64::MAX));
        self.wait_until = self.wait_until.max(candidate);
    }

    pub(crate) fn record_retry(&mut self) {
        self.retries = self.retries.saturating_add(1);
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Whether the caller wants a deferred result rather than another wait.
    pub(crate) fn gives_up(&self, global: bool) -> bool {
        let opts = &self.options;
        opts.return_on_rate_limit
            || (global && opts.return_on_global_rate_limit)
            || opts.max_rate_limit_retry.is_some_and(|max| self.retries >= max)
    }
}

/// Composite key identifying one concrete rate-limit counter.
pub fn rate_limit_key(top_level_resource: &str, top_level_id: &str, bucket_hash: &str) -> String {
    format!("{top_level_resource}-{top_level_id}-{bucket_hash}")
}
