//! Rate-limit facts extracted from one response.
//!
//! Header values arrive in seconds (possibly fractional); everything here is normalized to
//! milliseconds. The retry delay is the largest of the header reset-after, the `retry-after`
//! header and a 429 body's `retry_after`, since sub-limits can be stricter than the bucket's
//! nominal window.

use crate::transport::ApiResponse;

pub const HEADER_GLOBAL: &str = "x-ratelimit-global";
pub const HEADER_BUCKET: &str = "x-ratelimit-bucket";
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// The per-bucket part of a response, present only when all four bucket headers parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketState {
    pub bucket_hash: String,
    pub limit: u32,
    pub remaining: u32,
    /// Milliseconds until the bucket resets.
    pub reset_after: u64,
}

/// Normalized rate-limit information from one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    global: bool,
    bucket: Option<BucketState>,
    retry_after: u64,
    reset_timestamp: u64,
}

impl RateLimitHeaders {
    /// Assemble headers from already-normalized values.
    ///
    /// `retry_after` is raised to the bucket's reset-after if that is larger.
    pub fn new(global: bool, bucket: Option<BucketState>, retry_after: u64, now: u64) -> Self {
        let retry_after = bucket.as_ref().map_or(retry_after, |b| b.reset_after.max(retry_after));
        Self { global, bucket, retry_after, reset_timestamp: now.saturating_add(retry_after) }
    }

    /// Parse the rate-limit headers (and, for a 429, the body) of `response`.
    pub fn from_response(response: &ApiResponse, now: u64) -> Self {
        let body_global = response.body.get("global").and_then(|v| v.as_bool()).unwrap_or(false);
        let global = response
            .header(HEADER_GLOBAL)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
            || body_global;

        let bucket = parse_bucket(response);
        let header_retry = response.header(HEADER_RETRY_AFTER).and_then(seconds_to_millis);
        let body_retry = if response.is_rate_limited() {
            response.body.get("retry_after").and_then(json_seconds_to_millis)
        } else {
            None
        };
        let retry_after = header_retry.unwrap_or(0).max(body_retry.unwrap_or(0));
        Self::new(global, bucket, retry_after, now)
    }

    pub fn global(&self) -> bool {
        self.global
    }

    pub fn bucket(&self) -> Option<&BucketState> {
        self.bucket.as_ref()
    }

    pub fn bucket_hash(&self) -> Option<&str> {
        self.bucket.as_ref().map(|b| b.bucket_hash.as_str())
    }

    /// Milliseconds the server asked us to wait.
    pub fn retry_after(&self) -> u64 {
        self.retry_after
    }

    /// Epoch millis after which the limit described here no longer applies.
    pub fn reset_timestamp(&self) -> u64 {
        self.reset_timestamp
    }
}

fn parse_bucket(response: &ApiResponse) -> Option<BucketState> {
    let bucket_hash = response.header(HEADER_BUCKET).filter(|b| !b.is_empty())?;
    let limit = response.header(HEADER_LIMIT)?.trim().parse().ok()?;
    let remaining = response.header(HEADER_REMAINING)?.trim().parse().ok()?;
    let reset_after = seconds_to_millis(response.header(HEADER_RESET_AFTER)?)?;
    Some(BucketState { bucket_hash: bucket_hash.to_string(), limit, remaining, reset_after })
}

fn seconds_to_millis(raw: &str) -> Option<u64> {
    raw.trim().parse::<f64>().ok().and_then(float_seconds_to_millis)
}

fn json_seconds_to_millis(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().and_then(float_seconds_to_millis),
        serde_json::Value::String(s) => seconds_to_millis(s),
        _ => None,
    }
}

fn float_seconds_to_millis(secs: f64) -> Option<u64> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let millis = (secs * 1000.0).ceil();
    Some(if millis >= u64::MAX as f64 { u64::MAX } else { millis as u64 })
}
