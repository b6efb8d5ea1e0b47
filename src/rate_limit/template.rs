use std::collections::HashMap;

use super::state::RateLimit;
use crate::headers::BucketState;

/// Conservative shape of a bucket, shared by every resource instance routed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitTemplate {
    /// Smallest limit ever observed.
    pub limit: u32,
    /// Largest reset-after ever observed, in milliseconds.
    pub reset_after: u64,
}

impl RateLimitTemplate {
    pub fn from_bucket(bucket: &BucketState) -> Self {
        Self { limit: bucket.limit, reset_after: bucket.reset_after }
    }

    fn tighten(&mut self, bucket: &BucketState) {
        self.limit = self.limit.min(bucket.limit);
        self.reset_after = self.reset_after.max(bucket.reset_after);
    }

    /// Seed a limit for a resource instance that has no history yet.
    pub fn create_assumed_rate_limit(&self, bucket_hash: &str, now: u64, ttl: u64) -> RateLimit {
        RateLimit::new(bucket_hash, self.limit, self.limit, self.reset_after, now, ttl)
    }
}

/// Templates keyed by bucket hash.
#[derive(Debug, Default)]
pub struct RateLimitTemplateMap {
    templates: HashMap<String, RateLimitTemplate>,
}

impl RateLimitTemplateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket_hash: &str) -> Option<&RateLimitTemplate> {
        self.templates.get(bucket_hash)
    }

    /// Create the template for `bucket.bucket_hash`, or tighten the existing one.
    pub fn upsert(&mut self, bucket: &BucketState) -> RateLimitTemplate {
        *self
            .templates
            .entry(bucket.bucket_hash.clone())
            .and_modify(|t| t.tighten(bucket))
            .or_insert_with(|| RateLimitTemplate::from_bucket(bucket))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
