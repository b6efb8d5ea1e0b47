use crate::headers::BucketState;

/// Live counter and reset state for one `(resource, resource id, bucket)` triple.
///
/// All timestamps are epoch milliseconds supplied by the caller; nothing here reads a clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    remaining: u32,
    limit: u32,
    reset_timestamp: u64,
    window: u64,
    expires: u64,
    bucket_hash: String,
    allow_header_override: bool,
}

impl RateLimit {
    /// A fresh limit with `remaining` sends left, resetting `reset_after` ms from `now`.
    pub fn new(
        bucket_hash: impl Into<String>,
        limit: u32,
        remaining: u32,
        reset_after: u64,
        now: u64,
        ttl: u64,
    ) -> Self {
        Self {
            remaining: remaining.min(limit),
            limit,
            reset_timestamp: now.saturating_add(reset_after),
            window: reset_after,
            expires: now.saturating_add(ttl),
            bucket_hash: bucket_hash.into(),
            allow_header_override: true,
        }
    }

    /// A fresh limit from response state. `reset_timestamp` is the response's own reset
    /// candidate and only ever pushes the reset later than `now + reset_after`.
    pub fn from_bucket(bucket: &BucketState, reset_timestamp: u64, now: u64, ttl: u64) -> Self {
        let mut rate_limit = Self::new(
            bucket.bucket_hash.clone(),
            bucket.limit,
            bucket.remaining,
            bucket.reset_after,
            now,
            ttl,
        );
        rate_limit.reset_timestamp = rate_limit.reset_timestamp.max(reset_timestamp);
        rate_limit
    }

    /// Whether a send must wait. Opens the next window first if the current one has elapsed.
    pub fn is_rate_limited(&mut self, now: u64) -> bool {
        self.reset_if_elapsed(now);
        self.remaining == 0
    }

    /// Milliseconds until the current window resets, floored at zero.
    pub fn reset_after(&self, now: u64) -> u64 {
        self.reset_timestamp.saturating_sub(now)
    }

    pub fn decrement_remaining(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Merge a response into this limit.
    ///
    /// The first merge of each window takes the server's values outright. Later merges only
    /// tighten: lower remaining, later reset, lower limit.
    ///
    /// `reset_timestamp` is the response's reset candidate, which may sit past
    /// `now + bucket.reset_after` when a 429 carries a longer retry hint. The window length
    /// still follows `bucket.reset_after`.
    pub fn assign_if_stricter(&mut self, bucket: &BucketState, reset_timestamp: u64, now: u64) {
        self.reset_if_elapsed(now);
        let reset_timestamp = reset_timestamp.max(now.saturating_add(bucket.reset_after));
        self.window = self.window.max(bucket.reset_after);

        if self.allow_header_override {
            self.limit = bucket.limit;
            self.remaining = bucket.remaining.min(bucket.limit);
            self.reset_timestamp = reset_timestamp;
            self.allow_header_override = false;
            return;
        }

        self.limit = self.limit.min(bucket.limit);
        self.remaining = self.remaining.min(bucket.remaining).min(self.limit);
        self.reset_timestamp = self.reset_timestamp.max(reset_timestamp);
    }

    /// Extend the sweep deadline to `now + ttl`.
    pub(crate) fn touch(&mut self, now: u64, ttl: u64) {
        self.expires = now.saturating_add(ttl);
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn reset_timestamp(&self) -> u64 {
        self.reset_timestamp
    }

    /// Length of the window opened after a natural reset.
    pub fn window(&self) -> u64 {
        self.window
    }

    pub fn expires(&self) -> u64 {
        self.expires
    }

    /// Bucket whose template this limit belongs to.
    pub fn bucket_hash(&self) -> &str {
        &self.bucket_hash
    }

    pub fn allow_header_override(&self) -> bool {
        self.allow_header_override
    }

    fn reset_if_elapsed(&mut self, now: u64) {
        if now < self.reset_timestamp {
            return;
        }
        self.remaining = self.limit;
        self.reset_timestamp = now.saturating_add(self.window);
        self.allow_header_override = true;
    }
}
