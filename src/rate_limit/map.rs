use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::state::RateLimit;
use crate::headers::BucketState;

/// Active rate limits keyed by rate-limit key, with TTL-based sweeping.
///
/// Every access refreshes an entry's deadline; an entry past its deadline is treated as absent
/// and dropped on lookup even if the sweep has not run yet.
#[derive(Debug)]
pub struct RateLimitMap {
    entries: HashMap<String, RateLimit>,
    ttl: u64,
}

impl RateLimitMap {
    /// `ttl` is the idle time in milliseconds after which an entry is swept.
    pub fn new(ttl: u64) -> Self {
        Self { entries: HashMap::new(), ttl }
    }

    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    pub fn get_mut(&mut self, key: &str, now: u64) -> Option<&mut RateLimit> {
        if self.entries.get(key).is_some_and(|rl| rl.is_expired(now)) {
            self.entries.remove(key);
            return None;
        }
        let ttl = self.ttl;
        let rl = self.entries.get_mut(key)?;
        rl.touch(now, ttl);
        Some(rl)
    }

    /// Read without refreshing the deadline.
    pub fn peek(&self, key: &str, now: u64) -> Option<&RateLimit> {
        self.entries.get(key).filter(|rl| !rl.is_expired(now))
    }

    pub fn insert(&mut self, key: impl Into<String>, rate_limit: RateLimit) -> &mut RateLimit {
        match self.entries.entry(key.into()) {
            Entry::Occupied(mut entry) => {
                entry.insert(rate_limit);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(rate_limit),
        }
    }

    /// Create the entry from `bucket`, or merge `bucket` into the existing one.
    ///
    /// `reset_timestamp` is the response's reset candidate (see
    /// [`RateLimit::assign_if_stricter`]).
    pub fn upsert(
        &mut self,
        key: &str,
        bucket: &BucketState,
        reset_timestamp: u64,
        now: u64,
    ) -> &RateLimit {
        let ttl = self.ttl;
        if self.entries.get(key).is_some_and(|rl| rl.is_expired(now)) {
            self.entries.remove(key);
        }
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                let rl = entry.into_mut();
                rl.touch(now, ttl);
                rl.assign_if_stricter(bucket, reset_timestamp, now);
                rl
            }
            Entry::Vacant(entry) => {
                entry.insert(RateLimit::from_bucket(bucket, reset_timestamp, now, ttl))
            }
        }
    }

    /// Remove every expired entry and return how many were dropped.
    pub fn sweep(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, rl| !rl.is_expired(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
