use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::map::RateLimitMap;
use super::template::{RateLimitTemplate, RateLimitTemplateMap};
use super::RateLimitState;
use crate::clock::Clock;
use crate::config::ApiConfig;
use crate::headers::RateLimitHeaders;
use crate::request::Request;
use crate::sleeper::Sleeper;
use crate::telemetry::{ApiEvent, EventSink};

/// Point-in-time view of one rate limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub bucket_hash: String,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch millis at which the current window ends.
    pub reset_timestamp: u64,
}

#[derive(Debug)]
struct GlobalRateLimit {
    remaining: u32,
    reset_timestamp: u64,
    max: u32,
    window: u64,
    padding: u64,
}

impl GlobalRateLimit {
    fn reset_if_elapsed(&mut self, now: u64) {
        if now >= self.reset_timestamp {
            self.remaining = self.max;
            self.reset_timestamp = now.saturating_add(self.window).saturating_add(self.padding);
        }
    }

    fn wait_for(&mut self, now: u64) -> Option<Duration> {
        self.reset_if_elapsed(now);
        (self.remaining == 0).then(|| Duration::from_millis(self.reset_timestamp - now))
    }

    fn decrement(&mut self, now: u64) {
        self.reset_if_elapsed(now);
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// The server reported the global limit as hit; nothing goes out until `until`.
    fn exhaust_until(&mut self, until: u64) {
        self.remaining = 0;
        self.reset_timestamp = self.reset_timestamp.max(until);
    }
}

#[derive(Debug)]
struct CacheState {
    global: GlobalRateLimit,
    /// Route-shape key to server bucket hash.
    bucket_hashes: HashMap<String, String>,
    rate_limits: RateLimitMap,
    templates: RateLimitTemplateMap,
}

/// Shared rate-limit state and the admission decision built on it.
///
/// Every check-then-decrement happens under one lock, so concurrent callers can never admit more
/// sends than a bucket (or the global limit) allows. The lock is never held across an `.await`.
#[derive(Debug)]
pub struct RateLimitCache {
    state: Mutex<CacheState>,
    clock: Arc<dyn Clock>,
}

impl RateLimitCache {
    pub fn new(config: &ApiConfig, clock: Arc<dyn Clock>) -> Self {
        let global = GlobalRateLimit {
            remaining: config.global_rate_limit_max,
            reset_timestamp: 0,
            max: config.global_rate_limit_max,
            window: config.global_rate_limit_window_ms,
            padding: config.global_rate_limit_padding_ms,
        };
        Self {
            state: Mutex::new(CacheState {
                global,
                bucket_hashes: HashMap::new(),
                rate_limits: RateLimitMap::new(config.sweep_ttl_ms),
                templates: RateLimitTemplateMap::new(),
            }),
            clock,
        }
    }

    /// Current time according to the injected clock.
    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Decide whether `request` may be sent now, without consuming anything.
    ///
    /// Assigns the request's rate-limit key if its route shape has a known bucket.
    pub fn is_rate_limited(&self, request: &mut Request) -> RateLimitState {
        let now = self.now();
        let mut guard = self.lock();
        Self::check(&mut guard, request, now, false)
    }

    /// Decide whether `request` may be sent now and, if so, consume one send from its bucket and
    /// from the global limit.
    pub fn authorize_request_from_client(&self, request: &mut Request) -> RateLimitState {
        let now = self.now();
        let mut guard = self.lock();
        let decision = Self::check(&mut guard, request, now, true);
        tracing::trace!(
            url = request.url(),
            key = request.rate_limit_key(),
            wait_ms = decision.wait_for.as_millis() as u64,
            global = decision.global,
            "admission decision"
        );
        decision
    }

    /// Learn from the rate-limit headers of a response to `request`.
    pub fn update(&self, request: &mut Request, headers: &RateLimitHeaders) {
        let now = self.now();
        let mut guard = self.lock();
        let state = &mut *guard;

        if headers.global() {
            state.global.exhaust_until(headers.reset_timestamp());
        }
        let Some(bucket) = headers.bucket() else {
            return;
        };
        state
            .bucket_hashes
            .insert(request.bucket_hash_key().to_string(), bucket.bucket_hash.clone());
        request.assign_bucket_hash(&bucket.bucket_hash);
        state.templates.upsert(bucket);
        if let Some(key) = request.rate_limit_key() {
            state.rate_limits.upsert(key, bucket, headers.reset_timestamp(), now);
        }
    }

    /// Consume one send from the global limit, opening a new window first if the last one ended.
    pub fn decrement_global_remaining(&self) {
        let now = self.now();
        self.lock().global.decrement(now);
    }

    pub fn rate_limit(&self, rate_limit_key: &str) -> Option<RateLimitSnapshot> {
        let now = self.now();
        let guard = self.lock();
        guard.rate_limits.peek(rate_limit_key, now).map(|rl| RateLimitSnapshot {
            bucket_hash: rl.bucket_hash().to_string(),
            limit: rl.limit(),
            remaining: rl.remaining(),
            reset_timestamp: rl.reset_timestamp(),
        })
    }

    pub fn template(&self, bucket_hash: &str) -> Option<RateLimitTemplate> {
        self.lock().templates.get(bucket_hash).copied()
    }

    /// Bucket hash learned for a route-shape key.
    pub fn bucket_hash(&self, bucket_hash_key: &str) -> Option<String> {
        self.lock().bucket_hashes.get(bucket_hash_key).cloned()
    }

    pub fn global_remaining(&self) -> u32 {
        let now = self.now();
        let mut guard = self.lock();
        guard.global.reset_if_elapsed(now);
        guard.global.remaining
    }

    /// Drop every rate limit idle for longer than the sweep TTL.
    pub fn sweep(&self) -> usize {
        let now = self.now();
        self.lock().rate_limits.sweep(now)
    }

    /// Number of live rate limits.
    pub fn len(&self) -> usize {
        self.lock().rate_limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`sweep`](Self::sweep) every `interval` on a background task.
    ///
    /// The task holds a weak reference and exits once the cache is dropped. Dropping the
    /// returned handle stops it as well.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        sleeper: Arc<dyn Sleeper>,
        sink: Arc<dyn EventSink>,
    ) -> SweeperHandle {
        let cache = Arc::downgrade(self);
        let task = tokio::spawn(sweep_loop(cache, interval, sleeper, sink));
        SweeperHandle { task }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(
        state: &mut CacheState,
        request: &mut Request,
        now: u64,
        commit: bool,
    ) -> RateLimitState {
        if let Some(wait) = state.global.wait_for(now) {
            return RateLimitState::limited(wait, true);
        }

        if request.rate_limit_key().is_none() {
            if let Some(hash) = state.bucket_hashes.get(request.bucket_hash_key()) {
                request.assign_bucket_hash(hash);
            }
        }
        let (Some(key), Some(bucket_hash)) = (request.rate_limit_key(), request.bucket_hash())
        else {
            if commit {
                state.global.decrement(now);
            }
            return RateLimitState::admitted();
        };

        if state.rate_limits.get_mut(key, now).is_none() {
            let Some(template) = state.templates.get(bucket_hash).copied() else {
                if commit {
                    state.global.decrement(now);
                }
                return RateLimitState::admitted();
            };
            let assumed =
                template.create_assumed_rate_limit(bucket_hash, now, state.rate_limits.ttl());
            state.rate_limits.insert(key, assumed);
        }

        let Some(rate_limit) = state.rate_limits.get_mut(key, now) else {
            return RateLimitState::admitted();
        };
        if rate_limit.is_rate_limited(now) {
            let wait = Duration::from_millis(rate_limit.reset_after(now));
            return RateLimitState::limited(wait, false);
        }
        if commit {
            rate_limit.decrement_remaining();
            state.global.decrement(now);
        }
        RateLimitState::admitted()
    }
}

async fn sweep_loop(
    cache: Weak<RateLimitCache>,
    interval: Duration,
    sleeper: Arc<dyn Sleeper>,
    sink: Arc<dyn EventSink>,
) {
    loop {
        sleeper.sleep(interval).await;
        tokio::task::yield_now().await;
        let Some(cache) = cache.upgrade() else {
            break;
        };
        let removed = cache.sweep();
        if removed > 0 {
            sink.emit(ApiEvent::Swept { removed, remaining: cache.len() });
        }
    }
}

/// Owns the background sweep task; dropping it stops the task.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Abort the sweep task. Dropping the handle does the same.
    pub fn stop(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
