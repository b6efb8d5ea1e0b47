//! Cross-process coordination through a remote rate-limit authority.
//!
//! Several processes sharing one API identity can point at a single authority so their
//! admissions draw from the same counters. The client talks to it through the
//! [`RemoteAuthority`] trait; this module also ships the authority side ([`LocalAuthority`]), a
//! JSON wire protocol ([`wire`]) with a frame handler ([`AuthorityService`]), and an in-process
//! client adapter over Tokio channels ([`ChannelAuthority`]).
//!
//! Connectivity is best effort. When a call fails with
//! [`AuthorityError::ConnectionLost`] the [`AuthorityHandle`] marks the authority unavailable
//! and reconnects in the background on a linear backoff, while requests that allow it fall
//! back to the local cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;

use crate::backoff::Backoff;
use crate::error::AuthorityError;
use crate::headers::{BucketState, RateLimitHeaders};
use crate::lock::LockStatus;
use crate::rate_limit::RateLimitState;
use crate::route::Method;
use crate::sleeper::Sleeper;
use crate::telemetry::{ApiEvent, EventSink};

pub mod channel;
pub mod local;
pub mod service;
pub mod wire;

pub use channel::ChannelAuthority;
pub use local::LocalAuthority;
pub use service::AuthorityService;

/// Rate-limit facts a client learned from one response, pushed to the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitUpdate {
    pub method: Method,
    pub url: String,
    pub global: bool,
    pub bucket: Option<BucketState>,
    /// Milliseconds the server asked to wait.
    pub retry_after: u64,
}

impl RateLimitUpdate {
    pub fn new(method: Method, url: impl Into<String>, headers: &RateLimitHeaders) -> Self {
        Self {
            method,
            url: url.into(),
            global: headers.global(),
            bucket: headers.bucket().cloned(),
            retry_after: headers.retry_after(),
        }
    }

    /// Rebuild the headers as observed at `now` on the authority's clock.
    pub fn to_headers(&self, now: u64) -> RateLimitHeaders {
        RateLimitHeaders::new(self.global, self.bucket.clone(), self.retry_after, now)
    }
}

/// Shared admission and identify-lock service.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Admit (and count) a send, or say how long to wait.
    async fn authorize(&self, method: Method, url: &str) -> Result<RateLimitState, AuthorityError>;

    async fn update(&self, update: RateLimitUpdate) -> Result<(), AuthorityError>;

    async fn acquire_lock(
        &self,
        time_out: Duration,
        token: Option<String>,
    ) -> Result<LockStatus, AuthorityError>;

    async fn release_lock(&self, token: String) -> Result<LockStatus, AuthorityError>;

    /// Re-establish the connection. `Ok` means the authority is usable again.
    async fn reconnect(&self) -> Result<(), AuthorityError>;
}

/// A [`RemoteAuthority`] plus its availability and reconnection state.
pub struct AuthorityHandle {
    authority: Arc<dyn RemoteAuthority>,
    available: AtomicBool,
    reconnecting: AtomicBool,
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for AuthorityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityHandle")
            .field("available", &self.is_available())
            .field("reconnecting", &self.is_reconnecting())
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl AuthorityHandle {
    pub fn new(
        authority: Arc<dyn RemoteAuthority>,
        backoff: Backoff,
        sleeper: Arc<dyn Sleeper>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            authority,
            available: AtomicBool::new(true),
            reconnecting: AtomicBool::new(false),
            backoff,
            sleeper,
            sink,
        }
    }

    pub fn authority(&self) -> &Arc<dyn RemoteAuthority> {
        &self.authority
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::Acquire)
    }

    /// Mark the authority unreachable and start the reconnection loop if it is not running.
    pub fn connection_lost(self: &Arc<Self>, reason: &str) {
        self.available.store(false, Ordering::Release);
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(reason, "remote authority unavailable, reconnecting in background");
        tokio::spawn(reconnect_loop(Arc::downgrade(self)));
    }
}

async fn reconnect_loop(handle: Weak<AuthorityHandle>) {
    let mut attempt = 1usize;
    loop {
        let Some((delay, sleeper)) =
            handle.upgrade().map(|h| (h.backoff.delay(attempt), h.sleeper.clone()))
        else {
            return;
        };
        sleeper.sleep(delay).await;

        let Some(h) = handle.upgrade() else {
            return;
        };
        match h.authority.reconnect().await {
            Ok(()) => {
                h.available.store(true, Ordering::Release);
                h.reconnecting.store(false, Ordering::Release);
                tracing::info!(attempts = attempt, "remote authority reconnected");
                h.sink.emit(ApiEvent::AuthorityReconnected { attempts: attempt });
                return;
            }
            Err(err) => {
                tracing::debug!(attempt, error = %err, "remote authority reconnect failed");
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
