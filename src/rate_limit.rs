//! Rate-limit bookkeeping.
//!
//! This module provides the building blocks of the admission decision:
//! - [`RateLimit`]: live counter and reset state for one rate-limit key.
//! - [`RateLimitTemplate`]: the conservative shape of a bucket, reused for resource instances
//!   that have never been contacted.
//! - [`RateLimitMap`] / [`RateLimitTemplateMap`]: the stores behind them.
//! - [`RateLimitCache`]: the orchestrator the dispatcher and the authority talk to.
//!
//! # Architecture
//!
//! Bucket identity is unknown until a response reveals it, so the cache resolves a request in
//! stages: the route-shape key maps to a learned bucket hash, the bucket hash plus the major
//! parameters form the rate-limit key, and the rate-limit key finds (or, from the bucket's
//! template, synthesizes) the live counter. A request whose route shape was never seen has no
//! state at any stage and is admitted straight away.

use std::time::Duration;

pub mod cache;
pub mod map;
pub mod state;
pub mod template;

pub use cache::{RateLimitCache, RateLimitSnapshot, SweeperHandle};
pub use map::RateLimitMap;
pub use state::RateLimit;
pub use template::{RateLimitTemplate, RateLimitTemplateMap};

/// The outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitState {
    /// How long the caller must wait. Zero means admitted.
    pub wait_for: Duration,
    /// Whether the wait comes from the global limit rather than a bucket.
    pub global: bool,
}

impl RateLimitState {
    pub fn admitted() -> Self {
        Self::default()
    }

    pub fn limited(wait_for: Duration, global: bool) -> Self {
        Self { wait_for, global }
    }

    pub fn is_admitted(&self) -> bool {
        self.wait_for.is_zero()
    }
}
