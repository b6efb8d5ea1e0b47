//! Expiring token lock used to serialize session identification across processes.
//!
//! A holder keeps the lock until it releases it or its `time_out` elapses, whichever comes
//! first. Re-acquiring with the same token extends the hold.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// Result of an acquire or release attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    pub success: bool,
    /// Token the caller holds (or tried to use).
    pub token: String,
    /// Why the attempt failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LockStatus {
    fn granted(token: String) -> Self {
        Self { success: true, token, message: None }
    }

    fn denied(token: String, message: impl Into<String>) -> Self {
        Self { success: false, token, message: Some(message.into()) }
    }
}

#[derive(Debug)]
struct Holder {
    token: String,
    expires_at: u64,
}

#[derive(Debug)]
pub struct IdentifyLock {
    holder: Mutex<Option<Holder>>,
    clock: Arc<dyn Clock>,
}

impl IdentifyLock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { holder: Mutex::new(None), clock }
    }

    /// Take the lock for `time_out`. A fresh v4 token is generated when `token` is `None`.
    pub fn acquire(&self, time_out: Duration, token: Option<&str>) -> LockStatus {
        let token = token.map_or_else(new_token, str::to_string);
        let now = self.clock.now_millis();
        let mut holder = self.lock();
        if let Some(current) = holder.as_ref() {
            if current.token != token && now < current.expires_at {
                return LockStatus::denied(token, "identify lock is held by another token");
            }
        }
        let ttl = u64::try_from(time_out.as_millis()).unwrap_or(u64::MAX);
        *holder = Some(Holder { token: token.clone(), expires_at: now.saturating_add(ttl) });
        tracing::debug!(token = %token, ttl_ms = ttl, "identify lock acquired");
        LockStatus::granted(token)
    }

    /// Release the lock. Only the current holder can release it.
    pub fn release(&self, token: &str) -> LockStatus {
        let now = self.clock.now_millis();
        let mut holder = self.lock();
        match holder.as_ref() {
            Some(current) if current.token == token && now < current.expires_at => {
                *holder = None;
                tracing::debug!(token, "identify lock released");
                LockStatus::granted(token.to_string())
            }
            _ => LockStatus::denied(token.to_string(), "token does not hold the identify lock"),
        }
    }

    /// Token of the current unexpired holder.
    pub fn holder(&self) -> Option<String> {
        let now = self.clock.now_millis();
        self.lock().as_ref().filter(|h| now < h.expires_at).map(|h| h.token.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Holder>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn new_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn lock() -> (ManualClock, IdentifyLock) {
        let clock = ManualClock::new(0);
        let lock = IdentifyLock::new(Arc::new(clock.clone()));
        (clock, lock)
    }

    #[test]
    fn second_token_is_denied_while_held() {
        let (_clock, lock) = lock();
        assert!(lock.acquire(Duration::from_secs(5), Some("a")).success);
        let denied = lock.acquire(Duration::from_secs(5), Some("b"));
        assert!(!denied.success);
        assert!(denied.message.is_some());
        assert_eq!(lock.holder().as_deref(), Some("a"));
    }

    #[test]
    fn same_token_reacquires() {
        let (_clock, lock) = lock();
        assert!(lock.acquire(Duration::from_secs(5), Some("a")).success);
        assert!(lock.acquire(Duration::from_secs(5), Some("a")).success);
    }

    #[test]
    fn expired_lock_can_be_taken() {
        let (clock, lock) = lock();
        lock.acquire(Duration::from_secs(5), Some("a"));
        clock.advance(5_000);
        assert!(lock.holder().is_none());
        assert!(lock.acquire(Duration::from_secs(5), Some("b")).success);
    }

    #[test]
    fn only_the_holder_releases() {
        let (_clock, lock) = lock();
        lock.acquire(Duration::from_secs(5), Some("a"));
        assert!(!lock.release("b").success);
        assert!(lock.release("a").success);
        assert!(lock.holder().is_none());
    }

    #[test]
    fn generated_tokens_are_uuids() {
        let (_clock, lock) = lock();
        let status = lock.acquire(Duration::from_secs(1), None);
        assert!(status.success);
        assert!(uuid::Uuid::parse_str(&status.token).is_ok());
    }
}
