use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{RateLimitUpdate, RemoteAuthority};
use crate::clock::Clock;
use crate::config::ApiConfig;
use crate::error::{AuthorityError, ValidationError};
use crate::lock::{IdentifyLock, LockStatus};
use crate::rate_limit::{RateLimitCache, RateLimitState};
use crate::request::{Request, RequestOptions};
use crate::route::Method;

/// The authority side: a shared [`RateLimitCache`] and [`IdentifyLock`] that several clients
/// admit against.
///
/// Serve it to other processes by wrapping it in an
/// [`AuthorityService`](super::AuthorityService).
#[derive(Debug, Clone)]
pub struct LocalAuthority {
    cache: Arc<RateLimitCache>,
    lock: Arc<IdentifyLock>,
    clock: Arc<dyn Clock>,
}

impl LocalAuthority {
    pub fn new(config: &ApiConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: Arc::new(RateLimitCache::new(config, clock.clone())),
            lock: Arc::new(IdentifyLock::new(clock.clone())),
            clock,
        }
    }

    /// Share an existing cache, e.g. the one of the process hosting the authority.
    pub fn with_cache(cache: Arc<RateLimitCache>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, lock: Arc::new(IdentifyLock::new(clock.clone())), clock }
    }

    pub fn cache(&self) -> &Arc<RateLimitCache> {
        &self.cache
    }

    pub fn identify_lock(&self) -> &IdentifyLock {
        &self.lock
    }

    fn request(method: Method, url: &str) -> Result<Request, AuthorityError> {
        Request::new(method, url, RequestOptions::default())
            .map_err(|e| AuthorityError::Validation(ValidationError::Malformed(e.to_string())))
    }
}

#[async_trait]
impl RemoteAuthority for LocalAuthority {
    async fn authorize(&self, method: Method, url: &str) -> Result<RateLimitState, AuthorityError> {
        let mut request = Self::request(method, url)?;
        Ok(self.cache.authorize_request_from_client(&mut request))
    }

    async fn update(&self, update: RateLimitUpdate) -> Result<(), AuthorityError> {
        let mut request = Self::request(update.method, &update.url)?;
        let headers = update.to_headers(self.clock.now_millis());
        self.cache.update(&mut request, &headers);
        Ok(())
    }

    async fn acquire_lock(
        &self,
        time_out: Duration,
        token: Option<String>,
    ) -> Result<LockStatus, AuthorityError> {
        Ok(self.lock.acquire(time_out, token.as_deref()))
    }

    async fn release_lock(&self, token: String) -> Result<LockStatus, AuthorityError> {
        Ok(self.lock.release(&token))
    }

    async fn reconnect(&self) -> Result<(), AuthorityError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::headers::BucketState;

    fn authority() -> LocalAuthority {
        LocalAuthority::new(&ApiConfig::default(), Arc::new(ManualClock::new(0)))
    }

    #[tokio::test]
    async fn clients_share_bucket_counters() {
        let authority = authority();
        assert!(authority.authorize(Method::Patch, "/channels/1").await.unwrap().is_admitted());

        let update = RateLimitUpdate {
            method: Method::Patch,
            url: "/channels/1".into(),
            global: false,
            bucket: Some(BucketState {
                bucket_hash: "abc".into(),
                limit: 2,
                remaining: 1,
                reset_after: 1_000,
            }),
            retry_after: 0,
        };
        authority.update(update).await.unwrap();

        assert!(authority.authorize(Method::Patch, "/channels/1").await.unwrap().is_admitted());
        let denied = authority.authorize(Method::Patch, "/channels/1").await.unwrap();
        assert_eq!(denied.wait_for, Duration::from_millis(1_000));
        assert!(!denied.global);
    }

    #[tokio::test]
    async fn empty_url_is_a_validation_error() {
        let err = authority().authorize(Method::Get, "").await.unwrap_err();
        assert!(matches!(err, AuthorityError::Validation(_)));
    }

    #[tokio::test]
    async fn lock_round_trip() {
        let authority = authority();
        let held = authority.acquire_lock(Duration::from_secs(5), None).await.unwrap();
        assert!(held.success);
        let other = authority.acquire_lock(Duration::from_secs(5), Some("x".into())).await.unwrap();
        assert!(!other.success);
        assert!(authority.release_lock(held.token).await.unwrap().success);
    }
}
