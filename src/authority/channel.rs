use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};

use super::service::AuthorityService;
use super::wire::{AuthorizeResult, Command, Reply};
use super::{RateLimitUpdate, RemoteAuthority};
use crate::error::{AuthorityError, ValidationError};
use crate::lock::LockStatus;
use crate::rate_limit::RateLimitState;
use crate::route::Method;

/// A request frame paired with the channel its reply goes back on.
pub type Frame = (Vec<u8>, oneshot::Sender<Vec<u8>>);

/// In-process authority client: wire frames travel over a Tokio channel to a worker that
/// drives an [`AuthorityService`].
///
/// A closed channel on either side surfaces as [`AuthorityError::ConnectionLost`].
#[derive(Debug)]
pub struct ChannelAuthority {
    tx: mpsc::Sender<Frame>,
    next_id: AtomicU64,
}

impl ChannelAuthority {
    /// Create a channel client and spawn a worker to drive `service`.
    pub fn spawn(service: AuthorityService, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Frame>(capacity.max(1));
        tokio::spawn(async move {
            while let Some((frame, reply_tx)) = rx.recv().await {
                let reply = service.handle_frame(&frame).await;
                let _ = reply_tx.send(reply);
            }
        });
        Self::from_sender(tx)
    }

    /// Wrap the sending half of a frame channel served elsewhere.
    pub fn from_sender(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx, next_id: AtomicU64::new(1) }
    }

    async fn call<T: DeserializeOwned>(&self, command: Command) -> Result<T, AuthorityError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let envelope = command.encode(id.clone());
        let frame = serde_json::to_vec(&envelope)
            .map_err(|e| AuthorityError::Validation(ValidationError::Malformed(e.to_string())))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((frame, reply_tx))
            .await
            .map_err(|e| AuthorityError::ConnectionLost(e.to_string()))?;
        let raw = reply_rx.await.map_err(|e| AuthorityError::ConnectionLost(e.to_string()))?;

        let reply: Reply = serde_json::from_slice(&raw)
            .map_err(|e| AuthorityError::Validation(ValidationError::Malformed(e.to_string())))?;
        if reply.id != id {
            return Err(AuthorityError::Validation(ValidationError::Malformed(format!(
                "reply id `{}` does not match request id `{id}`",
                reply.id
            ))));
        }
        let value = reply.into_result()?;
        serde_json::from_value(value)
            .map_err(|e| AuthorityError::Validation(ValidationError::Malformed(e.to_string())))
    }
}

#[async_trait]
impl RemoteAuthority for ChannelAuthority {
    async fn authorize(&self, method: Method, url: &str) -> Result<RateLimitState, AuthorityError> {
        let result: AuthorizeResult =
            self.call(Command::Authorize { method, url: url.to_string() }).await?;
        Ok(result.into())
    }

    async fn update(&self, update: RateLimitUpdate) -> Result<(), AuthorityError> {
        self.call::<serde_json::Value>(Command::Update(update)).await.map(|_| ())
    }

    async fn acquire_lock(
        &self,
        time_out: Duration,
        token: Option<String>,
    ) -> Result<LockStatus, AuthorityError> {
        self.call(Command::AcquireLock { time_out, token }).await
    }

    async fn release_lock(&self, token: String) -> Result<LockStatus, AuthorityError> {
        self.call(Command::ReleaseLock { token }).await
    }

    async fn reconnect(&self) -> Result<(), AuthorityError> {
        self.call::<serde_json::Value>(Command::Ping).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::LocalAuthority;
    use crate::clock::ManualClock;
    use crate::config::ApiConfig;
    use std::sync::Arc;

    fn client() -> ChannelAuthority {
        let authority = LocalAuthority::new(&ApiConfig::default(), Arc::new(ManualClock::new(0)));
        ChannelAuthority::spawn(AuthorityService::new(Arc::new(authority)), 8)
    }

    #[tokio::test]
    async fn calls_reach_the_authority() {
        let client = client();
        assert!(client.authorize(Method::Get, "/guilds/1").await.unwrap().is_admitted());
        let status = client.acquire_lock(Duration::from_secs(1), Some("t".into())).await.unwrap();
        assert!(status.success);
        assert_eq!(status.token, "t");
        client.reconnect().await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_is_connection_lost() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let client = ChannelAuthority::from_sender(tx);
        let err = client.authorize(Method::Get, "/guilds/1").await.unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn dropped_reply_is_connection_lost() {
        let (tx, mut rx) = mpsc::channel::<Frame>(1);
        tokio::spawn(async move {
            while let Some((_frame, reply_tx)) = rx.recv().await {
                drop(reply_tx);
            }
        });
        let client = ChannelAuthority::from_sender(tx);
        assert!(client.reconnect().await.unwrap_err().is_connection_lost());
    }
}
