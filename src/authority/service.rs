use std::sync::Arc;

use serde_json::{json, Value};

use super::wire::{AuthorizeResult, Command, Envelope, Reply};
use super::RemoteAuthority;
use crate::error::{AuthorityError, ValidationError};

/// Decodes wire frames, runs them against a [`RemoteAuthority`] and encodes the replies.
#[derive(Clone)]
pub struct AuthorityService {
    authority: Arc<dyn RemoteAuthority>,
}

impl std::fmt::Debug for AuthorityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityService").finish_non_exhaustive()
    }
}

impl AuthorityService {
    pub fn new(authority: Arc<dyn RemoteAuthority>) -> Self {
        Self { authority }
    }

    /// Handle one raw JSON frame and return the raw reply.
    ///
    /// Undecodable frames get a validation error reply with an empty id.
    pub async fn handle_frame(&self, frame: &[u8]) -> Vec<u8> {
        let reply = match serde_json::from_slice::<Envelope>(frame) {
            Ok(envelope) => self.handle(envelope).await,
            Err(e) => {
                let err = AuthorityError::Validation(ValidationError::Malformed(e.to_string()));
                Reply::failure("", &err)
            }
        };
        encode_reply(&reply)
    }

    pub async fn handle(&self, envelope: Envelope) -> Reply {
        let command = match Command::decode(&envelope) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(
                    id = %envelope.id,
                    cmd = %envelope.cmd,
                    error = %err,
                    "rejected authority call"
                );
                return Reply::failure(envelope.id, &AuthorityError::Validation(err));
            }
        };
        match self.execute(command).await {
            Ok(result) => Reply::success(envelope.id, result),
            Err(err) => Reply::failure(envelope.id, &err),
        }
    }

    async fn execute(&self, command: Command) -> Result<Value, AuthorityError> {
        match command {
            Command::Authorize { method, url } => {
                let state = self.authority.authorize(method, &url).await?;
                Ok(json!(AuthorizeResult::from(state)))
            }
            Command::Update(update) => {
                self.authority.update(update).await?;
                Ok(Value::Null)
            }
            Command::AcquireLock { time_out, token } => {
                Ok(json!(self.authority.acquire_lock(time_out, token).await?))
            }
            Command::ReleaseLock { token } => Ok(json!(self.authority.release_lock(token).await?)),
            Command::Ping => {
                self.authority.reconnect().await?;
                Ok(json!("pong"))
            }
        }
    }
}

pub(crate) fn encode_reply(reply: &Reply) -> Vec<u8> {
    match serde_json::to_vec(reply) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode authority reply");
            br#"{"id":"","ok":false,"error":{"kind":"remote","message":"unencodable reply"}}"#
                .to_vec()
        }
    }
}
