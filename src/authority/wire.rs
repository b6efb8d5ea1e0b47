//! JSON wire protocol between authority clients and an
//! [`AuthorityService`](super::AuthorityService).
//!
//! Requests travel as an [`Envelope`] `{ id, cmd, args }`; replies as a [`Reply`]
//! `{ id, ok, result | error }`. Arguments decode into all-optional structs first and are then
//! validated, so a missing field is reported by name instead of as a generic parse failure.
//!
//! Commands, their `args` (`?` marks optional) and their `result`:
//!
//! - `authorize`: `method`, `url`. Returns `{ wait_for_ms, global }`.
//! - `update`: `method`, `url`, `global`?, `bucket_hash`?, `limit`, `remaining`,
//!   `reset_after_ms`, `retry_after_ms`?. Returns `null`.
//! - `acquire_lock`: `time_out_ms`, `token`?. Returns `{ success, token, message? }`.
//! - `release_lock`: `token`. Returns `{ success, token, message? }`.
//! - `ping`: no arguments. Returns `"pong"`.
//!
//! `limit`, `remaining` and `reset_after_ms` are required only when `bucket_hash` is present.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::RateLimitUpdate;
use crate::error::{AuthorityError, ValidationError};
use crate::headers::BucketState;
use crate::rate_limit::RateLimitState;
use crate::route::Method;

pub const CMD_AUTHORIZE: &str = "authorize";
pub const CMD_UPDATE: &str = "update";
pub const CMD_ACQUIRE_LOCK: &str = "acquire_lock";
pub const CMD_RELEASE_LOCK: &str = "release_lock";
pub const CMD_PING: &str = "ping";

/// Canonical request frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Request identifier echoed in the reply.
    pub id: String,
    pub cmd: String,
    #[serde(default)]
    pub args: Value,
}

/// Error kinds carried in a failed [`Reply`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ConnectionLost,
    Remote,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&AuthorityError> for WireError {
    fn from(err: &AuthorityError) -> Self {
        let kind = match err {
            AuthorityError::ConnectionLost(_) => ErrorKind::ConnectionLost,
            AuthorityError::Validation(_) => ErrorKind::Validation,
            _ => ErrorKind::Remote,
        };
        let message = match err {
            AuthorityError::ConnectionLost(m) | AuthorityError::Remote(m) => m.clone(),
            other => other.to_string(),
        };
        Self { kind, message }
    }
}

impl From<WireError> for AuthorityError {
    fn from(err: WireError) -> Self {
        match err.kind {
            ErrorKind::Validation => {
                AuthorityError::Validation(ValidationError::Malformed(err.message))
            }
            ErrorKind::ConnectionLost => AuthorityError::ConnectionLost(err.message),
            ErrorKind::Remote => AuthorityError::Remote(err.message),
        }
    }
}

/// Canonical reply frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Reply {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self { id: id.into(), ok: true, result: Some(result), error: None }
    }

    pub fn failure(id: impl Into<String>, err: &AuthorityError) -> Self {
        Self { id: id.into(), ok: false, result: None, error: Some(err.into()) }
    }

    /// The result payload, or the carried error.
    pub fn into_result(self) -> Result<Value, AuthorityError> {
        if self.ok {
            return Ok(self.result.unwrap_or(Value::Null));
        }
        Err(self
            .error
            .map(AuthorityError::from)
            .unwrap_or_else(|| AuthorityError::Remote("reply carried no error".to_string())))
    }
}

/// A validated authority call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Authorize { method: Method, url: String },
    Update(RateLimitUpdate),
    AcquireLock { time_out: Duration, token: Option<String> },
    ReleaseLock { token: String },
    Ping,
}

impl Command {
    /// Validate an envelope's command and arguments.
    pub fn decode(envelope: &Envelope) -> Result<Self, ValidationError> {
        match envelope.cmd.as_str() {
            CMD_AUTHORIZE => parse_args::<AuthorizeArgs>(&envelope.args)?.validate(),
            CMD_UPDATE => parse_args::<UpdateArgs>(&envelope.args)?.validate(),
            CMD_ACQUIRE_LOCK => parse_args::<AcquireLockArgs>(&envelope.args)?.validate(),
            CMD_RELEASE_LOCK => parse_args::<ReleaseLockArgs>(&envelope.args)?.validate(),
            CMD_PING => Ok(Command::Ping),
            other => Err(ValidationError::Malformed(format!("unknown command `{other}`"))),
        }
    }

    /// Build the envelope for this call.
    pub fn encode(&self, id: impl Into<String>) -> Envelope {
        let (cmd, args) = match self {
            Command::Authorize { method, url } => {
                (CMD_AUTHORIZE, json!({ "method": method.as_str(), "url": url }))
            }
            Command::Update(update) => {
                let mut args = json!({
                    "method": update.method.as_str(),
                    "url": update.url,
                    "global": update.global,
                    "retry_after_ms": update.retry_after,
                });
                if let (Some(bucket), Some(map)) = (&update.bucket, args.as_object_mut()) {
                    map.insert("bucket_hash".into(), json!(bucket.bucket_hash));
                    map.insert("limit".into(), json!(bucket.limit));
                    map.insert("remaining".into(), json!(bucket.remaining));
                    map.insert("reset_after_ms".into(), json!(bucket.reset_after));
                }
                (CMD_UPDATE, args)
            }
            Command::AcquireLock { time_out, token } => (
                CMD_ACQUIRE_LOCK,
                json!({ "time_out_ms": duration_ms(*time_out), "token": token }),
            ),
            Command::ReleaseLock { token } => (CMD_RELEASE_LOCK, json!({ "token": token })),
            Command::Ping => (CMD_PING, Value::Null),
        };
        Envelope { id: id.into(), cmd: cmd.to_string(), args }
    }
}

/// Result payload of `authorize`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizeResult {
    pub wait_for_ms: u64,
    pub global: bool,
}

impl From<RateLimitState> for AuthorizeResult {
    fn from(state: RateLimitState) -> Self {
        Self { wait_for_ms: duration_ms(state.wait_for), global: state.global }
    }
}

impl From<AuthorizeResult> for RateLimitState {
    fn from(result: AuthorizeResult) -> Self {
        RateLimitState::limited(Duration::from_millis(result.wait_for_ms), result.global)
    }
}

#[derive(Debug, Default, Deserialize)]
struct AuthorizeArgs {
    method: Option<String>,
    url: Option<String>,
}

impl AuthorizeArgs {
    fn validate(self) -> Result<Command, ValidationError> {
        let method = parse_method(require(self.method, CMD_AUTHORIZE, "method")?)?;
        let url = require(self.url, CMD_AUTHORIZE, "url")?;
        Ok(Command::Authorize { method, url })
    }
}

#[derive(Debug, Default, Deserialize)]
struct UpdateArgs {
    method: Option<String>,
    url: Option<String>,
    global: Option<bool>,
    bucket_hash: Option<String>,
    limit: Option<u32>,
    remaining: Option<u32>,
    reset_after_ms: Option<u64>,
    retry_after_ms: Option<u64>,
}

impl UpdateArgs {
    fn validate(self) -> Result<Command, ValidationError> {
        let method = parse_method(require(self.method, CMD_UPDATE, "method")?)?;
        let url = require(self.url, CMD_UPDATE, "url")?;
        let bucket = match self.bucket_hash {
            Some(bucket_hash) => Some(BucketState {
                bucket_hash,
                limit: require(self.limit, CMD_UPDATE, "limit")?,
                remaining: require(self.remaining, CMD_UPDATE, "remaining")?,
                reset_after: require(self.reset_after_ms, CMD_UPDATE, "reset_after_ms")?,
            }),
            None => None,
        };
        Ok(Command::Update(RateLimitUpdate {
            method,
            url,
            global: self.global.unwrap_or(false),
            bucket,
            retry_after: self.retry_after_ms.unwrap_or(0),
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct AcquireLockArgs {
    time_out_ms: Option<u64>,
    token: Option<String>,
}

impl AcquireLockArgs {
    fn validate(self) -> Result<Command, ValidationError> {
        let time_out = require(self.time_out_ms, CMD_ACQUIRE_LOCK, "time_out_ms")?;
        Ok(Command::AcquireLock { time_out: Duration::from_millis(time_out), token: self.token })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReleaseLockArgs {
    token: Option<String>,
}

impl ReleaseLockArgs {
    fn validate(self) -> Result<Command, ValidationError> {
        Ok(Command::ReleaseLock { token: require(self.token, CMD_RELEASE_LOCK, "token")? })
    }
}

fn parse_args<T>(args: &Value) -> Result<T, ValidationError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if args.is_null() {
        return Ok(T::default());
    }
    T::deserialize(args).map_err(|e| ValidationError::Malformed(e.to_string()))
}

fn require<T>(
    value: Option<T>,
    message: &'static str,
    field: &'static str,
) -> Result<T, ValidationError> {
    value.ok_or(ValidationError::MissingField { message, field })
}

fn parse_method(raw: String) -> Result<Method, ValidationError> {
    raw.parse().map_err(|_| ValidationError::Malformed(format!("unsupported method `{raw}`")))
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
