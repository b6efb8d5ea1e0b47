use std::fmt;
use std::time::Duration;

use serde_json::json;
use tracing::Level;

/// Structured events emitted by the request pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiEvent {
    /// A request passed admission and is about to be sent.
    Admitted {
        url: String,
        /// Rate-limit key, if the request's bucket was known at admission time.
        rate_limit_key: Option<String>,
        /// Whether the remote authority made the decision.
        remote: bool,
    },
    /// Admission said wait.
    Deferred {
        url: String,
        wait_for: Duration,
        global: bool,
        /// Deferrals before this one.
        retries: u32,
    },
    /// A deferred request entered (or re-entered) the queue.
    Queued {
        url: String,
        /// Epoch millis at which it becomes eligible.
        wait_until: u64,
        queue_len: usize,
    },
    /// The server answered with a rate-limited status.
    RateLimitedResponse {
        url: String,
        bucket_hash: Option<String>,
        retry_after: Duration,
        global: bool,
    },
    /// The remote authority was unreachable and admission fell back to the local cache.
    AuthorityFallback { reason: String },
    /// The remote authority is reachable again.
    AuthorityReconnected {
        /// Reconnect attempts it took.
        attempts: usize,
    },
    /// The sweeper dropped idle rate limits.
    Swept { removed: usize, remaining: usize },
}

impl ApiEvent {
    /// Severity used by [`LogSink`](super::LogSink).
    pub fn level(&self) -> Level {
        match self {
            ApiEvent::Admitted { .. } | ApiEvent::Deferred { .. } | ApiEvent::Queued { .. } => {
                Level::DEBUG
            }
            ApiEvent::Swept { .. } => Level::DEBUG,
            ApiEvent::RateLimitedResponse { .. } | ApiEvent::AuthorityFallback { .. } => {
                Level::WARN
            }
            ApiEvent::AuthorityReconnected { .. } => Level::INFO,
        }
    }

    /// Stable snake_case name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiEvent::Admitted { .. } => "admitted",
            ApiEvent::Deferred { .. } => "deferred",
            ApiEvent::Queued { .. } => "queued",
            ApiEvent::RateLimitedResponse { .. } => "rate_limited_response",
            ApiEvent::AuthorityFallback { .. } => "authority_fallback",
            ApiEvent::AuthorityReconnected { .. } => "authority_reconnected",
            ApiEvent::Swept { .. } => "swept",
        }
    }

    /// Key/value pairs describing the event.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            ApiEvent::Admitted { url, rate_limit_key, remote } => vec![
                ("url", url.clone()),
                ("rate_limit_key", rate_limit_key.clone().unwrap_or_default()),
                ("remote", remote.to_string()),
            ],
            ApiEvent::Deferred { url, wait_for, global, retries } => vec![
                ("url", url.clone()),
                ("wait_ms", clamp_u64(wait_for.as_millis()).to_string()),
                ("global", global.to_string()),
                ("retries", retries.to_string()),
            ],
            ApiEvent::Queued { url, wait_until, queue_len } => vec![
                ("url", url.clone()),
                ("wait_until", wait_until.to_string()),
                ("queue_len", queue_len.to_string()),
            ],
            ApiEvent::RateLimitedResponse { url, bucket_hash, retry_after, global } => vec![
                ("url", url.clone()),
                ("bucket_hash", bucket_hash.clone().unwrap_or_default()),
                ("retry_after_ms", clamp_u64(retry_after.as_millis()).to_string()),
                ("global", global.to_string()),
            ],
            ApiEvent::AuthorityFallback { reason } => vec![("reason", reason.clone())],
            ApiEvent::AuthorityReconnected { attempts } => {
                vec![("attempts", attempts.to_string())]
            }
            ApiEvent::Swept { removed, remaining } => {
                vec![("removed", removed.to_string()), ("remaining", remaining.to_string())]
            }
        }
    }

    /// JSON object with a `kind` tag and the event's fields.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ApiEvent::Admitted { url, rate_limit_key, remote } => json!({
                "kind": self.kind(),
                "url": url,
                "rate_limit_key": rate_limit_key,
                "remote": remote,
            }),
            ApiEvent::Deferred { url, wait_for, global, retries } => json!({
                "kind": self.kind(),
                "url": url,
                "wait_ms": clamp_u64(wait_for.as_millis()),
                "global": global,
                "retries": retries,
            }),
            ApiEvent::Queued { url, wait_until, queue_len } => json!({
                "kind": self.kind(),
                "url": url,
                "wait_until": wait_until,
                "queue_len": queue_len,
            }),
            ApiEvent::RateLimitedResponse { url, bucket_hash, retry_after, global } => json!({
                "kind": self.kind(),
                "url": url,
                "bucket_hash": bucket_hash,
                "retry_after_ms": clamp_u64(retry_after.as_millis()),
                "global": global,
            }),
            ApiEvent::AuthorityFallback { reason } => {
                json!({ "kind": self.kind(), "reason": reason })
            }
            ApiEvent::AuthorityReconnected { attempts } => {
                json!({ "kind": self.kind(), "attempts": attempts })
            }
            ApiEvent::Swept { removed, remaining } => {
                json!({ "kind": self.kind(), "removed": removed, "remaining": remaining })
            }
        }
    }
}

impl fmt::Display for ApiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiEvent::Admitted { url, remote, .. } => {
                write!(f, "Admitted({}, remote={})", url, remote)
            }
            ApiEvent::Deferred { url, wait_for, global, retries } => write!(
                f,
                "Deferred({}, wait={:?}, global={}, retries={})",
                url, wait_for, global, retries
            ),
            ApiEvent::Queued { url, wait_until, queue_len } => {
                write!(f, "Queued({}, until={}, len={})", url, wait_until, queue_len)
            }
            ApiEvent::RateLimitedResponse { url, retry_after, global, .. } => write!(
                f,
                "RateLimitedResponse({}, retry_after={:?}, global={})",
                url, retry_after, global
            ),
            ApiEvent::AuthorityFallback { reason } => write!(f, "AuthorityFallback({})", reason),
            ApiEvent::AuthorityReconnected { attempts } => {
                write!(f, "AuthorityReconnected(attempts={})", attempts)
            }
            ApiEvent::Swept { removed, remaining } => {
                write!(f, "Swept(removed={}, remaining={})", removed, remaining)
            }
        }
    }
}

fn clamp_u64(val: u128) -> u64 {
    u64::try_from(val).unwrap_or(u64::MAX)
}
