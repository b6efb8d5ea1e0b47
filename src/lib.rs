#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # bucketry
//!
//! Client-side rate limiting for APIs whose limits are grouped into buckets the server only
//! reveals in its responses.
//!
//! ## Features
//!
//! - **Bucket learning**: a route-shape key is computed for every call before any server
//!   contact; the first response teaches the bucket behind it, and later calls of the same
//!   shape reuse it even for resource instances never contacted
//! - **Safe admission** under per-bucket and global limits, decided atomically per send
//! - **Deferred requests** wait in an ordered queue and are retried when eligible
//! - **Remote authority** for sharing limits across processes, with local fallback and
//!   background reconnection
//! - **Identify lock** with expiring tokens
//! - **Structured events** through pluggable sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use bucketry::{Api, ApiConfig, ApiResponse, FnTransport, Method, RequestOptions};
//! use bucketry::transport::{BoxedSend, TransportRequest};
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = FnTransport::new(|_req: TransportRequest| {
//!         Box::pin(async {
//!             Ok(ApiResponse::new(200)
//!                 .with_header("x-ratelimit-bucket", "abc")
//!                 .with_header("x-ratelimit-limit", "5")
//!                 .with_header("x-ratelimit-remaining", "4")
//!                 .with_header("x-ratelimit-reset-after", "2"))
//!         }) as BoxedSend
//!     });
//!     let api = Api::builder(transport).build().unwrap();
//!
//!     let outcome = api
//!         .request(Method::Patch, "/channels/123", RequestOptions::default())
//!         .await
//!         .unwrap();
//!     assert_eq!(outcome.response().unwrap().status, 200);
//!     assert_eq!(api.cache().bucket_hash("A:ch").as_deref(), Some("abc"));
//! }
//! ```

pub mod adaptive;
pub mod api;
pub mod authority;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod headers;
pub mod lock;
pub mod prelude;
pub mod queue;
pub mod rate_limit;
pub mod request;
pub mod route;
pub mod sleeper;
pub mod telemetry;
pub mod transport;

// Re-exports
pub use adaptive::DynamicConfig;
pub use api::{Api, ApiBuilder, ApiCall, ApiOutcome, DeferredRateLimit};
pub use authority::{
    AuthorityHandle, AuthorityService, ChannelAuthority, LocalAuthority, RateLimitUpdate,
    RemoteAuthority,
};
pub use backoff::{Backoff, BackoffError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ApiConfig;
pub use error::{ApiError, AuthorityError, ConfigError, TransportError, ValidationError};
pub use headers::{BucketState, RateLimitHeaders};
pub use lock::{IdentifyLock, LockStatus};
pub use queue::RequestQueue;
pub use rate_limit::{
    RateLimit, RateLimitCache, RateLimitMap, RateLimitSnapshot, RateLimitState,
    RateLimitTemplate, RateLimitTemplateMap, SweeperHandle,
};
pub use request::{Request, RequestOptions};
pub use route::{bucket_hash_key, MajorParameters, Method};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use telemetry::{ApiEvent, EventSink, LogSink, MemorySink, MulticastSink, NullSink};
pub use transport::{ApiResponse, FnTransport, Transport, TransportRequest};
