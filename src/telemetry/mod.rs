//! Telemetry and observability for the request pipeline.
//!
//! The dispatcher, the queue and the sweeper emit [`ApiEvent`]s describing their decisions.
//! Events flow into the [`EventSink`] owned by the [`Api`](crate::Api); there is no global
//! emitter.
//!
//! # Event Types
//!
//! - **Admission**: `Admitted`, `Deferred`
//! - **Queue**: `Queued`
//! - **Responses**: `RateLimitedResponse`
//! - **Remote authority**: `AuthorityFallback`, `AuthorityReconnected`
//! - **Cache maintenance**: `Swept`
//!
//! # Sinks
//!
//! [`NullSink`] discards, [`LogSink`] forwards to `tracing` at each event's level,
//! [`MemorySink`] keeps a bounded buffer for tests and [`MulticastSink`] fans out. The
//! `bucketry-jsonl` crate adds a JSON-lines sink.

pub mod events;
pub mod sinks;

pub use events::ApiEvent;
pub use sinks::{EventSink, LogSink, MemorySink, MulticastSink, NullSink};
