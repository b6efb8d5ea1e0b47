//! Convenient re-exports for common bucketry types.
pub use crate::{
    api::{Api, ApiBuilder, ApiCall, ApiOutcome, DeferredRateLimit},
    authority::{LocalAuthority, RemoteAuthority},
    config::ApiConfig,
    error::{ApiError, AuthorityError, TransportError},
    request::RequestOptions,
    route::Method,
    telemetry::{EventSink, LogSink},
    transport::{ApiResponse, FnTransport, Transport, TransportRequest},
};
