//! The request pipeline.
//!
//! [`Api::request`] takes a call from submission to a final outcome:
//!
//! ```text
//! CREATED -> AUTHORIZING -> SEND  -> SUCCEEDED
//!                        |        -> RATE_LIMITED_RESPONSE -> requeue -> AUTHORIZING
//!                        -> DEFER -> requeue -> AUTHORIZING
//! ```
//!
//! Admission goes to the remote authority when one is configured and reachable, otherwise to
//! the local [`RateLimitCache`]. A request that has to wait is parked in the [`RequestQueue`];
//! the caller awaits a completion channel that the queue tick resolves once the request finally
//! goes out. Callers that would rather not wait get [`ApiOutcome::RateLimited`] back instead.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bucketry::{Api, ApiResponse, FnTransport, Method, RequestOptions, TransportRequest};
//! use bucketry::transport::BoxedSend;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = FnTransport::new(|_req: TransportRequest| {
//!     Box::pin(async { Ok(ApiResponse::new(200)) }) as BoxedSend
//! });
//! let api = Api::builder(transport).build()?;
//! let outcome = api.request(Method::Get, "/gateway", RequestOptions::default()).await?;
//! assert!(outcome.response().is_some());
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use crate::adaptive::DynamicConfig;
use crate::authority::{AuthorityHandle, RateLimitUpdate, RemoteAuthority};
use crate::clock::{Clock, SystemClock};
use crate::config::ApiConfig;
use crate::error::{ApiError, AuthorityError, ConfigError};
use crate::headers::RateLimitHeaders;
use crate::lock::{IdentifyLock, LockStatus};
use crate::queue::{Completion, QueuedRequest, RequestQueue};
use crate::rate_limit::{RateLimitCache, RateLimitState, SweeperHandle};
use crate::request::{Request, RequestOptions};
use crate::route::Method;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{ApiEvent, EventSink, LogSink};
use crate::transport::{ApiResponse, Transport, TransportRequest};

/// A rate limit the caller chose not to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredRateLimit {
    /// How long the request would have had to wait.
    pub wait_for: Duration,
    pub global: bool,
    /// The server's retry delay, when the limit came from a rate-limited response.
    pub retry_after_hint: Option<Duration>,
}

/// Final result of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiOutcome {
    /// The server's response, unchanged.
    Response(ApiResponse),
    /// The request was rate limited and the caller asked not to wait.
    RateLimited(DeferredRateLimit),
}

impl ApiOutcome {
    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            ApiOutcome::Response(r) => Some(r),
            ApiOutcome::RateLimited(_) => None,
        }
    }

    pub fn into_response(self) -> Option<ApiResponse> {
        match self {
            ApiOutcome::Response(r) => Some(r),
            ApiOutcome::RateLimited(_) => None,
        }
    }

    pub fn rate_limited(&self) -> Option<&DeferredRateLimit> {
        match self {
            ApiOutcome::RateLimited(d) => Some(d),
            ApiOutcome::Response(_) => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiOutcome::RateLimited(_))
    }
}

/// Request input for the [`tower_service::Service`] implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub method: Method,
    pub url: String,
    pub options: RequestOptions,
}

impl ApiCall {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), options: RequestOptions::default() }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

/// Result of one pass through admission and (maybe) the transport.
enum Step {
    Done(Result<ApiOutcome, ApiError>),
    /// Not sent yet; goes back to the queue with its updated `wait_until`.
    Requeue(Request),
}

struct ApiInner {
    transport: Arc<dyn Transport>,
    cache: Arc<RateLimitCache>,
    queue: RequestQueue,
    authority: Option<Arc<AuthorityHandle>>,
    identify_lock: IdentifyLock,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    sink: Arc<dyn EventSink>,
    config: ApiConfig,
    sweeper: Mutex<Option<SweeperHandle>>,
}

/// Rate-limit aware API client. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Api {
    inner: Arc<ApiInner>,
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("config", &self.inner.config)
            .field("queue_len", &self.queue_len())
            .field("authority", &self.inner.authority)
            .finish_non_exhaustive()
    }
}

impl Api {
    pub fn builder(transport: impl Transport + 'static) -> ApiBuilder {
        ApiBuilder::new(Arc::new(transport))
    }

    /// Submit a call and wait for its final outcome.
    ///
    /// Rate limits are waited out in the queue unless `options` say otherwise; they are never
    /// reported as errors.
    pub async fn request(
        &self,
        method: Method,
        url: impl Into<String>,
        options: RequestOptions,
    ) -> Result<ApiOutcome, ApiError> {
        let request = Request::new(method, url, options)?;
        match self.execute(request).await {
            Step::Done(result) => result,
            Step::Requeue(request) => {
                let url = request.url().to_string();
                let wait_until = request.wait_until();
                let rx = self.inner.queue.enqueue(request);
                self.emit(ApiEvent::Queued { url, wait_until, queue_len: self.queue_len() });
                rx.await.unwrap_or(Err(ApiError::QueueClosed))
            }
        }
    }

    /// Run one queue tick: retry every entry whose wait has elapsed, in eligibility order.
    ///
    /// Admission runs in order on the calling task; admitted sends run on spawned tasks.
    pub async fn process_queue(&self) {
        let now = self.inner.clock.now_millis();
        for entry in self.inner.queue.take_eligible(now) {
            let QueuedRequest { mut request, completion, sequence } = entry;
            let step = match self.admit(&mut request).await {
                Err(err) => Step::Done(Err(err)),
                Ok(state) if !state.is_admitted() => self.defer(request, state, None),
                Ok(_) => {
                    let api = self.clone();
                    tokio::spawn(async move {
                        let step = api.send(request).await;
                        api.finish(completion, sequence, step);
                    });
                    continue;
                }
            };
            self.finish(completion, sequence, step);
        }
    }

    /// Start the periodic queue tick. Does nothing if it is already running.
    pub fn start_queue(&self) {
        if self.inner.queue.is_running() {
            return;
        }
        let handle = tokio::spawn(queue_loop(
            Arc::downgrade(&self.inner),
            self.inner.queue.interval().clone(),
            self.inner.sleeper.clone(),
        ));
        self.inner.queue.set_ticker(handle);
    }

    pub fn stop_queue(&self) {
        self.inner.queue.stop();
    }

    pub fn set_queue_interval(&self, interval: Duration) {
        self.inner.queue.set_interval(interval);
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn cache(&self) -> &Arc<RateLimitCache> {
        &self.inner.cache
    }

    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    /// `None` without a remote authority, otherwise whether it is currently reachable.
    pub fn authority_available(&self) -> Option<bool> {
        self.inner.authority.as_ref().map(|a| a.is_available())
    }

    /// Take the identify lock, through the remote authority when one is reachable.
    pub async fn acquire_identify_lock(
        &self,
        time_out: Duration,
        token: Option<String>,
    ) -> Result<LockStatus, ApiError> {
        if let Some(authority) = self.reachable_authority() {
            match authority.authority().acquire_lock(time_out, token.clone()).await {
                Ok(status) => return Ok(status),
                Err(err) => self.authority_failed(authority, err)?,
            }
        }
        Ok(self.inner.identify_lock.acquire(time_out, token.as_deref()))
    }

    pub async fn release_identify_lock(&self, token: String) -> Result<LockStatus, ApiError> {
        if let Some(authority) = self.reachable_authority() {
            match authority.authority().release_lock(token.clone()).await {
                Ok(status) => return Ok(status),
                Err(err) => self.authority_failed(authority, err)?,
            }
        }
        Ok(self.inner.identify_lock.release(&token))
    }

    /// Admit, then send or defer.
    async fn execute(&self, mut request: Request) -> Step {
        match self.admit(&mut request).await {
            Err(err) => Step::Done(Err(err)),
            Ok(state) if !state.is_admitted() => self.defer(request, state, None),
            Ok(_) => self.send(request).await,
        }
    }

    async fn admit(&self, request: &mut Request) -> Result<RateLimitState, ApiError> {
        if let Some(authority) = self.inner.authority.as_ref().filter(|_| !request.options().local)
        {
            if !authority.is_available() {
                if !request.options().allow_fallback {
                    return Err(ApiError::AuthorityUnavailable(
                        "remote authority is reconnecting".to_string(),
                    ));
                }
            } else {
                match authority.authority().authorize(request.method(), request.url()).await {
                    Ok(state) => {
                        self.admitted(request, true, state);
                        return Ok(state);
                    }
                    Err(err) if err.is_connection_lost() => {
                        authority.connection_lost(&err.to_string());
                        if !request.options().allow_fallback {
                            return Err(err.into());
                        }
                        tracing::warn!(
                            url = request.url(),
                            error = %err,
                            "remote authority lost, admitting locally"
                        );
                        self.emit(ApiEvent::AuthorityFallback { reason: err.to_string() });
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        let state = self.inner.cache.authorize_request_from_client(request);
        self.admitted(request, false, state);
        Ok(state)
    }

    fn admitted(&self, request: &Request, remote: bool, state: RateLimitState) {
        if state.is_admitted() {
            tracing::debug!(url = request.url(), remote, "request admitted");
            self.emit(ApiEvent::Admitted {
                url: request.url().to_string(),
                rate_limit_key: request.rate_limit_key().map(str::to_string),
                remote,
            });
        }
    }

    /// Either hand the deferral back to the caller or schedule another attempt.
    fn defer(&self, mut request: Request, state: RateLimitState, hint: Option<Duration>) -> Step {
        let RateLimitState { wait_for, global } = state;
        tracing::debug!(
            url = request.url(),
            wait_ms = wait_for.as_millis() as u64,
            global,
            "request deferred"
        );
        self.emit(ApiEvent::Deferred {
            url: request.url().to_string(),
            wait_for,
            global,
            retries: request.retries(),
        });
        if request.gives_up(global) {
            return Step::Done(Ok(ApiOutcome::RateLimited(DeferredRateLimit {
                wait_for,
                global,
                retry_after_hint: hint,
            })));
        }
        request.record_retry();
        request.defer_until(self.inner.clock.now_millis(), wait_for);
        Step::Requeue(request)
    }

    /// Send an admitted request and learn from the response.
    async fn send(&self, mut request: Request) -> Step {
        let transport_request = TransportRequest {
            method: request.method(),
            url: request.url().to_string(),
            body: request.options().body.clone(),
            headers: request.options().headers.clone(),
        };
        request.set_running(true);
        let result = self.inner.transport.send(transport_request).await;
        request.set_running(false);
        let response = match result {
            Ok(response) => response,
            Err(err) => return Step::Done(Err(err.into())),
        };

        let now = self.inner.clock.now_millis();
        let headers = RateLimitHeaders::from_response(&response, now);
        self.inner.cache.update(&mut request, &headers);
        self.push_update(&request, &headers).await;

        if !response.is_rate_limited() {
            return Step::Done(Ok(ApiOutcome::Response(response)));
        }
        let retry_after = Duration::from_millis(headers.retry_after());
        tracing::warn!(
            url = request.url(),
            bucket = headers.bucket_hash(),
            retry_after_ms = headers.retry_after(),
            global = headers.global(),
            "rate limited by server"
        );
        self.emit(ApiEvent::RateLimitedResponse {
            url: request.url().to_string(),
            bucket_hash: headers.bucket_hash().map(str::to_string),
            retry_after,
            global: headers.global(),
        });
        let state = RateLimitState::limited(retry_after, headers.global());
        self.defer(request, state, Some(retry_after))
    }

    /// Share what a response taught us. Failures are logged, never surfaced.
    async fn push_update(&self, request: &Request, headers: &RateLimitHeaders) {
        if headers.bucket().is_none() && !headers.global() {
            return;
        }
        let Some(authority) = self.reachable_authority().filter(|_| !request.options().local)
        else {
            return;
        };
        let update = RateLimitUpdate::new(request.method(), request.url(), headers);
        if let Err(err) = authority.authority().update(update).await {
            tracing::warn!(url = request.url(), error = %err, "failed to push rate limit update");
            if err.is_connection_lost() {
                authority.connection_lost(&err.to_string());
            }
        }
    }

    fn finish(&self, completion: Completion, sequence: u64, step: Step) {
        match step {
            Step::Done(result) => {
                let _ = completion.send(result);
            }
            Step::Requeue(request) => {
                let url = request.url().to_string();
                let wait_until = request.wait_until();
                self.inner.queue.requeue(QueuedRequest { request, completion, sequence });
                self.emit(ApiEvent::Queued { url, wait_until, queue_len: self.queue_len() });
            }
        }
    }

    fn reachable_authority(&self) -> Option<&Arc<AuthorityHandle>> {
        self.inner.authority.as_ref().filter(|a| a.is_available())
    }

    /// Lock calls always fall back to the local lock when the connection is lost.
    fn authority_failed(
        &self,
        authority: &Arc<AuthorityHandle>,
        err: AuthorityError,
    ) -> Result<(), ApiError> {
        if !err.is_connection_lost() {
            return Err(err.into());
        }
        authority.connection_lost(&err.to_string());
        self.emit(ApiEvent::AuthorityFallback { reason: err.to_string() });
        Ok(())
    }

    fn emit(&self, event: ApiEvent) {
        self.inner.sink.emit(event);
    }
}

async fn queue_loop(
    inner: Weak<ApiInner>,
    interval: DynamicConfig<Duration>,
    sleeper: Arc<dyn Sleeper>,
) {
    loop {
        sleeper.sleep(*interval.get()).await;
        // a sleeper that never parks must not starve the rest of the runtime
        tokio::task::yield_now().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        Api { inner }.process_queue().await;
    }
}

impl tower_service::Service<ApiCall> for Api {
    type Response = ApiOutcome;
    type Error = ApiError;
    type Future = Pin<Box<dyn Future<Output = Result<ApiOutcome, ApiError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: ApiCall) -> Self::Future {
        let api = self.clone();
        Box::pin(async move { api.request(call.method, call.url, call.options).await })
    }
}

/// Builder for [`Api`].
pub struct ApiBuilder {
    transport: Arc<dyn Transport>,
    config: ApiConfig,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    sink: Arc<dyn EventSink>,
    authority: Option<Arc<dyn RemoteAuthority>>,
    cache: Option<Arc<RateLimitCache>>,
}

impl ApiBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: ApiConfig::default(),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            sink: Arc::new(LogSink),
            authority: None,
            cache: None,
        }
    }

    pub fn config(mut self, config: ApiConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sleeper for the queue tick, the sweeper and authority reconnection.
    ///
    /// The background loops yield to the runtime once per tick, so a sleeper that returns
    /// immediately (such as [`InstantSleeper`](crate::InstantSleeper)) turns them into busy
    /// polling but does not starve other tasks.
    pub fn sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn authority(mut self, authority: impl RemoteAuthority + 'static) -> Self {
        self.authority = Some(Arc::new(authority));
        self
    }

    /// Use an existing cache instead of creating one from the config.
    pub fn cache(mut self, cache: Arc<RateLimitCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validate the config and build the client.
    ///
    /// With `autostart` set the queue tick and the sweeper are spawned here, so this must run
    /// inside a Tokio runtime.
    pub fn build(self) -> Result<Api, ConfigError> {
        self.config.validate()?;
        let backoff = self.config.reconnect_backoff()?;
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(RateLimitCache::new(&self.config, self.clock.clone())));
        let authority = self.authority.map(|authority| {
            Arc::new(AuthorityHandle::new(
                authority,
                backoff,
                self.sleeper.clone(),
                self.sink.clone(),
            ))
        });
        let inner = ApiInner {
            transport: self.transport,
            cache,
            queue: RequestQueue::new(self.config.queue_interval_duration()),
            authority,
            identify_lock: IdentifyLock::new(self.clock.clone()),
            clock: self.clock,
            sleeper: self.sleeper,
            sink: self.sink,
            config: self.config,
            sweeper: Mutex::new(None),
        };
        let api = Api { inner: Arc::new(inner) };
        if api.inner.config.autostart {
            api.start_queue();
            api.start_sweeper();
        }
        Ok(api)
    }
}

impl Api {
    /// Start the periodic sweep of idle rate limits. Does nothing if it is already running.
    pub fn start_sweeper(&self) {
        let mut slot = self.inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *slot = Some(self.inner.cache.spawn_sweeper(
            self.inner.config.sweep_interval_duration(),
            self.inner.sleeper.clone(),
            self.inner.sink.clone(),
        ));
    }

    pub fn stop_sweeper(&self) {
        self.inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}
