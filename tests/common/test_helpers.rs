use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bucketry::{
    Api, ApiConfig, ApiResponse, Clock, ManualClock, MemorySink, Transport, TransportError,
    TransportRequest,
};

/// Transport that replays scripted responses and records every request it sees.
///
/// Once the script runs out it answers `200` with no rate-limit headers.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<Result<ApiResponse, TransportError>>>>,
    seen: Arc<Mutex<Vec<TransportRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: ApiResponse) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn push_err(&self, err: TransportError) -> &Self {
        self.responses.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn seen(&self) -> Vec<TransportRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<ApiResponse, TransportError> {
        self.seen.lock().unwrap().push(request);
        self.responses.lock().unwrap().pop_front().unwrap_or_else(|| Ok(ApiResponse::new(200)))
    }
}

/// A response carrying bucket headers; `reset_after` is in seconds, as the server sends it.
pub fn bucket_response(bucket: &str, limit: u32, remaining: u32, reset_after: &str) -> ApiResponse {
    ApiResponse::new(200)
        .with_header("X-RateLimit-Bucket", bucket)
        .with_header("X-RateLimit-Limit", limit.to_string())
        .with_header("X-RateLimit-Remaining", remaining.to_string())
        .with_header("X-RateLimit-Reset-After", reset_after)
}

pub fn too_many_requests(bucket: &str, limit: u32, retry_after: &str) -> ApiResponse {
    let mut response = bucket_response(bucket, limit, 0, retry_after)
        .with_header("Retry-After", retry_after)
        .with_body(serde_json::json!({ "retry_after": retry_after.parse::<f64>().unwrap() }));
    response.status = 429;
    response
}

pub struct Harness {
    pub api: Api,
    pub transport: ScriptedTransport,
    pub clock: ManualClock,
    pub events: MemorySink,
}

/// Client on a manual clock with the background tick disabled; drive the queue with
/// `api.process_queue()`.
pub fn harness(config: ApiConfig) -> Harness {
    let transport = ScriptedTransport::new();
    let clock = ManualClock::new(1_000_000);
    let events = MemorySink::new();
    let api = Api::builder(transport.clone())
        .config(config.autostart(false))
        .clock(clock.clone())
        .sink(events.clone())
        .build()
        .expect("valid config");
    Harness { api, transport, clock, events }
}

/// Epoch clock that follows Tokio's timer, so a paused runtime moves it along with
/// `tokio::time::sleep` and the background tasks' own sleeps.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
    start: u64,
}

impl TokioClock {
    pub fn new(start: u64) -> Self {
        Self { origin: tokio::time::Instant::now(), start }
    }
}

impl Clock for TokioClock {
    fn now_millis(&self) -> u64 {
        self.start + self.origin.elapsed().as_millis() as u64
    }
}

pub struct Running {
    pub api: Api,
    pub transport: ScriptedTransport,
    pub events: MemorySink,
}

/// Client with its queue tick and sweeper running on Tokio time. Meant for
/// `#[tokio::test(start_paused = true)]`.
pub fn running(config: ApiConfig) -> Running {
    let transport = ScriptedTransport::new();
    let events = MemorySink::new();
    let api = Api::builder(transport.clone())
        .config(config.autostart(true))
        .clock(TokioClock::new(1_000_000))
        .sink(events.clone())
        .build()
        .expect("valid config");
    Running { api, transport, events }
}

/// Yield until the queue holds `len` entries.
pub async fn wait_for_queue(api: &Api, len: usize) {
    for _ in 0..1_000 {
        if api.queue_len() == len {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("queue never reached {len} entries (has {})", api.queue_len());
}
