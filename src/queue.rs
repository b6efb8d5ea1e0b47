//! Deferred requests waiting to become eligible.
//!
//! Entries are ordered by `(wait_until, sequence)`: earliest eligibility first, FIFO among
//! requests eligible at the same instant. A request keeps its sequence number across requeues,
//! so being deferred again never pushes it behind requests submitted after it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::adaptive::DynamicConfig;
use crate::api::ApiOutcome;
use crate::error::ApiError;
use crate::request::Request;

/// Where a queued request's result is delivered.
pub type Completion = oneshot::Sender<Result<ApiOutcome, ApiError>>;

/// A deferred request and the channel its caller is waiting on.
#[derive(Debug)]
pub struct QueuedRequest {
    pub request: Request,
    pub completion: Completion,
    pub sequence: u64,
}

impl QueuedRequest {
    /// Deliver the final result. The caller may have stopped waiting; that is not an error.
    pub fn complete(self, result: Result<ApiOutcome, ApiError>) {
        let _ = self.completion.send(result);
    }
}

/// Ordered store of deferred requests plus the handle of the periodic tick that drains it.
#[derive(Debug)]
pub struct RequestQueue {
    entries: Mutex<BTreeMap<(u64, u64), QueuedRequest>>,
    next_sequence: AtomicU64,
    interval: DynamicConfig<Duration>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl RequestQueue {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            next_sequence: AtomicU64::new(0),
            interval: DynamicConfig::new(interval),
            ticker: Mutex::new(None),
        }
    }

    /// Queue a new request and return the receiver its result will arrive on.
    pub fn enqueue(&self, request: Request) -> oneshot::Receiver<Result<ApiOutcome, ApiError>> {
        let (completion, rx) = oneshot::channel();
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.requeue(QueuedRequest { request, completion, sequence });
        rx
    }

    /// Put an entry back, keeping its original sequence number.
    pub fn requeue(&self, entry: QueuedRequest) {
        let key = (entry.request.wait_until(), entry.sequence);
        self.entries().insert(key, entry);
    }

    /// Remove and return every entry eligible at `now`, in processing order.
    pub fn take_eligible(&self, now: u64) -> Vec<QueuedRequest> {
        let mut entries = self.entries();
        let pending = match now.checked_add(1) {
            Some(bound) => entries.split_off(&(bound, 0)),
            None => BTreeMap::new(),
        };
        let ready = std::mem::replace(&mut *entries, pending);
        ready.into_values().collect()
    }

    /// Earliest `wait_until` among queued entries.
    pub fn next_eligible(&self) -> Option<u64> {
        self.entries().keys().next().map(|(wait_until, _)| *wait_until)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Poll interval of the background tick. Changes apply from the next tick on.
    pub fn interval(&self) -> &DynamicConfig<Duration> {
        &self.interval
    }

    pub fn set_interval(&self, interval: Duration) {
        self.interval.set(interval);
    }

    /// Install the background tick, replacing (and stopping) any previous one.
    pub(crate) fn set_ticker(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.ticker().replace(handle) {
            old.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the background tick. Queued entries stay queued.
    pub fn stop(&self) {
        if let Some(handle) = self.ticker().take() {
            handle.abort();
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<(u64, u64), QueuedRequest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ticker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
