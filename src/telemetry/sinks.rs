use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::Level;

use super::events::ApiEvent;

/// Consumes pipeline events.
///
/// Emission happens on the request path, so implementations must not block. Sinks that do
/// I/O should buffer or hand off to a task.
pub trait EventSink: Send + Sync + fmt::Debug {
    fn emit(&self, event: ApiEvent);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: ApiEvent) {
        (**self).emit(event)
    }
}

/// A no-op sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ApiEvent) {}
}

/// A sink that logs events through `tracing` at [`ApiEvent::level`].
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: ApiEvent) {
        let kind = event.kind();
        let level = event.level();
        if level == Level::ERROR {
            tracing::error!(kind, event = %event, "api_event");
        } else if level == Level::WARN {
            tracing::warn!(kind, event = %event, "api_event");
        } else if level == Level::INFO {
            tracing::info!(kind, event = %event, "api_event");
        } else if level == Level::DEBUG {
            tracing::debug!(kind, event = %event, "api_event");
        } else {
            tracing::trace!(kind, event = %event, "api_event");
        }
    }
}

/// A sink that keeps the most recent events in memory.
///
/// Once `capacity` is reached the oldest event is dropped and counted in
/// [`evicted`](Self::evicted).
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<ApiEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<ApiEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ApiEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: ApiEvent) {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(event);
    }
}

/// Fans every event out to each inner sink in order.
#[derive(Clone, Debug, Default)]
pub struct MulticastSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MulticastSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for MulticastSink {
    fn emit(&self, event: ApiEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}
