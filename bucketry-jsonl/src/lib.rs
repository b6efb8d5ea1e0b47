//! JSONL sink for `bucketry`. Writes one event per line.
//! Always appends; bring your own path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bucketry::telemetry::{ApiEvent, EventSink};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

enum Message {
    Line(String),
    Flush(oneshot::Sender<()>),
}

/// Appends each [`ApiEvent`] as a JSON object line to a file.
///
/// `emit` never blocks: lines go through a bounded channel to a writer task, and events that
/// arrive while the channel is full are dropped and counted.
#[derive(Clone, Debug)]
pub struct JsonlSink {
    tx: mpsc::Sender<Message>,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Line(line) => f.debug_tuple("Line").field(line).finish(),
            Message::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl JsonlSink {
    /// Must be called inside a Tokio runtime.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, 1024)
    }

    pub fn with_capacity(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(write_lines(path.into(), rx));
        Self { tx, dropped: Arc::new(AtomicU64::new(0)) }
    }

    /// Events dropped because the writer fell behind or stopped.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until every line emitted so far has been written and flushed.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: ApiEvent) {
        let line = event.to_json().to_string() + "\n";
        if self.tx.try_send(Message::Line(line)).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

async fn write_lines(path: PathBuf, mut rx: mpsc::Receiver<Message>) {
    let mut file = match tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await
    {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "jsonl sink could not open file");
            return;
        }
    };
    while let Some(message) = rx.recv().await {
        match message {
            Message::Line(line) => {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    tracing::warn!(path = %path.display(), error = %e, "jsonl sink write failed");
                }
            }
            Message::Flush(done) => {
                if let Err(e) = file.flush().await {
                    tracing::warn!(path = %path.display(), error = %e, "jsonl sink flush failed");
                }
                let _ = done.send(());
            }
        }
    }
}
