use super::session::EventSink;
use super::transport::{cache_bust, Transport};
use crate::error::{Result, SpeedTestError};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Pending,
    Running,
    Completed,
    Errored,
    Cancelled,
}

/// Progress of one download stream. Only its own unit writes to it; the
/// sampler and the coordinator read it concurrently.
#[derive(Debug)]
pub struct StreamState {
    pub index: usize,
    bytes: AtomicU64,
    started_at: OnceLock<Instant>,
    finished_at: OnceLock<Instant>,
    outcome: OnceLock<StreamStatus>,
}

impl StreamState {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            bytes: AtomicU64::new(0),
            started_at: OnceLock::new(),
            finished_at: OnceLock::new(),
            outcome: OnceLock::new(),
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at.get().copied()
    }

    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at.get().copied()
    }

    pub fn status(&self) -> StreamStatus {
        match (self.outcome.get(), self.started_at.get()) {
            (Some(status), _) => *status,
            (None, Some(_)) => StreamStatus::Running,
            (None, None) => StreamStatus::Pending,
        }
    }

    fn add(&self, n: u64) -> u64 {
        self.bytes.fetch_add(n, Ordering::AcqRel) + n
    }

    fn start(&self) {
        let _ = self.started_at.set(Instant::now());
    }

    fn finish(&self, status: StreamStatus) -> StreamStatus {
        let _ = self.finished_at.set(Instant::now());
        let _ = self.outcome.set(status);
        self.status()
    }
}

/// Download `url` until `target_bytes` have arrived, the transport fails, or
/// `cancel` fires. Failures stay local to this unit: they are logged and
/// turned into a terminal status.
pub async fn run_download(
    transport: &dyn Transport,
    url: &str,
    target_bytes: u64,
    state: &StreamState,
    cancel: &CancellationToken,
    sink: &EventSink,
) -> StreamStatus {
    if cancel.is_cancelled() {
        return state.finish(StreamStatus::Cancelled);
    }
    state.start();

    let url = match cache_bust(url) {
        Ok(url) => url,
        Err(e) => {
            sink.warn(format!("stream {}: {e}", state.index));
            return state.finish(StreamStatus::Errored);
        }
    };

    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return state.finish(StreamStatus::Cancelled),
        opened = transport.fetch(&url) => match opened {
            Ok(stream) => stream,
            Err(e) => {
                sink.warn(format!("stream {} failed to open: {e}", state.index));
                return state.finish(StreamStatus::Errored);
            }
        },
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return state.finish(StreamStatus::Cancelled),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                let total = state.add(chunk.len() as u64);
                if total >= target_bytes {
                    // Dropping the stream closes the connection early.
                    drop(stream);
                    tracing::debug!(stream = state.index, total, "target reached");
                    return state.finish(StreamStatus::Completed);
                }
            }
            Some(Err(e)) => {
                sink.warn(format!(
                    "stream {} failed after {} bytes: {e}",
                    state.index,
                    state.bytes()
                ));
                return state.finish(StreamStatus::Errored);
            }
            None => {
                tracing::debug!(stream = state.index, total = state.bytes(), "source exhausted");
                return state.finish(StreamStatus::Completed);
            }
        }
    }
}

/// One timed write of `payload`. Returns the time from dispatch until the
/// sink acknowledged the whole body.
pub async fn run_upload(
    transport: &dyn Transport,
    url: &str,
    payload: Bytes,
    progress: Arc<AtomicU64>,
    cancel: &CancellationToken,
) -> Result<Duration> {
    let url = cache_bust(url)?;
    let start = Instant::now();

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SpeedTestError::Cancelled),
        sent = transport.send(&url, payload, progress) => sent.map(|_| start.elapsed()),
    }
}
