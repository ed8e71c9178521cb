use super::sampler::{Sampler, ThroughputSample};
use super::session::EventSink;
use super::stream::{run_download, StreamState, StreamStatus};
use super::transport::{resolve_url, Transport};
use super::{round2, to_mbps};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct DownloadTest {
    transport: Arc<dyn Transport>,
    stream_count: usize,
    per_stream_bytes: u64,
    sample_interval: Duration,
    deadline: Option<Duration>,
}

impl DownloadTest {
    pub fn new(
        transport: Arc<dyn Transport>,
        stream_count: usize,
        per_stream_bytes: u64,
        sample_interval: Duration,
    ) -> Self {
        Self {
            transport,
            stream_count,
            per_stream_bytes,
            sample_interval,
            deadline: None,
        }
    }

    /// Stop every stream once this much time has passed and report on
    /// whatever arrived until then.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run all streams concurrently against `source` (a byte-source
    /// template) while sampling their combined progress. `on_sample` sees
    /// every sample in order. Returns `None` when no rate can be computed.
    pub async fn run<S>(
        &self,
        source: &str,
        cancel: &CancellationToken,
        sink: &EventSink,
        on_sample: S,
    ) -> Option<DownloadResult>
    where
        S: FnMut(&ThroughputSample) + Send + 'static,
    {
        let url = resolve_url(source, self.per_stream_bytes);
        let states: Arc<Vec<Arc<StreamState>>> = Arc::new(
            (0..self.stream_count)
                .map(|i| Arc::new(StreamState::new(i)))
                .collect(),
        );

        // Stream units stop on either the caller's cancel or the deadline.
        let streams_stop = cancel.child_token();
        let sampler_stop = CancellationToken::new();

        sink.info(format!(
            "download: {} streams x {} bytes",
            self.stream_count, self.per_stream_bytes
        ));

        let sampler = {
            let states = states.clone();
            let sampler = Sampler::new(self.sample_interval, move || {
                states.iter().map(|s| s.bytes()).sum()
            });
            tokio::spawn(sampler.run(sampler_stop.clone(), on_sample))
        };

        let mut units = JoinSet::new();
        for state in states.iter() {
            let transport = self.transport.clone();
            let state = state.clone();
            let url = url.clone();
            let target = self.per_stream_bytes;
            let stop = streams_stop.clone();
            let sink = sink.clone();
            units.spawn(async move {
                run_download(transport.as_ref(), &url, target, &state, &stop, &sink).await
            });
        }

        let deadline = self.deadline.map(|limit| {
            let stop = streams_stop.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        sink.warn(format!("download: stage deadline of {limit:?} reached, stopping streams"));
                        stop.cancel();
                    }
                }
            })
        });

        // Wait for every unit to settle, whatever its outcome.
        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                sink.warn(format!("download: stream task ended abnormally: {e}"));
            }
        }
        let settled_at = Instant::now();

        if let Some(deadline) = deadline {
            deadline.abort();
        }
        sampler_stop.cancel();
        let samples = match sampler.await {
            Ok(samples) => samples,
            Err(e) => {
                sink.warn(format!("download: sampler ended abnormally: {e}"));
                Vec::new()
            }
        };

        for state in states.iter() {
            match state.status() {
                StreamStatus::Completed => {}
                status => sink.info(format!(
                    "download: stream {} {:?} after {} bytes",
                    state.index,
                    status,
                    state.bytes()
                )),
            }
        }

        let result = aggregate(&states, &samples, settled_at);
        match &result {
            Some(r) => sink.info(format!(
                "download: {} Mbps avg, {} Mbps peak, {} bytes",
                r.avg_mbps, r.peak_mbps, r.total_bytes
            )),
            None => sink.warn("download: no stream ran long enough to compute a rate"),
        }
        result
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadResult {
    pub avg_mbps: f64,
    pub peak_mbps: f64,
    pub total_bytes: u64,
    pub elapsed: Duration,
    pub completed_streams: usize,
}

/// Effective aggregate throughput: total bytes across all streams over the
/// wall-clock span from the first stream start to the last stream finish.
pub fn aggregate(
    states: &[Arc<StreamState>],
    samples: &[ThroughputSample],
    settled_at: Instant,
) -> Option<DownloadResult> {
    let first_start = states.iter().filter_map(|s| s.started_at()).min()?;
    let last_finish = states
        .iter()
        .filter_map(|s| s.finished_at())
        .max()
        .unwrap_or(settled_at);

    let elapsed = last_finish.saturating_duration_since(first_start);
    let total_bytes: u64 = states.iter().map(|s| s.bytes()).sum();
    if elapsed.is_zero() {
        return None;
    }

    let avg = to_mbps(total_bytes, elapsed.as_secs_f64());

    // Fixed-cadence samples can straddle the start and end of the window,
    // so the average is a lower bound for the peak.
    let peak = samples
        .iter()
        .map(|s| s.mbps)
        .reduce(f64::max)
        .map_or(avg, |peak| peak.max(avg));

    Some(DownloadResult {
        avg_mbps: round2(avg),
        peak_mbps: round2(peak),
        total_bytes,
        elapsed,
        completed_streams: states
            .iter()
            .filter(|s| s.status() == StreamStatus::Completed)
            .count(),
    })
}
