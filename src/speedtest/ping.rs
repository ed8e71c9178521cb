use super::session::{EventSink, SessionEvent};
use super::transport::{cache_bust, resolve_url, Transport};
use super::round2;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Pause between consecutive probes.
const PROBE_GAP: Duration = Duration::from_millis(200);

pub struct PingTest<'a> {
    transport: &'a dyn Transport,
    attempts: usize,
    samples: Vec<f64>,
}

impl<'a> PingTest<'a> {
    pub fn new(transport: &'a dyn Transport, attempts: usize) -> Self {
        Self {
            transport,
            attempts,
            samples: Vec::new(),
        }
    }

    /// Probe `target` (a byte-source template; it is asked for zero bytes)
    /// `attempts` times in sequence. Returns `None` if no attempt succeeded
    /// or the run was cancelled.
    pub async fn run(
        &mut self,
        target: &str,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Option<PingResult> {
        let target = resolve_url(target, 0);
        self.samples.clear();

        for attempt in 1..=self.attempts {
            if attempt > 1 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(PROBE_GAP) => {}
                }
            }

            let url = match cache_bust(&target) {
                Ok(url) => url,
                Err(e) => {
                    sink.warn(format!("ping {attempt}/{}: {e}", self.attempts));
                    return None;
                }
            };

            let start = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                outcome = self.transport.probe(&url) => outcome,
            };

            let rtt_ms = match outcome {
                Ok(()) => {
                    let rtt = start.elapsed().as_secs_f64() * 1000.0;
                    self.samples.push(rtt);
                    sink.info(format!("ping {attempt}/{}: {rtt:.1} ms", self.attempts));
                    Some(rtt)
                }
                Err(e) => {
                    sink.warn(format!("ping {attempt}/{} failed: {e}", self.attempts));
                    None
                }
            };

            sink.emit(SessionEvent::PingSample { attempt, rtt_ms });
        }

        let result = summarize(&self.samples, self.attempts);
        match &result {
            Some(r) => sink.info(format!(
                "latency {} ms (median of {}/{} probes)",
                r.median_ms, r.successes, r.attempts
            )),
            None => sink.warn("latency unavailable: every probe failed"),
        }
        result
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PingResult {
    /// Median round trip, rounded to the nearest millisecond.
    pub median_ms: f64,
    /// Sample standard deviation of the round trips.
    pub jitter_ms: f64,
    pub successes: usize,
    pub attempts: usize,
}

/// Reduce successful round-trip times to a median-based estimate.
pub fn summarize(samples: &[f64], attempts: usize) -> Option<PingResult> {
    let median = median(samples)?;

    let avg = samples.iter().sum::<f64>() / samples.len() as f64;
    let jitter = if samples.len() > 1 {
        let variance: f64 = samples.iter().map(|&x| (x - avg).powi(2)).sum::<f64>()
            / (samples.len() - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };

    Some(PingResult {
        median_ms: median.round(),
        jitter_ms: round2(jitter),
        successes: samples.len(),
        attempts,
    })
}

/// Middle value of the sorted samples; the mean of the two middle values
/// for an even count.
pub fn median(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;

    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
