use super::to_mbps;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How many samples a live display keeps.
pub const LIVE_SAMPLE_CAPACITY: usize = 60;

/// One periodic snapshot of aggregate throughput.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputSample {
    /// Offset from the moment the sampler started.
    pub at: Duration,
    pub mbps: f64,
    pub total_bytes: u64,
}

/// Periodic clock that turns a "bytes so far" reading into throughput samples.
pub struct Sampler<F> {
    read: F,
    interval: Duration,
    origin: Instant,
    last_at: Instant,
    last_total: u64,
    samples: Vec<ThroughputSample>,
}

impl<F> Sampler<F>
where
    F: Fn() -> u64,
{
    pub fn new(interval: Duration, read: F) -> Self {
        let now = Instant::now();
        let last_total = read();
        Self {
            read,
            interval,
            origin: now,
            last_at: now,
            last_total,
            samples: Vec::new(),
        }
    }

    /// Take one sample at `now`. Returns `None` when no time has passed
    /// since the previous sample.
    pub fn sample_at(&mut self, now: Instant) -> Option<ThroughputSample> {
        let elapsed = now.saturating_duration_since(self.last_at);
        if elapsed.is_zero() {
            return None;
        }

        // Each counter only grows, so a later sum is never smaller.
        let total = (self.read)().max(self.last_total);
        let sample = ThroughputSample {
            at: now.saturating_duration_since(self.origin),
            mbps: to_mbps(total - self.last_total, elapsed.as_secs_f64()),
            total_bytes: total,
        };

        self.last_at = now;
        self.last_total = total;
        self.samples.push(sample);
        Some(sample)
    }

    pub fn samples(&self) -> &[ThroughputSample] {
        &self.samples
    }

    pub fn peak_mbps(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.mbps).reduce(f64::max)
    }

    /// Tick every `interval` until `stop` fires. A trailing partial interval
    /// is only sampled when the last tick was delayed by a full interval.
    /// Returns every sample taken.
    pub async fn run<S>(mut self, stop: CancellationToken, mut on_sample: S) -> Vec<ThroughputSample>
    where
        S: FnMut(&ThroughputSample),
    {
        let mut ticker = time::interval_at(self.origin + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(sample) = self.sample_at(Instant::now()) {
                        on_sample(&sample);
                    }
                }
            }
        }

        let now = Instant::now();
        if now.saturating_duration_since(self.last_at) >= self.interval {
            if let Some(sample) = self.sample_at(now) {
                on_sample(&sample);
            }
        }

        self.samples
    }
}

/// Bounded, ordered retention of the most recent samples for live charting.
#[derive(Debug, Clone, Default)]
pub struct SampleHistory {
    samples: VecDeque<ThroughputSample>,
}

impl SampleHistory {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(LIVE_SAMPLE_CAPACITY),
        }
    }

    pub fn push(&mut self, sample: ThroughputSample) {
        if self.samples.len() >= LIVE_SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&ThroughputSample> {
        self.samples.back()
    }

    pub fn mbps(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.mbps).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn sample(i: u64) -> ThroughputSample {
        ThroughputSample {
            at: Duration::from_millis(i * 500),
            mbps: i as f64,
            total_bytes: i * 1000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_delta() {
        let counter = Arc::new(AtomicU64::new(0));
        let reader = counter.clone();
        let mut sampler = Sampler::new(Duration::from_millis(500), move || {
            reader.load(Ordering::Relaxed)
        });

        counter.store(1_000_000, Ordering::Relaxed);
        time::advance(Duration::from_secs(1)).await;
        let first = sampler.sample_at(Instant::now()).unwrap();
        assert_eq!(first.mbps, 8.0);
        assert_eq!(first.total_bytes, 1_000_000);
        assert_eq!(first.at, Duration::from_secs(1));

        counter.store(1_500_000, Ordering::Relaxed);
        time::advance(Duration::from_millis(500)).await;
        let second = sampler.sample_at(Instant::now()).unwrap();
        assert_eq!(second.mbps, 8.0);
        assert_eq!(sampler.peak_mbps(), Some(8.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_elapsed_is_skipped() {
        let mut sampler = Sampler::new(Duration::from_millis(500), || 42);
        assert!(sampler.sample_at(Instant::now()).is_none());
        assert!(sampler.samples().is_empty());
        assert_eq!(sampler.peak_mbps(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_stopped() {
        let counter = Arc::new(AtomicU64::new(0));
        let reader = counter.clone();
        let sampler = Sampler::new(Duration::from_millis(500), move || {
            reader.load(Ordering::Relaxed)
        });
        let stop = CancellationToken::new();

        let feeder = {
            let counter = counter.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                for _ in 0..4 {
                    time::sleep(Duration::from_millis(225)).await;
                    counter.fetch_add(125_000, Ordering::Relaxed);
                }
                time::sleep(Duration::from_millis(200)).await;
                stop.cancel();
            })
        };

        let mut seen = Vec::new();
        let samples = sampler.run(stop, |s| seen.push(*s)).await;
        feeder.await.unwrap();

        assert_eq!(samples, seen);
        assert!(samples.len() >= 2);
        assert_eq!(samples.last().unwrap().total_bytes, 500_000);
        for pair in samples.windows(2) {
            assert!(pair[1].at >= pair[0].at);
            assert!(pair[1].total_bytes >= pair[0].total_bytes);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_interval_is_not_sampled() {
        let counter = Arc::new(AtomicU64::new(0));
        let reader = counter.clone();
        let sampler = Sampler::new(Duration::from_millis(500), move || {
            reader.load(Ordering::Relaxed)
        });
        let stop = CancellationToken::new();

        let feeder = {
            let counter = counter.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                time::sleep(Duration::from_millis(400)).await;
                counter.fetch_add(125_000, Ordering::Relaxed);
                time::sleep(Duration::from_millis(101)).await;
                counter.fetch_add(125_000, Ordering::Relaxed);
                stop.cancel();
            })
        };

        let samples = sampler.run(stop, |_| {}).await;
        feeder.await.unwrap();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].at, Duration::from_millis(500));
        assert_eq!(samples[0].total_bytes, 125_000);
        assert_eq!(samples[0].mbps, 2.0);
    }

    #[test]
    fn test_history_keeps_most_recent() {
        let mut history = SampleHistory::new();
        for i in 0..(LIVE_SAMPLE_CAPACITY as u64 + 15) {
            history.push(sample(i));
        }

        assert_eq!(history.len(), LIVE_SAMPLE_CAPACITY);
        assert_eq!(history.mbps()[0], 15.0);
        assert_eq!(history.latest().unwrap().mbps, (LIVE_SAMPLE_CAPACITY + 14) as f64);

        history.clear();
        assert!(history.is_empty());
    }
}
