use super::sampler::{Sampler, ThroughputSample};
use super::session::EventSink;
use super::stream::run_upload;
use super::transport::Transport;
use super::{round2, to_mbps};
use crate::error::SpeedTestError;
use bytes::{Bytes, BytesMut};
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Size of the random block the payload is tiled from.
const PATTERN_SIZE: usize = 1_000_000; // 1MB pattern

pub struct UploadTest {
    transport: Arc<dyn Transport>,
    data: Bytes,
    sample_interval: Duration,
    deadline: Option<Duration>,
}

impl UploadTest {
    pub fn new(transport: Arc<dyn Transport>, upload_size: usize, sample_interval: Duration) -> Self {
        Self {
            transport,
            data: build_payload(upload_size),
            sample_interval,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn payload_len(&self) -> usize {
        self.data.len()
    }

    /// Time one write of the whole payload to `sink_url`. Returns `None` with
    /// a logged reason when the sink never acknowledged it.
    pub async fn run<S>(
        &self,
        sink_url: &str,
        cancel: &CancellationToken,
        sink: &EventSink,
        on_sample: S,
    ) -> Option<UploadResult>
    where
        S: FnMut(&ThroughputSample) + Send + 'static,
    {
        let size = self.data.len();
        let progress = Arc::new(AtomicU64::new(0));
        let sampler_stop = CancellationToken::new();

        sink.info(format!("upload: sending {size} bytes"));

        let sampler = {
            let progress = progress.clone();
            let sampler = Sampler::new(self.sample_interval, move || progress.load(Ordering::Relaxed));
            tokio::spawn(sampler.run(sampler_stop.clone(), on_sample))
        };

        let write = run_upload(
            self.transport.as_ref(),
            sink_url,
            self.data.clone(),
            progress,
            cancel,
        );
        let outcome = match self.deadline {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(outcome) => outcome,
                Err(_) => Err(SpeedTestError::Transport(format!(
                    "not acknowledged within {limit:?}"
                ))),
            },
            None => write.await,
        };

        sampler_stop.cancel();
        if let Err(e) = sampler.await {
            sink.warn(format!("upload: sampler ended abnormally: {e}"));
        }

        match outcome {
            Ok(elapsed) if !elapsed.is_zero() => {
                let mbps = round2(to_mbps(size as u64, elapsed.as_secs_f64()));
                sink.info(format!("upload: {mbps} Mbps in {elapsed:?}"));
                Some(UploadResult { mbps, elapsed })
            }
            Ok(_) => {
                sink.warn("upload: acknowledged in zero time, no rate available");
                None
            }
            Err(SpeedTestError::Cancelled) => {
                sink.info("upload: cancelled");
                None
            }
            Err(e) => {
                sink.warn(format!("upload failed: {e}"));
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub mbps: f64,
    pub elapsed: Duration,
}

/// Exactly `size` bytes tiled from one pseudo-random block, so transport
/// compression gains nothing.
pub fn build_payload(size: usize) -> Bytes {
    let mut rng = rand::rngs::StdRng::from_entropy();
    let mut pattern = vec![0u8; PATTERN_SIZE.min(size)];
    rng.fill(pattern.as_mut_slice());

    let mut data = BytesMut::with_capacity(size);
    while data.len() < size {
        let take = (size - data.len()).min(pattern.len());
        data.extend_from_slice(&pattern[..take]);
    }
    data.freeze()
}
