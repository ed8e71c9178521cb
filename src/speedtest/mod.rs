pub mod download;
pub mod ping;
pub mod sampler;
pub mod session;
pub mod stream;
pub mod transport;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use download::{DownloadResult, DownloadTest};
pub use ping::{PingResult, PingTest};
pub use sampler::{SampleHistory, Sampler, ThroughputSample, LIVE_SAMPLE_CAPACITY};
pub use session::{EventSink, LogEvent, LogLevel, Session, SessionEvent, SessionState};
pub use stream::{StreamState, StreamStatus};
pub use transport::{ByteStream, HttpTransport, Transport};
pub use upload::{UploadResult, UploadTest};

/// Final summary of one run. A `None` field means that sub-measurement
/// produced no usable data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementResult {
    pub ping_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub download_avg_mbps: Option<f64>,
    pub download_peak_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Idle,
    Ping,
    Download,
    Upload,
    Complete,
}

/// Decimal megabits per second.
pub fn to_mbps(bytes: u64, seconds: f64) -> f64 {
    (bytes as f64 * 8.0) / seconds / 1_000_000.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
