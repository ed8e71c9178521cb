use crate::error::{Result, SpeedTestError};
use std::time::Duration;

pub const BYTES_PER_MB: f64 = 1_048_576.0;

pub const DEFAULT_DOWNLOAD_URL: &str = "https://speed.cloudflare.com/__down?bytes={bytes}";
pub const DEFAULT_UPLOAD_URL: &str = "https://speed.cloudflare.com/__up";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub stream_count: usize,
    pub per_stream_target_mb: f64,
    pub upload_size_mb: f64,
    pub ping_attempts: usize,
    pub sample_interval_ms: u64,
    /// Byte source. `{bytes}` is replaced with the requested byte count.
    pub download_url: String,
    /// Byte sink for the upload stage.
    pub upload_url: String,
    /// Deadline applied to the download and upload stages. `None` leaves
    /// stalled transfers to the transport's own timeouts.
    pub stage_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stream_count: 4,
            per_stream_target_mb: 25.0,
            upload_size_mb: 10.0,
            ping_attempts: 10,
            sample_interval_ms: 500,
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            stage_timeout_secs: Some(30),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.stream_count < 1 {
            return Err(invalid("stream count must be at least 1"));
        }
        if !(self.per_stream_target_mb.is_finite() && self.per_stream_target_mb > 0.0) {
            return Err(invalid("per-stream target must be a positive size"));
        }
        if !(self.upload_size_mb.is_finite() && self.upload_size_mb > 0.0) {
            return Err(invalid("upload size must be a positive size"));
        }
        if self.ping_attempts < 1 {
            return Err(invalid("ping attempts must be at least 1"));
        }
        if self.sample_interval_ms == 0 {
            return Err(invalid("sample interval must be positive"));
        }
        if self.stage_timeout_secs == Some(0) {
            return Err(invalid("stage timeout must be positive when set"));
        }
        if self.download_url.trim().is_empty() || self.upload_url.trim().is_empty() {
            return Err(invalid("download and upload endpoints are required"));
        }
        Ok(())
    }

    pub fn per_stream_target_bytes(&self) -> u64 {
        mb_to_bytes(self.per_stream_target_mb)
    }

    pub fn upload_size_bytes(&self) -> usize {
        mb_to_bytes(self.upload_size_mb) as usize
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }
}

fn mb_to_bytes(mb: f64) -> u64 {
    (mb * BYTES_PER_MB).round() as u64
}

fn invalid(reason: &str) -> SpeedTestError {
    SpeedTestError::InvalidConfig(reason.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    Streams,
    DownloadSize,
    UploadSize,
    PingCount,
    SampleInterval,
}

impl SettingsField {
    pub fn next(self) -> Self {
        match self {
            SettingsField::Streams => SettingsField::DownloadSize,
            SettingsField::DownloadSize => SettingsField::UploadSize,
            SettingsField::UploadSize => SettingsField::PingCount,
            SettingsField::PingCount => SettingsField::SampleInterval,
            SettingsField::SampleInterval => SettingsField::Streams,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            SettingsField::Streams => SettingsField::SampleInterval,
            SettingsField::DownloadSize => SettingsField::Streams,
            SettingsField::UploadSize => SettingsField::DownloadSize,
            SettingsField::PingCount => SettingsField::UploadSize,
            SettingsField::SampleInterval => SettingsField::PingCount,
        }
    }

    /// Nudge the selected field up or down, staying inside sane bounds.
    pub fn adjust(self, settings: &mut Settings, increase: bool) {
        match self {
            SettingsField::Streams => {
                settings.stream_count = step_usize(settings.stream_count, 1, 1, 16, increase);
            }
            SettingsField::DownloadSize => {
                settings.per_stream_target_mb =
                    step_f64(settings.per_stream_target_mb, 5.0, 5.0, 250.0, increase);
            }
            SettingsField::UploadSize => {
                settings.upload_size_mb = step_f64(settings.upload_size_mb, 5.0, 5.0, 250.0, increase);
            }
            SettingsField::PingCount => {
                settings.ping_attempts = step_usize(settings.ping_attempts, 5, 5, 100, increase);
            }
            SettingsField::SampleInterval => {
                settings.sample_interval_ms =
                    step_usize(settings.sample_interval_ms as usize, 100, 100, 2000, increase) as u64;
            }
        }
    }
}

fn step_usize(value: usize, step: usize, min: usize, max: usize, increase: bool) -> usize {
    if increase {
        (value + step).min(max)
    } else {
        value.saturating_sub(step).max(min)
    }
}

fn step_f64(value: f64, step: f64, min: f64, max: f64, increase: bool) -> f64 {
    if increase {
        (value + step).min(max)
    } else {
        (value - step).max(min)
    }
}
