use super::download::{DownloadResult, DownloadTest};
use super::ping::{PingResult, PingTest};
use super::sampler::ThroughputSample;
use super::transport::Transport;
use super::upload::{UploadResult, UploadTest};
use super::{MeasurementResult, TestPhase};
use crate::error::{Result, SpeedTestError};
use crate::settings::Settings;
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
}

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S%.3f"), self.message)
    }
}

/// Everything a subscriber learns about a run, in order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Log(LogEvent),
    Phase(TestPhase),
    PingSample { attempt: usize, rtt_ms: Option<f64> },
    PingComplete(Option<PingResult>),
    DownloadSample(ThroughputSample),
    DownloadComplete(Option<DownloadResult>),
    UploadSample(ThroughputSample),
    UploadComplete(Option<UploadResult>),
    Completed(MeasurementResult),
    /// Cancelled. Carries the results of the stages that finished first.
    Aborted(MeasurementResult),
}

/// Publishes session events and mirrors log lines into `tracing`.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: SessionEvent) {
        // A subscriber that went away is not an error for the engine.
        let _ = self.tx.send(event);
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.log(LogLevel::Warn, message);
    }

    fn log(&self, level: LogLevel, message: String) {
        self.emit(SessionEvent::Log(LogEvent::new(level, message)));
    }
}

/// Runs ping, download and upload in sequence and owns the cancel token.
pub struct Session {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<SessionState>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<MeasurementResult>>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Begin a new run. Any earlier results are discarded; events for this
    /// run arrive on the returned receiver.
    pub fn start(&mut self, settings: Settings) -> Result<mpsc::UnboundedReceiver<SessionEvent>> {
        settings.validate()?;
        {
            let mut state = lock(&self.state);
            if *state == SessionState::Running {
                return Err(SpeedTestError::AlreadyRunning);
            }
            *state = SessionState::Running;
        }

        self.cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let run = SessionRun {
            transport: self.transport.clone(),
            settings,
            cancel: self.cancel.clone(),
            state: self.state.clone(),
            sink: EventSink::new(tx),
        };
        self.task = Some(tokio::spawn(run.execute()));
        Ok(rx)
    }

    /// Request an abort. Safe to call any number of times; returns whether
    /// this call was the one that fired the token.
    pub fn cancel(&self) -> bool {
        if self.state() != SessionState::Running || self.cancel.is_cancelled() {
            return false;
        }
        tracing::info!("cancellation requested");
        self.cancel.cancel();
        true
    }

    /// Wait for the current run to unwind completely.
    pub async fn wait(&mut self) -> Option<MeasurementResult> {
        let task = self.task.take()?;
        match task.await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::error!("measurement task failed: {e}");
                None
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SessionRun {
    transport: Arc<dyn Transport>,
    settings: Settings,
    cancel: CancellationToken,
    state: Arc<Mutex<SessionState>>,
    sink: EventSink,
}

impl SessionRun {
    async fn execute(self) -> MeasurementResult {
        let mut result = MeasurementResult::default();
        let settings = &self.settings;
        let sink = &self.sink;

        sink.info(format!(
            "measurement started: {} streams, {} MB per stream, {} MB upload",
            settings.stream_count, settings.per_stream_target_mb, settings.upload_size_mb
        ));

        // Ping
        sink.emit(SessionEvent::Phase(TestPhase::Ping));
        let ping = PingTest::new(self.transport.as_ref(), settings.ping_attempts)
            .run(&settings.download_url, &self.cancel, sink)
            .await;
        if self.cancel.is_cancelled() {
            return self.finish(result);
        }
        result.ping_ms = ping.as_ref().map(|p| p.median_ms);
        result.jitter_ms = ping.as_ref().map(|p| p.jitter_ms);
        sink.emit(SessionEvent::PingComplete(ping));

        // Download
        sink.emit(SessionEvent::Phase(TestPhase::Download));
        let forward = sink.clone();
        let download = DownloadTest::new(
            self.transport.clone(),
            settings.stream_count,
            settings.per_stream_target_bytes(),
            settings.sample_interval(),
        )
        .with_deadline(settings.stage_timeout())
        .run(&settings.download_url, &self.cancel, sink, move |s| {
            forward.emit(SessionEvent::DownloadSample(*s))
        })
        .await;
        if self.cancel.is_cancelled() {
            return self.finish(result);
        }
        result.download_avg_mbps = download.as_ref().map(|d| d.avg_mbps);
        result.download_peak_mbps = download.as_ref().map(|d| d.peak_mbps);
        sink.emit(SessionEvent::DownloadComplete(download));

        // Upload
        sink.emit(SessionEvent::Phase(TestPhase::Upload));
        let forward = sink.clone();
        let upload = UploadTest::new(
            self.transport.clone(),
            settings.upload_size_bytes(),
            settings.sample_interval(),
        )
        .with_deadline(settings.stage_timeout())
        .run(&settings.upload_url, &self.cancel, sink, move |s| {
            forward.emit(SessionEvent::UploadSample(*s))
        })
        .await;
        if self.cancel.is_cancelled() {
            return self.finish(result);
        }
        result.upload_mbps = upload.as_ref().map(|u| u.mbps);
        sink.emit(SessionEvent::UploadComplete(upload));

        self.finish(result)
    }

    fn finish(&self, result: MeasurementResult) -> MeasurementResult {
        let terminal = if self.cancel.is_cancelled() {
            SessionState::Aborted
        } else {
            SessionState::Completed
        };

        {
            let mut state = lock(&self.state);
            if *state != SessionState::Running {
                return result;
            }
            *state = terminal;
        }

        match terminal {
            SessionState::Aborted => {
                self.sink.warn("measurement aborted");
                self.sink.emit(SessionEvent::Aborted(result.clone()));
            }
            _ => {
                self.sink.info("measurement complete");
                self.sink.emit(SessionEvent::Phase(TestPhase::Complete));
                self.sink.emit(SessionEvent::Completed(result.clone()));
            }
        }
        result
    }
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::testing::{Script, ScriptedTransport, UploadOutcome};
    use std::time::Duration;

    fn settings() -> Settings {
        Settings {
            stream_count: 2,
            per_stream_target_mb: 1.0,
            upload_size_mb: 1.0,
            ping_attempts: 3,
            sample_interval_ms: 500,
            download_url: "mem://source?bytes={bytes}".into(),
            upload_url: "mem://sink".into(),
            stage_timeout_secs: Some(30),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_completes() {
        let transport = ScriptedTransport::new()
            .with_probes(&[Some(20), Some(22), Some(21)])
            .with_downloads(2, Script::new().paced(2, 500, 524_288))
            .with_upload_delay(Duration::from_secs(1));
        let mut session = Session::new(Arc::new(transport));

        let mut rx = session.start(settings()).unwrap();
        let result = session.wait().await.unwrap();

        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(result.ping_ms, Some(21.0));
        assert_eq!(result.download_avg_mbps, Some(16.78));
        assert_eq!(result.upload_mbps, Some(8.39));

        let events = drain(&mut rx);
        let phases: Vec<TestPhase> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Phase(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![TestPhase::Ping, TestPhase::Download, TestPhase::Upload, TestPhase::Complete]
        );
        assert!(matches!(events.last(), Some(SessionEvent::Completed(r)) if *r == result));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_stages_do_not_block_later_ones() {
        let transport = ScriptedTransport::new()
            .with_probes(&[None, None, None])
            .with_downloads(2, Script::refuse())
            .with_upload_delay(Duration::from_secs(1))
            .with_upload_outcome(UploadOutcome::Status(500));
        let mut session = Session::new(Arc::new(transport));

        let mut rx = session.start(settings()).unwrap();
        let result = session.wait().await.unwrap();

        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(result, MeasurementResult::default());

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, SessionEvent::PingComplete(None))));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::DownloadComplete(None))));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::UploadComplete(None))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_twice_aborts_once() {
        let transport = ScriptedTransport::new()
            .with_probes(&[Some(10), Some(10), Some(10)])
            .with_downloads(2, Script::new().chunk(1000).hang());
        let mut session = Session::new(Arc::new(transport));
        let mut rx = session.start(settings()).unwrap();

        // Let ping finish and the streams stall.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(session.cancel());
        assert!(!session.cancel());

        let result = session.wait().await.unwrap();
        assert_eq!(session.state(), SessionState::Aborted);
        assert_eq!(result.ping_ms, Some(10.0));
        assert_eq!(result.download_avg_mbps, None);
        assert!(!session.cancel());

        let events = drain(&mut rx);
        let aborted = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Aborted(_)))
            .count();
        assert_eq!(aborted, 1);
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Completed(_))));
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Phase(TestPhase::Upload))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejected_while_running() {
        let transport = ScriptedTransport::new().with_probes(&[Some(10_000)]);
        let mut session = Session::new(Arc::new(transport));

        let _rx = session.start(settings()).unwrap();
        assert!(matches!(
            session.start(settings()),
            Err(SpeedTestError::AlreadyRunning)
        ));

        session.cancel();
        session.wait().await;
        assert_eq!(session.state(), SessionState::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_session_stops_run() {
        let transport = ScriptedTransport::new()
            .with_probes(&[Some(10), Some(10), Some(10)])
            .with_downloads(2, Script::new().chunk(1000).hang());
        let mut session = Session::new(Arc::new(transport));
        let mut rx = session.start(settings()).unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(session);

        let mut aborted = false;
        let drained = tokio::time::timeout(Duration::from_secs(60), async {
            while let Some(event) = rx.recv().await {
                aborted |= matches!(event, SessionEvent::Aborted(_));
            }
        })
        .await;

        assert!(drained.is_ok());
        assert!(aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_settings_leave_session_idle() {
        let mut session = Session::new(Arc::new(ScriptedTransport::new()));
        let bad = Settings {
            stream_count: 0,
            ..settings()
        };

        assert!(matches!(session.start(bad), Err(SpeedTestError::InvalidConfig(_))));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_abort() {
        let transport = ScriptedTransport::new()
            .with_probes(&[Some(10_000), Some(15), Some(15), Some(15)])
            .with_downloads(2, Script::new().wait_ms(250).chunk(1_048_576))
            .with_upload_delay(Duration::from_millis(500));
        let mut session = Session::new(Arc::new(transport));

        let _first = session.start(settings()).unwrap();
        session.cancel();
        session.wait().await;
        assert_eq!(session.state(), SessionState::Aborted);

        let mut second = session.start(settings()).unwrap();
        let result = session.wait().await.unwrap();
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(result.ping_ms, Some(15.0));
        assert!(drain(&mut second)
            .iter()
            .all(|e| !matches!(e, SessionEvent::Aborted(_))));
    }
}
