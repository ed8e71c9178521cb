use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use parspeed::settings::{Settings, SettingsField};
use parspeed::speedtest::{
    LogEvent, MeasurementResult, SampleHistory, SessionEvent, SessionState, TestPhase,
};
use std::collections::VecDeque;
use std::time::Duration;

const LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppView {
    Main,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Download,
    Upload,
    Ping,
}

impl Panel {
    pub fn next(self) -> Self {
        match self {
            Panel::Download => Panel::Upload,
            Panel::Upload => Panel::Ping,
            Panel::Ping => Panel::Download,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Panel::Download => Panel::Ping,
            Panel::Upload => Panel::Download,
            Panel::Ping => Panel::Upload,
        }
    }
}

pub struct App {
    pub phase: TestPhase,
    pub session_state: SessionState,
    pub result: MeasurementResult,
    pub should_quit: bool,

    // UI state
    pub view: AppView,
    pub selected_panel: Panel,
    pub expanded: bool,

    // Settings
    pub settings: Settings,
    pub selected_setting: SettingsField,

    // Progress tracking
    pub download_progress: f64,
    pub upload_progress: f64,

    // Live samples for charts
    pub download_samples: SampleHistory,
    pub upload_samples: SampleHistory,
    pub ping_samples: Vec<f64>,

    pub logs: VecDeque<LogEvent>,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        Self {
            phase: TestPhase::Idle,
            session_state: SessionState::Idle,
            result: MeasurementResult::default(),
            should_quit: false,
            view: AppView::Main,
            selected_panel: Panel::Download,
            expanded: false,
            settings,
            selected_setting: SettingsField::Streams,
            download_progress: 0.0,
            upload_progress: 0.0,
            download_samples: SampleHistory::new(),
            upload_samples: SampleHistory::new(),
            ping_samples: Vec::new(),
            logs: VecDeque::with_capacity(LOG_CAPACITY),
        }
    }

    pub fn is_running(&self) -> bool {
        self.session_state == SessionState::Running
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match self.view {
            AppView::Main => self.handle_main_key(key),
            AppView::Settings => self.handle_settings_key(key),
        }
    }

    fn handle_main_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Char('s') => {
                if !self.is_running() {
                    self.view = AppView::Settings;
                }
                None
            }
            KeyCode::Enter => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if !self.is_running() {
                    Some(AppAction::StartTest)
                } else {
                    self.expanded = true;
                    None
                }
            }
            KeyCode::Esc => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if self.is_running() {
                    Some(AppAction::CancelTest)
                } else {
                    None
                }
            }
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('j') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.next();
                }
                None
            }
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('k') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.prev();
                }
                None
            }
            KeyCode::Char(' ') => {
                self.expanded = !self.expanded;
                None
            }
            _ => None,
        }
    }

    fn handle_settings_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => {
                self.view = AppView::Main;
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_setting = self.selected_setting.prev();
                None
            }
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => {
                self.selected_setting = self.selected_setting.next();
                None
            }
            KeyCode::Left | KeyCode::Char('h') => {
                self.selected_setting.adjust(&mut self.settings, false);
                None
            }
            KeyCode::Right | KeyCode::Char('l') => {
                self.selected_setting.adjust(&mut self.settings, true);
                None
            }
            _ => None,
        }
    }

    pub fn reset_for_new_test(&mut self) {
        self.phase = TestPhase::Idle;
        self.session_state = SessionState::Running;
        self.result = MeasurementResult::default();
        self.download_progress = 0.0;
        self.upload_progress = 0.0;
        self.download_samples.clear();
        self.upload_samples.clear();
        self.ping_samples.clear();
        self.logs.clear();
        self.expanded = false;
    }

    pub fn handle_update(&mut self, update: SessionEvent) {
        match update {
            SessionEvent::Log(log) => self.push_log(log),
            SessionEvent::Phase(phase) => self.phase = phase,
            SessionEvent::PingSample { rtt_ms, .. } => {
                if let Some(rtt) = rtt_ms {
                    self.ping_samples.push(rtt);
                }
            }
            SessionEvent::PingComplete(ping) => {
                self.result.ping_ms = ping.as_ref().map(|p| p.median_ms);
                self.result.jitter_ms = ping.as_ref().map(|p| p.jitter_ms);
            }
            SessionEvent::DownloadSample(sample) => {
                let expected = (self.settings.stream_count as u64)
                    .saturating_mul(self.settings.per_stream_target_bytes());
                self.download_progress = ratio(sample.total_bytes, expected);
                self.download_samples.push(sample);
            }
            SessionEvent::DownloadComplete(download) => {
                self.download_progress = 1.0;
                self.result.download_avg_mbps = download.as_ref().map(|d| d.avg_mbps);
                self.result.download_peak_mbps = download.as_ref().map(|d| d.peak_mbps);
            }
            SessionEvent::UploadSample(sample) => {
                let expected = self.settings.upload_size_bytes() as u64;
                self.upload_progress = ratio(sample.total_bytes, expected);
                self.upload_samples.push(sample);
            }
            SessionEvent::UploadComplete(upload) => {
                self.upload_progress = 1.0;
                self.result.upload_mbps = upload.as_ref().map(|u| u.mbps);
            }
            SessionEvent::Completed(result) => {
                self.result = result;
                self.complete_test(SessionState::Completed);
            }
            SessionEvent::Aborted(result) => {
                self.result = result;
                self.complete_test(SessionState::Aborted);
            }
        }
    }

    pub fn push_log(&mut self, log: LogEvent) {
        if self.logs.len() >= LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(log);
    }

    pub fn complete_test(&mut self, state: SessionState) {
        self.session_state = state;
        self.phase = match state {
            SessionState::Completed => TestPhase::Complete,
            _ => TestPhase::Idle,
        };
    }
}

fn ratio(done: u64, expected: u64) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    (done as f64 / expected as f64).min(1.0)
}

#[derive(Debug, Clone, Copy)]
pub enum AppAction {
    Quit,
    StartTest,
    CancelTest,
}

pub fn poll_event(timeout: Duration) -> anyhow::Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEvent, KeyModifiers};
    use parspeed::speedtest::ThroughputSample;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_enter_starts_only_when_idle() {
        let mut app = App::new(Settings::default());
        assert!(matches!(
            app.handle_key_event(press(KeyCode::Enter)),
            Some(AppAction::StartTest)
        ));

        app.reset_for_new_test();
        assert!(app.handle_key_event(press(KeyCode::Enter)).is_none());
        assert!(app.expanded);
        app.expanded = false;
        assert!(matches!(
            app.handle_key_event(press(KeyCode::Esc)),
            Some(AppAction::CancelTest)
        ));
    }

    #[test]
    fn test_download_progress_tracks_samples() {
        let settings = Settings {
            stream_count: 2,
            per_stream_target_mb: 1.0,
            ..Settings::default()
        };
        let mut app = App::new(settings);
        app.reset_for_new_test();

        app.handle_update(SessionEvent::DownloadSample(ThroughputSample {
            at: Duration::from_millis(500),
            mbps: 10.0,
            total_bytes: 1_048_576,
        }));

        assert_eq!(app.download_progress, 0.5);
        assert_eq!(app.download_samples.len(), 1);
    }

    #[test]
    fn test_huge_download_target_does_not_overflow() {
        let settings = Settings {
            stream_count: 8,
            per_stream_target_mb: 1e15,
            ..Settings::default()
        };
        let mut app = App::new(settings);
        app.reset_for_new_test();

        app.handle_update(SessionEvent::DownloadSample(ThroughputSample {
            at: Duration::from_millis(500),
            mbps: 10.0,
            total_bytes: 1_048_576,
        }));

        assert!(app.download_progress < 1e-6);
    }

    #[test]
    fn test_abort_returns_to_idle() {
        let mut app = App::new(Settings::default());
        app.reset_for_new_test();
        app.handle_update(SessionEvent::Phase(TestPhase::Download));
        app.handle_update(SessionEvent::Aborted(MeasurementResult {
            ping_ms: Some(12.0),
            ..MeasurementResult::default()
        }));

        assert_eq!(app.session_state, SessionState::Aborted);
        assert_eq!(app.phase, TestPhase::Idle);
        assert_eq!(app.result.ping_ms, Some(12.0));
        assert!(!app.is_running());
    }
}
