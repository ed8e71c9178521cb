mod app;
mod ui;

use anyhow::{Context, Result};
use app::{poll_event, App, AppAction};
use clap::Parser;
use crossterm::event::Event;
use parspeed::settings::{Settings, DEFAULT_DOWNLOAD_URL, DEFAULT_UPLOAD_URL};
use parspeed::speedtest::{
    HttpTransport, LogEvent, LogLevel, MeasurementResult, Session, SessionEvent, SessionState,
};
use ratatui::DefaultTerminal;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use ui::draw_ui;

#[derive(Parser, Debug)]
#[command(name = "parspeed", version, about = "Multi-stream internet speed test")]
struct Cli {
    /// Concurrent download streams
    #[arg(long, env = "PARSPEED_STREAMS", default_value_t = 4)]
    streams: usize,

    /// Bytes each stream downloads, in MB
    #[arg(long, env = "PARSPEED_STREAM_MB", default_value_t = 25.0)]
    stream_mb: f64,

    /// Upload payload size, in MB
    #[arg(long, env = "PARSPEED_UPLOAD_MB", default_value_t = 10.0)]
    upload_mb: f64,

    /// Latency probes to send
    #[arg(long, env = "PARSPEED_PINGS", default_value_t = 10)]
    pings: usize,

    /// Throughput sampling interval, in milliseconds
    #[arg(long, env = "PARSPEED_INTERVAL_MS", default_value_t = 500)]
    interval_ms: u64,

    /// Byte source; `{bytes}` is replaced with the requested size
    #[arg(long, env = "PARSPEED_DOWNLOAD_URL", default_value = DEFAULT_DOWNLOAD_URL)]
    download_url: String,

    /// Byte sink for the upload stage
    #[arg(long, env = "PARSPEED_UPLOAD_URL", default_value = DEFAULT_UPLOAD_URL)]
    upload_url: String,

    /// Per-stage deadline in seconds (0 disables it)
    #[arg(long, env = "PARSPEED_STAGE_TIMEOUT", default_value_t = 30)]
    stage_timeout: u64,

    /// Print events as plain lines instead of drawing the terminal UI
    #[arg(long)]
    headless: bool,

    /// Write engine logs to this file while the terminal UI is shown
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            stream_count: self.streams,
            per_stream_target_mb: self.stream_mb,
            upload_size_mb: self.upload_mb,
            ping_attempts: self.pings,
            sample_interval_ms: self.interval_ms,
            download_url: self.download_url.clone(),
            upload_url: self.upload_url.clone(),
            stage_timeout_secs: (self.stage_timeout > 0).then_some(self.stage_timeout),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let settings = cli.settings();
    settings.validate()?;
    let session = Session::new(Arc::new(HttpTransport::new()?));

    if cli.headless {
        return run_headless(session, settings).await;
    }

    let mut terminal = ratatui::init();
    terminal.clear()?;

    let result = run_app(&mut terminal, session, settings).await;

    ratatui::restore();
    result
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if cli.headless {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else if let Some(path) = &cli.log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    // Without a log file the terminal UI owns the screen; the log panel
    // shows the same lines.
    Ok(())
}

async fn run_headless(mut session: Session, settings: Settings) -> Result<()> {
    let mut rx = session.start(settings)?;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(SessionEvent::Log(log)) => println!("{log}"),
                Some(SessionEvent::Completed(result)) => print_summary("complete", &result),
                Some(SessionEvent::Aborted(result)) => print_summary("aborted", &result),
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
            }
        }
    }

    session.wait().await;
    Ok(())
}

fn print_summary(outcome: &str, result: &MeasurementResult) {
    let show = |value: Option<f64>, unit: &str| match value {
        Some(v) => format!("{v} {unit}"),
        None => "unavailable".to_string(),
    };

    println!("--- {outcome} ---");
    println!("ping:          {}", show(result.ping_ms, "ms"));
    println!("jitter:        {}", show(result.jitter_ms, "ms"));
    println!("download avg:  {}", show(result.download_avg_mbps, "Mbps"));
    println!("download peak: {}", show(result.download_peak_mbps, "Mbps"));
    println!("upload:        {}", show(result.upload_mbps, "Mbps"));
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    mut session: Session,
    settings: Settings,
) -> Result<()> {
    let mut app = App::new(settings);
    let mut test_rx: Option<mpsc::UnboundedReceiver<SessionEvent>> = None;

    loop {
        terminal.draw(|frame| draw_ui(frame, &app))?;

        // Handle test updates
        if let Some(rx) = test_rx.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(update) => app.handle_update(update),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        if app.is_running() {
                            app.complete_test(session.state());
                        }
                        test_rx = None;
                        break;
                    }
                }
            }
        }

        // Handle input
        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                match action {
                    AppAction::Quit => break,
                    AppAction::StartTest => {
                        app.reset_for_new_test();
                        match session.start(app.settings.clone()) {
                            Ok(rx) => test_rx = Some(rx),
                            Err(e) => {
                                tracing::warn!("could not start measurement: {e}");
                                app.push_log(LogEvent::new(
                                    LogLevel::Warn,
                                    format!("could not start measurement: {e}"),
                                ));
                                app.complete_test(SessionState::Idle);
                            }
                        }
                    }
                    AppAction::CancelTest => {
                        session.cancel();
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    // Let any in-flight transfers unwind before the runtime shuts down.
    session.cancel();
    session.wait().await;

    Ok(())
}
