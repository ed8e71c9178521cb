mod theme;
mod widgets;

use crate::app::{App, AppView, Panel};
use parspeed::settings::SettingsField;
use parspeed::speedtest::{LogLevel, SessionState, TestPhase};
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use theme::*;
use widgets::{format_speed, Metric};

pub fn draw_ui(frame: &mut Frame, app: &App) {
    let area = frame.area();

    match app.view {
        AppView::Main => draw_main_view(frame, area, app),
        AppView::Settings => draw_settings_view(frame, area, app),
    }
}

fn draw_main_view(frame: &mut Frame, area: Rect, app: &App) {
    let log_height = if app.expanded { 0 } else { 8 };
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(8),
        Constraint::Length(log_height),
        Constraint::Length(1),
    ])
    .split(area);

    draw_header(frame, chunks[0], app);

    if app.expanded {
        metric_for(app, app.selected_panel).render_expanded(frame, chunks[1]);
    } else {
        let panels = Layout::horizontal([
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
        ])
        .split(chunks[1]);

        for (area, panel) in panels.iter().zip([Panel::Download, Panel::Upload, Panel::Ping]) {
            metric_for(app, panel).render(frame, *area, app.selected_panel == panel);
        }
        draw_log_panel(frame, chunks[2], app);
    }

    draw_help(frame, chunks[3], app);
}

/// Collect what one panel shows from the current app state.
fn metric_for(app: &App, panel: Panel) -> Metric {
    match panel {
        Panel::Download => Metric {
            title: match app.result.download_peak_mbps {
                Some(peak) => format!("Download · peak {}", format_speed(peak)),
                None => "Download".to_string(),
            },
            color: SUCCESS,
            dim_color: SUCCESS_DIM,
            headline: format_speed(
                app.result
                    .download_avg_mbps
                    .or_else(|| app.download_samples.latest().map(|s| s.mbps))
                    .unwrap_or(0.0),
            ),
            detail: None,
            progress: Some(match app.phase {
                TestPhase::Download => app.download_progress,
                TestPhase::Upload | TestPhase::Complete => 1.0,
                _ => 0.0,
            }),
            samples: app.download_samples.mbps(),
            unit: "Mbps",
        },
        Panel::Upload => Metric {
            title: "Upload".to_string(),
            color: INFO,
            dim_color: INFO_DIM,
            headline: format_speed(
                app.result
                    .upload_mbps
                    .or_else(|| app.upload_samples.latest().map(|s| s.mbps))
                    .unwrap_or(0.0),
            ),
            detail: None,
            progress: Some(match app.phase {
                TestPhase::Upload => app.upload_progress,
                TestPhase::Complete => 1.0,
                _ => 0.0,
            }),
            samples: app.upload_samples.mbps(),
            unit: "Mbps",
        },
        Panel::Ping => Metric {
            title: "Latency".to_string(),
            color: WARN,
            dim_color: WARN,
            headline: match app.result.ping_ms.or_else(|| app.ping_samples.last().copied()) {
                Some(ms) => format!("{:.0} ms", ms),
                None => "—".to_string(),
            },
            detail: Some(match app.result.jitter_ms {
                Some(jitter) => format!("jitter {:.1} ms", jitter),
                None => "jitter —".to_string(),
            }),
            progress: None,
            samples: app.ping_samples.clone(),
            unit: "ms",
        },
    }
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::horizontal([
        Constraint::Length(12),
        Constraint::Min(10),
        Constraint::Length(20),
    ])
    .split(inner);

    frame.render_widget(
        Paragraph::new("parspeed")
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        chunks[0],
    );

    let (status, color) = match (app.session_state, app.phase) {
        (SessionState::Aborted, _) => ("Cancelled", WARN),
        (_, TestPhase::Idle) => ("Ready", TEXT_MUTED),
        (_, TestPhase::Ping) => ("Measuring latency...", WARN),
        (_, TestPhase::Download) => ("Testing download...", SUCCESS),
        (_, TestPhase::Upload) => ("Testing upload...", INFO),
        (_, TestPhase::Complete) => ("Complete", ACCENT),
    };
    frame.render_widget(
        Paragraph::new(status)
            .style(Style::default().fg(color))
            .alignment(Alignment::Center),
        chunks[1],
    );

    frame.render_widget(
        Paragraph::new(phase_line(app.phase)).alignment(Alignment::Right),
        chunks[2],
    );
}

fn phase_line(phase: TestPhase) -> Line<'static> {
    let stages = [
        (TestPhase::Ping, "ping"),
        (TestPhase::Download, "down"),
        (TestPhase::Upload, "up"),
    ];
    let position = |p: TestPhase| match p {
        TestPhase::Idle => 0,
        TestPhase::Ping => 1,
        TestPhase::Download => 2,
        TestPhase::Upload => 3,
        TestPhase::Complete => 4,
    };

    let mut spans = Vec::new();
    for (i, (stage, label)) in stages.iter().enumerate() {
        let style = if phase == *stage {
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
        } else if position(phase) > position(*stage) {
            Style::default().fg(TEXT_SECONDARY)
        } else {
            Style::default().fg(TEXT_MUTED)
        };
        if i > 0 {
            spans.push(Span::styled(" / ", Style::default().fg(TEXT_MUTED)));
        }
        spans.push(Span::styled(*label, style));
    }

    Line::from(spans)
}

fn draw_log_panel(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER))
        .title(Span::styled(" Log ", Style::default().fg(TEXT_SECONDARY)));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let visible = inner.height as usize;
    let lines: Vec<Line> = app
        .logs
        .iter()
        .skip(app.logs.len().saturating_sub(visible))
        .map(|log| {
            let color = match log.level {
                LogLevel::Info => TEXT_SECONDARY,
                LogLevel::Warn => WARN,
            };
            Line::from(vec![
                Span::styled(
                    format!("{} ", log.timestamp.format("%H:%M:%S")),
                    Style::default().fg(TEXT_MUTED),
                ),
                Span::styled(log.message.clone(), Style::default().fg(color)),
            ])
        })
        .collect();

    frame.render_widget(Paragraph::new(lines), inner);
}

fn draw_settings_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(10),
        Constraint::Length(1),
    ])
    .split(area);

    let header = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));
    let header_inner = header.inner(chunks[0]);
    frame.render_widget(header, chunks[0]);
    frame.render_widget(
        Paragraph::new("Settings")
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        header_inner,
    );

    let content = Layout::horizontal([
        Constraint::Length(2),
        Constraint::Min(30),
        Constraint::Length(2),
    ])
    .split(chunks[1])[1];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(content);
    frame.render_widget(block, content);

    let settings = &app.settings;
    let fields = [
        (SettingsField::Streams, "Streams", settings.stream_count.to_string()),
        (
            SettingsField::DownloadSize,
            "Per stream",
            format!("{} MB", settings.per_stream_target_mb),
        ),
        (SettingsField::UploadSize, "Upload size", format!("{} MB", settings.upload_size_mb)),
        (SettingsField::PingCount, "Ping samples", settings.ping_attempts.to_string()),
        (
            SettingsField::SampleInterval,
            "Sample every",
            format!("{} ms", settings.sample_interval_ms),
        ),
    ];

    let rows = Layout::vertical(
        fields
            .iter()
            .map(|_| Constraint::Length(3))
            .chain([Constraint::Min(0)]),
    )
    .split(inner);

    for (row, (field, label, value)) in rows.iter().zip(fields.iter()) {
        widgets::setting_row(frame, *row, label, value, app.selected_setting == *field);
    }

    frame.render_widget(
        Paragraph::new("↑↓ select · ←→ adjust · enter done")
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[2],
    );
}

fn draw_help(frame: &mut Frame, area: Rect, app: &App) {
    let help = if app.expanded {
        "esc close · q quit"
    } else if app.is_running() {
        "tab select · space expand · esc cancel · q quit"
    } else {
        "enter start · s settings · tab select · space expand · q quit"
    };

    frame.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        area,
    );
}
