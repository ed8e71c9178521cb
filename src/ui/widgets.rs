use super::theme::*;
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, LineGauge, Paragraph},
    Frame,
};

/// Everything one of the three result panels displays.
pub struct Metric {
    pub title: String,
    pub color: Color,
    pub dim_color: Color,
    pub headline: String,
    pub detail: Option<String>,
    /// `None` hides the progress line.
    pub progress: Option<f64>,
    pub samples: Vec<f64>,
    pub unit: &'static str,
}

impl Metric {
    fn block(&self, selected: bool) -> Block<'_> {
        let (border, title) = if selected {
            (BORDER_ACTIVE, TEXT_PRIMARY)
        } else {
            (BORDER, TEXT_SECONDARY)
        };

        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .title(Span::styled(
                format!(" {} ", self.title),
                Style::default().fg(title),
            ))
    }

    pub fn render(&self, frame: &mut Frame, area: Rect, selected: bool) {
        let block = self.block(selected);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let rows = Layout::vertical([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(2),
        ])
        .split(inner);

        frame.render_widget(
            Paragraph::new(self.headline.as_str())
                .style(Style::default().fg(self.color).add_modifier(Modifier::BOLD))
                .alignment(Alignment::Center),
            rows[1],
        );

        if let Some(detail) = &self.detail {
            frame.render_widget(
                Paragraph::new(detail.as_str())
                    .style(Style::default().fg(TEXT_MUTED))
                    .alignment(Alignment::Center),
                rows[2],
            );
        }

        if let Some(ratio) = self.progress {
            self.progress_line(frame, rows[3], ratio);
        }

        self.chart(frame, rows[4], false);
    }

    pub fn render_expanded(&self, frame: &mut Frame, area: Rect) {
        let block = self.block(true);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let rows = Layout::vertical([
            Constraint::Length(2),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(4),
        ])
        .split(inner);

        let mut headline = vec![Span::styled(
            self.headline.clone(),
            Style::default().fg(self.color).add_modifier(Modifier::BOLD),
        )];
        if let Some(detail) = &self.detail {
            headline.push(Span::styled(
                format!("   {}", detail),
                Style::default().fg(TEXT_MUTED),
            ));
        }
        frame.render_widget(
            Paragraph::new(Line::from(headline)).alignment(Alignment::Center),
            rows[0],
        );

        let summary = match Stats::of(&self.samples) {
            Some(stats) => format!(
                "min {:.1}  avg {:.1}  max {:.1} {}  ·  {} samples",
                stats.min,
                stats.mean,
                stats.max,
                self.unit,
                self.samples.len()
            ),
            None => "no samples yet".to_string(),
        };
        frame.render_widget(
            Paragraph::new(summary)
                .style(Style::default().fg(TEXT_SECONDARY))
                .alignment(Alignment::Center),
            rows[1],
        );

        if let Some(ratio) = self.progress {
            self.progress_line(frame, rows[2], ratio);
        }

        self.chart(frame, rows[3], true);
    }

    fn progress_line(&self, frame: &mut Frame, area: Rect, ratio: f64) {
        if area.width < 4 {
            return;
        }
        let gauge = LineGauge::default()
            .filled_style(Style::default().fg(self.color))
            .unfilled_style(Style::default().fg(self.dim_color))
            .line_set(symbols::line::THICK)
            .label(format!("{:>3.0}%", ratio.clamp(0.0, 1.0) * 100.0))
            .ratio(ratio.clamp(0.0, 1.0));
        frame.render_widget(gauge, area);
    }

    fn chart(&self, frame: &mut Frame, area: Rect, labelled: bool) {
        let Some(stats) = Stats::of(&self.samples) else {
            return;
        };
        if area.width < 4 || area.height < 2 {
            return;
        }

        let points: Vec<(f64, f64)> = self
            .samples
            .iter()
            .enumerate()
            .map(|(i, &v)| (i as f64, v))
            .collect();
        let mean_line = [(0.0, stats.mean), (points.len() as f64, stats.mean)];

        let mut datasets = vec![Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(self.color))
            .data(&points)];
        if labelled {
            datasets.push(
                Dataset::default()
                    .marker(symbols::Marker::Braille)
                    .graph_type(GraphType::Line)
                    .style(Style::default().fg(TEXT_MUTED))
                    .data(&mean_line),
            );
        }

        let pad = (stats.max - stats.min).max(1.0) * 0.1;
        let low = (stats.min - pad).max(0.0);
        let high = stats.max + pad;

        let mut y_axis = Axis::default().bounds([low, high]);
        if labelled {
            y_axis = y_axis
                .style(Style::default().fg(TEXT_MUTED))
                .labels([format!("{:.0}", low), format!("{:.0} {}", high, self.unit)]);
        }

        let chart = Chart::new(datasets)
            .x_axis(Axis::default().bounds([0.0, points.len().max(1) as f64]))
            .y_axis(y_axis);

        frame.render_widget(chart, area);
    }
}

struct Stats {
    min: f64,
    max: f64,
    mean: f64,
}

impl Stats {
    fn of(data: &[f64]) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        let min = data.iter().copied().fold(f64::INFINITY, f64::min);
        let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = data.iter().sum::<f64>() / data.len() as f64;
        Some(Self { min, max, mean })
    }
}

pub fn setting_row(frame: &mut Frame, area: Rect, label: &str, value: &str, selected: bool) {
    let (marker, label_color, value_color) = if selected {
        ("›", ACCENT, TEXT_PRIMARY)
    } else {
        (" ", TEXT_SECONDARY, TEXT_MUTED)
    };

    let line = Line::from(vec![
        Span::styled(format!(" {} ", marker), Style::default().fg(ACCENT)),
        Span::styled(format!("{:<16}", label), Style::default().fg(label_color)),
        Span::styled(value.to_string(), Style::default().fg(value_color)),
    ]);

    let rows = Layout::vertical([Constraint::Length(1), Constraint::Length(1)]).split(area);
    frame.render_widget(Paragraph::new(line), rows[1]);
}

pub fn format_speed(mbps: f64) -> String {
    match mbps {
        m if m >= 1000.0 => format!("{:.2} Gbps", m / 1000.0),
        m if m >= 1.0 => format!("{:.2} Mbps", m),
        m if m > 0.0 => format!("{:.0} Kbps", m * 1000.0),
        _ => "—".to_string(),
    }
}
