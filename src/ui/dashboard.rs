//! Dashboard view: agents, fleet and connections at a glance.

use chrono::{Duration, Utc};
use itertools::Itertools;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap};
use ratatui::Frame;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::{DashboardState, Theme, ToastQueue};
use crate::state::{Agent, RegistrySnapshot};

pub(super) fn render(
    frame: &mut Frame,
    area: Rect,
    state: &DashboardState,
    theme: &Theme,
    table_state: &mut TableState,
) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(area);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(7)])
        .split(columns[0]);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(columns[1]);

    render_agents(frame, left[0], &state.snapshot, theme, table_state);
    render_details(frame, left[1], state.selected_agent(), theme);
    render_fleet(frame, right[0], &state.snapshot, theme);
    render_connections(frame, right[1], &state.snapshot, theme);
}

fn render_agents(
    frame: &mut Frame,
    area: Rect,
    snapshot: &RegistrySnapshot,
    theme: &Theme,
    table_state: &mut TableState,
) {
    let now = Utc::now();
    let header = Row::new(
        ["Provider", "Name", "Status", "Updated"]
            .iter()
            .map(|h| Cell::from(*h).style(theme.header_style)),
    );

    let rows = snapshot.agents_by_recency().into_iter().map(|agent| {
        let status = if agent.stale {
            format!("{} (stale)", agent.status)
        } else {
            agent.status.to_string()
        };
        let row_style = if agent.stale { theme.stale_style } else { theme.normal_text };
        Row::new(vec![
            Cell::from(agent.provider().as_str()).style(theme.label_style),
            Cell::from(agent.name.clone()),
            Cell::from(status).style(theme.agent_status(agent.status)),
            Cell::from(format_age(agent.age(now))),
        ])
        .style(row_style)
    });

    let counts = snapshot
        .counts()
        .into_iter()
        .map(|(kind, n)| format!("{kind} {n}"))
        .join(", ");
    let title = if counts.is_empty() {
        "Agents".to_string()
    } else {
        format!("Agents ({counts})")
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(13),
            Constraint::Min(20),
            Constraint::Length(18),
            Constraint::Length(8),
        ],
    )
    .header(header)
    .block(Block::default().title(title).borders(Borders::ALL).style(theme.block_style))
    .highlight_style(theme.selected_style);

    frame.render_stateful_widget(table, area, table_state);
}

fn render_details(frame: &mut Frame, area: Rect, agent: Option<&Agent>, theme: &Theme) {
    let block = Block::default().title("Details").borders(Borders::ALL);
    let Some(agent) = agent else {
        let empty = Paragraph::new("No agents reported yet").style(theme.help_style).block(block);
        frame.render_widget(empty, area);
        return;
    };

    let mut lines = vec![Line::from(vec![
        Span::styled("id ", theme.label_style),
        Span::raw(agent.id.to_string()),
    ])];
    lines.extend(agent.metadata.iter().map(|(key, value)| {
        Line::from(vec![
            Span::styled(format!("{key} "), theme.label_style),
            Span::raw(value.clone()),
        ])
    }));

    frame.render_widget(
        Paragraph::new(lines).block(block).wrap(Wrap { trim: true }),
        area,
    );
}

fn render_fleet(frame: &mut Frame, area: Rect, snapshot: &RegistrySnapshot, theme: &Theme) {
    let now = Utc::now();
    let rows = snapshot.devices.values().map(|device| {
        let state = match (device.online, device.stale) {
            (_, true) => "stale",
            (true, false) => "online",
            (false, false) => "offline",
        };
        let heartbeat = device
            .heartbeat_age(now)
            .map(format_age)
            .unwrap_or_else(|| "-".to_string());
        let tools = device.tools.iter().join(" ");
        Row::new(vec![
            Cell::from(device.name.clone()),
            Cell::from(state).style(theme.device(device)),
            Cell::from(heartbeat),
            Cell::from(tools).style(theme.label_style),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(14),
            Constraint::Length(8),
            Constraint::Length(6),
            Constraint::Min(10),
        ],
    )
    .header(Row::new(["Device", "State", "Beat", "Tools"]).style(theme.header_style))
    .block(Block::default().title("Fleet").borders(Borders::ALL));

    frame.render_widget(table, area);
}

fn render_connections(frame: &mut Frame, area: Rect, snapshot: &RegistrySnapshot, theme: &Theme) {
    let lines: Vec<Line> = snapshot
        .connections
        .iter()
        .map(|(kind, status)| {
            let mut spans = vec![
                Span::styled(format!("{:<13}", kind.as_str()), theme.label_style),
                Span::styled(status.label(), theme.connection(status)),
            ];
            if let Some(error) = &status.last_error {
                spans.push(Span::styled(format!("  {error}"), theme.help_style));
            }
            Line::from(spans)
        })
        .collect();

    let block = Block::default().title("Connections").borders(Borders::ALL);
    let widget = if lines.is_empty() {
        Paragraph::new("Waiting for first cycle...").style(theme.help_style)
    } else {
        Paragraph::new(lines)
    };
    frame.render_widget(widget.block(block).wrap(Wrap { trim: true }), area);
}

/// Toasts stack in the top-right corner, newest at the bottom.
pub(super) fn render_toasts(frame: &mut Frame, area: Rect, toasts: &ToastQueue, theme: &Theme) {
    let width = area.width.min(48);
    if width < 10 {
        return;
    }
    for (i, toast) in toasts.iter().enumerate() {
        let y = area.y + 1 + (i as u16) * 3;
        if y + 3 > area.y + area.height {
            break;
        }
        let rect = Rect::new(area.x + area.width - width - 1, y, width, 3);
        frame.render_widget(Clear, rect);
        frame.render_widget(
            Paragraph::new(fit_width(&toast.message, usize::from(width - 2)))
                .style(theme.toast_style)
                .block(Block::default().borders(Borders::ALL)),
            rect,
        );
    }
}

/// Cut `text` to at most `width` terminal columns, marking the cut.
pub(super) fn fit_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}

/// Compact age, e.g. `42s`, `5m`, `3h`, `2d`.
pub(super) fn format_age(age: Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3_599 => format!("{}m", secs / 60),
        3_600..=86_399 => format!("{}h", secs / 3_600),
        _ => format!("{}d", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::seconds(-5), "0s")]
    #[case(Duration::seconds(42), "42s")]
    #[case(Duration::minutes(5), "5m")]
    #[case(Duration::hours(3), "3h")]
    #[case(Duration::days(2), "2d")]
    fn ages(#[case] age: Duration, #[case] expected: &str) {
        assert_eq!(format_age(age), expected);
    }

    #[rstest]
    #[case("Task completed: A", 40, "Task completed: A")]
    #[case("Task completed: Refactor", 12, "Task comple…")]
    #[case("完成了任务", 5, "完成…")]
    fn fitted_text(#[case] text: &str, #[case] width: usize, #[case] expected: &str) {
        assert_eq!(fit_width(text, width), expected);
    }
}
