//! UI components for the agent monitor.
//!
//! A single dashboard view over the latest published snapshot, with a toast
//! stack for completion alerts and a help overlay. The UI only reads
//! snapshots; it never talks to providers.

mod dashboard;
pub mod help;
pub mod theme;
pub mod toast;

pub use help::HelpView;
pub use theme::Theme;
pub use toast::{Toast, ToastQueue};

use std::sync::Arc;
use std::time::Duration;

use ratatui::layout::Rect;
use ratatui::widgets::{Block, Paragraph, TableState};
use ratatui::Frame;

use crate::state::{Agent, RegistrySnapshot};

/// Everything the dashboard renders.
#[derive(Debug, Clone)]
pub struct DashboardState {
    /// Latest published snapshot
    pub snapshot: Arc<RegistrySnapshot>,
    /// Completion toasts currently on screen
    pub toasts: ToastQueue,
    /// Whether the poll loop runs on its interval
    pub auto_poll: bool,
    /// Outcome of the last manual refresh, shown in the status line
    pub last_refresh: Option<String>,
    /// Index into the agents list, newest first
    pub selected: usize,
}

impl DashboardState {
    pub fn new(snapshot: Arc<RegistrySnapshot>, toast_ttl: Duration, auto_poll: bool) -> Self {
        Self {
            snapshot,
            toasts: ToastQueue::new(toast_ttl),
            auto_poll,
            last_refresh: None,
            selected: 0,
        }
    }

    /// Swap in a newer snapshot, keeping the selection in range.
    pub fn update_snapshot(&mut self, snapshot: Arc<RegistrySnapshot>) {
        self.snapshot = snapshot;
        let len = self.snapshot.agents.len();
        self.selected = self.selected.min(len.saturating_sub(1));
    }

    pub fn select_next(&mut self) {
        if self.selected + 1 < self.snapshot.agents.len() {
            self.selected += 1;
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn selected_agent(&self) -> Option<&Agent> {
        self.snapshot.agents_by_recency().into_iter().nth(self.selected)
    }
}

/// Main UI controller.
pub struct Ui {
    /// UI theme
    theme: Theme,
    /// Whether to show help overlay
    show_help: bool,
    /// Table cursor for the agents list
    table_state: TableState,
}

impl Default for Ui {
    fn default() -> Self {
        Self::new()
    }
}

impl Ui {
    pub fn new() -> Self {
        Self {
            theme: Theme::default(),
            show_help: false,
            table_state: TableState::default(),
        }
    }

    pub fn toggle_help(&mut self) {
        self.show_help = !self.show_help;
    }

    pub fn showing_help(&self) -> bool {
        self.show_help
    }

    /// Render the UI.
    pub fn render(&mut self, frame: &mut Frame, state: &DashboardState) {
        let area = frame.size();
        if area.height < 3 {
            return;
        }
        let body = Rect::new(area.x, area.y, area.width, area.height - 1);
        let status_area = Rect::new(area.x, area.y + area.height - 1, area.width, 1);

        self.table_state.select(if state.snapshot.agents.is_empty() {
            None
        } else {
            Some(state.selected)
        });
        dashboard::render(frame, body, state, &self.theme, &mut self.table_state);
        dashboard::render_toasts(frame, body, &state.toasts, &self.theme);

        if self.show_help {
            HelpView::render(frame, body, &self.theme);
        }

        self.render_status_line(frame, status_area, state);
    }

    fn render_status_line(&self, frame: &mut Frame, area: Rect, state: &DashboardState) {
        let snapshot = &state.snapshot;
        let (mode, style) = if state.auto_poll {
            ("LIVE", self.theme.status_live)
        } else {
            ("MANUAL", self.theme.status_paused)
        };

        let mut text = format!(
            "{mode} | Cycle {} | Agents: {}/{} active | Devices: {}/{} online",
            snapshot.cycle,
            snapshot.active_agent_count(),
            snapshot.agents.len(),
            snapshot.online_device_count(),
            snapshot.devices.len(),
        );
        if let Some(refresh) = &state.last_refresh {
            text.push_str(" | ");
            text.push_str(refresh);
        }
        text.push_str(" | Press ? for help");

        frame.render_widget(Paragraph::new(text).style(style).block(Block::default()), area);
    }
}
