//! UI theme definition.

use ratatui::style::{Color, Modifier, Style};

use crate::state::{AgentStatus, ConnectionStatus, Device};

/// Theme for the application UI.
#[derive(Debug, Clone)]
pub struct Theme {
    // Basic styles
    pub normal_text: Style,
    pub selected_style: Style,
    pub block_style: Style,
    pub header_style: Style,
    pub label_style: Style,
    pub stale_style: Style,

    // Status line
    pub help_style: Style,
    pub status_live: Style,
    pub status_paused: Style,
    pub key_style: Style,

    // Agent status styles
    pub queued_style: Style,
    pub running_style: Style,
    pub completed_style: Style,
    pub failed_style: Style,
    pub cancelled_style: Style,
    pub unknown_style: Style,

    // Device and connection styles
    pub online_style: Style,
    pub offline_style: Style,
    pub error_style: Style,

    pub toast_style: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            normal_text: Style::default().fg(Color::White),
            selected_style: Style::default().fg(Color::Black).bg(Color::White),
            block_style: Style::default(),
            header_style: Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            label_style: Style::default().fg(Color::Gray),
            stale_style: Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),

            help_style: Style::default().fg(Color::Gray),
            status_live: Style::default().fg(Color::Green),
            status_paused: Style::default().fg(Color::Yellow),
            key_style: Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),

            queued_style: Style::default().fg(Color::Cyan),
            running_style: Style::default().fg(Color::Yellow),
            completed_style: Style::default().fg(Color::Green),
            failed_style: Style::default().fg(Color::Red),
            cancelled_style: Style::default().fg(Color::Gray),
            unknown_style: Style::default().fg(Color::DarkGray),

            online_style: Style::default().fg(Color::Green),
            offline_style: Style::default().fg(Color::DarkGray),
            error_style: Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),

            toast_style: Style::default()
                .fg(Color::Black)
                .bg(Color::Green)
                .add_modifier(Modifier::BOLD),
        }
    }
}

impl Theme {
    pub fn agent_status(&self, status: AgentStatus) -> Style {
        match status {
            AgentStatus::Queued => self.queued_style,
            AgentStatus::Running => self.running_style,
            AgentStatus::Completed => self.completed_style,
            AgentStatus::Failed => self.failed_style,
            AgentStatus::Cancelled => self.cancelled_style,
            AgentStatus::Unknown => self.unknown_style,
        }
    }

    pub fn device(&self, device: &Device) -> Style {
        if device.stale {
            self.stale_style
        } else if device.online {
            self.online_style
        } else {
            self.offline_style
        }
    }

    pub fn connection(&self, status: &ConnectionStatus) -> Style {
        match (status.connected, status.last_checked) {
            (_, None) => self.label_style,
            (true, Some(_)) => self.online_style,
            // One miss is a blip, repeated misses are an outage.
            (false, Some(_)) if status.consecutive_failures > 1 => self.error_style,
            (false, Some(_)) => self.running_style,
        }
    }
}
