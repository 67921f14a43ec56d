//! Application state and logic.
//!
//! Glues the monitoring engine to the terminal: draws the latest snapshot,
//! maps key presses to engine operations and turns dispatched alerts into
//! toasts and bells.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::Result;
use futures::StreamExt;
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::Terminal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ConfigurationError;
use crate::event::{Action, Event, EventHandler, DEFAULT_TICK_RATE};
use crate::monitor::{AlertSink, CycleOutcome, Monitor, NotificationEvent};
use crate::ui::toast::DEFAULT_TOAST_TTL;
use crate::ui::{DashboardState, Ui};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub tick_rate_ms: u64,
    pub toast_ttl: Duration,
    /// Ring the terminal bell on alerts
    pub bell: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tick_rate_ms: DEFAULT_TICK_RATE.as_millis() as u64,
            toast_ttl: DEFAULT_TOAST_TTL,
            bell: true,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Alert forwarded from the dispatcher to the UI task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    Toast(String),
    Bell,
}

/// Alert sink feeding the terminal UI.
pub struct TerminalAlerts {
    tx: mpsc::UnboundedSender<Alert>,
}

impl TerminalAlerts {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for TerminalAlerts {
    fn visible(&self, event: &NotificationEvent) {
        let _ = self.tx.send(Alert::Toast(event.message.clone()));
    }

    fn audible(&self, _event: &NotificationEvent) {
        let _ = self.tx.send(Alert::Bell);
    }
}

/// Alert sink for headless runs: alerts go to the log, no sound.
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn visible(&self, event: &NotificationEvent) {
        tracing::info!(agent_id = %event.agent_id, "ALERT {}", event.message);
    }

    fn audible(&self, _event: &NotificationEvent) {}
}

/// Main application.
pub struct App {
    /// Monitoring engine
    monitor: Arc<Monitor>,
    /// Application configuration
    config: AppConfig,
    /// What the dashboard shows
    state: DashboardState,
    /// View controller
    ui: Ui,
    /// Alerts from the dispatcher
    alerts: mpsc::UnboundedReceiver<Alert>,
    /// Manual refresh in flight
    refresh: Option<JoinHandle<Result<CycleOutcome, ConfigurationError>>>,
    /// Should the application exit?
    should_quit: bool,
}

impl App {
    pub fn new(monitor: Arc<Monitor>, config: AppConfig) -> Self {
        let (sink, alerts) = TerminalAlerts::channel();
        monitor.add_alert_sink(Arc::new(sink));

        let state = DashboardState::new(monitor.snapshot(), config.toast_ttl, monitor.config().auto_poll);
        Self {
            monitor,
            config,
            state,
            ui: Ui::new(),
            alerts,
            refresh: None,
            should_quit: false,
        }
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Runs the application main loop on stdout.
    pub async fn run_with_crossterm(&mut self) -> Result<()> {
        let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
        self.run(&mut terminal).await
    }

    /// Runs the application main loop.
    pub async fn run(&mut self, terminal: &mut Terminal<impl Backend>) -> Result<()> {
        let mut events = EventHandler::new(Duration::from_millis(self.config.tick_rate_ms));

        while !self.should_quit {
            terminal.draw(|frame| self.ui.render(frame, &self.state))?;

            tokio::select! {
                event = events.next() => match event {
                    Some(event) => self.handle_event(event)?,
                    None => self.should_quit = true,
                },
                Some(alert) = self.alerts.recv() => self.handle_alert(alert)?,
            }

            self.update().await;
        }

        Ok(())
    }

    /// Pull the latest snapshot and retire finished work.
    pub async fn update(&mut self) {
        let snapshot = self.monitor.snapshot();
        if !Arc::ptr_eq(&snapshot, &self.state.snapshot) {
            self.state.update_snapshot(snapshot);
        }
        self.state.toasts.expire(Instant::now());

        if self.refresh.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(handle) = self.refresh.take() {
                self.state.last_refresh = Some(match handle.await {
                    Ok(Ok(CycleOutcome::Published { cycle, .. })) => format!("refreshed (cycle {cycle})"),
                    Ok(Ok(CycleOutcome::Coalesced)) => "refresh already running".to_string(),
                    Ok(Ok(CycleOutcome::Superseded)) => "refresh superseded".to_string(),
                    Ok(Err(err)) => err.to_string(),
                    Err(err) => format!("refresh failed: {err}"),
                });
            }
        }
    }

    pub fn handle_alert(&mut self, alert: Alert) -> Result<()> {
        match alert {
            Alert::Toast(message) => self.state.toasts.push(message, Instant::now()),
            Alert::Bell if self.config.bell => ring_bell()?,
            Alert::Bell => {}
        }
        Ok(())
    }

    fn handle_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Key(key) => self.handle_action(Action::from_key(key)),
            Event::Resize(_, _) | Event::Tick => Ok(()),
        }
    }

    pub fn handle_action(&mut self, action: Action) -> Result<()> {
        match action {
            Action::Quit => self.should_quit = true,
            Action::Refresh => {
                if self.refresh.is_none() {
                    self.state.last_refresh = Some("refreshing...".to_string());
                    self.refresh = Some(self.monitor.trigger());
                }
            }
            Action::ToggleAutoPoll => {
                self.state.auto_poll = self.monitor.toggle_auto_poll()?;
            }
            Action::ToggleHelp => self.ui.toggle_help(),
            Action::SelectNext => self.state.select_next(),
            Action::SelectPrev => self.state.select_prev(),
            Action::DismissToasts => self.state.toasts.clear(),
            Action::None => {}
        }
        Ok(())
    }
}

fn ring_bell() -> Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(b"\x07")?;
    stdout.flush()?;
    Ok(())
}

/// Run without a terminal UI until Ctrl-C.
///
/// Alerts are logged and every notification is written to stdout as one
/// JSON line.
pub async fn run_headless(monitor: Arc<Monitor>) -> Result<()> {
    monitor.add_alert_sink(Arc::new(LogAlerts));
    let mut completions = monitor.subscribe_completions();
    monitor.start()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = completions.next() => match event {
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            },
        }
    }

    monitor.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{MonitorConfig, ProviderRegistry};
    use pretty_assertions::assert_eq;

    fn app() -> App {
        let monitor = Arc::new(Monitor::new(ProviderRegistry::new(), MonitorConfig::default()));
        App::new(
            monitor,
            AppConfig {
                bell: false,
                ..AppConfig::default()
            },
        )
    }

    #[test]
    fn toast_alerts_show_up() {
        let mut app = app();
        app.handle_alert(Alert::Toast("Task completed: Test Task".to_string())).unwrap();
        app.handle_alert(Alert::Bell).unwrap();

        let messages: Vec<&str> = app.state().toasts.iter().map(|t| t.message.as_str()).collect();
        assert_eq!(messages, vec!["Task completed: Test Task"]);

        app.handle_action(Action::DismissToasts).unwrap();
        assert!(app.state().toasts.is_empty());
    }

    #[test]
    fn quit_and_help() {
        let mut app = app();
        app.handle_action(Action::ToggleHelp).unwrap();
        assert!(app.ui.showing_help());
        app.handle_action(Action::Quit).unwrap();
        assert!(app.should_quit());
    }

    #[tokio::test]
    async fn auto_poll_toggles_through_the_engine() {
        let mut app = app();
        assert!(app.state().auto_poll);
        app.handle_action(Action::ToggleAutoPoll).unwrap();
        assert!(!app.state().auto_poll);
        assert!(!app.monitor.config().auto_poll);
    }

    #[tokio::test]
    async fn refresh_without_providers_reports_the_error() {
        let mut app = app();
        app.handle_action(Action::Refresh).unwrap();
        if let Some(handle) = app.refresh.as_ref() {
            while !handle.is_finished() {
                tokio::task::yield_now().await;
            }
        }
        app.update().await;
        assert_eq!(app.state().last_refresh.as_deref(), Some("no providers registered"));
    }
}
