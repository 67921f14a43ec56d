//! Notification dispatch.
//!
//! Turns completion events into user-facing alerts and fans them out to
//! completion subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::diff::{CompletionEvent, TransitionKind};
use crate::state::AgentId;

/// Ordered stream of dispatched notifications.
pub type CompletionStream = UnboundedReceiverStream<NotificationEvent>;

/// A notification produced for one transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub agent_id: AgentId,
    pub kind: TransitionKind,
    /// Rendered alert text.
    pub message: String,
    pub emitted_at: DateTime<Utc>,
    /// Set once every alert sink has been handed the event.
    pub delivered: bool,
}

/// Alert text for a transition.
pub fn render_message(kind: TransitionKind, name: &str) -> String {
    match kind {
        TransitionKind::Completed => format!("Task completed: {name}"),
        TransitionKind::Failed => format!("Task failed: {name}"),
        TransitionKind::Cancelled => format!("Task cancelled: {name}"),
    }
}

/// Output channel for alerts, e.g. a toast area and a terminal bell.
#[cfg_attr(test, mockall::automock)]
pub trait AlertSink: Send + Sync {
    /// Show the alert.
    fn visible(&self, event: &NotificationEvent);

    /// Play the alert sound.
    fn audible(&self, event: &NotificationEvent);
}

/// Delivers events to alert sinks and completion subscribers.
#[derive(Default)]
pub struct Dispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
    subscribers: Vec<mpsc::UnboundedSender<NotificationEvent>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    /// Open a new completion stream. Only events dispatched after this call
    /// are delivered to it.
    pub fn subscribe(&mut self) -> CompletionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        UnboundedReceiverStream::new(rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Dispatch events in order. Every event raises exactly one visible and
    /// one audible alert per sink before it reaches subscribers.
    pub fn dispatch(&mut self, events: Vec<CompletionEvent>) -> Vec<NotificationEvent> {
        let mut dispatched = Vec::with_capacity(events.len());

        for event in events {
            let mut notification = NotificationEvent {
                message: render_message(event.kind, &event.name),
                agent_id: event.agent_id,
                kind: event.kind,
                emitted_at: Utc::now(),
                delivered: false,
            };

            for sink in &self.sinks {
                sink.visible(&notification);
                sink.audible(&notification);
            }
            notification.delivered = true;
            tracing::info!(agent_id = %notification.agent_id, kind = %notification.kind, "{}", notification.message);

            self.subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
            dispatched.push(notification);
        }

        dispatched
    }
}
