//! Monitoring engine for coding-agent providers and the worker fleet.
//!
//! This module polls every registered provider, normalizes the responses
//! into one registry and turns status transitions into notifications:
//!
//! - Concurrent per-provider fetches with isolated failures and timeouts
//! - Normalization of provider-specific payloads
//! - Stale tracking and purging of vanished agents and devices
//! - Exactly one notification per completion

pub mod demo;
pub mod diff;
pub mod feed;
pub mod fleet;
pub mod health;
pub mod normalize;
pub mod notify;
pub mod provider;
pub mod scheduler;

pub use diff::{CompletionEvent, DiffEngine, TerminalTrigger, TransitionKind};
pub use notify::{AlertSink, CompletionStream, NotificationEvent};
pub use provider::{ProviderAdapter, ProviderContext, ProviderRegistry};
pub use scheduler::{CycleOutcome, Scheduler};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ConfigurationError;
use crate::state::{ConnectionStatus, ProviderKind, RegistrySnapshot};

/// Default interval between poll cycles.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;

/// Default budget for a single provider fetch.
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 10_000;

/// Default number of missed cycles before a vanished record is purged.
pub const DEFAULT_STALE_GRACE_CYCLES: u32 = 2;

/// Default heartbeat age after which a device is considered stale.
pub const DEFAULT_DEVICE_STALE_AFTER_SECS: u64 = 6 * 60;

/// Engine settings, as provided by the settings store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between automatic cycles
    pub poll_interval_ms: u64,
    /// Whether cycles run on the interval or only on demand
    pub auto_poll: bool,
    /// Timeout for each provider fetch
    pub provider_timeout_ms: u64,
    /// Successful cycles a record may be missing before it is purged
    pub stale_grace_cycles: u32,
    /// Heartbeat age after which a device is stale
    pub device_stale_after_secs: u64,
    /// Terminal statuses that raise a notification, on top of completion
    pub notify_on: Vec<TerminalTrigger>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            auto_poll: true,
            provider_timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
            stale_grace_cycles: DEFAULT_STALE_GRACE_CYCLES,
            device_stale_after_secs: DEFAULT_DEVICE_STALE_AFTER_SECS,
            notify_on: vec![TerminalTrigger::Completed],
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigurationError::InvalidInterval(self.poll_interval_ms));
        }
        if self.provider_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidTimeout(self.provider_timeout_ms));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn device_stale_after(&self) -> chrono::Duration {
        let secs = i64::try_from(self.device_stale_after_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1_000))
    }
}

/// Handle of the running poll loop.
struct PollLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Presentation-facing handle on the monitoring engine.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Monitor {
    scheduler: Arc<Scheduler>,
    poll_loop: Mutex<Option<PollLoop>>,
}

impl Monitor {
    pub fn new(providers: ProviderRegistry, config: MonitorConfig) -> Self {
        Self {
            scheduler: Arc::new(Scheduler::new(providers, config)),
            poll_loop: Mutex::new(None),
        }
    }

    /// Current published snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.scheduler.snapshot()
    }

    /// Ordered stream of notifications dispatched from now on.
    pub fn subscribe_completions(&self) -> CompletionStream {
        self.scheduler.subscribe()
    }

    /// Connection status per registered source, as of the last snapshot.
    pub fn connection_status(&self) -> BTreeMap<ProviderKind, ConnectionStatus> {
        self.snapshot().connections.clone()
    }

    pub fn add_alert_sink(&self, sink: Arc<dyn AlertSink>) {
        self.scheduler.add_alert_sink(sink);
    }

    pub fn config(&self) -> MonitorConfig {
        self.scheduler.config()
    }

    /// Run a cycle now and wait for it. Coalesced if one is in flight.
    pub async fn refresh(&self) -> Result<CycleOutcome, ConfigurationError> {
        self.scheduler.run_cycle().await
    }

    /// Request a cycle without waiting for it.
    pub fn trigger(&self) -> JoinHandle<Result<CycleOutcome, ConfigurationError>> {
        let scheduler = Arc::clone(&self.scheduler);
        tokio::spawn(async move { scheduler.run_cycle().await })
    }

    /// Start the poll loop. The first cycle runs immediately.
    ///
    /// Calling `start` while the loop is running does nothing.
    pub fn start(&self) -> Result<(), ConfigurationError> {
        self.scheduler.validate()?;
        let mut slot = self.poll_loop.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|l| !l.handle.is_finished()) {
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.scheduler).poll_loop(cancel.clone()));
        *slot = Some(PollLoop { cancel, handle });
        Ok(())
    }

    /// Stop the poll loop and wait for it to exit.
    pub async fn stop(&self) {
        let running = self.poll_loop.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(PollLoop { cancel, handle }) = running {
            cancel.cancel();
            if let Err(err) = handle.await {
                tracing::warn!("poll loop ended abnormally: {err}");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.poll_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|l| !l.handle.is_finished())
    }

    /// Apply new settings. A cycle in flight is discarded and the poll loop
    /// picks up the new interval right away.
    pub fn reconfigure(&self, config: MonitorConfig) -> Result<(), ConfigurationError> {
        self.scheduler.reconfigure(config)
    }

    /// Flip automatic polling and return the new setting.
    pub fn toggle_auto_poll(&self) -> Result<bool, ConfigurationError> {
        let mut config = self.config();
        config.auto_poll = !config.auto_poll;
        let enabled = config.auto_poll;
        self.reconfigure(config)?;
        Ok(enabled)
    }

    pub fn set_providers(&self, providers: ProviderRegistry) {
        self.scheduler.set_providers(providers);
    }
}
