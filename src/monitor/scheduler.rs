//! Aggregation scheduler.
//!
//! Runs poll cycles: one concurrent fetch per registered provider, each under
//! its own timeout, then normalize, merge and publish a new snapshot. At most
//! one cycle runs at a time. Completion diffing and notification dispatch
//! happen only after the snapshot has been published.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::diff::DiffEngine;
use super::fleet::merge_devices;
use super::health::ConnectionHealthTracker;
use super::normalize::{normalize_agents, normalize_devices};
use super::notify::{AlertSink, CompletionStream, Dispatcher};
use super::provider::{ProviderContext, ProviderRegistry};
use super::MonitorConfig;
use crate::error::{ConfigurationError, ProviderError};
use crate::state::{Agent, AgentId, Device, ProviderKind, ProviderRole, RegistrySnapshot};

/// What a call to [`Scheduler::run_cycle`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A new snapshot was published.
    Published { cycle: u64, notifications: usize },
    /// Another cycle was already in flight; nothing was done.
    Coalesced,
    /// Configuration changed while fetching; results were discarded.
    Superseded,
}

/// State owned by whichever cycle holds the lock.
struct CycleState {
    attempts: u64,
    published: u64,
    diff: DiffEngine,
}

/// Owns the providers, the published snapshot and the cycle machinery.
pub struct Scheduler {
    providers: RwLock<ProviderRegistry>,
    config: RwLock<MonitorConfig>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    cycle: tokio::sync::Mutex<CycleState>,
    epoch: AtomicU64,
    dispatcher: Mutex<Dispatcher>,
    wake: Notify,
}

impl Scheduler {
    pub fn new(providers: ProviderRegistry, config: MonitorConfig) -> Self {
        let diff = DiffEngine::with_triggers(config.notify_on.iter().copied());
        Self {
            providers: RwLock::new(providers),
            config: RwLock::new(config),
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::empty())),
            cycle: tokio::sync::Mutex::new(CycleState {
                attempts: 0,
                published: 0,
                diff,
            }),
            epoch: AtomicU64::new(0),
            dispatcher: Mutex::new(Dispatcher::new()),
            wake: Notify::new(),
        }
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn config(&self) -> MonitorConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn providers(&self) -> ProviderRegistry {
        self.providers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Configuration generation. Bumped by every reconfiguration.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> CompletionStream {
        self.dispatcher().subscribe()
    }

    pub fn add_alert_sink(&self, sink: Arc<dyn AlertSink>) {
        self.dispatcher().add_sink(sink);
    }

    fn dispatcher(&self) -> std::sync::MutexGuard<'_, Dispatcher> {
        self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check that a cycle could run with the current settings.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.config().validate()?;
        if self.providers.read().unwrap_or_else(PoisonError::into_inner).is_empty() {
            return Err(ConfigurationError::NoProviders);
        }
        Ok(())
    }

    /// Replace the configuration. Any cycle in flight is superseded.
    pub fn reconfigure(&self, config: MonitorConfig) -> Result<(), ConfigurationError> {
        config.validate()?;
        tracing::info!(
            interval_ms = config.poll_interval_ms,
            auto_poll = config.auto_poll,
            "reconfigured"
        );
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        self.bump_epoch();
        Ok(())
    }

    /// Replace the registered providers. Any cycle in flight is superseded.
    pub fn set_providers(&self, providers: ProviderRegistry) {
        *self.providers.write().unwrap_or_else(PoisonError::into_inner) = providers;
        self.bump_epoch();
    }

    fn bump_epoch(&self) {
        {
            let _publish = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
        self.wake.notify_one();
    }

    /// Run one cycle unless another is in flight.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, ConfigurationError> {
        self.validate()?;
        let Ok(state) = self.cycle.try_lock() else {
            tracing::debug!("cycle already in flight, coalescing");
            return Ok(CycleOutcome::Coalesced);
        };
        self.run_locked(state).await
    }

    /// Run one cycle, waiting for an in-flight one to finish first.
    pub async fn run_cycle_after_current(&self) -> Result<CycleOutcome, ConfigurationError> {
        self.validate()?;
        let state = self.cycle.lock().await;
        self.run_locked(state).await
    }

    async fn run_locked(
        &self,
        mut state: tokio::sync::MutexGuard<'_, CycleState>,
    ) -> Result<CycleOutcome, ConfigurationError> {
        let epoch = self.epoch();
        let config = self.config();
        let providers = self.providers();
        config.validate()?;
        if providers.is_empty() {
            return Err(ConfigurationError::NoProviders);
        }

        state.attempts += 1;
        let attempt = state.attempts;
        let started_at = Utc::now();
        tracing::debug!(cycle = attempt, providers = providers.len(), "starting cycle");

        let results = fetch_all(&providers, &config, attempt, started_at).await;

        let observed_at = Utc::now();
        let snapshot = {
            let mut published = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            // Epoch bumps take this lock too, so the check and the swap are one step.
            if self.epoch() != epoch {
                tracing::info!(cycle = attempt, "configuration changed during cycle, discarding results");
                return Ok(CycleOutcome::Superseded);
            }
            let snapshot = Arc::new(assemble(
                &published,
                results,
                &config,
                state.published + 1,
                observed_at,
            ));
            state.published += 1;
            *published = Arc::clone(&snapshot);
            snapshot
        };
        tracing::debug!(
            cycle = snapshot.cycle,
            agents = snapshot.agents.len(),
            devices = snapshot.devices.len(),
            "snapshot published"
        );

        state.diff.set_triggers(config.notify_on.iter().copied());
        let events = state.diff.diff(&snapshot);
        let notifications = self.dispatcher().dispatch(events).len();

        Ok(CycleOutcome::Published {
            cycle: snapshot.cycle,
            notifications,
        })
    }

    /// Drive cycles until `cancel` fires.
    ///
    /// Waits `poll_interval_ms` between cycles while auto-polling is on.
    /// A reconfiguration wakes the loop for an immediate cycle.
    pub async fn poll_loop(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!("poll loop started");
        loop {
            match self.run_cycle_after_current().await {
                Ok(CycleOutcome::Published { cycle, notifications }) => {
                    tracing::debug!(cycle, notifications, "cycle finished");
                }
                Ok(outcome) => tracing::debug!(?outcome, "cycle finished"),
                Err(err) => tracing::error!("cycle not started: {err}"),
            }

            let config = self.config();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = time::sleep(config.poll_interval()), if config.auto_poll => {}
            }
        }
        tracing::info!("poll loop stopped");
    }
}

type FetchResult = (ProviderKind, Result<Vec<Value>, ProviderError>);

/// Fetch every provider concurrently, each in its own task.
///
/// Dropping a handle does not cancel its task, so a superseded cycle's
/// fetches still run to completion.
async fn fetch_all(
    providers: &ProviderRegistry,
    config: &MonitorConfig,
    cycle: u64,
    started_at: DateTime<Utc>,
) -> Vec<FetchResult> {
    let timeout = config.provider_timeout();
    let timeout_ms = config.provider_timeout_ms;

    let (kinds, handles): (Vec<_>, Vec<_>) = providers
        .adapters()
        .map(|adapter| {
            let adapter = Arc::clone(adapter);
            let kind = adapter.kind();
            let ctx = ProviderContext {
                provider: kind,
                cycle,
                started_at,
                timeout,
            };
            let handle = tokio::spawn(async move {
                match time::timeout(ctx.timeout, adapter.fetch(&ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout {
                        provider: kind,
                        timeout_ms,
                    }),
                }
            });
            (kind, handle)
        })
        .unzip();

    join_all(handles)
        .await
        .into_iter()
        .zip(kinds)
        .map(|(joined, kind)| {
            let result = joined.unwrap_or_else(|err| {
                Err(ProviderError::unreachable(kind, format!("fetch task aborted: {err}")))
            });
            (kind, result)
        })
        .collect()
}

/// Build the next snapshot from the previous one and this cycle's fetches.
fn assemble(
    previous: &RegistrySnapshot,
    results: Vec<FetchResult>,
    config: &MonitorConfig,
    cycle: u64,
    observed_at: DateTime<Utc>,
) -> RegistrySnapshot {
    let mut health = ConnectionHealthTracker::from_previous(&previous.connections);
    health.retain(results.iter().map(|(kind, _)| *kind));

    let mut agent_batches: BTreeMap<ProviderKind, Option<Vec<Agent>>> = BTreeMap::new();
    let mut fleet: Option<Option<Vec<Device>>> = None;

    for (kind, result) in results {
        let records = match result {
            Ok(records) => {
                health.record_success(kind, observed_at);
                Some(records)
            }
            Err(err) => {
                health.record_failure(kind, &err, observed_at);
                None
            }
        };

        match kind.role() {
            ProviderRole::Agents => {
                let batch = records.map(|records| {
                    let normalized = normalize_agents(kind, records, observed_at);
                    for rejected in &normalized.rejected {
                        tracing::warn!(provider = %kind, cycle, "dropping record: {rejected}");
                    }
                    normalized.items
                });
                agent_batches.insert(kind, batch);
            }
            ProviderRole::Fleet => {
                let batch = records.map(|records| {
                    let normalized =
                        normalize_devices(records, observed_at, config.device_stale_after());
                    for rejected in &normalized.rejected {
                        tracing::warn!(provider = %kind, cycle, "dropping device: {rejected}");
                    }
                    normalized.items
                });
                fleet = Some(batch);
            }
            ProviderRole::Integration => {}
        }
    }

    let devices = match fleet {
        Some(observed) => merge_devices(&previous.devices, observed, config.stale_grace_cycles),
        None => BTreeMap::new(),
    };

    RegistrySnapshot {
        cycle,
        published_at: Some(observed_at),
        agents: merge_agents(&previous.agents, agent_batches, config.stale_grace_cycles),
        devices,
        connections: health.into_statuses(),
    }
}

/// Merge per-provider agent batches into the previously published agents.
///
/// A `None` batch is a failed fetch: that provider's known agents are kept
/// and marked stale, and the cycle does not count as a miss. Agents of
/// providers without a batch are dropped.
pub fn merge_agents(
    previous: &BTreeMap<AgentId, Agent>,
    batches: BTreeMap<ProviderKind, Option<Vec<Agent>>>,
    grace_cycles: u32,
) -> BTreeMap<AgentId, Agent> {
    let mut merged = BTreeMap::new();

    for (provider, batch) in batches {
        let known = previous.values().filter(|a| a.provider() == provider);

        let Some(batch) = batch else {
            for agent in known {
                let mut agent = agent.clone();
                agent.stale = true;
                merged.insert(agent.id.clone(), agent);
            }
            continue;
        };

        let mut seen: BTreeMap<AgentId, Agent> = BTreeMap::new();
        for mut agent in batch {
            agent.stale = false;
            agent.missed_cycles = 0;
            match seen.entry(agent.id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(agent);
                }
                Entry::Occupied(mut slot) => {
                    tracing::warn!(agent_id = %agent.id, "duplicate record in one response");
                    if agent.updated_at >= slot.get().updated_at {
                        slot.insert(agent);
                    }
                }
            }
        }

        for agent in known {
            if seen.contains_key(&agent.id) {
                continue;
            }
            let missed = agent.missed_cycles + 1;
            if missed > grace_cycles {
                tracing::debug!(agent_id = %agent.id, missed, "purging vanished agent");
                continue;
            }
            let mut agent = agent.clone();
            agent.stale = true;
            agent.missed_cycles = missed;
            seen.insert(agent.id.clone(), agent);
        }

        merged.extend(seen);
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::provider::MockProviderAdapter;
    use crate::state::AgentStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn agent(provider: ProviderKind, raw: &str, status: AgentStatus) -> Agent {
        Agent::new(AgentId::new(provider, raw), raw, status, Utc::now())
    }

    fn keyed(agents: Vec<Agent>) -> BTreeMap<AgentId, Agent> {
        agents.into_iter().map(|a| (a.id.clone(), a)).collect()
    }

    fn mock(kind: ProviderKind, records: Vec<Value>) -> MockProviderAdapter {
        let mut adapter = MockProviderAdapter::new();
        adapter.expect_kind().return_const(kind);
        adapter
            .expect_fetch()
            .returning(move |_| Ok(records.clone()));
        adapter
    }

    #[test]
    fn failed_provider_keeps_agents_without_missing() {
        let previous = keyed(vec![
            agent(ProviderKind::Jules, "a", AgentStatus::Running),
            agent(ProviderKind::Cursor, "b", AgentStatus::Running),
        ]);
        let batches = BTreeMap::from([
            (ProviderKind::Jules, None),
            (ProviderKind::Cursor, Some(vec![agent(ProviderKind::Cursor, "b", AgentStatus::Completed)])),
        ]);

        let merged = merge_agents(&previous, batches, 2);

        let a = &merged[&AgentId::new(ProviderKind::Jules, "a")];
        assert!(a.stale);
        assert_eq!(a.missed_cycles, 0);
        let b = &merged[&AgentId::new(ProviderKind::Cursor, "b")];
        assert!(!b.stale);
        assert_eq!(b.status, AgentStatus::Completed);
    }

    #[test]
    fn vanished_agents_are_purged_after_grace() {
        let mut known = keyed(vec![agent(ProviderKind::Codex, "t", AgentStatus::Running)]);
        let id = AgentId::new(ProviderKind::Codex, "t");

        for missed in 1..=2 {
            known = merge_agents(&known, BTreeMap::from([(ProviderKind::Codex, Some(Vec::new()))]), 2);
            assert_eq!(known[&id].missed_cycles, missed);
            assert!(known[&id].stale);
        }
        known = merge_agents(&known, BTreeMap::from([(ProviderKind::Codex, Some(Vec::new()))]), 2);
        assert!(known.is_empty());
    }

    #[test]
    fn unregistered_providers_lose_their_agents() {
        let previous = keyed(vec![agent(ProviderKind::Gemini, "g", AgentStatus::Running)]);
        let merged = merge_agents(&previous, BTreeMap::new(), 2);
        assert!(merged.is_empty());
    }

    #[test]
    fn duplicates_keep_the_newest_record() {
        let mut older = agent(ProviderKind::Jules, "d", AgentStatus::Running);
        older.updated_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = agent(ProviderKind::Jules, "d", AgentStatus::Completed);

        let merged = merge_agents(
            &BTreeMap::new(),
            BTreeMap::from([(ProviderKind::Jules, Some(vec![newer, older]))]),
            2,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[&AgentId::new(ProviderKind::Jules, "d")].status, AgentStatus::Completed);
    }

    #[tokio::test]
    async fn cycle_publishes_normalized_agents() {
        let mut providers = ProviderRegistry::new();
        providers.register(mock(
            ProviderKind::Jules,
            vec![json!({"id": "s1", "title": "Refactor", "state": "IN_PROGRESS"})],
        ));
        providers.register(mock(ProviderKind::Github, Vec::new()));
        let scheduler = Scheduler::new(providers, MonitorConfig::default());

        let outcome = scheduler.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Published { cycle: 1, notifications: 0 });

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.cycle, 1);
        assert_eq!(snapshot.agents.len(), 1);
        assert!(snapshot.connections[&ProviderKind::Github].connected);
        assert!(snapshot.connections[&ProviderKind::Jules].connected);
    }

    #[tokio::test]
    async fn failure_is_recorded_for_the_adapter_that_failed() {
        let mut cursor = MockProviderAdapter::new();
        cursor.expect_kind().return_const(ProviderKind::Cursor);
        cursor
            .expect_fetch()
            .returning(|_| Err(ProviderError::unreachable(ProviderKind::Jira, "refused")));
        let mut providers = ProviderRegistry::new();
        providers.register(cursor);
        let scheduler = Scheduler::new(providers, MonitorConfig::default());

        scheduler.run_cycle().await.unwrap();

        let connections = &scheduler.snapshot().connections;
        assert_eq!(connections.keys().copied().collect::<Vec<_>>(), vec![ProviderKind::Cursor]);
        assert!(!connections[&ProviderKind::Cursor].connected);
    }

    #[test]
    fn reconfigure_waits_for_a_publish_in_progress() {
        let scheduler = Arc::new(Scheduler::new(ProviderRegistry::new(), MonitorConfig::default()));
        let publishing = scheduler.snapshot.write().unwrap();

        let reconfiguring = {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.reconfigure(MonitorConfig::default()))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(scheduler.epoch(), 0);

        drop(publishing);
        reconfiguring.join().unwrap().unwrap();
        assert_eq!(scheduler.epoch(), 1);
    }

    #[tokio::test]
    async fn empty_registry_is_a_configuration_error() {
        let scheduler = Scheduler::new(ProviderRegistry::new(), MonitorConfig::default());
        assert_eq!(scheduler.run_cycle().await, Err(ConfigurationError::NoProviders));
        assert_eq!(scheduler.snapshot().cycle, 0);
    }

    #[tokio::test]
    async fn invalid_reconfiguration_is_rejected() {
        let mut providers = ProviderRegistry::new();
        providers.register(mock(ProviderKind::Jules, Vec::new()));
        let scheduler = Scheduler::new(providers, MonitorConfig::default());

        let bad = MonitorConfig {
            poll_interval_ms: 0,
            ..MonitorConfig::default()
        };
        assert_eq!(scheduler.reconfigure(bad), Err(ConfigurationError::InvalidInterval(0)));
        assert_eq!(scheduler.epoch(), 0);
        assert_eq!(scheduler.config(), MonitorConfig::default());
    }
}
