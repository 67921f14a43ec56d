//! Connection health per polled source.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::ProviderError;
use crate::state::{ConnectionStatus, ProviderKind};

/// Folds fetch outcomes into per-provider connection status.
///
/// Starts from the statuses of the previously published snapshot and is
/// turned back into a map for the next one.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHealthTracker {
    statuses: BTreeMap<ProviderKind, ConnectionStatus>,
}

impl ConnectionHealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_previous(statuses: &BTreeMap<ProviderKind, ConnectionStatus>) -> Self {
        Self {
            statuses: statuses.clone(),
        }
    }

    /// Drop sources that are no longer registered.
    pub fn retain(&mut self, registered: impl IntoIterator<Item = ProviderKind>) {
        let registered: Vec<ProviderKind> = registered.into_iter().collect();
        self.statuses.retain(|kind, _| registered.contains(kind));
    }

    pub fn record_success(&mut self, provider: ProviderKind, at: DateTime<Utc>) {
        let status = self.statuses.entry(provider).or_default();
        if !status.connected && status.last_checked.is_some() {
            tracing::info!(%provider, "provider reachable again");
        }
        *status = ConnectionStatus {
            connected: true,
            last_error: None,
            last_checked: Some(at),
            consecutive_failures: 0,
        };
    }

    /// Mark `provider` down. The error's own provider tag is not trusted.
    pub fn record_failure(
        &mut self,
        provider: ProviderKind,
        error: &ProviderError,
        at: DateTime<Utc>,
    ) {
        let status = self.statuses.entry(provider).or_default();
        status.consecutive_failures += 1;
        if status.consecutive_failures == 1 {
            tracing::warn!(%provider, failures = status.consecutive_failures, "{error}");
        } else {
            tracing::debug!(%provider, failures = status.consecutive_failures, "{error}");
        }
        status.connected = false;
        status.last_error = Some(error.summary());
        status.last_checked = Some(at);
    }

    pub fn get(&self, provider: ProviderKind) -> Option<&ConnectionStatus> {
        self.statuses.get(&provider)
    }

    pub fn into_statuses(self) -> BTreeMap<ProviderKind, ConnectionStatus> {
        self.statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn failures_accumulate_until_success() {
        let now = Utc::now();
        let mut tracker = ConnectionHealthTracker::new();
        let timeout = ProviderError::Timeout {
            provider: ProviderKind::Codex,
            timeout_ms: 10_000,
        };

        tracker.record_failure(ProviderKind::Codex, &timeout, now);
        tracker.record_failure(ProviderKind::Codex, &timeout, now);
        let status = tracker.get(ProviderKind::Codex).unwrap();
        assert!(!status.connected);
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.last_error.as_deref(), Some("timed out after 10000 ms"));
        assert_eq!(status.label(), "unreachable");

        tracker.record_success(ProviderKind::Codex, now);
        let status = tracker.get(ProviderKind::Codex).unwrap();
        assert!(status.connected);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_error, None);
    }

    #[test]
    fn failure_is_charged_to_the_fetching_provider() {
        let mut tracker = ConnectionHealthTracker::new();
        let mislabelled = ProviderError::unreachable(ProviderKind::Jira, "connection refused");
        tracker.record_failure(ProviderKind::Cursor, &mislabelled, Utc::now());

        let statuses = tracker.into_statuses();
        assert_eq!(statuses.keys().copied().collect::<Vec<_>>(), vec![ProviderKind::Cursor]);
        assert_eq!(statuses[&ProviderKind::Cursor].consecutive_failures, 1);
    }

    #[test]
    fn unregistered_sources_are_dropped() {
        let now = Utc::now();
        let mut tracker = ConnectionHealthTracker::new();
        tracker.record_success(ProviderKind::Jules, now);
        tracker.record_success(ProviderKind::Github, now);

        tracker.retain([ProviderKind::Jules]);

        let statuses = tracker.into_statuses();
        assert_eq!(statuses.keys().copied().collect::<Vec<_>>(), vec![ProviderKind::Jules]);
    }
}
