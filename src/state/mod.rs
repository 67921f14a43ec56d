//! Canonical registry state.
//!
//! Everything the presentation layer reads lives in a [`RegistrySnapshot`].
//! A snapshot is built once per poll cycle and never mutated after it has
//! been published; readers hold it through an `Arc`.

mod agent;
mod connection;
mod device;

pub use agent::{Agent, AgentId, AgentStatus, ProviderKind, ProviderRole};
pub use connection::ConnectionStatus;
pub use device::{Device, ToolSet};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Self-consistent view of all agents, devices and connections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    /// Sequence number of the cycle that produced this snapshot (0 = empty).
    pub cycle: u64,
    pub published_at: Option<DateTime<Utc>>,
    pub agents: BTreeMap<AgentId, Agent>,
    pub devices: BTreeMap<String, Device>,
    pub connections: BTreeMap<ProviderKind, ConnectionStatus>,
}

impl RegistrySnapshot {
    /// The snapshot readers see before the first cycle has been published.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn agent(&self, id: &AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    /// Agents of one provider, in canonical id order.
    pub fn agents_of(&self, provider: ProviderKind) -> impl Iterator<Item = &Agent> {
        self.agents.values().filter(move |a| a.provider() == provider)
    }

    /// Number of agents per provider.
    pub fn counts(&self) -> BTreeMap<ProviderKind, usize> {
        let mut counts = BTreeMap::new();
        for agent in self.agents.values() {
            *counts.entry(agent.provider()).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the count of queued or running agents.
    pub fn active_agent_count(&self) -> usize {
        self.agents.values().filter(|a| a.is_active()).count()
    }

    pub fn online_device_count(&self) -> usize {
        self.devices.values().filter(|d| d.online && !d.stale).count()
    }

    /// Agents sorted newest first, the order dashboards list them in.
    pub fn agents_by_recency(&self) -> Vec<&Agent> {
        let mut agents: Vec<&Agent> = self.agents.values().collect();
        agents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        agents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn agent(provider: ProviderKind, raw: &str, status: AgentStatus, minutes_ago: i64) -> Agent {
        Agent::new(
            AgentId::new(provider, raw),
            raw,
            status,
            Utc::now() - Duration::minutes(minutes_ago),
        )
    }

    fn snapshot(agents: Vec<Agent>) -> RegistrySnapshot {
        RegistrySnapshot {
            agents: agents.into_iter().map(|a| (a.id.clone(), a)).collect(),
            ..RegistrySnapshot::empty()
        }
    }

    #[test]
    fn counts_group_by_provider() {
        let snap = snapshot(vec![
            agent(ProviderKind::Jules, "a", AgentStatus::Running, 1),
            agent(ProviderKind::Jules, "b", AgentStatus::Completed, 2),
            agent(ProviderKind::Cursor, "c", AgentStatus::Queued, 3),
        ]);

        let counts = snap.counts();
        assert_eq!(counts.get(&ProviderKind::Jules), Some(&2));
        assert_eq!(counts.get(&ProviderKind::Cursor), Some(&1));
        assert_eq!(counts.get(&ProviderKind::Codex), None);
        assert_eq!(snap.active_agent_count(), 2);
        assert_eq!(snap.agents_of(ProviderKind::Jules).count(), 2);
    }

    #[test]
    fn recency_order_is_newest_first() {
        let snap = snapshot(vec![
            agent(ProviderKind::Jules, "old", AgentStatus::Running, 30),
            agent(ProviderKind::Cursor, "new", AgentStatus::Running, 1),
            agent(ProviderKind::Codex, "mid", AgentStatus::Running, 10),
        ]);

        let names: Vec<&str> = snap.agents_by_recency().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["new", "mid", "old"]);
    }
}
