//! Completion diffing between consecutive published snapshots.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{AgentId, AgentStatus, RegistrySnapshot};

/// Terminal status that produces a notification when an agent enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalTrigger {
    Completed,
    Failed,
    Cancelled,
}

impl TerminalTrigger {
    pub fn status(&self) -> AgentStatus {
        match self {
            TerminalTrigger::Completed => AgentStatus::Completed,
            TerminalTrigger::Failed => AgentStatus::Failed,
            TerminalTrigger::Cancelled => AgentStatus::Cancelled,
        }
    }

    pub fn transition(&self) -> TransitionKind {
        match self {
            TerminalTrigger::Completed => TransitionKind::Completed,
            TerminalTrigger::Failed => TransitionKind::Failed,
            TerminalTrigger::Cancelled => TransitionKind::Cancelled,
        }
    }
}

/// Kind of transition a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransitionKind::Completed => "completed",
            TransitionKind::Failed => "failed",
            TransitionKind::Cancelled => "cancelled",
        })
    }
}

/// An agent entering a watched terminal status between two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    pub agent_id: AgentId,
    /// Display name at the time of the transition.
    pub name: String,
    pub kind: TransitionKind,
    pub previous: AgentStatus,
    /// Publish time of the snapshot that showed the transition.
    pub observed_at: DateTime<Utc>,
}

/// Tracks the last published status of every agent and reports transitions.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    previous: BTreeMap<AgentId, AgentStatus>,
    triggers: Vec<TerminalTrigger>,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::with_triggers([TerminalTrigger::Completed])
    }
}

impl DiffEngine {
    /// Engine that only reports completions.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_triggers(triggers: impl IntoIterator<Item = TerminalTrigger>) -> Self {
        let mut engine = Self {
            previous: BTreeMap::new(),
            triggers: Vec::new(),
        };
        engine.set_triggers(triggers);
        engine
    }

    /// Replace the watched terminal statuses. Known statuses are kept.
    ///
    /// Completion is always watched; `triggers` can only add to it.
    pub fn set_triggers(&mut self, triggers: impl IntoIterator<Item = TerminalTrigger>) {
        self.triggers.clear();
        self.triggers.push(TerminalTrigger::Completed);
        for trigger in triggers {
            if !self.triggers.contains(&trigger) {
                self.triggers.push(trigger);
            }
        }
    }

    pub fn triggers(&self) -> &[TerminalTrigger] {
        &self.triggers
    }

    /// Status recorded for `id` by the last diff, if any.
    pub fn known_status(&self, id: &AgentId) -> Option<AgentStatus> {
        self.previous.get(id).copied()
    }

    pub fn tracked(&self) -> usize {
        self.previous.len()
    }

    /// Compare `snapshot` against the previously diffed one.
    ///
    /// Agents seen for the first time only establish a baseline. Agents no
    /// longer in the snapshot are forgotten. Events come out in canonical id
    /// order.
    pub fn diff(&mut self, snapshot: &RegistrySnapshot) -> Vec<CompletionEvent> {
        let observed_at = snapshot.published_at.unwrap_or_else(Utc::now);
        let mut events = Vec::new();

        for (id, agent) in &snapshot.agents {
            let Some(previous) = self.previous.insert(id.clone(), agent.status) else {
                continue;
            };
            if previous == agent.status {
                continue;
            }
            tracing::debug!(agent_id = %id, from = %previous, to = %agent.status, "status changed");

            if let Some(trigger) = self.triggers.iter().find(|t| t.status() == agent.status) {
                events.push(CompletionEvent {
                    agent_id: id.clone(),
                    name: agent.name.clone(),
                    kind: trigger.transition(),
                    previous,
                    observed_at,
                });
            }
        }

        self.previous.retain(|id, _| snapshot.agents.contains_key(id));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Agent, ProviderKind};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn snapshot(agents: &[(&str, AgentStatus)]) -> RegistrySnapshot {
        RegistrySnapshot {
            agents: agents
                .iter()
                .map(|(raw, status)| {
                    let agent = Agent::new(
                        AgentId::new(ProviderKind::Jules, *raw),
                        format!("Task {raw}"),
                        *status,
                        Utc::now(),
                    );
                    (agent.id.clone(), agent)
                })
                .collect(),
            published_at: Some(Utc::now()),
            ..RegistrySnapshot::empty()
        }
    }

    #[test]
    fn first_observation_is_a_baseline() {
        let mut engine = DiffEngine::new();
        let events = engine.diff(&snapshot(&[("a", AgentStatus::Completed), ("b", AgentStatus::Running)]));
        assert!(events.is_empty());
        assert_eq!(engine.tracked(), 2);
    }

    #[test]
    fn running_to_completed_emits_once() {
        let mut engine = DiffEngine::new();
        engine.diff(&snapshot(&[("task-123", AgentStatus::Running)]));

        let completed = snapshot(&[("task-123", AgentStatus::Completed)]);
        let events = engine.diff(&completed);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].agent_id.to_string(), "jules:task-123");
        assert_eq!(events[0].kind, TransitionKind::Completed);
        assert_eq!(events[0].previous, AgentStatus::Running);
        assert_eq!(events[0].name, "Task task-123");

        assert!(engine.diff(&completed).is_empty());
    }

    #[rstest]
    #[case(AgentStatus::Queued, true)]
    #[case(AgentStatus::Unknown, true)]
    #[case(AgentStatus::Failed, true)]
    #[case(AgentStatus::Completed, false)]
    fn completion_edges(#[case] from: AgentStatus, #[case] emits: bool) {
        let mut engine = DiffEngine::new();
        engine.diff(&snapshot(&[("x", from)]));
        let events = engine.diff(&snapshot(&[("x", AgentStatus::Completed)]));
        assert_eq!(events.len(), usize::from(emits));
    }

    #[test]
    fn failures_are_silent_unless_watched() {
        let mut engine = DiffEngine::new();
        engine.diff(&snapshot(&[("a", AgentStatus::Running), ("b", AgentStatus::Running)]));
        let done = snapshot(&[("a", AgentStatus::Failed), ("b", AgentStatus::Cancelled)]);
        assert!(engine.diff(&done).is_empty());

        let mut watching = DiffEngine::with_triggers([
            TerminalTrigger::Completed,
            TerminalTrigger::Failed,
            TerminalTrigger::Cancelled,
        ]);
        watching.diff(&snapshot(&[("a", AgentStatus::Running), ("b", AgentStatus::Running)]));
        let kinds: Vec<TransitionKind> = watching.diff(&done).into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TransitionKind::Failed, TransitionKind::Cancelled]);
    }

    #[test]
    fn purged_agents_are_forgotten() {
        let mut engine = DiffEngine::new();
        engine.diff(&snapshot(&[("a", AgentStatus::Running)]));
        engine.diff(&snapshot(&[]));
        assert_eq!(engine.known_status(&AgentId::new(ProviderKind::Jules, "a")), None);

        // Reappearing after a purge is a new baseline.
        assert!(engine.diff(&snapshot(&[("a", AgentStatus::Completed)])).is_empty());
    }

    #[test]
    fn events_follow_canonical_id_order() {
        let mut engine = DiffEngine::new();
        engine.diff(&snapshot(&[
            ("c", AgentStatus::Running),
            ("a", AgentStatus::Running),
            ("b", AgentStatus::Running),
        ]));
        let events = engine.diff(&snapshot(&[
            ("b", AgentStatus::Completed),
            ("c", AgentStatus::Completed),
            ("a", AgentStatus::Completed),
        ]));
        let ids: Vec<&str> = events.iter().map(|e| e.agent_id.raw.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_triggers_are_collapsed() {
        let engine = DiffEngine::with_triggers([TerminalTrigger::Failed, TerminalTrigger::Failed]);
        assert_eq!(engine.triggers(), &[TerminalTrigger::Completed, TerminalTrigger::Failed]);
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![TerminalTrigger::Failed])]
    #[case(vec![TerminalTrigger::Cancelled, TerminalTrigger::Failed])]
    fn completion_cannot_be_configured_away(#[case] triggers: Vec<TerminalTrigger>) {
        let mut engine = DiffEngine::new();
        engine.set_triggers(triggers);
        engine.diff(&snapshot(&[("a", AgentStatus::Running)]));

        let events = engine.diff(&snapshot(&[("a", AgentStatus::Completed)]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TransitionKind::Completed);
    }
}
