//! Agent state management.
//!
//! Canonical representation of a coding-agent task, independent of the
//! provider that reported it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a source contributes to a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderRole {
    /// Reports agent task records.
    Agents,
    /// Reports worker device records.
    Fleet,
    /// Reachability only (e.g. GitHub, Jira).
    Integration,
}

/// Identity of a polled source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Jules,
    Cursor,
    Codex,
    Gemini,
    ClaudeCli,
    ClaudeCloud,
    Fleet,
    Github,
    Jira,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 9] = [
        ProviderKind::Jules,
        ProviderKind::Cursor,
        ProviderKind::Codex,
        ProviderKind::Gemini,
        ProviderKind::ClaudeCli,
        ProviderKind::ClaudeCloud,
        ProviderKind::Fleet,
        ProviderKind::Github,
        ProviderKind::Jira,
    ];

    /// Stable key used in canonical ids and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Jules => "jules",
            ProviderKind::Cursor => "cursor",
            ProviderKind::Codex => "codex",
            ProviderKind::Gemini => "gemini",
            ProviderKind::ClaudeCli => "claude-cli",
            ProviderKind::ClaudeCloud => "claude-cloud",
            ProviderKind::Fleet => "fleet",
            ProviderKind::Github => "github",
            ProviderKind::Jira => "jira",
        }
    }

    pub fn role(&self) -> ProviderRole {
        match self {
            ProviderKind::Fleet => ProviderRole::Fleet,
            ProviderKind::Github | ProviderKind::Jira => ProviderRole::Integration,
            _ => ProviderRole::Agents,
        }
    }

    /// Parse a provider key as written in configuration.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == key)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical agent id: provider identity plus the provider's raw id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId {
    pub provider: ProviderKind,
    pub raw: String,
}

impl AgentId {
    pub fn new(provider: ProviderKind, raw: impl Into<String>) -> Self {
        Self {
            provider,
            raw: raw.into(),
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.raw)
    }
}

/// Agent status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Unknown,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Queued => "queued",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Cancelled => "cancelled",
            AgentStatus::Unknown => "unknown",
        }
    }

    /// Loose mapping of free-form status labels used by several providers.
    ///
    /// Anything not recognised is `Unknown`; a terminal state is never
    /// guessed.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "queued" | "pending" | "creating" | "waiting" | "requires_action" => AgentStatus::Queued,
            "running" | "in_progress" | "active" | "planning" => AgentStatus::Running,
            "completed" | "complete" | "finished" | "done" | "succeeded" | "success" => {
                AgentStatus::Completed
            }
            "failed" | "failure" | "error" | "errored" | "expired" => AgentStatus::Failed,
            "cancelled" | "canceled" | "stopped" | "aborted" => AgentStatus::Cancelled,
            _ => AgentStatus::Unknown,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent state as held in a published snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub status: AgentStatus,
    pub updated_at: DateTime<Utc>,
    /// Optional provider details (repository, branch, PR URL, ...).
    pub metadata: BTreeMap<String, String>,
    /// Set when the last cycle did not confirm this record.
    pub stale: bool,
    /// Consecutive successful fetches that did not include this record.
    pub missed_cycles: u32,
}

impl Agent {
    pub fn new(
        id: AgentId,
        name: impl Into<String>,
        status: AgentStatus,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            status,
            updated_at,
            metadata: BTreeMap::new(),
            stale: false,
            missed_cycles: 0,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.id.provider
    }

    pub fn with_meta(mut self, key: &str, value: Option<String>) -> Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.metadata.insert(key.to_string(), value);
        }
        self
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, AgentStatus::Queued | AgentStatus::Running)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.updated_at)
    }
}
