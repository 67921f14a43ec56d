//! Device state management.
//!
//! Worker machines in the fleet and the tools they advertise.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Flat set of canonical tool ids advertised by a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSet(BTreeSet<String>);

/// Display names reported by device agents and their canonical ids.
const TOOL_ALIASES: &[(&str, &str)] = &[
    ("gemini cli", "gemini"),
    ("claude cli", "claude-cli"),
    ("claude code", "claude-cli"),
    ("codex cli", "codex"),
    ("cursor cli", "cursor"),
];

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical id for a tool name in any of the reported spellings.
    pub fn canonical_name(name: &str) -> Option<String> {
        let lowered = name.trim().to_lowercase();
        if lowered.is_empty() {
            return None;
        }
        if let Some((_, id)) = TOOL_ALIASES.iter().find(|(alias, _)| *alias == lowered) {
            return Some((*id).to_string());
        }
        let stem = lowered.strip_suffix(" cli").unwrap_or(&lowered).trim();
        let id = stem.split_whitespace().collect::<Vec<_>>().join("-");
        (!id.is_empty()).then_some(id)
    }

    /// Insert a tool by any spelling. Returns false for blank names.
    pub fn insert(&mut self, name: &str) -> bool {
        match Self::canonical_name(name) {
            Some(id) => {
                self.0.insert(id);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        Self::canonical_name(name).is_some_and(|id| self.0.contains(&id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for ToolSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = ToolSet::new();
        for name in iter {
            set.insert(name.as_ref());
        }
        set
    }
}

/// Device state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub online: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub tools: ToolSet,
    pub platform: Option<String>,
    pub repos: Vec<String>,
    /// Heartbeat too old, or not confirmed by the last cycle.
    pub stale: bool,
    pub missed_cycles: u32,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            online: false,
            last_heartbeat: None,
            tools: ToolSet::new(),
            platform: None,
            repos: Vec::new(),
            stale: false,
            missed_cycles: 0,
        }
    }

    /// Time since the last heartbeat, if one was ever reported.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_heartbeat.map(|hb| now.signed_duration_since(hb))
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains(name)
    }
}
