//! Connection state for polled sources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reachability of one provider as of its most recent fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub last_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match (self.connected, self.last_checked) {
            (_, None) => "pending",
            (true, Some(_)) => "connected",
            (false, Some(_)) => "unreachable",
        }
    }
}
