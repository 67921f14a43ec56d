//! Error types for polling, normalization and configuration.

use thiserror::Error;

use crate::state::ProviderKind;

/// A provider fetch that failed as a whole. Recovered within the cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The fetch did not finish within the per-provider timeout.
    #[error("{provider}: no response within {timeout_ms} ms")]
    Timeout { provider: ProviderKind, timeout_ms: u64 },

    /// The provider answered, but not with a record list.
    #[error("{provider}: malformed response: {detail}")]
    MalformedResponse { provider: ProviderKind, detail: String },

    /// The provider could not be reached at all.
    #[error("{provider}: unreachable: {detail}")]
    Unreachable { provider: ProviderKind, detail: String },
}

impl ProviderError {
    pub fn malformed(provider: ProviderKind, detail: impl Into<String>) -> Self {
        ProviderError::MalformedResponse {
            provider,
            detail: detail.into(),
        }
    }

    pub fn unreachable(provider: ProviderKind, detail: impl Into<String>) -> Self {
        ProviderError::Unreachable {
            provider,
            detail: detail.into(),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        match self {
            ProviderError::Timeout { provider, .. }
            | ProviderError::MalformedResponse { provider, .. }
            | ProviderError::Unreachable { provider, .. } => *provider,
        }
    }

    /// Short form for connection status displays.
    pub fn summary(&self) -> String {
        match self {
            ProviderError::Timeout { timeout_ms, .. } => format!("timed out after {timeout_ms} ms"),
            ProviderError::MalformedResponse { detail, .. } => format!("malformed response: {detail}"),
            ProviderError::Unreachable { detail, .. } => format!("unreachable: {detail}"),
        }
    }
}

/// A single raw record that could not be normalized. Only that record is dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{provider} record #{index}{}: {reason}", id_suffix(.record_id))]
pub struct RecordParseError {
    pub provider: ProviderKind,
    pub index: usize,
    pub record_id: Option<String>,
    pub reason: String,
}

fn id_suffix(record_id: &Option<String>) -> String {
    record_id
        .as_deref()
        .map(|id| format!(" ({id})"))
        .unwrap_or_default()
}

/// Settings that prevent a cycle from starting at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no providers registered")]
    NoProviders,

    #[error("poll interval must be a positive number of milliseconds, got {0}")]
    InvalidInterval(u64),

    #[error("provider timeout must be a positive number of milliseconds, got {0}")]
    InvalidTimeout(u64),

    #[error("invalid feed '{0}', expected KIND=PATH")]
    InvalidFeed(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
}
