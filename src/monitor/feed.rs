//! File-backed provider adapters.
//!
//! A feed re-reads a JSON export of a provider's raw records on every fetch.
//! This is how local CLI session indexes, and any provider proxied by an
//! external sync job, are plugged into the engine.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;

use super::provider::{records_from_body, ProviderAdapter, ProviderContext};
use crate::error::{ConfigurationError, ProviderError};
use crate::state::ProviderKind;

/// Provider adapter that reads records from a JSON file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFeed {
    kind: ProviderKind,
    path: PathBuf,
}

impl FileFeed {
    pub fn new(kind: ProviderKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parses `KIND=PATH`, e.g. `cursor=/tmp/cursor-agents.json`.
impl FromStr for FileFeed {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, path) = s
            .split_once('=')
            .ok_or_else(|| ConfigurationError::InvalidFeed(s.to_string()))?;
        let path = path.trim();
        if path.is_empty() {
            return Err(ConfigurationError::InvalidFeed(s.to_string()));
        }
        let kind = ProviderKind::from_key(kind)
            .ok_or_else(|| ConfigurationError::UnknownProvider(kind.trim().to_string()))?;
        Ok(Self::new(kind, path))
    }
}

#[async_trait]
impl ProviderAdapter for FileFeed {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn fetch(&self, ctx: &ProviderContext) -> Result<Vec<Value>, ProviderError> {
        let body = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            let detail = match e.kind() {
                ErrorKind::NotFound => format!("{} does not exist", self.path.display()),
                _ => format!("{}: {e}", self.path.display()),
            };
            ProviderError::unreachable(self.kind, detail)
        })?;

        let records = records_from_body(self.kind, &body)?;
        tracing::trace!(provider = %self.kind, cycle = ctx.cycle, records = records.len(), "feed read");
        Ok(records)
    }
}
