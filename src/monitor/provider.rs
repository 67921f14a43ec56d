//! The `ProviderAdapter` trait and the registry of adapters polled each cycle.
//!
//! An adapter only knows how to fetch its provider's raw records. It does
//! not normalize them: the scheduler hands the raw batch to the normalizer
//! keyed by [`ProviderAdapter::kind`], so payload shape never leaks past
//! this boundary.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::ProviderError;
use crate::state::ProviderKind;

/// Per-call context handed to an adapter.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub provider: ProviderKind,
    /// Sequence number of the cycle issuing the fetch.
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    /// Budget the scheduler enforces on this fetch.
    pub timeout: Duration,
}

/// Capability every provider implements: fetch raw task (or device) records.
///
/// Implementations must be stateless per call as far as the scheduler is
/// concerned; a fetch may be abandoned by its cycle and still run to the end.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Identity of the provider; selects the raw schema used to normalize.
    fn kind(&self) -> ProviderKind;

    /// Fetch the provider's current records in its native shape.
    async fn fetch(&self, ctx: &ProviderContext) -> Result<Vec<Value>, ProviderError>;
}

/// Adapters keyed by provider. One adapter per provider kind.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: BTreeMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its [`ProviderAdapter::kind`].
    ///
    /// A previously registered adapter for the same provider is replaced and
    /// returned.
    pub fn register(
        &mut self,
        adapter: impl ProviderAdapter + 'static,
    ) -> Option<Arc<dyn ProviderAdapter>> {
        self.register_arc(Arc::new(adapter))
    }

    pub fn register_arc(
        &mut self,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.insert(adapter.kind(), adapter)
    }

    pub fn remove(&mut self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.remove(&kind)
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ProviderKind> + '_ {
        self.adapters.keys().copied()
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn ProviderAdapter>> {
        self.adapters.values()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Pull the record list out of a provider response body.
///
/// Accepts a bare JSON array or an object wrapping the array under the
/// provider's envelope key (`sessions`, `agents`, `threads`, ...).
pub fn records_from_body(provider: ProviderKind, body: &str) -> Result<Vec<Value>, ProviderError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::malformed(provider, e.to_string()))?;

    match value {
        Value::Array(records) => Ok(records),
        Value::Object(mut map) => {
            let key = envelope_keys(provider)
                .iter()
                .find(|key| map.contains_key(**key))
                .ok_or_else(|| {
                    ProviderError::malformed(provider, "response object has no record list")
                })?;
            match map.remove(*key) {
                Some(Value::Array(records)) => Ok(records),
                Some(Value::Null) => Ok(Vec::new()),
                _ => Err(ProviderError::malformed(
                    provider,
                    format!("`{key}` is not an array"),
                )),
            }
        }
        other => Err(ProviderError::malformed(
            provider,
            format!("expected an array or object, got {}", json_type(&other)),
        )),
    }
}

fn envelope_keys(provider: ProviderKind) -> &'static [&'static str] {
    match provider {
        ProviderKind::Jules => &["sessions"],
        ProviderKind::Cursor => &["agents"],
        ProviderKind::Codex => &["threads", "data"],
        ProviderKind::Gemini | ProviderKind::ClaudeCli => &["sessions"],
        ProviderKind::ClaudeCloud => &["conversations"],
        ProviderKind::Fleet => &["devices"],
        ProviderKind::Github | ProviderKind::Jira => &["items", "values", "issues"],
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
