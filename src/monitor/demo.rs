//! Simulated providers for running without credentials.
//!
//! Each demo provider keeps a small set of tasks that advance randomly on
//! every fetch and renders them in its provider's native payload shape, so
//! the whole normalization path is exercised. Fetches occasionally fail to
//! show connection handling.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use super::provider::{ProviderAdapter, ProviderContext, ProviderRegistry};
use crate::error::ProviderError;
use crate::state::{ProviderKind, ProviderRole};

const MAX_TASKS: usize = 6;

const TASK_TITLES: &[&str] = &[
    "Fix flaky login test",
    "Add pagination to search API",
    "Upgrade tokio to latest",
    "Refactor config loader",
    "Write migration for audit table",
    "Investigate memory growth in worker",
    "Add dark mode toggle",
    "Port CLI to clap derive",
];

const REPOS: &[&str] = &["acme/web", "acme/api", "acme/infra"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl Stage {
    fn is_done(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed | Stage::Cancelled)
    }
}

#[derive(Debug, Clone)]
struct DemoTask {
    id: String,
    title: String,
    repo: &'static str,
    stage: Stage,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

struct DemoState {
    rng: StdRng,
    tasks: Vec<DemoTask>,
    next_id: u64,
}

/// Simulated agent provider or integration.
pub struct DemoProvider {
    kind: ProviderKind,
    state: Mutex<DemoState>,
    /// Chance of a simulated outage, as (numerator, denominator)
    failure_ratio: (u32, u32),
    /// Upper bound on simulated response latency
    max_latency: Duration,
}

impl DemoProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self::with_rng(kind, StdRng::from_entropy())
    }

    /// Deterministic provider for tests.
    pub fn with_seed(kind: ProviderKind, seed: u64) -> Self {
        Self::with_rng(kind, StdRng::seed_from_u64(seed))
    }

    fn with_rng(kind: ProviderKind, rng: StdRng) -> Self {
        let mut state = DemoState {
            rng,
            tasks: Vec::new(),
            next_id: 1,
        };
        if kind.role() == ProviderRole::Agents {
            let now = Utc::now();
            for stage in [Stage::Running, Stage::Queued, Stage::Completed] {
                let mut task = state.spawn_task(kind, now - ChronoDuration::minutes(20));
                task.stage = stage;
                state.tasks.push(task);
            }
        }
        Self {
            kind,
            state: Mutex::new(state),
            failure_ratio: (1, 25),
            max_latency: Duration::from_millis(600),
        }
    }

    pub fn with_failure_ratio(mut self, numerator: u32, denominator: u32) -> Self {
        self.failure_ratio = (numerator, denominator);
        self
    }

    pub fn with_max_latency(mut self, max_latency: Duration) -> Self {
        self.max_latency = max_latency;
        self
    }

    /// Advance the simulation one step and render the payload.
    fn step(&self) -> (Duration, Result<Vec<Value>, ProviderError>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let max_ms = u64::try_from(self.max_latency.as_millis()).unwrap_or(u64::MAX);
        let latency = Duration::from_millis(state.rng.gen_range(0..=max_ms));

        let (numerator, denominator) = self.failure_ratio;
        if numerator > 0 && state.rng.gen_ratio(numerator.min(denominator), denominator) {
            return (
                latency,
                Err(ProviderError::unreachable(self.kind, "simulated outage")),
            );
        }

        let now = Utc::now();
        state.advance(self.kind, now);
        let records = state
            .tasks
            .iter()
            .map(|task| render(self.kind, task, now))
            .collect();
        (latency, Ok(records))
    }
}

impl DemoState {
    fn spawn_task(&mut self, kind: ProviderKind, now: DateTime<Utc>) -> DemoTask {
        let n = self.next_id;
        self.next_id += 1;
        let id = match kind {
            ProviderKind::Cursor => format!("bc-{n:04}"),
            ProviderKind::Codex => format!("thread_{n:08x}"),
            _ => format!("{}-{n}", kind.as_str()),
        };
        DemoTask {
            id,
            title: TASK_TITLES.choose(&mut self.rng).copied().unwrap_or("Demo task").to_string(),
            repo: REPOS.choose(&mut self.rng).copied().unwrap_or("acme/web"),
            stage: Stage::Queued,
            created_at: now,
            updated_at: now,
        }
    }

    fn advance(&mut self, kind: ProviderKind, now: DateTime<Utc>) {
        if kind.role() != ProviderRole::Agents {
            return;
        }

        for i in 0..self.tasks.len() {
            let stage = self.tasks[i].stage;
            let next = match stage {
                Stage::Queued if self.rng.gen_ratio(1, 3) => Some(Stage::Running),
                Stage::Running if self.rng.gen_ratio(1, 5) => Some(Stage::Completed),
                Stage::Running if self.rng.gen_ratio(1, 30) => Some(Stage::Failed),
                Stage::Running if self.rng.gen_ratio(1, 60) => Some(Stage::Cancelled),
                _ => None,
            };
            if let Some(stage) = next {
                self.tasks[i].stage = stage;
                self.tasks[i].updated_at = now;
            }
        }

        if self.tasks.len() < MAX_TASKS && self.rng.gen_ratio(1, 4) {
            let task = self.spawn_task(kind, now);
            self.tasks.push(task);
        } else if self.tasks.len() >= MAX_TASKS {
            if let Some(pos) = self.tasks.iter().position(|t| t.stage.is_done()) {
                self.tasks.remove(pos);
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for DemoProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn fetch(&self, ctx: &ProviderContext) -> Result<Vec<Value>, ProviderError> {
        let (latency, result) = self.step();
        tokio::time::sleep(latency).await;
        if let Err(err) = &result {
            tracing::debug!(provider = %self.kind, cycle = ctx.cycle, "{err}");
        }
        result
    }
}

/// Render a task in the provider's native shape.
fn render(kind: ProviderKind, task: &DemoTask, now: DateTime<Utc>) -> Value {
    match kind {
        ProviderKind::Jules => {
            let state = match task.stage {
                Stage::Queued => "QUEUED",
                Stage::Running => "IN_PROGRESS",
                Stage::Completed => "COMPLETED",
                Stage::Failed | Stage::Cancelled => "FAILED",
            };
            let outputs = if task.stage == Stage::Completed {
                json!([{"pullRequest": {"title": task.title}}])
            } else {
                json!([])
            };
            json!({
                "id": task.id,
                "title": task.title,
                "state": state,
                "outputs": outputs,
                "createTime": task.created_at.to_rfc3339(),
                "updateTime": task.updated_at.to_rfc3339(),
                "sourceContext": {
                    "source": format!("sources/github/{}", task.repo),
                    "githubRepoContext": {"startingBranch": "main"}
                }
            })
        }
        ProviderKind::Cursor => {
            let status = match task.stage {
                Stage::Queued => "CREATING",
                Stage::Running => "RUNNING",
                Stage::Completed => "FINISHED",
                Stage::Failed => "ERROR",
                Stage::Cancelled => "STOPPED",
            };
            json!({
                "id": task.id,
                "name": task.title,
                "status": status,
                "createdAt": task.created_at.to_rfc3339(),
                "source": {"repository": format!("github.com/{}", task.repo), "ref": "main"},
                "target": {"branchName": format!("cursor/{}", task.id)}
            })
        }
        ProviderKind::Codex => {
            let status = match task.stage {
                Stage::Queued => "queued",
                Stage::Running => "in_progress",
                Stage::Completed => "completed",
                Stage::Failed => "failed",
                Stage::Cancelled => "cancelled",
            };
            json!({
                "id": task.id,
                "created_at": task.created_at.timestamp(),
                "prompt": task.title,
                "repository": task.repo,
                "latest_run": {"status": status, "created_at": task.updated_at.timestamp()}
            })
        }
        ProviderKind::Gemini | ProviderKind::ClaudeCli => {
            // Local sessions only expose activity; idle ones carry a final status.
            let (status, last_modified) = match task.stage {
                Stage::Queued | Stage::Running => ("active", now),
                Stage::Completed => ("completed", now - ChronoDuration::minutes(10)),
                Stage::Failed => ("error", now - ChronoDuration::minutes(10)),
                Stage::Cancelled => ("cancelled", now - ChronoDuration::minutes(10)),
            };
            json!({
                "sessionId": task.id,
                "title": task.title,
                "status": status,
                "lastModified": last_modified.to_rfc3339(),
                "projectPath": format!("/home/dev/{}", task.repo),
            })
        }
        ProviderKind::ClaudeCloud => {
            let status = match task.stage {
                Stage::Queued => "queued",
                Stage::Running => "running",
                Stage::Completed => "completed",
                Stage::Failed => "failed",
                Stage::Cancelled => "cancelled",
            };
            json!({
                "id": task.id,
                "title": task.title,
                "status": status,
                "createdAt": task.created_at.to_rfc3339(),
                "updatedAt": task.updated_at.to_rfc3339(),
            })
        }
        ProviderKind::Fleet | ProviderKind::Github | ProviderKind::Jira => json!({"id": task.id}),
    }
}

/// Simulated fleet of worker devices reporting both tool encodings.
pub struct DemoFleet {
    rng: Mutex<StdRng>,
}

impl DemoFleet {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn devices(&self) -> Vec<Value> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        let laptop_beat = now - ChronoDuration::seconds(rng.gen_range(5..90));
        let builder_on = !rng.gen_ratio(1, 8);
        let old_beat = now - ChronoDuration::minutes(rng.gen_range(7..40));

        vec![
            json!({
                "id": "dev-laptop",
                "name": "Dev Laptop",
                "platform": "darwin",
                "lastHeartbeat": laptop_beat.to_rfc3339(),
                "repos": [{"name": "acme/web", "path": "/Users/dev/web"}],
                "tools": [{"CLI tools": ["Gemini CLI", "claude CLI", "Codex CLI"]}]
            }),
            json!({
                "id": "build-box",
                "name": "Build Box",
                "platform": "linux",
                "status": if builder_on { "on" } else { "off" },
                "heartbeatAt": now.to_rfc3339(),
                "repos": ["acme/api", "acme/infra"],
                "tools": {"gemini": true, "claude-cli": true, "cursor": false}
            }),
            json!({
                "id": "old-mini",
                "name": "Old Mini",
                "platform": "linux",
                "updatedAt": old_beat.to_rfc3339(),
                "tools": {"codex": true}
            }),
        ]
    }
}

impl Default for DemoFleet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for DemoFleet {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Fleet
    }

    async fn fetch(&self, _ctx: &ProviderContext) -> Result<Vec<Value>, ProviderError> {
        Ok(self.devices())
    }
}

/// Registry with a demo adapter for every provider kind.
pub fn demo_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for kind in ProviderKind::ALL {
        match kind.role() {
            ProviderRole::Fleet => {
                registry.register(DemoFleet::new());
            }
            _ => {
                registry.register(DemoProvider::new(kind));
            }
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::normalize::{normalize_agents, normalize_devices};
    use rstest::rstest;

    fn ctx(kind: ProviderKind) -> ProviderContext {
        ProviderContext {
            provider: kind,
            cycle: 1,
            started_at: Utc::now(),
            timeout: Duration::from_secs(10),
        }
    }

    #[rstest]
    #[case(ProviderKind::Jules)]
    #[case(ProviderKind::Cursor)]
    #[case(ProviderKind::Codex)]
    #[case(ProviderKind::Gemini)]
    #[case(ProviderKind::ClaudeCli)]
    #[case(ProviderKind::ClaudeCloud)]
    #[tokio::test(start_paused = true)]
    async fn payloads_normalize_cleanly(#[case] kind: ProviderKind) {
        let provider = DemoProvider::with_seed(kind, 7).with_failure_ratio(0, 1);

        for _ in 0..30 {
            let records = provider.fetch(&ctx(kind)).await.unwrap();
            let normalized = normalize_agents(kind, records, Utc::now());
            assert!(normalized.rejected.is_empty(), "{:?}", normalized.rejected);
            assert!(!normalized.items.is_empty());
            assert!(normalized.items.len() <= MAX_TASKS);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn outages_surface_as_unreachable() {
        let provider = DemoProvider::with_seed(ProviderKind::Cursor, 1).with_failure_ratio(1, 1);
        let err = provider.fetch(&ctx(ProviderKind::Cursor)).await.unwrap_err();
        assert_eq!(err.provider(), ProviderKind::Cursor);
    }

    #[tokio::test]
    async fn fleet_mixes_tool_encodings() {
        let fleet = DemoFleet::with_seed(3);
        let records = fleet.fetch(&ctx(ProviderKind::Fleet)).await.unwrap();
        let devices = normalize_devices(records, Utc::now(), ChronoDuration::minutes(6));

        assert!(devices.rejected.is_empty());
        assert_eq!(devices.items.len(), 3);
        let laptop = devices.items.iter().find(|d| d.id == "dev-laptop").unwrap();
        assert!(laptop.online && laptop.has_tool("gemini") && laptop.has_tool("claude-cli"));
        let mini = devices.items.iter().find(|d| d.id == "old-mini").unwrap();
        assert!(mini.stale && !mini.online);
    }

    #[test]
    fn registry_covers_every_provider() {
        assert_eq!(demo_registry().len(), ProviderKind::ALL.len());
    }
}
