//! Status normalization.
//!
//! Maps each provider's native record shape onto the canonical [`Agent`] and
//! [`Device`] models. Every provider gets its own serde schema; the entry
//! points dispatch on [`ProviderKind`] and never inspect arbitrary fields.
//!
//! A record that cannot be normalized is rejected on its own: the rest of
//! the batch is still returned.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::RecordParseError;
use crate::state::{Agent, AgentId, AgentStatus, Device, ProviderKind, ProviderRole, ToolSet};

/// Sessions touched within this many minutes are considered running.
const LOCAL_ACTIVITY_MINUTES: i64 = 5;

/// Free-form local labels that mention an outcome without reaching it.
const NEGATED_LABELS: &[&str] = &[
    "incomplete",
    "not complete",
    "not finished",
    "unfinished",
    "not failed",
    "no error",
    "without error",
];

/// Prompt prefix length used when a task has no title.
const NAME_PROMPT_CHARS: usize = 50;

/// Normalized records plus the ones that were dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub items: Vec<T>,
    pub rejected: Vec<RecordParseError>,
}

impl<T> Default for Normalized<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

/// Normalize one provider's agent records.
///
/// Sources that do not report agents yield an empty result.
pub fn normalize_agents(
    provider: ProviderKind,
    records: Vec<Value>,
    observed_at: DateTime<Utc>,
) -> Normalized<Agent> {
    if provider.role() != ProviderRole::Agents {
        return Normalized::default();
    }

    let mut out = Normalized::default();
    for (index, record) in records.into_iter().enumerate() {
        let parsed = match provider {
            ProviderKind::Jules => parse::<JulesSession>(provider, index, record)
                .and_then(|s| s.into_agent(index, observed_at)),
            ProviderKind::Cursor => parse::<CursorAgent>(provider, index, record)
                .and_then(|a| a.into_agent(index, observed_at)),
            ProviderKind::Codex => parse::<CodexThread>(provider, index, record)
                .and_then(|t| t.into_agent(index, observed_at)),
            ProviderKind::Gemini | ProviderKind::ClaudeCli => {
                parse::<LocalSession>(provider, index, record)
                    .and_then(|s| s.into_agent(provider, index, observed_at))
            }
            ProviderKind::ClaudeCloud => parse::<CloudConversation>(provider, index, record)
                .and_then(|c| c.into_agent(index, observed_at)),
            ProviderKind::Fleet | ProviderKind::Github | ProviderKind::Jira => continue,
        };

        match parsed {
            Ok(agent) => out.items.push(agent),
            Err(err) => out.rejected.push(err),
        }
    }
    out
}

/// Normalize fleet device records.
///
/// `stale_after` is the heartbeat age past which a device counts as stale
/// (and offline, unless it reports an explicit status).
pub fn normalize_devices(
    records: Vec<Value>,
    observed_at: DateTime<Utc>,
    stale_after: ChronoDuration,
) -> Normalized<Device> {
    let mut out = Normalized::default();
    for (index, record) in records.into_iter().enumerate() {
        match parse::<RawDevice>(ProviderKind::Fleet, index, record)
            .and_then(|d| d.into_device(index, observed_at, stale_after))
        {
            Ok(device) => out.items.push(device),
            Err(err) => out.rejected.push(err),
        }
    }
    out
}

fn parse<T: DeserializeOwned>(
    provider: ProviderKind,
    index: usize,
    record: Value,
) -> Result<T, RecordParseError> {
    let record_id = record
        .get("id")
        .or_else(|| record.get("sessionId"))
        .and_then(|v| RawId::deserialize(v).ok())
        .map(|id| id.to_string());

    serde_json::from_value(record).map_err(|e| RecordParseError {
        provider,
        index,
        record_id,
        reason: format!("unexpected record shape: {e}"),
    })
}

/// Raw identifiers arrive as strings or numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl std::fmt::Display for RawId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawId::Text(s) => f.write_str(s),
            RawId::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Timestamps arrive as RFC 3339 text or as epoch seconds/milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Epoch(i64),
    Fractional(f64),
    Text(String),
}

impl RawTimestamp {
    fn parse(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Epoch(n) => from_epoch(*n),
            RawTimestamp::Fractional(f) if f.is_finite() => from_epoch(f.trunc() as i64),
            RawTimestamp::Fractional(_) => None,
            RawTimestamp::Text(s) => {
                let s = s.trim();
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
                    .or_else(|| {
                        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                            .ok()
                            .map(|naive| Utc.from_utc_datetime(&naive))
                    })
            }
        }
    }
}

/// Values past this are milliseconds (JavaScript `Date.now()` style).
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    if n.abs() >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

/// Resolves the record's "last updated" time from candidate fields, most
/// specific first. Every present candidate must parse.
struct RecordCtx<'a> {
    provider: ProviderKind,
    index: usize,
    id: &'a str,
}

impl RecordCtx<'_> {
    fn error(&self, reason: impl Into<String>) -> RecordParseError {
        RecordParseError {
            provider: self.provider,
            index: self.index,
            record_id: Some(self.id.to_string()),
            reason: reason.into(),
        }
    }

    fn timestamp(
        &self,
        candidates: &[(&str, Option<&RawTimestamp>)],
        fallback: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, RecordParseError> {
        let mut resolved = None;
        for (field, raw) in candidates {
            let Some(raw) = raw else { continue };
            let parsed = raw
                .parse()
                .ok_or_else(|| self.error(format!("unparseable timestamp in `{field}`: {raw:?}")))?;
            resolved.get_or_insert(parsed);
        }
        Ok(resolved.unwrap_or(fallback))
    }
}

fn require_id(
    provider: ProviderKind,
    index: usize,
    id: Option<RawId>,
) -> Result<String, RecordParseError> {
    match id.map(|id| id.to_string()) {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(RecordParseError {
            provider,
            index,
            record_id: None,
            reason: "record has no id".to_string(),
        }),
    }
}

fn label(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn prompt_name(prompt: Option<&str>) -> Option<String> {
    let prompt = prompt.map(str::trim).filter(|p| !p.is_empty())?;
    let mut name: String = prompt.chars().take(NAME_PROMPT_CHARS).collect();
    if prompt.chars().count() > NAME_PROMPT_CHARS {
        name.push_str("...");
    }
    Some(name)
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

// ---------------------------------------------------------------------------
// Jules
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JulesSession {
    id: Option<RawId>,
    title: Option<String>,
    state: Option<Value>,
    outputs: Option<Vec<Value>>,
    create_time: Option<RawTimestamp>,
    update_time: Option<RawTimestamp>,
    source_context: Option<JulesSourceContext>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JulesSourceContext {
    source: Option<String>,
    github_repo_context: Option<JulesRepoContext>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JulesRepoContext {
    starting_branch: Option<String>,
}

impl JulesSession {
    fn status(&self) -> AgentStatus {
        if self.outputs.as_ref().is_some_and(|o| !o.is_empty()) {
            return AgentStatus::Completed;
        }
        match label(self.state.as_ref()) {
            Some("QUEUED" | "AWAITING_PLAN_APPROVAL" | "AWAITING_USER_FEEDBACK" | "PAUSED") => {
                AgentStatus::Queued
            }
            Some("PLANNING" | "IN_PROGRESS") => AgentStatus::Running,
            Some("COMPLETED") => AgentStatus::Completed,
            Some("FAILED") => AgentStatus::Failed,
            _ => AgentStatus::Unknown,
        }
    }

    fn repository(&self) -> Option<String> {
        let source = self.source_context.as_ref()?.source.as_deref()?;
        let mut parts = source.strip_prefix("sources/github/")?.split('/');
        match (parts.next(), parts.next()) {
            (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => {
                Some(format!("https://github.com/{owner}/{repo}"))
            }
            _ => None,
        }
    }

    fn into_agent(self, index: usize, observed_at: DateTime<Utc>) -> Result<Agent, RecordParseError> {
        let provider = ProviderKind::Jules;
        let raw = require_id(provider, index, self.id.clone())?;
        let ctx = RecordCtx { provider, index, id: &raw };
        let updated_at = ctx.timestamp(
            &[
                ("updateTime", self.update_time.as_ref()),
                ("createTime", self.create_time.as_ref()),
            ],
            observed_at,
        )?;

        let status = self.status();
        let repository = self.repository();
        let branch = self
            .source_context
            .as_ref()
            .and_then(|c| c.github_repo_context.as_ref())
            .and_then(|g| g.starting_branch.clone());
        let name = non_empty(self.title).unwrap_or_else(|| "Jules Session".to_string());

        Ok(Agent::new(AgentId::new(provider, raw.as_str()), name, status, updated_at)
            .with_meta("repository", repository)
            .with_meta("branch", branch)
            .with_meta("web_url", Some(format!("https://jules.google.com/session/{raw}"))))
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorAgent {
    id: Option<RawId>,
    name: Option<String>,
    status: Option<Value>,
    created_at: Option<RawTimestamp>,
    summary: Option<String>,
    source: Option<CursorSource>,
    target: Option<CursorTarget>,
}

#[derive(Debug, Deserialize)]
struct CursorSource {
    repository: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorTarget {
    branch_name: Option<String>,
    pr_url: Option<String>,
}

impl CursorAgent {
    fn status(&self) -> AgentStatus {
        match label(self.status.as_ref()).map(str::to_ascii_uppercase).as_deref() {
            Some("CREATING") => AgentStatus::Queued,
            Some("RUNNING") => AgentStatus::Running,
            Some("FINISHED") => AgentStatus::Completed,
            Some("STOPPED") => AgentStatus::Cancelled,
            Some("EXPIRED" | "ERROR") => AgentStatus::Failed,
            _ => AgentStatus::Unknown,
        }
    }

    fn into_agent(self, index: usize, observed_at: DateTime<Utc>) -> Result<Agent, RecordParseError> {
        let provider = ProviderKind::Cursor;
        let raw = require_id(provider, index, self.id.clone())?;
        let ctx = RecordCtx { provider, index, id: &raw };
        let updated_at = ctx.timestamp(&[("createdAt", self.created_at.as_ref())], observed_at)?;

        let status = self.status();
        let (branch, pr_url) = match self.target {
            Some(t) => (t.branch_name, t.pr_url),
            None => (None, None),
        };
        let name = non_empty(self.name).unwrap_or_else(|| "Cursor Cloud Agent".to_string());

        Ok(Agent::new(AgentId::new(provider, raw.as_str()), name, status, updated_at)
            .with_meta("repository", self.source.and_then(|s| s.repository))
            .with_meta("branch", branch)
            .with_meta("pr_url", pr_url)
            .with_meta("summary", self.summary)
            .with_meta("web_url", Some(format!("https://cursor.com/agents/{raw}"))))
    }
}

// ---------------------------------------------------------------------------
// Codex
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CodexThread {
    id: Option<RawId>,
    created_at: Option<RawTimestamp>,
    title: Option<String>,
    prompt: Option<String>,
    repository: Option<String>,
    branch: Option<String>,
    #[serde(alias = "prUrl")]
    pr_url: Option<String>,
    #[serde(alias = "latestRun")]
    latest_run: Option<CodexRun>,
}

#[derive(Debug, Deserialize)]
struct CodexRun {
    status: Option<Value>,
    created_at: Option<RawTimestamp>,
}

impl CodexThread {
    fn status(&self) -> AgentStatus {
        let Some(run) = &self.latest_run else {
            return AgentStatus::Unknown;
        };
        match label(run.status.as_ref()).map(str::to_ascii_lowercase).as_deref() {
            Some("queued" | "requires_action") => AgentStatus::Queued,
            Some("in_progress" | "cancelling") => AgentStatus::Running,
            Some("completed") => AgentStatus::Completed,
            Some("failed" | "expired") => AgentStatus::Failed,
            Some("cancelled") => AgentStatus::Cancelled,
            _ => AgentStatus::Unknown,
        }
    }

    fn into_agent(self, index: usize, observed_at: DateTime<Utc>) -> Result<Agent, RecordParseError> {
        let provider = ProviderKind::Codex;
        let raw = require_id(provider, index, self.id.clone())?;
        let ctx = RecordCtx { provider, index, id: &raw };
        let updated_at = ctx.timestamp(
            &[
                (
                    "latest_run.created_at",
                    self.latest_run.as_ref().and_then(|r| r.created_at.as_ref()),
                ),
                ("created_at", self.created_at.as_ref()),
            ],
            observed_at,
        )?;

        let status = self.status();
        let name = non_empty(self.title)
            .or_else(|| prompt_name(self.prompt.as_deref()))
            .unwrap_or_else(|| format!("Codex Thread {}", short_id(&raw)));

        Ok(Agent::new(AgentId::new(provider, raw.as_str()), name, status, updated_at)
            .with_meta("repository", self.repository)
            .with_meta("branch", self.branch)
            .with_meta("pr_url", self.pr_url))
    }
}

// ---------------------------------------------------------------------------
// Local CLI sessions (Gemini CLI, Claude CLI)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalSession {
    #[serde(alias = "id")]
    session_id: Option<RawId>,
    title: Option<String>,
    prompt: Option<String>,
    status: Option<Value>,
    #[serde(alias = "mtime", alias = "updatedAt")]
    last_modified: Option<RawTimestamp>,
    #[serde(alias = "startTime")]
    created_at: Option<RawTimestamp>,
    project_path: Option<String>,
}

impl LocalSession {
    fn status(&self, last_activity: Option<DateTime<Utc>>, observed_at: DateTime<Utc>) -> AgentStatus {
        let window = ChronoDuration::minutes(LOCAL_ACTIVITY_MINUTES);
        if last_activity.is_some_and(|t| observed_at.signed_duration_since(t) < window) {
            return AgentStatus::Running;
        }
        let Some(text) = label(self.status.as_ref()) else {
            return AgentStatus::Unknown;
        };
        let exact = AgentStatus::from_label(text);
        if exact != AgentStatus::Unknown {
            return exact;
        }
        let lowered = text.to_lowercase();
        if NEGATED_LABELS.iter().any(|n| lowered.contains(n)) {
            AgentStatus::Unknown
        } else if lowered.contains("complete") || lowered.contains("finished") {
            AgentStatus::Completed
        } else if lowered.contains("error") || lowered.contains("fail") {
            AgentStatus::Failed
        } else {
            AgentStatus::Unknown
        }
    }

    fn into_agent(
        self,
        provider: ProviderKind,
        index: usize,
        observed_at: DateTime<Utc>,
    ) -> Result<Agent, RecordParseError> {
        let raw = require_id(provider, index, self.session_id.clone())?;
        let ctx = RecordCtx { provider, index, id: &raw };
        let updated_at = ctx.timestamp(
            &[
                ("lastModified", self.last_modified.as_ref()),
                ("createdAt", self.created_at.as_ref()),
            ],
            observed_at,
        )?;
        let last_activity = self.last_modified.as_ref().and_then(RawTimestamp::parse);

        let status = self.status(last_activity, observed_at);
        let tool = match provider {
            ProviderKind::Gemini => "Gemini",
            _ => "Claude",
        };
        let name = non_empty(self.title)
            .or_else(|| prompt_name(self.prompt.as_deref()))
            .unwrap_or_else(|| format!("{tool} Session {}", short_id(&raw)));

        Ok(Agent::new(AgentId::new(provider, raw.as_str()), name, status, updated_at)
            .with_meta("project_path", self.project_path))
    }
}

// ---------------------------------------------------------------------------
// Claude cloud conversations
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloudConversation {
    id: Option<RawId>,
    title: Option<String>,
    prompt: Option<String>,
    status: Option<Value>,
    last_response: Option<Value>,
    created_at: Option<RawTimestamp>,
    updated_at: Option<RawTimestamp>,
    repository: Option<String>,
}

impl CloudConversation {
    fn status(&self) -> AgentStatus {
        match label(self.status.as_ref()) {
            Some(text) => AgentStatus::from_label(text),
            None if self.last_response.as_ref().is_some_and(|r| !r.is_null()) => {
                AgentStatus::Completed
            }
            None => AgentStatus::Unknown,
        }
    }

    fn into_agent(self, index: usize, observed_at: DateTime<Utc>) -> Result<Agent, RecordParseError> {
        let provider = ProviderKind::ClaudeCloud;
        let raw = require_id(provider, index, self.id.clone())?;
        let ctx = RecordCtx { provider, index, id: &raw };
        let updated_at = ctx.timestamp(
            &[
                ("updatedAt", self.updated_at.as_ref()),
                ("createdAt", self.created_at.as_ref()),
            ],
            observed_at,
        )?;

        let status = self.status();
        let name = non_empty(self.title)
            .or_else(|| prompt_name(self.prompt.as_deref()))
            .unwrap_or_else(|| format!("Claude Conversation {}", short_id(&raw)));

        Ok(Agent::new(AgentId::new(provider, raw.as_str()), name, status, updated_at)
            .with_meta("repository", self.repository))
    }
}

// ---------------------------------------------------------------------------
// Fleet devices
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDevice {
    id: Option<RawId>,
    name: Option<String>,
    status: Option<Value>,
    last_heartbeat: Option<RawTimestamp>,
    heartbeat_at: Option<RawTimestamp>,
    updated_at: Option<RawTimestamp>,
    platform: Option<String>,
    repos: Option<Vec<RawRepo>>,
    tools: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRepo {
    Named { name: String },
    Plain(String),
}

/// The two encodings device agents use for their tool inventory.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTools {
    /// `[{"CLI tools": ["Gemini CLI", "claude CLI"]}]`
    Groups(Vec<BTreeMap<String, Vec<String>>>),
    /// `{"gemini": true, "claude-cli": false}`
    Flags(BTreeMap<String, bool>),
}

impl RawTools {
    fn into_tool_set(self) -> ToolSet {
        match self {
            RawTools::Groups(groups) => groups
                .into_iter()
                .flat_map(|group| group.into_values().flatten())
                .collect(),
            RawTools::Flags(flags) => flags
                .into_iter()
                .filter_map(|(name, present)| present.then_some(name))
                .collect(),
        }
    }
}

/// Normalize a raw tool inventory in either accepted encoding.
///
/// `null` or a missing inventory is an empty set; any other shape is
/// rejected.
pub fn normalize_tools(raw: &Value) -> Option<ToolSet> {
    if raw.is_null() {
        return Some(ToolSet::new());
    }
    RawTools::deserialize(raw).ok().map(RawTools::into_tool_set)
}

impl RawDevice {
    fn into_device(
        self,
        index: usize,
        observed_at: DateTime<Utc>,
        stale_after: ChronoDuration,
    ) -> Result<Device, RecordParseError> {
        let provider = ProviderKind::Fleet;
        let id = require_id(provider, index, self.id.clone())?;
        let ctx = RecordCtx { provider, index, id: &id };

        let heartbeat_field = [
            ("lastHeartbeat", self.last_heartbeat.as_ref()),
            ("heartbeatAt", self.heartbeat_at.as_ref()),
            ("updatedAt", self.updated_at.as_ref()),
        ]
        .into_iter()
        .find(|(_, raw)| raw.is_some());
        let last_heartbeat = match heartbeat_field {
            Some(candidate) => Some(ctx.timestamp(&[candidate], observed_at)?),
            None => None,
        };

        let tools = match &self.tools {
            None => ToolSet::new(),
            Some(raw) => normalize_tools(raw)
                .ok_or_else(|| ctx.error("unrecognised tool inventory encoding"))?,
        };

        let heartbeat_fresh =
            last_heartbeat.map(|hb| observed_at.signed_duration_since(hb) < stale_after);
        let online = match label(self.status.as_ref()).map(str::to_ascii_lowercase).as_deref() {
            Some("on") => true,
            Some("off") => false,
            _ => heartbeat_fresh.unwrap_or(false),
        };

        let repos = self
            .repos
            .unwrap_or_default()
            .into_iter()
            .map(|repo| match repo {
                RawRepo::Named { name } | RawRepo::Plain(name) => name,
            })
            .collect();

        let mut device = Device::new(id.as_str(), non_empty(self.name).unwrap_or_else(|| id.clone()));
        device.online = online;
        device.last_heartbeat = last_heartbeat;
        device.tools = tools;
        device.platform = non_empty(self.platform);
        device.repos = repos;
        device.stale = heartbeat_fresh == Some(false);
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn single(provider: ProviderKind, record: Value) -> Agent {
        let out = normalize_agents(provider, vec![record], now());
        assert!(out.rejected.is_empty(), "{:?}", out.rejected);
        out.items.into_iter().next().unwrap()
    }

    #[rstest]
    #[case(json!("QUEUED"), json!(null), AgentStatus::Queued)]
    #[case(json!("PLANNING"), json!(null), AgentStatus::Running)]
    #[case(json!("IN_PROGRESS"), json!([]), AgentStatus::Running)]
    #[case(json!("AWAITING_USER_FEEDBACK"), json!(null), AgentStatus::Queued)]
    #[case(json!("PAUSED"), json!(null), AgentStatus::Queued)]
    #[case(json!("COMPLETED"), json!(null), AgentStatus::Completed)]
    #[case(json!("FAILED"), json!(null), AgentStatus::Failed)]
    #[case(json!("STATE_UNSPECIFIED"), json!(null), AgentStatus::Unknown)]
    #[case(json!(null), json!(null), AgentStatus::Unknown)]
    #[case(json!(7), json!(null), AgentStatus::Unknown)]
    #[case(json!("IN_PROGRESS"), json!([{"pullRequest": {}}]), AgentStatus::Completed)]
    fn jules_states(#[case] state: Value, #[case] outputs: Value, #[case] expected: AgentStatus) {
        let agent = single(
            ProviderKind::Jules,
            json!({"id": "task-123", "title": "Test Task", "state": state, "outputs": outputs}),
        );
        assert_eq!(agent.status, expected);
        assert_eq!(agent.id.to_string(), "jules:task-123");
        assert_eq!(agent.name, "Test Task");
    }

    #[test]
    fn jules_metadata_and_timestamps() {
        let agent = single(
            ProviderKind::Jules,
            json!({
                "id": "s1",
                "state": "IN_PROGRESS",
                "createTime": "2024-05-01T10:00:00Z",
                "updateTime": "2024-05-01T11:30:00.250Z",
                "sourceContext": {
                    "source": "sources/github/acme/widgets",
                    "githubRepoContext": {"startingBranch": "main"}
                }
            }),
        );
        assert_eq!(agent.name, "Jules Session");
        assert_eq!(agent.updated_at, Utc.with_ymd_and_hms(2024, 5, 1, 11, 30, 0).unwrap() + ChronoDuration::milliseconds(250));
        assert_eq!(agent.metadata["repository"], "https://github.com/acme/widgets");
        assert_eq!(agent.metadata["branch"], "main");
        assert_eq!(agent.metadata["web_url"], "https://jules.google.com/session/s1");
    }

    #[rstest]
    #[case("CREATING", AgentStatus::Queued)]
    #[case("running", AgentStatus::Running)]
    #[case("FINISHED", AgentStatus::Completed)]
    #[case("STOPPED", AgentStatus::Cancelled)]
    #[case("EXPIRED", AgentStatus::Failed)]
    #[case("SOMETHING_NEW", AgentStatus::Unknown)]
    fn cursor_statuses(#[case] status: &str, #[case] expected: AgentStatus) {
        let agent = single(ProviderKind::Cursor, json!({"id": "bc-1", "status": status}));
        assert_eq!(agent.status, expected);
        assert_eq!(agent.name, "Cursor Cloud Agent");
        assert_eq!(agent.updated_at, now());
    }

    #[test]
    fn cursor_target_metadata() {
        let agent = single(
            ProviderKind::Cursor,
            json!({
                "id": "bc-2",
                "name": "Fix login",
                "status": "FINISHED",
                "createdAt": "2024-04-30T08:00:00Z",
                "source": {"repository": "github.com/acme/app", "ref": "main"},
                "target": {"branchName": "cursor/fix-login", "prUrl": "https://github.com/acme/app/pull/7"}
            }),
        );
        assert_eq!(agent.metadata["branch"], "cursor/fix-login");
        assert_eq!(agent.metadata["pr_url"], "https://github.com/acme/app/pull/7");
        assert_eq!(agent.metadata["repository"], "github.com/acme/app");
    }

    #[rstest]
    #[case(json!({"status": "queued"}), AgentStatus::Queued)]
    #[case(json!({"status": "in_progress"}), AgentStatus::Running)]
    #[case(json!({"status": "requires_action"}), AgentStatus::Queued)]
    #[case(json!({"status": "completed"}), AgentStatus::Completed)]
    #[case(json!({"status": "expired"}), AgentStatus::Failed)]
    #[case(json!({"status": "cancelled"}), AgentStatus::Cancelled)]
    #[case(json!({}), AgentStatus::Unknown)]
    #[case(json!(null), AgentStatus::Unknown)]
    fn codex_run_statuses(#[case] run: Value, #[case] expected: AgentStatus) {
        let agent = single(ProviderKind::Codex, json!({"id": "thread_abcdef123", "latest_run": run}));
        assert_eq!(agent.status, expected);
    }

    #[test]
    fn codex_names_and_epoch_seconds() {
        let long_prompt = "a".repeat(60);
        let agent = single(
            ProviderKind::Codex,
            json!({
                "id": "thread_abcdef123",
                "created_at": 1_714_550_400,
                "prompt": long_prompt,
                "latestRun": {"status": "completed", "created_at": 1_714_554_000}
            }),
        );
        assert_eq!(agent.name, format!("{}...", "a".repeat(50)));
        assert_eq!(agent.updated_at, Utc.timestamp_opt(1_714_554_000, 0).unwrap());

        let unnamed = single(ProviderKind::Codex, json!({"id": "thread_abcdef123"}));
        assert_eq!(unnamed.name, "Codex Thread thread_a");
    }

    #[test]
    fn local_sessions_use_recent_activity() {
        let recent = (now() - ChronoDuration::minutes(2)).to_rfc3339();
        let old = (now() - ChronoDuration::hours(3)).to_rfc3339();

        let active = single(
            ProviderKind::Gemini,
            json!({"sessionId": "g-1", "lastModified": recent, "status": "completed"}),
        );
        assert_eq!(active.status, AgentStatus::Running);
        assert_eq!(active.id.to_string(), "gemini:g-1");

        let finished = single(
            ProviderKind::ClaudeCli,
            json!({"id": "c-1", "lastModified": old, "status": "Task finished"}),
        );
        assert_eq!(finished.status, AgentStatus::Completed);
        assert_eq!(finished.name, "Claude Session c-1");

        let errored = single(
            ProviderKind::ClaudeCli,
            json!({"id": "c-2", "lastModified": old, "status": "tool error"}),
        );
        assert_eq!(errored.status, AgentStatus::Failed);

        let silent = single(ProviderKind::Gemini, json!({"sessionId": "g-2", "lastModified": old}));
        assert_eq!(silent.status, AgentStatus::Unknown);
    }

    #[rstest]
    #[case("incomplete", AgentStatus::Unknown)]
    #[case("not completed", AgentStatus::Unknown)]
    #[case("Unfinished", AgentStatus::Unknown)]
    #[case("not failed yet", AgentStatus::Unknown)]
    #[case("done", AgentStatus::Completed)]
    #[case("completed successfully", AgentStatus::Completed)]
    #[case("Failed", AgentStatus::Failed)]
    #[case("cancelled", AgentStatus::Cancelled)]
    fn local_labels_never_guess_an_outcome(#[case] label: &str, #[case] expected: AgentStatus) {
        let old = (now() - ChronoDuration::hours(3)).to_rfc3339();
        let agent = single(
            ProviderKind::ClaudeCli,
            json!({"id": "c-1", "lastModified": old, "status": label}),
        );
        assert_eq!(agent.status, expected, "label {label:?}");
    }

    #[rstest]
    #[case(json!({"id": "cv-1", "status": "running"}), AgentStatus::Running)]
    #[case(json!({"id": "cv-1", "lastResponse": {"content": []}}), AgentStatus::Completed)]
    #[case(json!({"id": "cv-1", "lastResponse": null}), AgentStatus::Unknown)]
    #[case(json!({"id": "cv-1", "status": "weird", "lastResponse": {}}), AgentStatus::Unknown)]
    fn claude_cloud_statuses(#[case] record: Value, #[case] expected: AgentStatus) {
        assert_eq!(single(ProviderKind::ClaudeCloud, record).status, expected);
    }

    #[test]
    fn bad_records_are_dropped_individually() {
        let records = vec![
            json!({"id": "ok-1", "state": "IN_PROGRESS"}),
            json!({"id": "bad-time", "state": "COMPLETED", "updateTime": "yesterday-ish"}),
            json!({"state": "COMPLETED"}),
            json!({"id": "bad-shape", "title": ["not", "a", "string"]}),
            json!({"id": 42, "state": "QUEUED"}),
        ];

        let out = normalize_agents(ProviderKind::Jules, records, now());

        let ids: Vec<String> = out.items.iter().map(|a| a.id.to_string()).collect();
        assert_eq!(ids, vec!["jules:ok-1", "jules:42"]);
        assert_eq!(out.rejected.len(), 3);
        assert_eq!(out.rejected[0].index, 1);
        assert_eq!(out.rejected[0].record_id.as_deref(), Some("bad-time"));
        assert_eq!(out.rejected[1].record_id, None);
        assert_eq!(out.rejected[2].record_id.as_deref(), Some("bad-shape"));
    }

    #[test]
    fn non_agent_sources_produce_no_agents() {
        let out = normalize_agents(ProviderKind::Fleet, vec![json!({"id": "d"})], now());
        assert!(out.items.is_empty());
        assert!(out.rejected.is_empty());
    }

    #[test]
    fn tool_encodings_are_equivalent() {
        let grouped = normalize_tools(&json!([{"CLI tools": ["Gemini CLI"]}])).unwrap();
        let flagged = normalize_tools(&json!({"gemini": true})).unwrap();

        assert!(grouped.contains("gemini"));
        assert_eq!(grouped, flagged);
    }

    #[rstest]
    #[case(
        json!([{"CLI tools": ["Gemini CLI", "claude CLI"]}, {"Editors": ["cursor CLI"]}]),
        json!({"gemini": true, "claude-cli": true, "cursor": true, "codex": false})
    )]
    #[case(json!([]), json!({}))]
    #[case(json!([{"CLI tools": []}]), json!({"gemini": false}))]
    #[case(json!(null), json!({}))]
    fn tool_encodings_agree(#[case] groups: Value, #[case] flags: Value) {
        assert_eq!(normalize_tools(&groups), normalize_tools(&flags));
    }

    #[test]
    fn unknown_tool_encodings_are_rejected() {
        assert_eq!(normalize_tools(&json!("gemini")), None);
        assert_eq!(normalize_tools(&json!({"gemini": "1.2.0"})), None);
    }

    #[test]
    fn devices_follow_status_then_heartbeat() {
        let stale_after = ChronoDuration::minutes(6);
        let fresh = (now() - ChronoDuration::minutes(1)).to_rfc3339();
        let old = (now() - ChronoDuration::minutes(30)).to_rfc3339();
        let records = vec![
            json!({"id": "d1", "name": "Desk", "status": "on", "lastHeartbeat": old, "tools": {"gemini": true}}),
            json!({"id": "d2", "heartbeatAt": fresh, "tools": [{"CLI tools": ["Codex CLI"]}], "repos": [{"name": "app", "path": "/src/app"}, "lib"]}),
            json!({"id": "d3", "status": "off", "lastHeartbeat": fresh}),
            json!({"id": "d4", "updatedAt": old}),
            json!({"id": "d5", "lastHeartbeat": "not a time"}),
            json!({"id": "d6", "tools": 12}),
        ];

        let out = normalize_devices(records, now(), stale_after);
        let by_id: BTreeMap<&str, &Device> = out.items.iter().map(|d| (d.id.as_str(), d)).collect();

        assert_eq!(out.rejected.len(), 2);
        assert!(by_id["d1"].online);
        assert!(by_id["d1"].stale);
        assert!(by_id["d1"].has_tool("gemini"));
        assert!(by_id["d2"].online);
        assert!(!by_id["d2"].stale);
        assert_eq!(by_id["d2"].name, "d2");
        assert_eq!(by_id["d2"].repos, vec!["app".to_string(), "lib".to_string()]);
        assert!(by_id["d2"].has_tool("codex"));
        assert!(!by_id["d3"].online);
        assert!(!by_id["d4"].online);
        assert!(by_id["d4"].stale);
    }
}
