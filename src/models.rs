use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returns the user's home directory as a `PathBuf`.
pub fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
}

/// Returns `~/.observers`.
pub fn observers_dir() -> PathBuf {
    home_dir().join(".observers")
}

/// Returns `~/.observers/<subpath>`.
pub fn observers_path(subpath: &str) -> PathBuf {
    observers_dir().join(subpath)
}

pub fn shorten_home(path: &str) -> String {
    let h = home_dir();
    let h_str = h.to_string_lossy();
    if !h_str.is_empty() && path.starts_with(h_str.as_ref()) {
        format!("~{}", &path[h_str.len()..])
    } else {
        path.to_string()
    }
}

/// Flat `key=value` companion config file, consulted after the structured
/// JSON config for simple scalar overrides. Comment lines (`#`) and blank
/// lines are ignored.
pub fn load_flat_config() -> std::collections::HashMap<String, String> {
    let path = observers_path("config");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return std::collections::HashMap::new();
    };
    content
        .lines()
        .filter(|l| !l.trim_start().starts_with('#') && !l.trim().is_empty())
        .filter_map(|l| {
            let (k, v) = l.split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Open,
    Acknowledged,
    Resolved,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    File,
    Conversation,
    #[default]
    Mixed,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WatchType {
    Files,
    Conversation,
}

/// A single watch entry on an observer reference: either a set of glob
/// patterns over the file tree, or the running conversation transcript.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WatchSpec {
    #[serde(rename = "type")]
    pub watch_type: WatchType,
    #[serde(default)]
    pub paths: Vec<String>,
    /// Conversation watches only: whether `tool`-role turns are included in
    /// the collected content. Ignored for `Files` watches.
    #[serde(default = "default_true")]
    pub include_tool_calls: bool,
    /// Reserved: whether the collector should include the observer's own
    /// reasoning trace alongside its findings. Parsed and stored; no
    /// component currently reads it.
    #[serde(default = "default_true")]
    pub include_reasoning: bool,
}

/// One configured observer: the file or inline reference to load, the
/// watches that trigger it, and per-observer overrides.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ObserverReference {
    pub observer: String,
    #[serde(default)]
    pub watch: Vec<WatchSpec>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExecutionConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout_per_observer")]
    pub timeout_per_observer: u64,
    #[serde(default = "default_on_timeout")]
    pub on_timeout: String,
}

fn default_mode() -> String {
    "parallel_sync".to_string()
}
fn default_max_concurrent() -> usize {
    10
}
fn default_timeout_per_observer() -> u64 {
    30
}
fn default_on_timeout() -> String {
    "skip".to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            mode: default_mode(),
            max_concurrent: default_max_concurrent(),
            timeout_per_observer: default_timeout_per_observer(),
            on_timeout: default_on_timeout(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HookConfig {
    pub trigger: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    5
}

fn default_hooks() -> Vec<HookConfig> {
    vec![HookConfig {
        trigger: "orchestrator:complete".to_string(),
        priority: default_priority(),
    }]
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ObservationsModuleConfig {
    #[serde(default = "default_hooks")]
    pub hooks: Vec<HookConfig>,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub observers: Vec<ObserverReference>,
}

impl ObservationsModuleConfig {
    pub fn empty() -> Self {
        ObservationsModuleConfig {
            hooks: default_hooks(),
            execution: ExecutionConfig::default(),
            observers: Vec::new(),
        }
    }
}

/// A markdown context file pulled in via an `@mention` in an observer's
/// instruction body.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ContextFile {
    pub path: String,
    pub content: String,
}

/// An observer loaded from a markdown+YAML-frontmatter file, with its
/// `@mention`ed context already resolved and appended.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoadedObserver {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_observer_model")]
    pub model: String,
    #[serde(default = "default_timeout_per_observer")]
    pub timeout: u64,
    #[serde(default)]
    pub tools: Vec<String>,
    pub instruction: String,
    #[serde(default)]
    pub context_files: Vec<ContextFile>,
}

pub fn default_observer_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

impl LoadedObserver {
    /// The instruction body with every resolved context file appended as a
    /// `<context_file path="...">...</context_file>` block.
    pub fn full_instruction(&self) -> String {
        let mut out = self.instruction.clone();
        for cf in &self.context_files {
            out.push_str(&format!(
                "\n\n<context_file path=\"{}\">\n{}\n</context_file>",
                cf.path, cf.content
            ));
        }
        out
    }
}

/// What actually ran for a given `ObserverReference` — either the bare
/// reference (no frontmatter file resolved, e.g. an inline observer name
/// the host already knows how to run) or a fully loaded definition.
#[derive(Debug, Clone)]
pub enum ObserverBinding {
    Simple(String),
    Loaded(LoadedObserver),
}

impl ObserverBinding {
    pub fn name(&self) -> &str {
        match self {
            ObserverBinding::Simple(name) => name,
            ObserverBinding::Loaded(loaded) => &loaded.name,
        }
    }

    pub fn full_instruction(&self) -> String {
        match self {
            ObserverBinding::Simple(name) => format!("Act as the `{name}` observer."),
            ObserverBinding::Loaded(loaded) => loaded.full_instruction(),
        }
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            ObserverBinding::Simple(_) => None,
            ObserverBinding::Loaded(loaded) => Some(loaded.model.as_str()),
        }
    }

    pub fn timeout(&self) -> Option<u64> {
        match self {
            ObserverBinding::Simple(_) => None,
            ObserverBinding::Loaded(loaded) => Some(loaded.timeout),
        }
    }

    /// The tools this observer is allowed to use, if any. A non-empty list
    /// is what selects the `spawn` invocation path over a direct
    /// `complete` call — see `runner::ObserverRunner::run_one`.
    pub fn tools(&self) -> &[String] {
        match self {
            ObserverBinding::Simple(_) => &[],
            ObserverBinding::Loaded(loaded) => &loaded.tools,
        }
    }
}

/// A composite hash over everything a watch covers (file `(path, mtime,
/// size)` tuples and/or the trailing conversation window). Two identical
/// fingerprints mean "nothing the observer watches has changed" and a run
/// can be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateFingerprint(pub u64);

impl StateFingerprint {
    pub fn as_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl std::fmt::Display for StateFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

/// The key used to deduplicate observations across runs. See
/// `dedup::observation_key` for how one is derived.
pub type ObservationKey = String;

/// One turn of the conversation transcript, as handed to the collector and
/// fingerprinter. Mirrors the `{role, content}` shape hook payloads carry.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
}

/// A persisted finding produced by an observer during one run. `metadata`
/// is the free-form bag the wire protocol (spec.md §6) carries `category`
/// and `suggestion` in, by convention — neither is a first-class field, to
/// match `original_source/.../models.py::Observation` field-for-field.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Observation {
    pub id: Uuid,
    pub observer: String,
    pub severity: Severity,
    pub content: String,
    #[serde(default)]
    pub source_ref: Option<String>,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub status: Status,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution_note: Option<String>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

fn default_metadata() -> serde_json::Value {
    serde_json::json!({})
}

impl Observation {
    /// `metadata.category`, by convention a string — see spec.md §3.
    pub fn category(&self) -> Option<&str> {
        self.metadata.get("category").and_then(|v| v.as_str())
    }

    pub fn create(
        observer: impl Into<String>,
        severity: Severity,
        content: impl Into<String>,
        source_ref: Option<String>,
        source_type: SourceType,
        metadata: serde_json::Value,
    ) -> Self {
        Observation {
            id: Uuid::new_v4(),
            observer: observer.into(),
            severity,
            content: content.into(),
            source_ref,
            source_type,
            status: Status::Open,
            created_at: Utc::now(),
            acknowledged_at: None,
            resolved_at: None,
            resolution_note: None,
            metadata,
        }
    }

    pub fn acknowledge(&mut self) {
        self.status = Status::Acknowledged;
        self.acknowledged_at = Some(Utc::now());
    }

    pub fn resolve(&mut self, note: Option<String>) {
        self.status = Status::Resolved;
        self.resolved_at = Some(Utc::now());
        self.resolution_note = note;
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, Status::Open | Status::Acknowledged)
    }
}
