//! Ties every component together: gates each observer reference on its
//! fingerprint, fans its run out through the scheduler, writes new
//! observations to the store, and formats the injected next-turn summary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use uuid::Uuid;

use crate::collector;
use crate::dedup::{self, ResolvedRef};
use crate::fingerprint;
use crate::loader;
use crate::models::{
    ConversationMessage, Observation, ObservationsModuleConfig, ObserverBinding, ObserverReference,
    Severity, SourceType, StateFingerprint,
};
use crate::provider::{LlmProvider, SpawnCapability};
use crate::runner::ObserverRunner;
use crate::scheduler::{BatchOutcome, ScheduledTask, Scheduler, TaskOutcome};
use crate::store::{ObservationFilter, ObservationStore};

/// What one `on_event` pass did.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub triggered: Vec<String>,
    pub skipped_unchanged: Vec<String>,
    pub new_observations: Vec<Observation>,
    pub resolved: Vec<(String, String)>,
    pub failures: Vec<(String, String)>,
    /// Set when the batch's global deadline elapsed — every result from
    /// this run was discarded and no fingerprint advanced, per spec.md §4.6.
    pub global_timeout: bool,
    /// Set when an observer timed out under `on_timeout == "fail"` and the
    /// batch-wide handler aborted the run — every result from this run was
    /// discarded and no fingerprint advanced, per spec.md §4.3/§7. Carries
    /// the message the aborting timeout raised.
    pub aborted: Option<String>,
}

pub struct Orchestrator {
    config: ObservationsModuleConfig,
    store: Arc<dyn ObservationStore>,
    provider: Arc<dyn LlmProvider>,
    spawn: Option<Arc<dyn SpawnCapability>>,
    observer_base_path: PathBuf,
    bundles: HashMap<String, PathBuf>,
    loaded_cache: HashMap<String, ObserverBinding>,
    last_fingerprints: HashMap<String, StateFingerprint>,
}

/// The Rust equivalent of the original's `async def mount(coordinator,
/// config)`, minus the coordinator-registration side effects — this crate
/// does not assume a specific host hook API (see SPEC_FULL.md §6). A host
/// embedding this crate wires `Orchestrator::on_event`/`on_next_turn` into
/// its own hook registry.
pub fn mount(
    config: ObservationsModuleConfig,
    store: Arc<dyn ObservationStore>,
    provider: Arc<dyn LlmProvider>,
    spawn: Option<Arc<dyn SpawnCapability>>,
) -> Orchestrator {
    Orchestrator::new(config, store, provider, spawn)
}

impl Orchestrator {
    pub fn new(
        config: ObservationsModuleConfig,
        store: Arc<dyn ObservationStore>,
        provider: Arc<dyn LlmProvider>,
        spawn: Option<Arc<dyn SpawnCapability>>,
    ) -> Self {
        Orchestrator {
            config,
            store,
            provider,
            spawn,
            observer_base_path: PathBuf::from("."),
            bundles: HashMap::new(),
            loaded_cache: HashMap::new(),
            last_fingerprints: HashMap::new(),
        }
    }

    pub fn with_observer_base_path(mut self, path: PathBuf) -> Self {
        self.observer_base_path = path;
        self
    }

    pub fn with_bundles(mut self, bundles: HashMap<String, PathBuf>) -> Self {
        self.bundles = bundles;
        self
    }

    fn bind(&mut self, reference: &ObserverReference) -> ObserverBinding {
        if let Some(cached) = self.loaded_cache.get(&reference.observer) {
            return cached.clone();
        }
        let binding = match loader::load_observer(&reference.observer, &self.bundles, &self.observer_base_path) {
            Ok(loaded) => ObserverBinding::Loaded(loaded),
            Err(e) => {
                eprintln!(
                    "[observers] could not load observer '{}': {e}, falling back to a bare reference",
                    reference.observer
                );
                ObserverBinding::Simple(reference.observer.clone())
            }
        };
        self.loaded_cache.insert(reference.observer.clone(), binding.clone());
        binding
    }

    /// Runs every enabled, changed observer reference against `messages`,
    /// writes their new findings to the store, and returns a summary of
    /// what happened. References whose watched state is unchanged since
    /// their last run are skipped entirely.
    pub async fn on_event(&mut self, messages: &[ConversationMessage]) -> Result<RunSummary> {
        let runner = Arc::new(ObserverRunner {
            provider: self.provider.clone(),
            spawn: self.spawn.clone(),
        });

        let mut summary = RunSummary::default();
        let mut batch = Vec::new();

        let references: Vec<ObserverReference> =
            self.config.observers.iter().filter(|r| r.enabled).cloned().collect();

        for reference in &references {
            let fp = fingerprint::composite_fingerprint(&reference.watch, messages);
            if self.last_fingerprints.get(&reference.observer) == Some(&fp) {
                summary.skipped_unchanged.push(reference.observer.clone());
                continue;
            }

            let binding = self.bind(reference);
            let content = collector::collect(&reference.watch, messages).await;
            let existing = self
                .store
                .list(&ObservationFilter {
                    observer: Some(binding.name().to_string()),
                    status: None,
                    severity: None,
                })
                .await?;
            let existing_summary = format_existing_for_prompt(&existing);

            let timeout = Duration::from_secs(
                reference
                    .timeout
                    .or_else(|| binding.timeout())
                    .unwrap_or(self.config.execution.timeout_per_observer),
            );
            let default_source_type = default_source_type_for(&reference.watch);

            batch.push((
                reference.observer.clone(),
                fp,
                ScheduledTask {
                    binding,
                    content,
                    existing_summary,
                    default_source_type,
                    timeout,
                    on_timeout: self.config.execution.on_timeout.clone(),
                },
            ));
        }

        if batch.is_empty() {
            return Ok(summary);
        }

        let scheduler = Scheduler {
            max_concurrent: self.config.execution.max_concurrent,
            global_timeout: Duration::from_secs(self.config.execution.timeout_per_observer * 2),
        };

        let (names_fps, tasks): (Vec<(String, StateFingerprint)>, Vec<ScheduledTask>) = batch
            .into_iter()
            .map(|(name, fp, task)| ((name, fp), task))
            .unzip();

        let outcomes = match scheduler.run_batch(runner, tasks).await {
            BatchOutcome::Completed(outcomes) => outcomes,
            BatchOutcome::GlobalTimeout => {
                eprintln!(
                    "[observers] global deadline elapsed for this batch; discarding all results"
                );
                summary.global_timeout = true;
                return Ok(summary);
            }
            BatchOutcome::Aborted(reason) => {
                eprintln!("[observers] batch aborted by a fail-policy timeout: {reason}");
                summary.aborted = Some(reason);
                return Ok(summary);
            }
        };

        let mut candidates = Vec::new();
        let mut resolved_candidates: Vec<ResolvedRef> = Vec::new();
        for (outcome, (observer_name, fp)) in outcomes.into_iter().zip(names_fps.into_iter()) {
            match outcome {
                TaskOutcome::Observations(observations, resolved) => {
                    summary.triggered.push(observer_name.clone());
                    self.last_fingerprints.insert(observer_name, fp);
                    candidates.extend(observations);
                    resolved_candidates.extend(resolved);
                }
                TaskOutcome::Failed { observer, reason } => {
                    summary.failures.push((observer, reason));
                }
            }
        }

        let deduped = dedup::aggregate_results(candidates);
        let written = self.store.write_new(deduped).await?;
        summary.new_observations = written;

        for resolved in dedup::aggregate_resolved(resolved_candidates) {
            match self.resolve_one(&resolved).await {
                Ok(true) => summary.resolved.push((resolved.id, resolved.reason)),
                Ok(false) => {}
                Err(e) => summary
                    .failures
                    .push((format!("resolve:{}", resolved.id), e.to_string())),
            }
        }

        Ok(summary)
    }

    /// Resolves one observer-claimed resolution against the store. Best
    /// effort — a malformed id or a store failure is logged by the caller
    /// and never fails the batch. Returns `Ok(false)` if the id doesn't
    /// parse or doesn't name a known observation.
    async fn resolve_one(&self, resolved: &ResolvedRef) -> Result<bool> {
        let Ok(id) = Uuid::parse_str(&resolved.id) else {
            return Ok(false);
        };
        let Some(mut observation) = self.store.get(id).await? else {
            return Ok(false);
        };
        observation.resolve(Some(format!("Auto-resolved: {}", resolved.reason)));
        self.store.update(observation).await?;
        Ok(true)
    }

    /// Builds the text injected into the next conversation turn: counts by
    /// severity, grouped by observer, with a top-3-per-observer cap and an
    /// overflow note — mirrors the original's `_format_observations_summary`.
    pub async fn on_next_turn(&self) -> Result<Option<String>> {
        let open = self
            .store
            .list(&ObservationFilter {
                severity: None,
                observer: None,
                status: None,
            })
            .await?
            .into_iter()
            .filter(|o| o.is_open())
            .collect::<Vec<_>>();

        if open.is_empty() {
            return Ok(None);
        }
        Ok(Some(wrap_injection(&format_observations_summary(&open))))
    }
}

fn default_source_type_for(watches: &[crate::models::WatchSpec]) -> SourceType {
    use crate::models::WatchType;
    let has_files = watches.iter().any(|w| w.watch_type == WatchType::Files);
    let has_conversation = watches.iter().any(|w| w.watch_type == WatchType::Conversation);
    match (has_files, has_conversation) {
        (true, false) => SourceType::File,
        (false, true) => SourceType::Conversation,
        (true, true) => SourceType::Mixed,
        (false, false) => SourceType::Unknown,
    }
}

/// Mirrors the original's existing-observations list: one line per open
/// observation as `id=<id> [severity] source_ref: content-prefix`, content
/// capped at 150 chars per item.
fn format_existing_for_prompt(existing: &[Observation]) -> String {
    let open: Vec<&Observation> = existing.iter().filter(|o| o.is_open()).collect();
    if open.is_empty() {
        return "- none yet".to_string();
    }
    open.iter()
        .map(|o| {
            format!(
                "- id=`{}` [{}] {}: {}",
                o.id,
                dedup::severity_label(o.severity),
                o.source_ref.as_deref().unwrap_or("unknown"),
                truncate(&o.content, 150)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}

/// Mirrors the original's line-by-line construction, including the
/// single comma-joined "By Severity" line and the two-space-indented
/// per-observation rows.
fn format_observations_summary(open: &[Observation]) -> String {
    let mut by_severity: HashMap<Severity, usize> = HashMap::new();
    let mut by_observer: HashMap<String, Vec<&Observation>> = HashMap::new();
    for obs in open {
        *by_severity.entry(obs.severity).or_insert(0) += 1;
        by_observer.entry(obs.observer.clone()).or_default().push(obs);
    }

    let mut severities: Vec<Severity> = by_severity.keys().copied().collect();
    severities.sort_by(|a, b| b.cmp(a));
    let counts = severities
        .iter()
        .map(|s| format!("{}: {}", dedup::severity_label(*s), by_severity[s]))
        .collect::<Vec<_>>()
        .join(", ");

    let mut lines = vec![
        format!("Active Observations: {} open", open.len()),
        format!("By Severity: {counts}"),
    ];

    let mut observer_names: Vec<&String> = by_observer.keys().collect();
    observer_names.sort();
    for name in observer_names {
        let items = &by_observer[name];
        lines.push(format!("\n**{name}** ({} observations):", items.len()));
        for obs in items.iter().take(3) {
            lines.push(format!(
                "  [{}] {}",
                dedup::severity_label(obs.severity),
                truncate(&obs.content, 100)
            ));
        }
        if items.len() > 3 {
            lines.push(format!("  ... and {} more", items.len() - 3));
        }
    }
    lines.join("\n")
}

/// Wraps the summary in the `<system-reminder>` block the host renders
/// straight into the next turn's context, per the wire format.
fn wrap_injection(summary: &str) -> String {
    format!(
        "<system-reminder source=\"observers\">\n{summary}\n\nPlease review and address these observations in your response.\n</system-reminder>"
    )
}
