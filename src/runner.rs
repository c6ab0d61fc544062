//! Builds an observer's prompt and invokes it through whichever path its
//! binding supports, turning the raw response into parsed findings.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::dedup::ResolvedRef;
use crate::models::{Observation, ObserverBinding, Severity, SourceType};
use crate::parser::{self, ParseOutcome};
use crate::provider::{ChatRequest, LlmProvider, SpawnCapability};

const EXISTING_OBSERVATIONS_PLACEHOLDER: &str = "{{existing_observations}}";
/// Below this length, and not starting with "No issues", a non-JSON
/// response is treated as empty rather than as a fallback finding — see
/// spec.md §4.4.
const FALLBACK_MIN_CHARS: usize = 50;

fn response_protocol() -> &'static str {
    "Respond with JSON only, in the shape:\n\
{\"observations\": [{\"severity\": \"critical|high|medium|low|info\", \"content\": \"...\", \
\"source_ref\": \"...\", \"metadata\": {\"category\": \"...\", \"suggestion\": \"...\"}}], \
\"resolved\": [{\"id\": \"...\", \"reason\": \"...\"}]}"
}

/// Builds the system instruction handed to an observer: its full
/// instruction body, with `{{existing_observations}}` substituted if
/// present, otherwise left untouched (the previously-reported block is
/// appended to the user prompt instead in that case).
fn build_system(binding: &ObserverBinding, existing_summary: &str) -> (String, bool) {
    let instruction = binding.full_instruction();
    if instruction.contains(EXISTING_OBSERVATIONS_PLACEHOLDER) {
        (
            instruction.replace(EXISTING_OBSERVATIONS_PLACEHOLDER, existing_summary),
            true,
        )
    } else {
        (instruction, false)
    }
}

/// Builds the user-turn prompt: the content under review, the previously
/// reported issues (unless already folded into the system instruction),
/// and the output-format protocol.
pub fn build_prompt(binding: &ObserverBinding, content: &str, existing_summary: &str) -> String {
    let (_, substituted) = build_system(binding, existing_summary);
    let mut prompt = format!("## Content under review\n{content}\n");
    if !substituted {
        prompt.push_str(&format!(
            "\n## Previously Reported Issues\n{existing_summary}\n"
        ));
    }
    prompt.push_str(&format!("\n{}", response_protocol()));
    prompt
}

pub struct ObserverRunner {
    pub provider: Arc<dyn LlmProvider>,
    pub spawn: Option<Arc<dyn SpawnCapability>>,
}

impl ObserverRunner {
    /// Runs a single observer against `content`, returning its parsed
    /// findings as `Observation`s and any `resolved` claims (with no
    /// id/status assigned beyond `Observation::create`'s defaults). A
    /// per-observer timeout is applied by the caller (`Scheduler`); this
    /// function itself does not time out.
    pub async fn run_one(
        &self,
        binding: &ObserverBinding,
        content: &str,
        existing_summary: &str,
        default_source_type: SourceType,
    ) -> Result<(Vec<Observation>, Vec<ResolvedRef>)> {
        let (system, _) = build_system(binding, existing_summary);
        let prompt = build_prompt(binding, content, existing_summary);
        let model = binding.model().map(str::to_string);
        let tools = binding.tools();

        // Only an observer that actually lists tools takes the spawn path,
        // even when a spawn capability is configured — a tool-less
        // observer always gets a direct completion (spec.md §4.3, mirrors
        // the original's `if observer.tools: spawn else complete`).
        let raw_text = if let (Some(spawn), false) = (&self.spawn, tools.is_empty()) {
            let outcome = spawn
                .spawn(&prompt, Some(&system), model.as_deref(), tools)
                .await?;
            outcome.extract_text().unwrap_or_default()
        } else {
            let response = self
                .provider
                .complete(ChatRequest {
                    system: Some(system),
                    prompt,
                    model,
                })
                .await?;
            response.text
        };

        Ok(to_observations(binding.name(), &raw_text, default_source_type))
    }
}

fn to_observations(
    observer: &str,
    raw_text: &str,
    default_source_type: SourceType,
) -> (Vec<Observation>, Vec<ResolvedRef>) {
    match parser::parse_observer_output(raw_text) {
        ParseOutcome::Parsed {
            observations,
            resolved,
        } => {
            let built = observations
                .into_iter()
                .map(|f| {
                    Observation::create(
                        observer,
                        f.severity_or_default(),
                        f.content.clone(),
                        f.source_ref.clone(),
                        f.source_type_or_default(default_source_type),
                        f.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
                    )
                })
                .collect();
            let resolved = resolved
                .into_iter()
                .map(|r| ResolvedRef {
                    id: r.id,
                    reason: r.reason,
                })
                .collect();
            (built, resolved)
        }
        ParseOutcome::FallbackText(text) => {
            if text.len() > FALLBACK_MIN_CHARS && !text.starts_with("No issues") {
                let observation = Observation::create(
                    observer,
                    Severity::Info,
                    text.chars().take(500).collect::<String>(),
                    None,
                    SourceType::Unknown,
                    serde_json::json!({"parse_error": true}),
                );
                (vec![observation], Vec::new())
            } else {
                (Vec::new(), Vec::new())
            }
        }
        ParseOutcome::Empty => (Vec::new(), Vec::new()),
    }
}

/// What happened when a call was wrapped in its per-observer timeout.
pub enum TimeoutOutcome {
    /// The call returned within its budget, successfully or not — an
    /// ordinary exception is always swallowed by the caller regardless of
    /// `on_timeout` (spec.md §7 `per_observer_exception`).
    Completed(Result<(Vec<Observation>, Vec<ResolvedRef>)>),
    /// The budget elapsed and `execution.on_timeout == "skip"`: treated as
    /// a normal, empty `{observations: [], resolved: []}` result rather
    /// than a failure (spec.md §4.3/§7).
    SkippedTimeout,
    /// The budget elapsed and `execution.on_timeout == "fail"`: must
    /// rethrow outward so the batch-wide handler aborts the run with no
    /// writes and no fingerprint advance (spec.md §4.3/§7).
    FailedTimeout(String),
}

/// Per-observer wall-clock budget applied around `ObserverRunner::run_one`.
pub async fn run_with_timeout(
    runner: &ObserverRunner,
    binding: &ObserverBinding,
    content: &str,
    existing_summary: &str,
    default_source_type: SourceType,
    timeout: Duration,
    on_timeout: &str,
) -> TimeoutOutcome {
    match tokio::time::timeout(
        timeout,
        runner.run_one(binding, content, existing_summary, default_source_type),
    )
    .await
    {
        Ok(result) => TimeoutOutcome::Completed(result),
        Err(_) => {
            let message = format!("observer '{}' timed out after {:?}", binding.name(), timeout);
            if on_timeout == "fail" {
                TimeoutOutcome::FailedTimeout(message)
            } else {
                TimeoutOutcome::SkippedTimeout
            }
        }
    }
}
