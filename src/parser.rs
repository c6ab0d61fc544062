//! Tolerant extraction of `{"observations": [...], "resolved": [...]}` from
//! free-form LLM text: observers are asked to answer in JSON but routinely
//! wrap it in prose, fences, or nothing at all.

use regex::Regex;
use serde::Deserialize;

use crate::models::{Severity, SourceType};

/// One observation as an observer reported it, before an `Observation` is
/// built from it (id/timestamps/status are assigned downstream). Follows
/// the wire shape from spec.md §6 exactly: `category`/`suggestion` travel
/// inside `metadata`, not as top-level fields.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFinding {
    #[serde(default)]
    pub severity: Option<String>,
    pub content: String,
    #[serde(default)]
    pub source_ref: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl RawFinding {
    pub fn severity_or_default(&self) -> Severity {
        match self.severity.as_deref() {
            Some("critical") => Severity::Critical,
            Some("high") => Severity::High,
            Some("medium") => Severity::Medium,
            Some("low") => Severity::Low,
            _ => Severity::Info,
        }
    }

    pub fn source_type_or_default(&self, fallback: SourceType) -> SourceType {
        match self.source_type.as_deref() {
            Some("file") => SourceType::File,
            Some("conversation") => SourceType::Conversation,
            Some("mixed") => SourceType::Mixed,
            Some("unknown") => SourceType::Unknown,
            _ => fallback,
        }
    }
}

/// One `{id, reason}` pair from an observer's `resolved` array — a claim
/// that a previously reported issue (listed in the prompt's "Previously
/// Reported Issues" block) no longer applies.
#[derive(Debug, Clone, Deserialize)]
pub struct RawResolved {
    pub id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
struct ObservationsEnvelope {
    #[serde(default)]
    observations: Vec<RawFinding>,
    #[serde(default)]
    resolved: Vec<RawResolved>,
}

/// The three shapes an observer's raw text can resolve to.
#[derive(Debug)]
pub enum ParseOutcome {
    /// Valid `{"observations": [...], "resolved": [...]}` JSON, possibly
    /// fenced or embedded in prose.
    Parsed {
        observations: Vec<RawFinding>,
        resolved: Vec<RawResolved>,
    },
    /// No JSON found, but the text has substantive content — the original
    /// implementation turns this into a single `info`-severity observation
    /// rather than discarding the observer's output entirely.
    FallbackText(String),
    /// Nothing usable at all (empty or whitespace-only output).
    Empty,
}

fn fenced_json_block(text: &str) -> Option<&str> {
    let re = Regex::new(r"```json\s*\n([\s\S]*?)```").unwrap();
    re.captures(text).map(|c| c.get(1).unwrap().as_str())
}

fn any_fenced_block(text: &str) -> Option<&str> {
    let re = Regex::new(r"```(?:\w*)\s*\n([\s\S]*?)```").unwrap();
    re.captures(text).map(|c| c.get(1).unwrap().as_str())
}

fn inline_observations_object(text: &str) -> Option<&str> {
    let re = Regex::new(r#"(?s)\{[\s\S]*?"observations"[\s\S]*?\]\s*\}"#).unwrap();
    re.find(text).map(|m| m.as_str())
}

fn try_parse_envelope(candidate: &str) -> Option<ObservationsEnvelope> {
    serde_json::from_str::<ObservationsEnvelope>(candidate.trim()).ok()
}

/// Attempts, in order: a ```json fence, any fence, an inline
/// `{"observations": [...]}` span, then the whole trimmed text, before
/// falling back to the raw text (or `Empty` if there's nothing there).
pub fn parse_observer_output(raw_text: &str) -> ParseOutcome {
    let trimmed = raw_text.trim();
    if trimmed.is_empty() {
        return ParseOutcome::Empty;
    }

    let candidates: Vec<&str> = [
        fenced_json_block(trimmed),
        any_fenced_block(trimmed),
        inline_observations_object(trimmed),
    ]
    .into_iter()
    .flatten()
    .collect();

    for candidate in candidates {
        if let Some(envelope) = try_parse_envelope(candidate) {
            return ParseOutcome::Parsed {
                observations: envelope.observations,
                resolved: envelope.resolved,
            };
        }
    }
    // whole-text JSON (no wrapping prose, no fences at all)
    if let Some(envelope) = try_parse_envelope(trimmed) {
        return ParseOutcome::Parsed {
            observations: envelope.observations,
            resolved: envelope.resolved,
        };
    }

    ParseOutcome::FallbackText(trimmed.to_string())
}
