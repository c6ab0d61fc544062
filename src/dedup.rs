//! Cross-run deduplication: the key an observation is identified by, and
//! the aggregation/write-time filtering built on top of it.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use crate::models::{Observation, ObservationKey, Severity, SourceType};

/// Lowercase severity label, matching the wire protocol's snake_case
/// strings rather than `Severity`'s `Debug` rendering.
pub fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "critical",
        Severity::High => "high",
        Severity::Medium => "medium",
        Severity::Low => "low",
        Severity::Info => "info",
    }
}

/// Three-tier key selection, most to least specific:
/// 1. `source_ref` present and `source_type == File` → keyed on observer+"file"+source_ref+severity.
/// 2. `metadata.category` present → keyed on observer+category+severity+source_ref.
/// 3. otherwise → keyed on observer+severity+a short hash of the normalized content.
pub fn observation_key(obs: &Observation) -> ObservationKey {
    match (&obs.source_ref, obs.source_type) {
        (Some(source_ref), SourceType::File) => {
            format!(
                "{}:file:{source_ref}:{}",
                obs.observer,
                severity_label(obs.severity)
            )
        }
        _ => match obs.category() {
            Some(category) => format!(
                "{}:{category}:{}:{}",
                obs.observer,
                severity_label(obs.severity),
                obs.source_ref.as_deref().unwrap_or("")
            ),
            None => format!(
                "{}:{}:{}",
                obs.observer,
                severity_label(obs.severity),
                content_hash(&obs.content)
            ),
        },
    }
}

fn content_hash(content: &str) -> String {
    let normalized: String = content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let truncated: String = normalized.chars().take(100).collect();
    let mut hasher = DefaultHasher::new();
    truncated.hash(&mut hasher);
    format!("{:08x}", (hasher.finish() & 0xffff_ffff) as u32)
}

/// Dedups a single run's freshly-parsed observations by key, first
/// occurrence wins — mirrors the original's in-batch aggregation before
/// anything is compared against what's already stored.
pub fn aggregate_results(candidates: Vec<Observation>) -> Vec<Observation> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for obs in candidates {
        let key = observation_key(&obs);
        if seen.insert(key) {
            out.push(obs);
        }
    }
    out
}

/// One `{id, reason}` pair parsed out of an observer's `resolved` array.
#[derive(Debug, Clone)]
pub struct ResolvedRef {
    pub id: String,
    pub reason: String,
}

/// Same first-seen-wins policy as `aggregate_results`, applied to the
/// `resolved` side of a batch keyed on the store-assigned id.
pub fn aggregate_resolved(candidates: Vec<ResolvedRef>) -> Vec<ResolvedRef> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for r in candidates {
        if !r.id.is_empty() && seen.insert(r.id.clone()) {
            out.push(r);
        }
    }
    out
}

/// Write-time filter: drops any candidate whose key already belongs to an
/// open observation in the store, so re-running observers over unchanged
/// state never produces duplicate entries.
pub fn filter_new(existing_open: &[Observation], candidates: Vec<Observation>) -> Vec<Observation> {
    let existing_keys: HashSet<ObservationKey> =
        existing_open.iter().map(observation_key).collect();
    candidates
        .into_iter()
        .filter(|obs| !existing_keys.contains(&observation_key(obs)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    fn obs(
        observer: &str,
        severity: Severity,
        content: &str,
        category: Option<&str>,
        source_type: SourceType,
        source_ref: Option<&str>,
    ) -> Observation {
        let metadata = match category {
            Some(c) => serde_json::json!({ "category": c }),
            None => serde_json::json!({}),
        };
        Observation::create(
            observer,
            severity,
            content,
            source_ref.map(str::to_string),
            source_type,
            metadata,
        )
    }

    #[test]
    fn key_uses_file_and_source_ref_when_both_present() {
        let a = obs("style", Severity::Low, "a", None, SourceType::File, Some("f.rs:L1"));
        let b = obs(
            "style",
            Severity::Low,
            "different wording",
            None,
            SourceType::File,
            Some("f.rs:L1"),
        );
        assert_eq!(observation_key(&a), observation_key(&b));
    }

    #[test]
    fn key_falls_back_to_category_when_not_file_sourced() {
        let a = obs("sec", Severity::High, "leak", Some("security"), SourceType::Mixed, None);
        let b = obs(
            "sec",
            Severity::High,
            "another leak",
            Some("security"),
            SourceType::Mixed,
            None,
        );
        assert_eq!(observation_key(&a), observation_key(&b));
    }

    #[test]
    fn key_falls_back_to_content_hash_as_last_resort() {
        let a = obs("misc", Severity::Info, "note one", None, SourceType::Unknown, None);
        let b = obs("misc", Severity::Info, "note two", None, SourceType::Unknown, None);
        assert_ne!(observation_key(&a), observation_key(&b));
    }

    #[test]
    fn content_hash_ignores_whitespace_and_case_differences() {
        let a = obs("misc", Severity::Info, "Note   One", None, SourceType::Unknown, None);
        let b = obs("misc", Severity::Info, "note one", None, SourceType::Unknown, None);
        assert_eq!(observation_key(&a), observation_key(&b));
    }

    #[test]
    fn aggregate_results_drops_duplicate_keys_first_seen_wins() {
        let a = obs("style", Severity::Low, "first", None, SourceType::File, Some("f.rs:L1"));
        let b = obs("style", Severity::Low, "second", None, SourceType::File, Some("f.rs:L1"));
        let merged = aggregate_results(vec![a.clone(), b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "first");
    }

    #[test]
    fn aggregate_resolved_drops_duplicate_ids_and_empties() {
        let resolved = vec![
            ResolvedRef { id: "a".into(), reason: "r1".into() },
            ResolvedRef { id: "a".into(), reason: "r2".into() },
            ResolvedRef { id: "".into(), reason: "no id".into() },
            ResolvedRef { id: "b".into(), reason: "r3".into() },
        ];
        let merged = aggregate_resolved(resolved);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "a");
        assert_eq!(merged[0].reason, "r1");
    }

    #[test]
    fn filter_new_excludes_observations_matching_existing_open_keys() {
        let existing = vec![obs("style", Severity::Low, "x", None, SourceType::File, Some("f.rs:L1"))];
        let candidate_dup = obs("style", Severity::Low, "y", None, SourceType::File, Some("f.rs:L1"));
        let candidate_new = obs("style", Severity::Low, "z", None, SourceType::File, Some("g.rs:L2"));
        let result = filter_new(&existing, vec![candidate_dup, candidate_new.clone()]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].content, "z");
    }
}
