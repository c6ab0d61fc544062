//! The two "opaque collaborators" an observer run talks to: an LLM
//! completion endpoint, and (optionally) a tool-using agent spawn capability.
//! Both are traits so the CLI can run against real HTTP endpoints while
//! tests run against scripted fakes.

mod http;

pub use http::{HttpLlmProvider, HttpSpawnCapability};

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
}

/// A single-turn LLM completion, used by the "direct" observer invocation
/// path (no tool access — the observer is handed the collected content and
/// asked to respond in the `{"observations": [...]}` shape).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;
}

/// The outcome of a tool-using spawn: a loosely-typed JSON payload, since a
/// host's spawn API can put its answer under any of several keys
/// (`output`, `result`, `response`, `content`, `text`, or nested under
/// `data.output`) depending on the agent runtime behind it.
#[derive(Debug, Clone)]
pub struct SpawnOutcome(pub serde_json::Value);

impl SpawnOutcome {
    /// Best-effort text extraction, probing keys in the order the original
    /// implementation did. Host-dependent by design — see SPEC_FULL.md
    /// Open Question (c).
    pub fn extract_text(&self) -> Option<String> {
        const PROBE_ORDER: &[&str] = &["output", "result", "response", "content", "text"];
        for key in PROBE_ORDER {
            if let Some(s) = self.0.get(key).and_then(|v| v.as_str()) {
                return Some(s.to_string());
            }
        }
        self.0
            .get("data")
            .and_then(|d| d.get("output"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// A tool-using agent spawn, used by the "with tools" observer invocation
/// path — the observer instruction is run as its own agent turn, with
/// access to the named tools, rather than a bare completion.
#[async_trait]
pub trait SpawnCapability: Send + Sync {
    async fn spawn(
        &self,
        instruction: &str,
        system: Option<&str>,
        model: Option<&str>,
        tools: &[String],
    ) -> Result<SpawnOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_text_probes_in_order() {
        let outcome = SpawnOutcome(serde_json::json!({"result": "r", "content": "c"}));
        assert_eq!(outcome.extract_text().as_deref(), Some("r"));
    }

    #[test]
    fn extract_text_falls_back_to_nested_data_output() {
        let outcome = SpawnOutcome(serde_json::json!({"data": {"output": "nested"}}));
        assert_eq!(outcome.extract_text().as_deref(), Some("nested"));
    }

    #[test]
    fn extract_text_none_when_nothing_matches() {
        let outcome = SpawnOutcome(serde_json::json!({"unrelated": "x"}));
        assert!(outcome.extract_text().is_none());
    }
}
