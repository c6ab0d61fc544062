use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{ChatRequest, ChatResponse, LlmProvider, SpawnCapability, SpawnOutcome};

/// Per spec.md §6, a completion response is `{content: [Block{text?}]}` —
/// concatenates every block exposing a `text` attribute, in order.
fn extract_content_blocks(value: &serde_json::Value) -> String {
    value
        .get("content")
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Talks to a configured HTTP endpoint for single-turn completions. Request
/// and response shapes follow the same "status check, then typed error,
/// then `.json().await.context(...)`" pattern the teacher uses for its
/// Cursor API client.
pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLlmProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpLlmProvider {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/complete", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "system": request.system,
            "prompt": request.prompt,
            "model": request.model,
        });

        let resp = self
            .client
            .post(&url)
            .header(
                "User-Agent",
                concat!("observers/", env!("CARGO_PKG_VERSION")),
            )
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("{url} returned {status}: {body}"));
        }

        let value: serde_json::Value = resp.json().await.context("invalid JSON from completion endpoint")?;
        Ok(ChatResponse {
            text: extract_content_blocks(&value),
        })
    }
}

/// Talks to a configured HTTP endpoint that proxies a tool-using agent
/// spawn. The response body is handed back verbatim as a `SpawnOutcome`
/// since the agent runtime behind the endpoint decides its own shape.
pub struct HttpSpawnCapability {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSpawnCapability {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpSpawnCapability {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SpawnCapability for HttpSpawnCapability {
    async fn spawn(
        &self,
        instruction: &str,
        system: Option<&str>,
        model: Option<&str>,
        tools: &[String],
    ) -> Result<SpawnOutcome> {
        let url = format!("{}/spawn", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "instruction": instruction,
            "system": system,
            "model": model,
            "tools": tools,
        });

        let resp = self
            .client
            .post(&url)
            .header(
                "User-Agent",
                concat!("observers/", env!("CARGO_PKG_VERSION")),
            )
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("{url} returned {status}: {body}"));
        }

        let value: serde_json::Value = resp.json().await.context("invalid JSON from spawn endpoint")?;
        Ok(SpawnOutcome(value))
    }
}
