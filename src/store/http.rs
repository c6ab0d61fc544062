use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use super::{ObservationFilter, ObservationStore};
use crate::dedup;
use crate::models::Observation;

/// Posts `{operation, ...}` bodies to a configured base URL and parses
/// `{success, output, error}` back, matching spec.md §6's wire contract
/// for the external observations store. Built in the style of
/// `cursor::api::fetch_summary` (status check, typed error with response
/// body, `.json().await.context(...)`).
pub struct HttpObservationStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct StoreResponse<T> {
    success: bool,
    #[serde(default)]
    output: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpObservationStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpObservationStore {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &str,
        args: serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/execute", self.base_url.trim_end_matches('/'));
        let mut body = serde_json::json!({ "operation": operation });
        if let serde_json::Value::Object(map) = args {
            body.as_object_mut().unwrap().extend(map);
        }

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
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("{url} returned {status}: {text}"));
        }

        let parsed: StoreResponse<T> = resp
            .json()
            .await
            .context("invalid JSON from observations store")?;
        if !parsed.success {
            return Err(anyhow::anyhow!(
                "observations store rejected '{operation}': {}",
                parsed.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
        parsed
            .output
            .ok_or_else(|| anyhow::anyhow!("observations store returned success with no output"))
    }
}

/// `list`'s `{observations, count, total}` envelope, per spec.md §6.
#[derive(Deserialize)]
struct ListOutput {
    observations: Vec<Observation>,
    #[allow(dead_code)]
    #[serde(default)]
    count: u64,
    #[allow(dead_code)]
    #[serde(default)]
    total: u64,
}

#[async_trait]
impl ObservationStore for HttpObservationStore {
    async fn list(&self, filter: &ObservationFilter) -> Result<Vec<Observation>> {
        let out: ListOutput = self
            .call(
                "list",
                serde_json::json!({
                    "filters": {
                        "severity": filter.severity,
                        "observer": filter.observer,
                        "status": filter.status,
                    },
                }),
            )
            .await?;
        Ok(out.observations)
    }

    async fn write_new(&self, candidates: Vec<Observation>) -> Result<Vec<Observation>> {
        let existing = self.list(&ObservationFilter::default()).await?;
        let existing_open: Vec<Observation> =
            existing.into_iter().filter(|o| o.is_open()).collect();
        let fresh = dedup::aggregate_results(candidates);
        let new_ones = dedup::filter_new(&existing_open, fresh);
        if new_ones.is_empty() {
            return Ok(Vec::new());
        }
        self.call(
            "create_batch",
            serde_json::json!({ "observations": new_ones }),
        )
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Observation>> {
        self.call("get", serde_json::json!({ "observation_id": id })).await
    }

    async fn update(&self, observation: Observation) -> Result<()> {
        match observation.status {
            crate::models::Status::Resolved => {
                self.call::<serde_json::Value>(
                    "resolve",
                    serde_json::json!({
                        "observation_id": observation.id,
                        "resolution_note": observation.resolution_note,
                    }),
                )
                .await?;
            }
            crate::models::Status::Acknowledged => {
                self.call::<serde_json::Value>(
                    "acknowledge",
                    serde_json::json!({ "observation_id": observation.id }),
                )
                .await?;
            }
            crate::models::Status::Open => {}
        }
        Ok(())
    }
}
