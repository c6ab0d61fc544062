//! The "opaque observations store" an observer run writes to and the CLI
//! reads from — the Rust trait standing in for spec.md's `tool.execute`.

mod http;
mod local;

pub use http::HttpObservationStore;
pub use local::LocalObservationStore;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Observation, Severity, Status};

#[derive(Debug, Clone, Default)]
pub struct ObservationFilter {
    pub severity: Option<Severity>,
    pub observer: Option<String>,
    pub status: Option<Status>,
}

impl ObservationFilter {
    pub fn matches(&self, obs: &Observation) -> bool {
        if let Some(severity) = self.severity {
            if obs.severity != severity {
                return false;
            }
        }
        if let Some(observer) = &self.observer {
            if &obs.observer != observer {
                return false;
            }
        }
        if let Some(status) = self.status {
            if obs.status != status {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Lists observations matching `filter`.
    async fn list(&self, filter: &ObservationFilter) -> Result<Vec<Observation>>;

    /// Writes candidate observations, after filtering out any that
    /// duplicate an already-open observation's dedup key. Returns the
    /// subset actually written.
    async fn write_new(&self, candidates: Vec<Observation>) -> Result<Vec<Observation>>;

    /// Fetches a single observation by id.
    async fn get(&self, id: Uuid) -> Result<Option<Observation>>;

    /// Replaces a stored observation with an updated copy (used for
    /// acknowledge/resolve). No-ops if the id isn't found.
    async fn update(&self, observation: Observation) -> Result<()>;
}
