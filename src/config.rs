//! Loads an `ObservationsModuleConfig` from `~/.observers/config.json` (or
//! `OBSERVERS_CONFIG`), then overlays simple scalar overrides from the flat
//! `~/.observers/config` companion file — mirroring the teacher's
//! env-var-then-file precedence in `server::init_session` and the flat
//! `key=value` parser in `models::load_config`.

use anyhow::{Context, Result};

use crate::models::{self, ObservationsModuleConfig};

pub fn config_path() -> std::path::PathBuf {
    std::env::var("OBSERVERS_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| models::observers_path("config.json"))
}

pub fn load() -> Result<ObservationsModuleConfig> {
    let path = config_path();
    let mut cfg = match std::fs::read_to_string(&path) {
        Ok(content) => {
            serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        }
        Err(_) => ObservationsModuleConfig::empty(),
    };
    apply_flat_overrides(&mut cfg);
    Ok(cfg)
}

fn apply_flat_overrides(cfg: &mut ObservationsModuleConfig) {
    let flat = models::load_flat_config();
    if let Some(v) = flat.get("MAX_CONCURRENT").and_then(|s| s.parse().ok()) {
        cfg.execution.max_concurrent = v;
    }
    if let Some(v) = flat.get("TIMEOUT_PER_OBSERVER").and_then(|s| s.parse().ok()) {
        cfg.execution.timeout_per_observer = v;
    }
    if let Some(v) = flat.get("ON_TIMEOUT") {
        cfg.execution.on_timeout = v.clone();
    }
}
