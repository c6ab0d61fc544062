//! `observers doctor` — checks config validity, store reachability, and
//! that every configured observer reference actually loads. Modeled on the
//! teacher's `doctor::run` pass/fail tally and `check_*` helper shape.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::fmt::{cprintln, BOLD, CYAN, DIM, GREEN, RED, RESET};
use crate::models::ObservationsModuleConfig;
use crate::store::ObservationStore;
use crate::{config, loader};

fn ok(message: &str, pass: &mut u32) {
    cprintln!("  {GREEN}\u{2713}{RESET}  {message}");
    *pass += 1;
}

fn warn(message: &str) {
    cprintln!("  {CYAN}i{RESET}  {message}");
}

fn err(message: &str, fail: &mut u32) {
    cprintln!("  {RED}\u{2717}{RESET}  {message}");
    *fail += 1;
}

pub async fn run() {
    cprintln!();
    cprintln!("{DIM}── observers doctor ────────────────────────────{RESET}");
    cprintln!();

    let mut pass = 0;
    let mut fail = 0;

    let cfg = check_config(&mut pass, &mut fail);
    check_observers(&cfg, &mut pass, &mut fail);
    check_store(&mut pass, &mut fail).await;

    cprintln!();
    cprintln!(
        "  {BOLD}{pass}{RESET} passed  {}{fail}{} failed",
        if fail > 0 { RED } else { DIM },
        RESET
    );
    cprintln!();
}

fn check_config(pass: &mut u32, fail: &mut u32) -> ObservationsModuleConfig {
    let path = config::config_path();
    match config::load() {
        Ok(cfg) => {
            if path.exists() {
                ok(&format!("config loaded ({})", path.display()), pass);
            } else {
                warn(&format!(
                    "no config at {} — using defaults",
                    path.display()
                ));
            }
            if cfg.observers.is_empty() {
                warn("no observers configured");
            } else {
                ok(&format!("{} observer(s) configured", cfg.observers.len()), pass);
            }
            if cfg.execution.max_concurrent == 0 {
                err("execution.max_concurrent is 0 — no observer can ever run", fail);
            }
            cfg
        }
        Err(e) => {
            err(&format!("config at {} failed to parse: {e}", path.display()), fail);
            ObservationsModuleConfig::empty()
        }
    }
}

fn check_observers(cfg: &ObservationsModuleConfig, pass: &mut u32, fail: &mut u32) {
    if cfg.observers.is_empty() {
        return;
    }
    let bundles: HashMap<String, PathBuf> = HashMap::new();
    let base_path = PathBuf::from(".");
    for reference in &cfg.observers {
        if !reference.enabled {
            warn(&format!("observer '{}' is disabled", reference.observer));
            continue;
        }
        match loader::load_observer(&reference.observer, &bundles, &base_path) {
            Ok(loaded) => ok(&format!("observer '{}' loads ({})", reference.observer, loaded.model), pass),
            Err(e) => err(&format!("observer '{}' failed to load: {e}", reference.observer), fail),
        }
    }
}

async fn check_store(pass: &mut u32, fail: &mut u32) {
    let path = crate::models::observers_path("observations.jsonl");
    let store = crate::store::LocalObservationStore::new(path.clone());
    match store.list(&crate::store::ObservationFilter::default()).await {
        Ok(observations) => ok(
            &format!("local store readable ({} observation(s) at {})", observations.len(), path.display()),
            pass,
        ),
        Err(e) => err(&format!("local store at {} unreadable: {e}", path.display()), fail),
    }
}
