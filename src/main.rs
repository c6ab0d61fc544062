mod cli;
mod collector;
mod config;
mod dedup;
mod doctor;
mod fingerprint;
mod fmt;
mod loader;
mod models;
mod orchestrator;
mod parser;
mod provider;
mod runner;
mod scheduler;
mod store;

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use uuid::Uuid;

use models::{ConversationMessage, Observation};
use orchestrator::Orchestrator;
use provider::{HttpLlmProvider, HttpSpawnCapability, LlmProvider, SpawnCapability};
use store::{HttpObservationStore, LocalObservationStore, ObservationStore};

/// The hook payload a host shells out with: the conversation transcript so
/// far. Matches spec.md §6's event shape — just `{"messages": [...]}`, no
/// envelope beyond that.
#[derive(Deserialize, Debug, Default)]
struct HookEvent {
    #[serde(default)]
    messages: Vec<ConversationMessage>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();

    if raw_args.iter().any(|a| a == "--no-color") {
        fmt::disable_color();
    }
    let args: Vec<String> = raw_args.into_iter().filter(|a| a != "--no-color").collect();

    if args.iter().any(|a| a == "--help" || a == "-h")
        || args.first().map(|s| s.as_str()) == Some("help")
    {
        cli::print_help();
        return Ok(());
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("observers {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    match args.first().map(|s| s.as_str()) {
        Some("run-once") => return run_once(&args[1..]).await,
        Some("watch") => return watch().await,
        Some("list") => return list(&args[1..]).await,
        Some("resolve") => return resolve(&args[1..], true).await,
        Some("ack") => return resolve(&args[1..], false).await,
        Some("doctor") => {
            doctor::run().await;
            return Ok(());
        }
        Some("init") => return init(),
        Some(other) => {
            eprintln!("observers: unknown command '{other}'\n");
            eprintln!("Run 'observers help' for usage.");
            std::process::exit(1);
        }
        None => {}
    }

    if atty::is(atty::Stream::Stdin) {
        eprintln!("observers: no subcommand given and stdin is a terminal.");
        eprintln!("Did you mean 'observers help'?");
        std::process::exit(1);
    }

    let event = read_event_from_stdin()?;
    let mut orchestrator = build_orchestrator().await?;
    let summary = orchestrator.on_event(&event.messages).await?;
    let next_turn = orchestrator.on_next_turn().await?;
    print_summary_json(&summary, next_turn.as_deref());
    Ok(())
}

async fn build_orchestrator() -> Result<Orchestrator> {
    let cfg = config::load()?;
    let store: Arc<dyn ObservationStore> = match std::env::var("OBSERVERS_STORE_URL") {
        Ok(url) => Arc::new(HttpObservationStore::new(url)),
        Err(_) => Arc::new(LocalObservationStore::new(models::observers_path(
            "observations.jsonl",
        ))),
    };
    let provider: Arc<dyn LlmProvider> = match std::env::var("OBSERVERS_LLM_URL") {
        Ok(url) => Arc::new(HttpLlmProvider::new(url)),
        Err(_) => Arc::new(HttpLlmProvider::new("http://localhost:8999")),
    };
    let spawn: Option<Arc<dyn SpawnCapability>> = std::env::var("OBSERVERS_SPAWN_URL")
        .ok()
        .map(|url| Arc::new(HttpSpawnCapability::new(url)) as Arc<dyn SpawnCapability>);

    Ok(orchestrator::mount(cfg, store, provider, spawn))
}

fn read_event_from_stdin() -> Result<HookEvent> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("reading hook event from stdin")?;
    if buf.trim().is_empty() {
        return Ok(HookEvent::default());
    }
    serde_json::from_str(&buf).context("parsing hook event JSON from stdin")
}

async fn run_once(args: &[String]) -> Result<()> {
    let event = match cli::get_flag(args, "--event") {
        Some(ref path) if path == "-" => read_event_from_stdin()?,
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading event file {path}"))?;
            serde_json::from_str(&content).context("parsing event file JSON")?
        }
        None => HookEvent::default(),
    };

    let mut orchestrator = build_orchestrator().await?;
    let summary = orchestrator.on_event(&event.messages).await?;
    let next_turn = orchestrator.on_next_turn().await?;
    print_summary_json(&summary, next_turn.as_deref());
    Ok(())
}

fn print_summary_json(summary: &orchestrator::RunSummary, next_turn: Option<&str>) {
    let body = serde_json::json!({
        "triggered": summary.triggered,
        "skipped_unchanged": summary.skipped_unchanged,
        "new_observations": summary.new_observations,
        "resolved": summary.resolved,
        "failures": summary.failures,
        "global_timeout": summary.global_timeout,
        "aborted": summary.aborted,
        "next_turn_injection": next_turn,
    });
    println!("{}", serde_json::to_string(&body).unwrap_or_default());
}

async fn watch() -> Result<()> {
    let path = models::observers_path("observations.jsonl");
    eprintln!("[observers] watching {}", path.display());
    let store = LocalObservationStore::new(path);
    let mut seen: std::collections::HashSet<Uuid> = std::collections::HashSet::new();

    loop {
        let observations = store.list(&store::ObservationFilter::default()).await?;
        for obs in &observations {
            if seen.insert(obs.id) {
                print_observation_line(obs);
            }
        }
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    }
}

async fn list(args: &[String]) -> Result<()> {
    let filter = cli::parse_list_args(args)?;
    let path = models::observers_path("observations.jsonl");
    let store = LocalObservationStore::new(path);
    let observations = store.list(&filter).await?;

    if observations.is_empty() {
        println!("no observations match that filter");
        return Ok(());
    }
    for obs in &observations {
        print_observation_line(obs);
    }
    println!("\n{} observation(s)", observations.len());
    Ok(())
}

fn print_observation_line(obs: &Observation) {
    use fmt::{cprintln, DIM, RED, RESET};
    let severity_color = match obs.severity {
        models::Severity::Critical | models::Severity::High => RED,
        _ => DIM,
    };
    cprintln!(
        "{severity_color}[{:?}]{RESET} {} — {} ({:?}){}",
        obs.severity,
        obs.observer,
        obs.content,
        obs.status,
        obs.source_ref
            .as_deref()
            .map(|r| format!(" [{r}]"))
            .unwrap_or_default()
    );
    cprintln!("{DIM}  id: {}{RESET}", obs.id);
}

async fn resolve(args: &[String], mark_resolved: bool) -> Result<()> {
    let Some(id_str) = args.first() else {
        eprintln!(
            "observers: '{}' requires an observation id",
            if mark_resolved { "resolve" } else { "ack" }
        );
        std::process::exit(1);
    };
    let id = Uuid::parse_str(id_str).with_context(|| format!("'{id_str}' is not a valid id"))?;
    let note = cli::get_flag(args, "--note");

    let path = models::observers_path("observations.jsonl");
    let store = LocalObservationStore::new(path);
    let Some(mut observation) = store.get(id).await? else {
        eprintln!("observers: no observation with id {id}");
        std::process::exit(1);
    };

    if mark_resolved {
        observation.resolve(note);
        println!("resolved {id}");
    } else {
        observation.acknowledge();
        println!("acknowledged {id}");
    }
    store.update(observation).await
}

fn init() -> Result<()> {
    let dir = models::observers_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let config_path = dir.join("config.json");
    if config_path.exists() {
        println!("{} already exists, leaving it alone", config_path.display());
    } else {
        let default_config = models::ObservationsModuleConfig {
            observers: vec![models::ObserverReference {
                observer: "example-style-observer.md".to_string(),
                watch: vec![models::WatchSpec {
                    watch_type: models::WatchType::Files,
                    paths: vec!["**/*.rs".to_string()],
                    include_tool_calls: true,
                    include_reasoning: false,
                }],
                model: None,
                timeout: None,
                enabled: true,
            }],
            ..models::ObservationsModuleConfig::empty()
        };
        let json = serde_json::to_string_pretty(&default_config)?;
        std::fs::write(&config_path, json)
            .with_context(|| format!("writing {}", config_path.display()))?;
        println!("wrote {}", config_path.display());
    }

    let observer_path = dir.join("example-style-observer.md");
    if observer_path.exists() {
        println!("{} already exists, leaving it alone", observer_path.display());
    } else {
        let template = "---\n\
name: example-style-observer\n\
description: Flags obvious style issues in changed Rust files\n\
model: claude-3-5-haiku-latest\n\
timeout: 30\n\
---\n\
Review the content under review for obvious style issues: \
unused imports, inconsistent naming, missing error handling. \
Previously reported issues:\n\
{{existing_observations}}\n\
\n\
If an issue above no longer applies, include its id in `resolved`.\n";
        std::fs::write(&observer_path, template)
            .with_context(|| format!("writing {}", observer_path.display()))?;
        println!("wrote {}", observer_path.display());
    }

    Ok(())
}
