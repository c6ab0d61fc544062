//! End-to-end scenarios against a real `LocalObservationStore` and scripted
//! fake providers, exercising the orchestrator exactly the way a host would
//! drive it across several hook events. Binary-crate integration test, so
//! the relevant modules are pulled in by path rather than via a lib target
//! (the teacher's crate ships no `src/lib.rs` either).

#[path = "../src/models.rs"]
mod models;
#[path = "../src/fingerprint.rs"]
mod fingerprint;
#[path = "../src/collector.rs"]
mod collector;
#[path = "../src/parser.rs"]
mod parser;
#[path = "../src/dedup.rs"]
mod dedup;
#[path = "../src/provider/mod.rs"]
mod provider;
#[path = "../src/runner.rs"]
mod runner;
#[path = "../src/scheduler.rs"]
mod scheduler;
#[path = "../src/store/mod.rs"]
mod store;
#[path = "../src/loader.rs"]
mod loader;
#[path = "../src/orchestrator.rs"]
mod orchestrator;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use models::{ObservationsModuleConfig, ObserverReference, Status, WatchSpec, WatchType};
use orchestrator::Orchestrator;
use provider::{ChatRequest, ChatResponse, LlmProvider};
use store::{LocalObservationStore, ObservationFilter, ObservationStore};

/// Routes a canned response (and optional delay) by matching a substring
/// against the system prompt an observer was given — the `full_instruction`
/// text embeds the observer's own name, so distinct observers in a batch
/// get distinct scripted behavior.
struct RoutingProvider {
    routes: Vec<(&'static str, Duration, String)>,
    calls: AtomicUsize,
}

impl RoutingProvider {
    fn new(routes: Vec<(&'static str, Duration, &str)>) -> Self {
        RoutingProvider {
            routes: routes
                .into_iter()
                .map(|(needle, delay, resp)| (needle, delay, resp.to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for RoutingProvider {
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let system = request.system.unwrap_or_default();
        for (needle, delay, response) in &self.routes {
            if system.contains(needle) {
                tokio::time::sleep(*delay).await;
                return Ok(ChatResponse {
                    text: response.clone(),
                });
            }
        }
        Ok(ChatResponse {
            text: r#"{"observations": [], "resolved": []}"#.to_string(),
        })
    }
}

/// A single fixed response queue, used where only one observer is in play.
struct QueuedProvider {
    queue: AsyncMutex<std::collections::VecDeque<String>>,
    calls: AtomicUsize,
}

impl QueuedProvider {
    fn new(responses: Vec<&str>) -> Self {
        QueuedProvider {
            queue: AsyncMutex::new(responses.into_iter().map(str::to_string).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for QueuedProvider {
    async fn complete(&self, _request: ChatRequest) -> anyhow::Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.queue.lock().await;
        let text = queue
            .pop_front()
            .unwrap_or_else(|| r#"{"observations": [], "resolved": []}"#.to_string());
        Ok(ChatResponse { text })
    }
}

fn sec_config(pattern: String) -> ObservationsModuleConfig {
    ObservationsModuleConfig {
        observers: vec![ObserverReference {
            observer: "Sec".to_string(),
            watch: vec![WatchSpec {
                watch_type: WatchType::Files,
                paths: vec![pattern],
                include_tool_calls: true,
                include_reasoning: false,
            }],
            model: Some("m".to_string()),
            timeout: Some(5),
            enabled: true,
        }],
        execution: models::ExecutionConfig {
            max_concurrent: 2,
            ..models::ExecutionConfig::default()
        },
        ..ObservationsModuleConfig::empty()
    }
}

/// S1 — first run against a changed file produces exactly one observation,
/// keyed the way spec.md's literal scenario names, and advances the
/// fingerprint (S2 depends on that advance happening).
#[tokio::test]
async fn s1_first_run_produces_observations() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/a.py"), "eval(x)\n").unwrap();
    let pattern = dir.path().join("src/a.py").to_string_lossy().to_string();

    let store_path = dir.path().join("observations.jsonl");
    let store: Arc<dyn ObservationStore> = Arc::new(LocalObservationStore::new(store_path));
    let provider = Arc::new(QueuedProvider::new(vec![r#"```json
{"observations":[{"content":"eval of user input","severity":"critical","source_ref":"src/a.py:1","metadata":{"category":"security"}}],"resolved":[]}
```"#]));

    let mut orchestrator = Orchestrator::new(sec_config(pattern), store.clone(), provider.clone(), None);
    let summary = orchestrator.on_event(&[]).await.unwrap();

    assert_eq!(summary.new_observations.len(), 1);
    let key = dedup::observation_key(&summary.new_observations[0]);
    assert_eq!(key, "Sec:file:src/a.py:1:critical");
    assert_eq!(provider.call_count(), 1);

    let stored = store.list(&ObservationFilter::default()).await.unwrap();
    assert_eq!(stored.len(), 1);
}

/// S2 — repeating the exact same event with no file changes skips the
/// observer entirely: no provider call, no store write.
#[tokio::test]
async fn s2_no_change_skips_the_run() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/a.py"), "eval(x)\n").unwrap();
    let pattern = dir.path().join("src/a.py").to_string_lossy().to_string();

    let store_path = dir.path().join("observations.jsonl");
    let store: Arc<dyn ObservationStore> = Arc::new(LocalObservationStore::new(store_path));
    let provider = Arc::new(QueuedProvider::new(vec![
        r#"{"observations":[{"content":"eval of user input","severity":"critical","source_ref":"src/a.py:1","metadata":{"category":"security"}}],"resolved":[]}"#,
    ]));

    let mut orchestrator = Orchestrator::new(sec_config(pattern), store.clone(), provider.clone(), None);
    let first = orchestrator.on_event(&[]).await.unwrap();
    assert_eq!(first.new_observations.len(), 1);
    assert_eq!(provider.call_count(), 1);

    let second = orchestrator.on_event(&[]).await.unwrap();
    assert!(second.new_observations.is_empty());
    assert_eq!(second.skipped_unchanged, vec!["Sec".to_string()]);
    assert_eq!(provider.call_count(), 1, "unchanged state must not re-invoke the observer");
}

/// S3 — an mtime-only change (content-equivalent) re-triggers the provider
/// call, but the pre-write dedup drops the duplicate finding so nothing new
/// lands in the store; the fingerprint still advances.
#[tokio::test]
async fn s3_dedup_drops_a_content_equivalent_rerun() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    let file_path = dir.path().join("src/a.py");
    std::fs::write(&file_path, "eval(x)\n").unwrap();
    let pattern = file_path.to_string_lossy().to_string();

    let store_path = dir.path().join("observations.jsonl");
    let store: Arc<dyn ObservationStore> = Arc::new(LocalObservationStore::new(store_path));
    let response = r#"{"observations":[{"content":"eval of user input","severity":"critical","source_ref":"src/a.py:1","metadata":{"category":"security"}}],"resolved":[]}"#;
    let provider = Arc::new(QueuedProvider::new(vec![response, response]));

    let mut orchestrator = Orchestrator::new(sec_config(pattern), store.clone(), provider.clone(), None);
    let first = orchestrator.on_event(&[]).await.unwrap();
    assert_eq!(first.new_observations.len(), 1);

    std::thread::sleep(Duration::from_millis(10));
    filetime::set_file_mtime(&file_path, filetime::FileTime::now()).unwrap();

    let second = orchestrator.on_event(&[]).await.unwrap();
    assert_eq!(provider.call_count(), 2, "changed mtime must re-invoke the observer");
    assert!(second.new_observations.is_empty(), "dedup must drop the content-equivalent duplicate");
    assert!(second.triggered.contains(&"Sec".to_string()));

    let stored = store.list(&ObservationFilter::default()).await.unwrap();
    assert_eq!(stored.len(), 1);
}

/// S4 — a later run's `resolved` array, naming a previously stored
/// observation's id, marks it resolved with an `"Auto-resolved: "`-prefixed
/// note.
#[tokio::test]
async fn s4_resolution_via_resolved_array() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    let file_path = dir.path().join("src/a.py");
    std::fs::write(&file_path, "eval(x)\n").unwrap();
    let pattern = file_path.to_string_lossy().to_string();

    let store_path = dir.path().join("observations.jsonl");
    let store: Arc<dyn ObservationStore> = Arc::new(LocalObservationStore::new(store_path));
    let first_response = r#"{"observations":[{"content":"eval of user input","severity":"critical","source_ref":"src/a.py:1","metadata":{"category":"security"}}],"resolved":[]}"#;
    let provider = Arc::new(QueuedProvider::new(vec![first_response, "__placeholder__"]));

    let mut orchestrator = Orchestrator::new(sec_config(pattern), store.clone(), provider.clone(), None);
    let first = orchestrator.on_event(&[]).await.unwrap();
    let prev_id = first.new_observations[0].id;

    std::thread::sleep(Duration::from_millis(10));
    filetime::set_file_mtime(&file_path, filetime::FileTime::now()).unwrap();

    let resolved_response = format!(
        r#"{{"observations":[],"resolved":[{{"id":"{prev_id}","reason":"replaced with ast.literal_eval"}}]}}"#
    );
    *provider.queue.lock().await = std::collections::VecDeque::from(vec![resolved_response]);

    let second = orchestrator.on_event(&[]).await.unwrap();
    assert_eq!(second.resolved.len(), 1);
    assert_eq!(second.resolved[0].0, prev_id.to_string());

    let stored = store.get(prev_id).await.unwrap().unwrap();
    assert_eq!(stored.status, Status::Resolved);
    assert!(stored
        .resolution_note
        .as_deref()
        .unwrap()
        .starts_with("Auto-resolved: "));
}

/// S5 — of two observers in one batch, one times out under `on_timeout ==
/// "skip"` and one succeeds. A skip-policy timeout is a normal empty
/// result, not a failure (spec.md §4.3/§7): the timed-out observer's
/// fingerprint still advances and it still counts as triggered, while the
/// successful observer's finding is persisted, with no panic/abort
/// propagating out.
#[tokio::test]
async fn s5_partial_failure_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();
    std::fs::write(dir.path().join("b.txt"), "b").unwrap();

    let store_path = dir.path().join("observations.jsonl");
    let store: Arc<dyn ObservationStore> = Arc::new(LocalObservationStore::new(store_path));

    let provider = Arc::new(RoutingProvider::new(vec![
        ("ObserverA", Duration::from_secs(2), "irrelevant, times out first"),
        (
            "ObserverB",
            Duration::from_millis(1),
            r#"{"observations":[{"content":"finding from B","severity":"medium"}],"resolved":[]}"#,
        ),
    ]));

    let config = ObservationsModuleConfig {
        observers: vec![
            ObserverReference {
                observer: "ObserverA".to_string(),
                watch: vec![WatchSpec {
                    watch_type: WatchType::Files,
                    paths: vec![dir.path().join("a.txt").to_string_lossy().to_string()],
                    include_tool_calls: true,
                    include_reasoning: false,
                }],
                model: None,
                timeout: Some(1),
                enabled: true,
            },
            ObserverReference {
                observer: "ObserverB".to_string(),
                watch: vec![WatchSpec {
                    watch_type: WatchType::Files,
                    paths: vec![dir.path().join("b.txt").to_string_lossy().to_string()],
                    include_tool_calls: true,
                    include_reasoning: false,
                }],
                model: None,
                timeout: Some(5),
                enabled: true,
            },
        ],
        execution: models::ExecutionConfig {
            max_concurrent: 2,
            on_timeout: "skip".to_string(),
            ..models::ExecutionConfig::default()
        },
        ..ObservationsModuleConfig::empty()
    };

    let mut orchestrator = Orchestrator::new(config, store.clone(), provider, None);
    let summary = orchestrator.on_event(&[]).await.unwrap();

    assert!(!summary.global_timeout);
    assert!(summary.aborted.is_none());
    assert_eq!(summary.new_observations.len(), 1);
    assert_eq!(summary.new_observations[0].content, "finding from B");
    assert!(summary.failures.is_empty());
    assert!(summary.triggered.contains(&"ObserverA".to_string()));
    assert!(summary.triggered.contains(&"ObserverB".to_string()));
}

/// S5b — the same two-observer race, but with `on_timeout == "fail"`: the
/// timing-out observer's error must rethrow and abort the whole batch, so
/// neither observer's finding is persisted and no fingerprint advances.
#[tokio::test]
async fn s5b_fail_policy_timeout_aborts_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();
    std::fs::write(dir.path().join("b.txt"), "b").unwrap();

    let store_path = dir.path().join("observations.jsonl");
    let store: Arc<dyn ObservationStore> = Arc::new(LocalObservationStore::new(store_path));

    let provider = Arc::new(RoutingProvider::new(vec![
        ("ObserverA", Duration::from_secs(2), "irrelevant, times out first"),
        (
            "ObserverB",
            Duration::from_millis(1),
            r#"{"observations":[{"content":"finding from B","severity":"medium"}],"resolved":[]}"#,
        ),
    ]));

    let config = ObservationsModuleConfig {
        observers: vec![
            ObserverReference {
                observer: "ObserverA".to_string(),
                watch: vec![WatchSpec {
                    watch_type: WatchType::Files,
                    paths: vec![dir.path().join("a.txt").to_string_lossy().to_string()],
                    include_tool_calls: true,
                    include_reasoning: false,
                }],
                model: None,
                timeout: Some(1),
                enabled: true,
            },
            ObserverReference {
                observer: "ObserverB".to_string(),
                watch: vec![WatchSpec {
                    watch_type: WatchType::Files,
                    paths: vec![dir.path().join("b.txt").to_string_lossy().to_string()],
                    include_tool_calls: true,
                    include_reasoning: false,
                }],
                model: None,
                timeout: Some(5),
                enabled: true,
            },
        ],
        execution: models::ExecutionConfig {
            max_concurrent: 2,
            on_timeout: "fail".to_string(),
            ..models::ExecutionConfig::default()
        },
        ..ObservationsModuleConfig::empty()
    };

    let mut orchestrator = Orchestrator::new(config, store.clone(), provider, None);
    let summary = orchestrator.on_event(&[]).await.unwrap();

    assert!(!summary.global_timeout);
    assert!(summary.aborted.is_some());
    assert!(summary.new_observations.is_empty());
    assert!(summary.failures.is_empty());
    assert!(summary.triggered.is_empty());

    let stored = store.list(&ObservationFilter::default()).await.unwrap();
    assert!(stored.is_empty());
}

/// S6 — the injected next-turn summary names the exact open count, a
/// per-severity breakdown, and a per-observer section, for two open
/// observations (one high, one low) from one observer.
#[tokio::test]
async fn s6_injection_summary_shape() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("observations.jsonl");
    let store: Arc<dyn ObservationStore> = Arc::new(LocalObservationStore::new(store_path));

    store
        .write_new(vec![
            models::Observation::create(
                "X",
                models::Severity::High,
                "high severity finding",
                None,
                models::SourceType::Unknown,
                serde_json::json!({}),
            ),
            models::Observation::create(
                "X",
                models::Severity::Low,
                "low severity finding",
                None,
                models::SourceType::Unknown,
                serde_json::json!({"category": "distinct"}),
            ),
        ])
        .await
        .unwrap();

    let provider = Arc::new(QueuedProvider::new(vec![]));
    let orchestrator = Orchestrator::new(ObservationsModuleConfig::empty(), store, provider, None);

    let injected = orchestrator.on_next_turn().await.unwrap().unwrap();
    assert!(injected.contains("Active Observations: 2 open"));
    assert!(injected.contains("high: 1"));
    assert!(injected.contains("low: 1"));
    assert!(injected.contains("**X** (2 observations):"));
}
