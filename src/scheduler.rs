//! Bounded-parallel fan-out across a batch of observers: a counting
//! semaphore caps concurrency, a per-observer timeout wraps each task, and
//! a global deadline bounds the whole batch. One observer's failure or
//! timeout never aborts its siblings — it becomes a sentinel result. If the
//! global deadline elapses before the whole batch finishes, the batch
//! yields nothing at all (spec.md §4.6/§7: "collect no partial results").

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::dedup::ResolvedRef;
use crate::models::{Observation, ObserverBinding, SourceType};
use crate::runner::{self, ObserverRunner, TimeoutOutcome};

pub struct ScheduledTask {
    pub binding: ObserverBinding,
    pub content: String,
    pub existing_summary: String,
    pub default_source_type: SourceType,
    pub timeout: Duration,
    /// `execution.on_timeout` ("skip" | "fail"), carried per-task so each
    /// observer's timeout is handled under the run's configured policy.
    pub on_timeout: String,
}

/// Per-task outcome: either the observations/resolutions it produced, or a
/// label describing why it produced none (ordinary invocation error — a
/// "skip"-policy timeout is folded into an empty `Observations`, not this).
pub enum TaskOutcome {
    Observations(Vec<Observation>, Vec<ResolvedRef>),
    Failed { observer: String, reason: String },
}

/// Whether a spawned task produced an ordinary outcome, or hit a
/// "fail"-policy timeout that must abort the whole batch.
enum SpawnResult {
    Outcome(TaskOutcome),
    Abort(String),
}

/// What a batch run resolved to.
pub enum BatchOutcome {
    /// Every task finished (with its own success/failure) before the
    /// global deadline.
    Completed(Vec<TaskOutcome>),
    /// The global deadline elapsed before every task finished — the whole
    /// batch is discarded, not just the stragglers (spec.md §4.6/§7).
    GlobalTimeout,
    /// A task timed out under `on_timeout == "fail"` and rethrew — the
    /// batch-wide handler discards everything from this run (spec.md
    /// §4.3/§7 `per_observer_timeout`).
    Aborted(String),
}

pub struct Scheduler {
    pub max_concurrent: usize,
    pub global_timeout: Duration,
}

impl Scheduler {
    /// Runs every task in `batch`, honoring `max_concurrent` and the
    /// per-task timeout already carried on each `ScheduledTask`.
    pub async fn run_batch(&self, runner: Arc<ObserverRunner>, batch: Vec<ScheduledTask>) -> BatchOutcome {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent.max(1)));
        let mut set = JoinSet::new();
        let expected = batch.len();

        for task in batch {
            let semaphore = semaphore.clone();
            let runner = runner.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                let observer = task.binding.name().to_string();
                match runner::run_with_timeout(
                    &runner,
                    &task.binding,
                    &task.content,
                    &task.existing_summary,
                    task.default_source_type,
                    task.timeout,
                    &task.on_timeout,
                )
                .await
                {
                    TimeoutOutcome::Completed(Ok((observations, resolved))) => {
                        SpawnResult::Outcome(TaskOutcome::Observations(observations, resolved))
                    }
                    TimeoutOutcome::Completed(Err(e)) => SpawnResult::Outcome(TaskOutcome::Failed {
                        observer,
                        reason: e.to_string(),
                    }),
                    TimeoutOutcome::SkippedTimeout => {
                        SpawnResult::Outcome(TaskOutcome::Observations(Vec::new(), Vec::new()))
                    }
                    TimeoutOutcome::FailedTimeout(message) => SpawnResult::Abort(message),
                }
            });
        }

        let mut results = Vec::with_capacity(expected);
        let deadline = tokio::time::sleep(self.global_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = set.join_next() => {
                    match joined {
                        Some(Ok(SpawnResult::Outcome(outcome))) => results.push(outcome),
                        Some(Ok(SpawnResult::Abort(reason))) => {
                            set.abort_all();
                            return BatchOutcome::Aborted(reason);
                        }
                        Some(Err(e)) => results.push(TaskOutcome::Failed {
                            observer: "unknown".to_string(),
                            reason: format!("task panicked: {e}"),
                        }),
                        None => return BatchOutcome::Completed(results),
                    }
                }
                _ = &mut deadline => {
                    set.abort_all();
                    return BatchOutcome::GlobalTimeout;
                }
            }
        }
    }
}
