use crate::config::ExecutorConfig;
use aurix_core::{FailureKind, Outcome, OutcomeMetadata, Task, WorkerRegistry};
use chrono::{DateTime, Utc};
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;

/// One finished execution, as kept in the executor history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub worker: String,
    pub task: Task,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate view over the executor history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: usize,
    /// Percentage of successful executions, 0 when the history is empty.
    pub success_rate: f64,
    pub average_execution_time_ms: f64,
    pub worker_usage: HashMap<String, usize>,
}

struct ExecutorState {
    in_flight: HashMap<String, SharedOutcome>,
    history: VecDeque<ExecutionRecord>,
}

/// Runs tasks against workers, coalescing identical in-flight requests.
///
/// Cloning is cheap and every clone shares the same in-flight table and
/// history. A run is spawned onto the runtime, so it completes and is
/// recorded even when every caller stops waiting for it.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<WorkerRegistry>,
    config: ExecutorConfig,
    state: Arc<Mutex<ExecutorState>>,
}

impl Executor {
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self::with_config(registry, ExecutorConfig::default())
    }

    pub fn with_config(registry: Arc<WorkerRegistry>, config: ExecutorConfig) -> Self {
        Self {
            registry,
            config,
            state: Arc::new(Mutex::new(ExecutorState {
                in_flight: HashMap::new(),
                history: VecDeque::new(),
            })),
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Run `task` on `worker` and return its outcome.
    ///
    /// If a run with the same worker, kind and config is already in flight,
    /// this waits for that run instead of starting another one. Never fails:
    /// every problem is reported through the returned [`Outcome`].
    pub async fn execute(&self, worker: &str, task: Task) -> Outcome {
        self.start(worker, task).await
    }

    /// Run every pair concurrently. Results are in input order.
    pub async fn execute_batch(&self, jobs: Vec<(String, Task)>) -> Vec<Outcome> {
        let runs: Vec<SharedOutcome> = jobs
            .into_iter()
            .map(|(worker, task)| self.start(&worker, task))
            .collect();
        join_all(runs).await
    }

    /// Run pairs in chunks of `limit`, one chunk after another.
    pub async fn execute_parallel(&self, jobs: Vec<(String, Task)>, limit: usize) -> Vec<Outcome> {
        let limit = limit.max(1);
        let mut results = Vec::with_capacity(jobs.len());
        for chunk in jobs.chunks(limit) {
            results.extend(self.execute_batch(chunk.to_vec()).await);
        }
        results
    }

    /// Join the in-flight run for this signature, or spawn a new one.
    fn start(&self, worker: &str, task: Task) -> SharedOutcome {
        let signature = task.signature(worker);
        let mut state = self.state.lock();

        if let Some(existing) = state.in_flight.get(&signature) {
            debug!(worker = %worker, kind = %task.kind, "Joining in-flight execution");
            return existing.clone();
        }

        let worker_name = worker.to_string();
        let handle = tokio::spawn(self.clone().run(worker_name.clone(), task, signature.clone()));
        let shared = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Outcome::failure(
                    FailureKind::ExecutionFault,
                    format!("execution of worker '{worker_name}' was aborted: {e}"),
                )
                .with_metadata(metadata(&worker_name, 0)),
            }
        }
        .boxed()
        .shared();

        state.in_flight.insert(signature, shared.clone());
        shared
    }

    async fn run(self, worker: String, task: Task, signature: String) -> Outcome {
        let mut slot = InFlightSlot {
            state: Arc::clone(&self.state),
            signature: Some(signature),
        };
        let outcome = self.perform(&worker, task.clone()).await;

        let mut state = self.state.lock();
        slot.release(&mut state);
        state.history.push_back(ExecutionRecord {
            worker,
            task,
            outcome: outcome.clone(),
            timestamp: Utc::now(),
        });
        while state.history.len() > self.config.history_capacity {
            state.history.pop_front();
        }

        outcome
    }

    async fn perform(&self, worker: &str, task: Task) -> Outcome {
        let Some(handle) = self.registry.get(worker) else {
            warn!(worker = %worker, kind = %task.kind, "Worker not found");
            return Outcome::failure(
                FailureKind::WorkerNotFound,
                format!("worker '{worker}' not found"),
            )
            .with_metadata(metadata(worker, 0));
        };

        let accepted = std::panic::catch_unwind(AssertUnwindSafe(|| handle.validate(&task)));
        let accepted = match accepted {
            Ok(accepted) => accepted,
            Err(payload) => {
                let message = panic_message(&*payload);
                warn!(worker = %worker, kind = %task.kind, error = %message, "Validation panicked");
                return Outcome::failure(FailureKind::ExecutionFault, message)
                    .with_metadata(metadata(worker, 0));
            }
        };
        if !accepted {
            warn!(worker = %worker, kind = %task.kind, "Task validation failed");
            return Outcome::failure(
                FailureKind::ValidationFailed,
                format!("task validation failed for worker '{worker}'"),
            )
            .with_metadata(metadata(worker, 0));
        }

        let kind = task.kind.clone();
        let start = Instant::now();
        let result = AssertUnwindSafe(handle.execute(task)).catch_unwind().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(Ok(mut outcome)) => {
                if !outcome.success && outcome.failure.is_none() {
                    outcome.failure = Some(FailureKind::Rejected);
                }
                if !outcome.success && outcome.error.is_none() {
                    outcome.error = Some(format!("worker '{worker}' reported failure"));
                }
                outcome
            }
            Ok(Err(e)) => Outcome::failure(FailureKind::ExecutionFault, e.to_string()),
            Err(payload) => Outcome::failure(FailureKind::ExecutionFault, panic_message(&*payload)),
        };

        if outcome.success {
            info!(worker = %worker, kind = %kind, duration_ms = elapsed_ms, "Execution completed");
        } else {
            warn!(
                worker = %worker,
                kind = %kind,
                duration_ms = elapsed_ms,
                error = outcome.error.as_deref().unwrap_or_default(),
                "Execution failed"
            );
        }

        outcome.with_metadata(metadata(worker, elapsed_ms))
    }

    /// Statistics derived from the current history.
    pub fn stats(&self) -> ExecutionStats {
        let state = self.state.lock();
        let total = state.history.len();
        if total == 0 {
            return ExecutionStats::default();
        }

        let successful = state.history.iter().filter(|r| r.outcome.success).count();
        let total_time: u64 = state
            .history
            .iter()
            .map(|r| r.outcome.execution_time_ms())
            .sum();

        let mut worker_usage = HashMap::new();
        for record in &state.history {
            *worker_usage.entry(record.worker.clone()).or_insert(0) += 1;
        }

        ExecutionStats {
            total_executions: total,
            success_rate: successful as f64 * 100.0 / total as f64,
            average_execution_time_ms: total_time as f64 / total as f64,
            worker_usage,
        }
    }

    /// The `limit` most recent executions, newest first.
    pub fn history(&self, limit: usize) -> Vec<ExecutionRecord> {
        let state = self.state.lock();
        state.history.iter().rev().take(limit).cloned().collect()
    }

    /// Number of distinct runs currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn is_worker_available(&self, name: &str) -> bool {
        self.registry.has(name)
    }

    pub fn list_workers(&self) -> Vec<String> {
        self.registry.list()
    }
}

/// In-flight entry owned by a spawned run.
///
/// Released explicitly on completion, or on drop if the run unwinds.
struct InFlightSlot {
    state: Arc<Mutex<ExecutorState>>,
    signature: Option<String>,
}

impl InFlightSlot {
    fn release(&mut self, state: &mut ExecutorState) {
        if let Some(signature) = self.signature.take() {
            state.in_flight.remove(&signature);
        }
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        if let Some(signature) = self.signature.take() {
            self.state.lock().in_flight.remove(&signature);
        }
    }
}

fn metadata(worker: &str, execution_time_ms: u64) -> OutcomeMetadata {
    OutcomeMetadata {
        worker: worker.to_string(),
        execution_time_ms,
        timestamp: Utc::now(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("worker panicked: {msg}")
    } else {
        "worker panicked".to_string()
    }
}
