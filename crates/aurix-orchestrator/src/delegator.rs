use crate::config::DelegatorConfig;
use crate::executor::Executor;
use aurix_core::{FailureKind, MemoryStore, Outcome, Priority, Task};
use chrono::{DateTime, Utc};
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Memory-store key under which recent delegations are persisted.
pub const HISTORY_KEY: &str = "delegation_history";

/// From-worker used for the first step of a chain.
pub const CHAIN_ORIGIN: &str = "manager";

type SharedDelegation = Shared<BoxFuture<'static, DelegationOutcome>>;

/// A request to run a task on `to_worker` on behalf of `from_worker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationRequest {
    pub from_worker: String,
    pub to_worker: String,
    pub task: Task,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Per-attempt timeout; the delegator default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Retries after the first attempt; the delegator default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    pub issued_at: DateTime<Utc>,
}

impl DelegationRequest {
    pub fn new(from_worker: impl Into<String>, to_worker: impl Into<String>, task: Task) -> Self {
        Self {
            from_worker: from_worker.into(),
            to_worker: to_worker.into(),
            task,
            priority: None,
            timeout_ms: None,
            max_retries: None,
            issued_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Identity shared by requests with the same route, kind and issue time.
    pub fn identity(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.from_worker,
            self.to_worker,
            self.task.kind,
            self.issued_at.timestamp_micros()
        )
    }

    fn rank(&self) -> u8 {
        self.priority.unwrap_or_default().rank()
    }
}

/// Routing and timing stamped on a finished delegation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationInfo {
    pub from_worker: String,
    pub to_worker: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub retry_count: u32,
    /// Kind of the most recent faulted attempt: `ExecutionFault` or
    /// `DelegationTimeout`. `None` when no attempt faulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureKind>,
}

/// The outcome of a delegation: the final attempt's outcome plus routing info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationOutcome {
    #[serde(flatten)]
    pub outcome: Outcome,
    pub delegation: DelegationInfo,
}

impl DelegationOutcome {
    pub fn success(&self) -> bool {
        self.outcome.success
    }

    pub fn error(&self) -> Option<&str> {
        self.outcome.error.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.delegation.retry_count
    }

    /// Wall-clock span from the first attempt to completion.
    pub fn duration_ms(&self) -> i64 {
        (self.delegation.end_time - self.delegation.start_time).num_milliseconds()
    }
}

/// One stage of [`Delegator::delegate_chain`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    pub worker: String,
    pub task: Task,
}

impl ChainStep {
    pub fn new(worker: impl Into<String>, task: Task) -> Self {
        Self {
            worker: worker.into(),
            task,
        }
    }
}

/// Aggregate view over the delegation history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelegationStats {
    pub total_delegations: usize,
    pub success_rate: f64,
    pub average_time_ms: f64,
    /// Delegation count per `from→to` route.
    pub worker_pairs: HashMap<String, usize>,
    pub active_count: usize,
    pub queue_size: usize,
}

struct DelegatorState {
    active: HashMap<String, SharedDelegation>,
    queue: Vec<(String, DelegationRequest)>,
    history: VecDeque<DelegationOutcome>,
}

/// Adds timeout, retry with exponential backoff, queueing and chaining on
/// top of an [`Executor`].
///
/// Clones share all state.
#[derive(Clone)]
pub struct Delegator {
    executor: Executor,
    memory: Arc<dyn MemoryStore>,
    config: DelegatorConfig,
    state: Arc<Mutex<DelegatorState>>,
}

impl Delegator {
    pub fn new(executor: Executor, memory: Arc<dyn MemoryStore>) -> Self {
        Self::with_config(executor, memory, DelegatorConfig::default())
    }

    pub fn with_config(
        executor: Executor,
        memory: Arc<dyn MemoryStore>,
        config: DelegatorConfig,
    ) -> Self {
        Self {
            executor,
            memory,
            config,
            state: Arc::new(Mutex::new(DelegatorState {
                active: HashMap::new(),
                queue: Vec::new(),
                history: VecDeque::new(),
            })),
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn config(&self) -> &DelegatorConfig {
        &self.config
    }

    /// Run a delegation to completion.
    ///
    /// Concurrent calls with the same [`identity`](DelegationRequest::identity)
    /// share one attempt sequence and observe the same outcome.
    pub async fn delegate(&self, request: DelegationRequest) -> DelegationOutcome {
        self.start(request).await
    }

    /// Run every request concurrently. Results are in input order.
    pub async fn delegate_batch(&self, requests: Vec<DelegationRequest>) -> Vec<DelegationOutcome> {
        let runs: Vec<SharedDelegation> = requests.into_iter().map(|r| self.start(r)).collect();
        join_all(runs).await
    }

    fn start(&self, request: DelegationRequest) -> SharedDelegation {
        let identity = request.identity();
        let mut state = self.state.lock();

        if let Some(existing) = state.active.get(&identity) {
            debug!(delegation = %identity, "Joining in-flight delegation");
            return existing.clone();
        }

        let fallback = (
            request.from_worker.clone(),
            request.to_worker.clone(),
            Utc::now(),
        );
        let handle = tokio::spawn(self.clone().run(identity.clone(), request));
        let shared = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let (from_worker, to_worker, start_time) = fallback;
                    DelegationOutcome {
                        outcome: Outcome::failure(
                            FailureKind::DelegationExhausted,
                            format!("delegation was aborted: {e}"),
                        ),
                        delegation: DelegationInfo {
                            from_worker,
                            to_worker,
                            start_time,
                            end_time: Utc::now(),
                            retry_count: 0,
                            last_failure: None,
                        },
                    }
                }
            }
        }
        .boxed()
        .shared();

        state.active.insert(identity, shared.clone());
        shared
    }

    async fn run(self, identity: String, request: DelegationRequest) -> DelegationOutcome {
        let outcome = self.attempt(&request).await;

        let recent: Vec<DelegationOutcome> = {
            let mut state = self.state.lock();
            state.active.remove(&identity);
            state.history.push_back(outcome.clone());
            while state.history.len() > self.config.history_capacity {
                state.history.pop_front();
            }
            let skip = state
                .history
                .len()
                .saturating_sub(self.config.persisted_history);
            state.history.iter().skip(skip).cloned().collect()
        };

        self.persist(recent).await;
        outcome
    }

    async fn attempt(&self, request: &DelegationRequest) -> DelegationOutcome {
        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.default_timeout());
        let max_retries = request
            .max_retries
            .unwrap_or(self.config.default_max_retries);
        let start_time = Utc::now();
        let mut retry_count = 0;
        let mut last_failure = None;

        info!(
            from = %request.from_worker,
            to = %request.to_worker,
            kind = %request.task.kind,
            "Delegating task"
        );

        loop {
            let execution = self
                .executor
                .execute(&request.to_worker, request.task.clone());
            let fault = match tokio::time::timeout(timeout, execution).await {
                Ok(outcome) if outcome.is_retryable() => {
                    last_failure = outcome.failure;
                    outcome
                        .error
                        .unwrap_or_else(|| "execution fault".to_string())
                }
                Ok(outcome) => {
                    let result =
                        finished(request, outcome, start_time, retry_count, last_failure);
                    info!(
                        from = %request.from_worker,
                        to = %request.to_worker,
                        success = result.success(),
                        retries = retry_count,
                        duration_ms = result.duration_ms(),
                        "Delegation completed"
                    );
                    return result;
                }
                Err(_) => {
                    last_failure = Some(FailureKind::DelegationTimeout);
                    "delegation timeout".to_string()
                }
            };

            if retry_count >= max_retries {
                error!(
                    from = %request.from_worker,
                    to = %request.to_worker,
                    retries = retry_count,
                    error = %fault,
                    "Delegation exhausted its retries"
                );
                let outcome = Outcome::failure(
                    FailureKind::DelegationExhausted,
                    format!("delegation failed after {max_retries} retries: {fault}"),
                );
                return finished(request, outcome, start_time, retry_count, last_failure);
            }

            retry_count += 1;
            let delay = compute_backoff(self.config.backoff_base(), retry_count);
            warn!(
                to = %request.to_worker,
                retry = retry_count,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %fault,
                "Delegation attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn persist(&self, recent: Vec<DelegationOutcome>) {
        let value = serde_json::json!({ "delegations": recent });
        if let Err(e) = self.memory.set_agent_memory(HISTORY_KEY, value, None).await {
            warn!(error = %e, "Failed to persist delegation history");
        }
    }

    /// Queue a request and run one dispatch pass. Returns the request identity.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, request: DelegationRequest) -> String {
        let identity = self.push_queued(request);
        self.process_queue();
        identity
    }

    /// Queue several requests, then run a single dispatch pass over them.
    pub fn enqueue_all(&self, requests: Vec<DelegationRequest>) -> Vec<String> {
        let identities = requests.into_iter().map(|r| self.push_queued(r)).collect();
        self.process_queue();
        identities
    }

    fn push_queued(&self, request: DelegationRequest) -> String {
        let identity = request.identity();
        let mut state = self.state.lock();
        match state.queue.iter_mut().find(|(id, _)| *id == identity) {
            Some(slot) => slot.1 = request,
            None => state.queue.push((identity.clone(), request)),
        }
        identity
    }

    /// Dispatch the highest-priority queued requests without waiting for them.
    ///
    /// Takes at most `queue_batch_size` requests per pass; ties keep queue
    /// order. Must be called from within a tokio runtime.
    pub fn process_queue(&self) -> usize {
        let batch: Vec<(String, DelegationRequest)> = {
            let mut state = self.state.lock();
            let mut queued = std::mem::take(&mut state.queue);
            queued.sort_by_key(|(_, request)| Reverse(request.rank()));
            let take = queued.len().min(self.config.queue_batch_size);
            state.queue = queued.split_off(take);
            queued
        };

        let dispatched = batch.len();
        for (identity, request) in batch {
            let delegator = self.clone();
            let handle = tokio::spawn(async move {
                let outcome = delegator.delegate(request).await;
                if outcome.success() {
                    debug!(delegation = %identity, "Queued delegation completed");
                } else {
                    warn!(
                        delegation = %identity,
                        error = outcome.error().unwrap_or_default(),
                        "Queued delegation failed"
                    );
                }
            });
            drop(handle);
        }
        dispatched
    }

    /// Run steps one after another, feeding each step's data to the next.
    ///
    /// Stops at the first unsuccessful step; its outcome is the last entry.
    pub async fn delegate_chain(&self, steps: Vec<ChainStep>) -> Vec<DelegationOutcome> {
        let mut results = Vec::with_capacity(steps.len());
        let mut previous: Option<(String, serde_json::Value)> = None;

        for step in steps {
            let mut task = step.task;
            let from_worker = match previous.take() {
                Some((worker, data)) => {
                    task.inject_previous_result(data);
                    worker
                }
                None => CHAIN_ORIGIN.to_string(),
            };

            let outcome = self
                .delegate(DelegationRequest::new(from_worker, step.worker.clone(), task))
                .await;
            let success = outcome.success();
            let data = outcome.outcome.data.clone();
            if !success {
                error!(
                    worker = %step.worker,
                    error = outcome.error().unwrap_or_default(),
                    "Chain stopped"
                );
            }
            results.push(outcome);
            if !success {
                break;
            }
            previous = Some((step.worker, data));
        }

        results
    }

    /// Statistics derived from the current history.
    pub fn stats(&self) -> DelegationStats {
        let state = self.state.lock();
        let mut stats = DelegationStats {
            active_count: state.active.len(),
            queue_size: state.queue.len(),
            ..Default::default()
        };

        let total = state.history.len();
        if total == 0 {
            return stats;
        }

        let successful = state.history.iter().filter(|d| d.success()).count();
        let total_time: i64 = state.history.iter().map(DelegationOutcome::duration_ms).sum();
        for d in &state.history {
            let pair = format!("{}→{}", d.delegation.from_worker, d.delegation.to_worker);
            *stats.worker_pairs.entry(pair).or_insert(0) += 1;
        }

        stats.total_delegations = total;
        stats.success_rate = successful as f64 * 100.0 / total as f64;
        stats.average_time_ms = total_time as f64 / total as f64;
        stats
    }

    /// The `limit` most recent delegations, newest first.
    pub fn recent(&self, limit: usize) -> Vec<DelegationOutcome> {
        let state = self.state.lock();
        state.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }
}

fn finished(
    request: &DelegationRequest,
    outcome: Outcome,
    start_time: DateTime<Utc>,
    retry_count: u32,
    last_failure: Option<FailureKind>,
) -> DelegationOutcome {
    DelegationOutcome {
        outcome,
        delegation: DelegationInfo {
            from_worker: request.from_worker.clone(),
            to_worker: request.to_worker.clone(),
            start_time,
            end_time: Utc::now(),
            retry_count,
            last_failure,
        },
    }
}

/// Delay before retry number `retry` (1-based): `base * 2^retry`, uncapped.
fn compute_backoff(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry))
}
