use crate::config::TaskManagerConfig;
use crate::delegator::{DelegationOutcome, DelegationRequest, Delegator};
use aurix_core::{AurixResult, Priority, Task};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// From-worker stamped on every delegation the manager issues.
pub const TASK_MANAGER_WORKER: &str = "task_manager";

/// Lifecycle state of a [`ManagedTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is terminal.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Bookkeeping attached to a task when it is added to the pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagedTaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
}

/// A task owned by the [`TaskManager`] pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedTask {
    pub id: Uuid,
    pub task: Task,
    pub status: TaskStatus,
    pub assigned_worker: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<DelegationOutcome>,
    pub dependencies: Vec<Uuid>,
    pub metadata: Option<ManagedTaskMetadata>,
}

impl ManagedTask {
    /// Project from the pool metadata, falling back to the task's own metadata.
    pub fn project_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.project_id.as_deref())
            .or_else(|| self.task.project_id())
    }

    /// Time between start and completion, once both are known.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Why a pending task could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StartRejection {
    #[error("unknown task")]
    UnknownTask,
    #[error("task is {0}")]
    NotPending(TaskStatus),
    #[error("dependency {0} has not completed")]
    DependencyUnmet(Uuid),
    #[error("concurrency limit reached")]
    ConcurrencyLimitReached,
}

/// Aggregate view over the pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    /// Task count per assigned worker.
    pub worker_workload: HashMap<String, usize>,
}

#[derive(Default)]
struct Pool {
    tasks: HashMap<Uuid, ManagedTask>,
    order: Vec<Uuid>,
    running: HashSet<Uuid>,
    finished: Vec<Uuid>,
}

impl Pool {
    fn in_order(&self) -> impl Iterator<Item = &ManagedTask> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    fn try_start(
        &mut self,
        config: &TaskManagerConfig,
        id: Uuid,
    ) -> Result<DelegationRequest, StartRejection> {
        let task = self.tasks.get(&id).ok_or(StartRejection::UnknownTask)?;
        if task.status != TaskStatus::Pending {
            return Err(StartRejection::NotPending(task.status));
        }
        if config.enable_dependency_resolution {
            for dep in &task.dependencies {
                match self.tasks.get(dep) {
                    Some(d) if d.status == TaskStatus::Completed => {}
                    _ => return Err(StartRejection::DependencyUnmet(*dep)),
                }
            }
        }
        if self.running.len() >= config.max_concurrent_tasks {
            return Err(StartRejection::ConcurrencyLimitReached);
        }

        let task = self.tasks.get_mut(&id).ok_or(StartRejection::UnknownTask)?;
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        let request = DelegationRequest::new(
            TASK_MANAGER_WORKER,
            task.assigned_worker.clone(),
            task.task.clone(),
        )
        .with_priority(task.priority)
        .with_timeout(config.default_timeout())
        .with_max_retries(config.retry_attempts);
        self.running.insert(id);
        Ok(request)
    }

    /// Pending ids in insertion order, stably sorted by priority when enabled.
    fn pending_order(&self, by_priority: bool) -> Vec<Uuid> {
        let mut pending: Vec<(Uuid, u8)> = self
            .in_order()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| (t.id, t.priority.rank()))
            .collect();
        if by_priority {
            pending.sort_by_key(|&(_, rank)| Reverse(rank));
        }
        pending.into_iter().map(|(id, _)| id).collect()
    }

    fn has_cycle(&self) -> bool {
        let mut visited = HashMap::new();
        self.order.iter().any(|&id| self.visit(id, &mut visited))
    }

    fn visit(&self, id: Uuid, visited: &mut HashMap<Uuid, u8>) -> bool {
        match visited.get(&id) {
            Some(1) => return true,
            Some(2) => return false,
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(task) = self.tasks.get(&id) {
            if task.dependencies.iter().any(|&dep| self.visit(dep, visited)) {
                return true;
            }
        }
        visited.insert(id, 2);
        false
    }
}

struct Inner {
    delegator: Delegator,
    config: TaskManagerConfig,
    pool: Mutex<Pool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.get_mut().take() {
            handle.abort();
        }
    }
}

/// Pool of managed tasks advanced under dependency, priority and
/// concurrency constraints.
///
/// Tasks are started either explicitly through [`run_task`](Self::run_task)
/// or by the periodic pass enabled with [`start`](Self::start). Every run
/// goes through the [`Delegator`] as `task_manager`.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub fn new(delegator: Delegator) -> Self {
        Self::build(delegator, TaskManagerConfig::default())
    }

    /// Create a manager, rejecting invalid settings.
    pub fn with_config(delegator: Delegator, config: TaskManagerConfig) -> AurixResult<Self> {
        config.validate()?;
        Ok(Self::build(delegator, config))
    }

    fn build(delegator: Delegator, config: TaskManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                delegator,
                config,
                pool: Mutex::new(Pool::default()),
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.inner.config
    }

    pub fn delegator(&self) -> &Delegator {
        &self.inner.delegator
    }

    /// Add a pending task. The worker is not checked until the task runs.
    pub fn add_task(
        &self,
        task: Task,
        worker: impl Into<String>,
        priority: Priority,
        dependencies: Vec<Uuid>,
        metadata: Option<ManagedTaskMetadata>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let managed = ManagedTask {
            id,
            task,
            status: TaskStatus::Pending,
            assigned_worker: worker.into(),
            priority,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            outcome: None,
            dependencies,
            metadata,
        };
        info!(
            task_id = %id,
            worker = %managed.assigned_worker,
            kind = %managed.task.kind,
            priority = %priority,
            "Task added"
        );

        let mut pool = self.inner.pool.lock();
        pool.tasks.insert(id, managed);
        pool.order.push(id);
        id
    }

    /// Add `dependency` to a task that has not started yet.
    pub fn add_dependency(&self, task_id: Uuid, dependency: Uuid) -> bool {
        let mut pool = self.inner.pool.lock();
        match pool.tasks.get_mut(&task_id) {
            Some(task) if task.status == TaskStatus::Pending => {
                if !task.dependencies.contains(&dependency) {
                    task.dependencies.push(dependency);
                }
                true
            }
            _ => false,
        }
    }

    /// Start a pending task and wait for its delegation to finish.
    pub async fn try_run_task(&self, id: Uuid) -> Result<DelegationOutcome, StartRejection> {
        let request = {
            let mut pool = self.inner.pool.lock();
            pool.try_start(&self.inner.config, id)?
        };
        Ok(self.execute(id, request).await)
    }

    /// Like [`try_run_task`](Self::try_run_task), but logs the rejection
    /// reason and returns `None` instead.
    pub async fn run_task(&self, id: Uuid) -> Option<DelegationOutcome> {
        match self.try_run_task(id).await {
            Ok(outcome) => Some(outcome),
            Err(reason) => {
                debug!(task_id = %id, %reason, "Task not started");
                None
            }
        }
    }

    async fn execute(&self, id: Uuid, request: DelegationRequest) -> DelegationOutcome {
        info!(
            task_id = %id,
            worker = %request.to_worker,
            kind = %request.task.kind,
            "Running task"
        );
        let outcome = self.inner.delegator.delegate(request).await;
        self.finish(id, &outcome);
        outcome
    }

    fn finish(&self, id: Uuid, outcome: &DelegationOutcome) {
        let mut pool = self.inner.pool.lock();
        pool.running.remove(&id);

        let Some(task) = pool.tasks.get_mut(&id) else {
            debug!(task_id = %id, "Finished task is no longer in the pool");
            return;
        };
        if task.status != TaskStatus::Running {
            debug!(task_id = %id, status = %task.status, "Outcome not recorded");
            return;
        }

        task.completed_at = Some(Utc::now());
        task.outcome = Some(outcome.clone());
        if outcome.success() {
            task.status = TaskStatus::Completed;
            info!(task_id = %id, "Task completed");
        } else {
            task.status = TaskStatus::Failed;
            warn!(
                task_id = %id,
                error = outcome.error().unwrap_or_default(),
                "Task failed"
            );
        }
        pool.finished.push(id);
    }

    /// Cancel a pending or running task. A running delegation is not
    /// interrupted, but its outcome is not recorded.
    pub fn cancel_task(&self, id: Uuid) -> bool {
        let mut pool = self.inner.pool.lock();
        let Some(task) = pool.tasks.get_mut(&id) else {
            return false;
        };
        if task.status.is_finished() {
            return false;
        }
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        pool.running.remove(&id);
        info!(task_id = %id, "Task cancelled");
        true
    }

    /// Run one scheduling pass: start ready tasks until the ceiling is reached.
    ///
    /// Started tasks run concurrently in the background. Returns how many
    /// were started. Must be called from within a tokio runtime.
    pub fn process_pending(&self) -> usize {
        let started: Vec<(Uuid, DelegationRequest)> = {
            let mut pool = self.inner.pool.lock();
            let config = &self.inner.config;
            let mut started = Vec::new();
            for id in pool.pending_order(config.enable_priority_queue) {
                if pool.running.len() >= config.max_concurrent_tasks {
                    break;
                }
                match pool.try_start(config, id) {
                    Ok(request) => started.push((id, request)),
                    Err(reason) => debug!(task_id = %id, %reason, "Task skipped"),
                }
            }
            started
        };

        let count = started.len();
        for (id, request) in started {
            let manager = self.clone();
            tokio::spawn(async move {
                manager.execute(id, request).await;
            });
        }
        count
    }

    /// Run every pending task one at a time until no further task can start.
    pub async fn run_all_pending(&self) -> Vec<DelegationOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let pending = self
                .inner
                .pool
                .lock()
                .pending_order(self.inner.config.enable_priority_queue);
            let before = outcomes.len();
            for id in pending {
                if let Some(outcome) = self.run_task(id).await {
                    outcomes.push(outcome);
                }
            }
            if outcomes.len() == before {
                return outcomes;
            }
        }
    }

    /// Begin the periodic scheduling pass. Calling it again has no effect.
    pub fn start(&self) {
        let mut ticker = self.inner.ticker.lock();
        if ticker.is_some() {
            return;
        }

        let period = self.inner.config.tick_interval();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let started = TaskManager { inner }.process_pending();
                if started > 0 {
                    debug!(started, "Scheduling pass");
                }
            }
        }));
        info!(interval_ms = period.as_millis() as u64, "Task manager started");
    }

    /// Stop the periodic pass. Running tasks continue.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.ticker.lock().take() {
            handle.abort();
            info!("Task manager stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.ticker.lock().is_some()
    }

    pub fn get_task(&self, id: Uuid) -> Option<ManagedTask> {
        self.inner.pool.lock().tasks.get(&id).cloned()
    }

    /// All tasks in insertion order, optionally filtered by status.
    pub fn get_tasks(&self, status: Option<TaskStatus>) -> Vec<ManagedTask> {
        let pool = self.inner.pool.lock();
        pool.in_order()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect()
    }

    pub fn get_tasks_by_worker(&self, worker: &str) -> Vec<ManagedTask> {
        let pool = self.inner.pool.lock();
        pool.in_order()
            .filter(|t| t.assigned_worker == worker)
            .cloned()
            .collect()
    }

    pub fn get_tasks_by_project(&self, project_id: &str) -> Vec<ManagedTask> {
        let pool = self.inner.pool.lock();
        pool.in_order()
            .filter(|t| t.project_id() == Some(project_id))
            .cloned()
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.inner.pool.lock().running.len()
    }

    /// Whether the dependency graph contains a cycle.
    pub fn has_dependency_cycle(&self) -> bool {
        self.inner.pool.lock().has_cycle()
    }

    pub fn stats(&self) -> TaskStats {
        let pool = self.inner.pool.lock();
        let mut stats = TaskStats::default();
        let mut durations = Vec::new();

        for task in pool.in_order() {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
            if matches!(task.status, TaskStatus::Completed | TaskStatus::Failed) {
                if let Some(ms) = task.duration_ms() {
                    durations.push(ms);
                }
            }
            *stats
                .worker_workload
                .entry(task.assigned_worker.clone())
                .or_insert(0) += 1;
        }

        let finished = stats.completed + stats.failed;
        if finished > 0 {
            stats.success_rate = stats.completed as f64 * 100.0 / finished as f64;
        }
        if !durations.is_empty() {
            stats.average_duration_ms =
                durations.iter().sum::<i64>() as f64 / durations.len() as f64;
        }
        stats
    }

    /// Drop the oldest completed or failed tasks beyond the retention bound.
    /// Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut pool = self.inner.pool.lock();
        let Pool {
            tasks,
            order,
            finished,
            ..
        } = &mut *pool;

        finished.retain(|id| tasks.contains_key(id));
        let excess = finished
            .len()
            .saturating_sub(self.inner.config.completed_retention);
        for id in finished.drain(..excess) {
            tasks.remove(&id);
        }
        order.retain(|id| tasks.contains_key(id));

        if excess > 0 {
            info!(removed = excess, "Pruned finished tasks");
        }
        excess
    }

    /// Stop the periodic pass and clear the pool.
    pub fn destroy(&self) {
        self.stop();
        self.cleanup();
        let mut pool = self.inner.pool.lock();
        *pool = Pool::default();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use async_trait::async_trait;
    use aurix_core::{InMemoryStore, Outcome, Worker, WorkerRegistry};
    use serde_json::json;
    use std::time::Duration;

    /// Succeeds after `delay`, except for the kind `fail`.
    struct TimedWorker {
        name: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl Worker for TimedWorker {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, task: Task) -> AurixResult<Outcome> {
            tokio::time::sleep(self.delay).await;
            if task.kind == "fail" {
                return Ok(Outcome {
                    success: false,
                    data: json!(null),
                    error: Some("could not finish".to_string()),
                    failure: None,
                    metadata: None,
                });
            }
            Ok(Outcome::success(json!({ "kind": task.kind })))
        }
    }

    fn manager_with(config: TaskManagerConfig) -> TaskManager {
        let delay = Duration::from_millis(100);
        let registry = WorkerRegistry::new()
            .with_worker(Arc::new(TimedWorker { name: "dev_ui", delay }))
            .with_worker(Arc::new(TimedWorker { name: "dev_builder", delay }))
            .with_worker(Arc::new(TimedWorker { name: "qa_tester", delay }));
        let executor = Executor::new(Arc::new(registry));
        let delegator = Delegator::new(executor, Arc::new(InMemoryStore::new()));
        TaskManager::with_config(delegator, config).unwrap()
    }

    fn manager() -> TaskManager {
        manager_with(TaskManagerConfig::default())
    }

    fn task(kind: &str) -> Task {
        Task::new(kind, json!({}))
    }

    async fn settle(manager: &TaskManager) {
        for _ in 0..1_000 {
            let stats = manager.stats();
            if stats.pending == 0 && stats.running == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tasks did not settle");
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let config = TaskManagerConfig {
            max_concurrent_tasks: 0,
            ..Default::default()
        };
        let registry = Arc::new(WorkerRegistry::new());
        let delegator = Delegator::new(Executor::new(registry), Arc::new(InMemoryStore::new()));
        assert!(TaskManager::with_config(delegator, config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_and_run_task() {
        let manager = manager();
        let id = manager.add_task(task("generate_ui"), "dev_ui", Priority::High, vec![], None);
        assert_eq!(manager.get_task(id).unwrap().status, TaskStatus::Pending);

        let outcome = manager.run_task(id).await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.delegation.from_worker, TASK_MANAGER_WORKER);

        let managed = manager.get_task(id).unwrap();
        assert_eq!(managed.status, TaskStatus::Completed);
        assert!(managed.started_at.unwrap() <= managed.completed_at.unwrap());
        assert_eq!(managed.outcome.unwrap(), outcome);
        assert_eq!(manager.running_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_worker_fails_at_run_time() {
        let manager = manager();
        let id = manager.add_task(task("anything"), "ghost", Priority::Medium, vec![], None);
        let outcome = manager.run_task(id).await.unwrap();
        assert!(!outcome.success());
        assert!(outcome.error().unwrap().contains("ghost"));
        assert_eq!(manager.get_task(id).unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_rejections() {
        let manager = manager();
        assert_eq!(
            manager.try_run_task(Uuid::new_v4()).await.unwrap_err(),
            StartRejection::UnknownTask
        );

        let first = manager.add_task(task("generate_ui"), "dev_ui", Priority::High, vec![], None);
        let second = manager.add_task(
            task("implement_feature"),
            "dev_builder",
            Priority::Low,
            vec![first],
            None,
        );
        assert_eq!(
            manager.try_run_task(second).await.unwrap_err(),
            StartRejection::DependencyUnmet(first)
        );
        assert!(manager.run_task(second).await.is_none());

        manager.run_task(first).await.unwrap();
        assert_eq!(
            manager.try_run_task(first).await.unwrap_err(),
            StartRejection::NotPending(TaskStatus::Completed)
        );
        assert!(manager.run_task(second).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_waits_for_completion() {
        let manager = manager();
        let first = manager.add_task(task("generate_ui"), "dev_ui", Priority::High, vec![], None);
        let second = manager.add_task(
            task("implement_feature"),
            "dev_builder",
            Priority::Low,
            vec![first],
            None,
        );

        assert_eq!(manager.process_pending(), 1);
        assert_eq!(manager.get_task(second).unwrap().status, TaskStatus::Pending);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.get_task(first).unwrap().status, TaskStatus::Completed);
        assert_eq!(manager.process_pending(), 1);
        settle(&manager).await;

        let first = manager.get_task(first).unwrap();
        let second = manager.get_task(second).unwrap();
        assert_eq!(second.status, TaskStatus::Completed);
        assert!(second.started_at.unwrap() >= first.completed_at.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dependency_blocks_dependents() {
        let manager = manager();
        let first = manager.add_task(task("fail"), "dev_ui", Priority::High, vec![], None);
        let second = manager.add_task(task("build"), "dev_builder", Priority::Low, vec![first], None);

        let outcomes = manager.run_all_pending().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(manager.get_task(first).unwrap().status, TaskStatus::Failed);
        assert_eq!(manager.get_task(second).unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_all_pending_resolves_dependencies() {
        let manager = manager();
        let first = manager.add_task(task("generate_ui"), "dev_ui", Priority::Low, vec![], None);
        manager.add_task(task("implement_feature"), "dev_builder", Priority::Urgent, vec![first], None);

        let outcomes = manager.run_all_pending().await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].delegation.to_worker, "dev_ui");
        assert_eq!(manager.stats().completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_is_never_exceeded() {
        let manager = manager_with(TaskManagerConfig {
            max_concurrent_tasks: 2,
            tick_interval_ms: 50,
            ..Default::default()
        });
        for kind in ["generate_ui", "implement_feature", "test_feature"] {
            manager.add_task(task(kind), "dev_ui", Priority::Medium, vec![], None);
        }
        manager.start();

        let mut peak = 0;
        for _ in 0..60 {
            let running = manager.get_tasks(Some(TaskStatus::Running)).len();
            assert!(running <= 2);
            peak = peak.max(running);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        settle(&manager).await;
        assert_eq!(peak, 2);
        assert_eq!(manager.stats().completed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_orders_ready_tasks() {
        let manager = manager_with(TaskManagerConfig {
            max_concurrent_tasks: 1,
            ..Default::default()
        });
        let low = manager.add_task(task("low"), "dev_ui", Priority::Low, vec![], None);
        manager.add_task(task("medium"), "dev_ui", Priority::Medium, vec![], None);
        let urgent = manager.add_task(task("urgent"), "dev_ui", Priority::Urgent, vec![], None);

        assert_eq!(manager.process_pending(), 1);
        assert_eq!(manager.get_task(urgent).unwrap().status, TaskStatus::Running);
        assert_eq!(manager.get_task(low).unwrap().status, TaskStatus::Pending);
        settle(&manager).await;
        assert_eq!(manager.stats().completed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_disabled_keeps_insertion_order() {
        let manager = manager_with(TaskManagerConfig {
            max_concurrent_tasks: 1,
            enable_priority_queue: false,
            ..Default::default()
        });
        let low = manager.add_task(task("low"), "dev_ui", Priority::Low, vec![], None);
        manager.add_task(task("urgent"), "dev_ui", Priority::Urgent, vec![], None);

        manager.process_pending();
        assert_eq!(manager.get_task(low).unwrap().status, TaskStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_and_running() {
        let manager = manager();
        let pending = manager.add_task(task("generate_ui"), "dev_ui", Priority::Medium, vec![], None);
        assert!(manager.cancel_task(pending));
        assert!(!manager.cancel_task(pending));
        assert!(manager.run_task(pending).await.is_none());

        let running = manager.add_task(task("generate_ui"), "dev_ui", Priority::Medium, vec![], None);
        let handle = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.run_task(running).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.running_count(), 1);
        assert!(manager.cancel_task(running));
        assert_eq!(manager.running_count(), 0);

        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.success());
        let task = manager.get_task(running).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.outcome.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_leaves_completed_task_alone() {
        let manager = manager();
        let id = manager.add_task(task("generate_ui"), "dev_ui", Priority::Medium, vec![], None);
        manager.run_task(id).await.unwrap();

        assert!(!manager.cancel_task(id));
        let task = manager.get_task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.outcome.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_filters() {
        let manager = manager();
        let metadata = ManagedTaskMetadata {
            project_id: Some("shop".to_string()),
            tags: vec!["frontend".to_string()],
            ..Default::default()
        };
        manager.add_task(task("generate_ui"), "dev_ui", Priority::High, vec![], Some(metadata));
        manager.add_task(task("implement_feature"), "dev_builder", Priority::Low, vec![], None);
        manager.add_task(task("responsive_layout"), "dev_ui", Priority::Low, vec![], None);

        let ui = manager.get_tasks_by_worker("dev_ui");
        assert_eq!(ui.len(), 2);
        assert_eq!(ui[0].task.kind, "generate_ui");
        assert_eq!(ui[1].task.kind, "responsive_layout");
        assert_eq!(manager.get_tasks_by_project("shop").len(), 1);
        assert_eq!(manager.get_tasks(None).len(), 3);
        assert_eq!(manager.get_tasks(Some(TaskStatus::Running)).len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats() {
        let manager = manager();
        assert_eq!(manager.stats().success_rate, 0.0);

        manager.add_task(task("generate_ui"), "dev_ui", Priority::Medium, vec![], None);
        manager.add_task(task("fail"), "dev_builder", Priority::Medium, vec![], None);
        manager.add_task(task("test_feature"), "qa_tester", Priority::Medium, vec![], None);
        let cancelled = manager.add_task(task("generate_ui"), "dev_ui", Priority::Low, vec![], None);
        manager.cancel_task(cancelled);
        manager.run_all_pending().await;

        let stats = manager.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cancelled, 1);
        assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-9);
        assert!(stats.average_duration_ms >= 0.0);
        assert_eq!(stats.worker_workload["dev_ui"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_keeps_most_recent() {
        let manager = manager_with(TaskManagerConfig {
            completed_retention: 2,
            ..Default::default()
        });
        let ids: Vec<Uuid> = (0..4)
            .map(|i| manager.add_task(task(&format!("t{i}")), "dev_ui", Priority::Medium, vec![], None))
            .collect();
        let pending = manager.add_task(task("later"), "dev_ui", Priority::Low, vec![], None);
        for id in &ids {
            manager.run_task(*id).await.unwrap();
        }

        assert_eq!(manager.cleanup(), 2);
        assert!(manager.get_task(ids[0]).is_none());
        assert!(manager.get_task(ids[1]).is_none());
        assert!(manager.get_task(ids[3]).is_some());
        assert!(manager.get_task(pending).is_some());
        assert_eq!(manager.cleanup(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_cycle_detection() {
        let manager = manager();
        let a = manager.add_task(task("a"), "dev_ui", Priority::Medium, vec![], None);
        let b = manager.add_task(task("b"), "dev_ui", Priority::Medium, vec![a], None);
        assert!(!manager.has_dependency_cycle());

        assert!(manager.add_dependency(a, b));
        assert!(manager.has_dependency_cycle());
        assert_eq!(manager.process_pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_drives_pool_and_destroy_clears() {
        let manager = manager();
        let id = manager.add_task(task("generate_ui"), "dev_ui", Priority::Medium, vec![], None);
        manager.start();
        manager.start();
        assert!(manager.is_started());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(manager.get_task(id).unwrap().status, TaskStatus::Completed);

        manager.destroy();
        assert!(!manager.is_started());
        assert!(manager.get_tasks(None).is_empty());
    }
}
