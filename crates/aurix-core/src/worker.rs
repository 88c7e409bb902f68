use crate::error::AurixResult;
use crate::task::{Outcome, Task};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A named unit that performs the actual work of a task.
///
/// Returning `Err` from [`Worker::execute`] is a fault: the executor folds it
/// into a failed [`Outcome`] and the delegation layer may retry it. A worker
/// that completes but wants to report an unsuccessful result returns
/// `Ok(Outcome { success: false, .. })` instead, which is never retried.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    /// Checks whether this worker accepts `task`. Accepts everything by default.
    fn validate(&self, _task: &Task) -> bool {
        true
    }

    async fn execute(&self, task: Task) -> AurixResult<Outcome>;
}

/// Lookup table from worker name to worker.
///
/// Built once and then shared as `Arc<WorkerRegistry>`; the pipeline never
/// mutates it after construction.
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    /// Register a worker, replacing any previous worker with the same name.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        let name = worker.name().to_string();
        info!(worker = %name, "Registered worker");
        self.workers.insert(name, worker);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.register(worker);
        self
    }

    pub fn has(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    /// Registered worker names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
