use crate::config::AurixConfig;
use crate::delegator::{DelegationOutcome, DelegationRequest, DelegationStats, Delegator};
use crate::executor::{ExecutionStats, Executor};
use crate::task_manager::{TaskManager, TaskStats};
use aurix_core::{AurixResult, MemoryStore, Outcome, Priority, Task, WorkerRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Statistics of every layer at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    pub executor: ExecutionStats,
    pub delegation: DelegationStats,
    pub tasks: TaskStats,
}

/// The three layers wired together over one registry and memory store.
pub struct Pipeline {
    executor: Executor,
    delegator: Delegator,
    task_manager: TaskManager,
}

impl Pipeline {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        memory: Arc<dyn MemoryStore>,
        config: AurixConfig,
    ) -> AurixResult<Self> {
        config.delegation.validate()?;
        let executor = Executor::with_config(registry, config.executor);
        let delegator = Delegator::with_config(executor.clone(), memory, config.delegation);
        let task_manager = TaskManager::with_config(delegator.clone(), config.task_manager)?;
        Ok(Self {
            executor,
            delegator,
            task_manager,
        })
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn delegator(&self) -> &Delegator {
        &self.delegator
    }

    pub fn task_manager(&self) -> &TaskManager {
        &self.task_manager
    }

    pub async fn execute(&self, worker: &str, task: Task) -> Outcome {
        self.executor.execute(worker, task).await
    }

    pub async fn delegate(&self, from_worker: &str, to_worker: &str, task: Task) -> DelegationOutcome {
        self.delegator
            .delegate(DelegationRequest::new(from_worker, to_worker, task))
            .await
    }

    pub fn add_task(&self, task: Task, worker: &str, priority: Priority) -> Uuid {
        self.task_manager
            .add_task(task, worker, priority, Vec::new(), None)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            executor: self.executor.stats(),
            delegation: self.delegator.stats(),
            tasks: self.task_manager.stats(),
        }
    }

    /// Stop the periodic pass and clear the task pool.
    pub fn shutdown(&self) {
        self.task_manager.destroy();
    }
}
