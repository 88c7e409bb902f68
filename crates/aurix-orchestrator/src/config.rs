use aurix_core::{AurixError, AurixResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the [`Executor`](crate::Executor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Number of finished executions kept in history.
    #[serde(default = "default_execution_history")]
    pub history_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_execution_history(),
        }
    }
}

/// Settings for the [`Delegator`](crate::Delegator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatorConfig {
    /// Timeout applied when a request does not carry its own.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Retry budget applied when a request does not carry its own.
    #[serde(default = "default_retries")]
    pub default_max_retries: u32,
    /// Unit of the exponential backoff; retry `n` waits `base * 2^n`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Number of finished delegations kept in history.
    #[serde(default = "default_delegation_history")]
    pub history_capacity: usize,
    /// Number of most recent delegations pushed to the memory store.
    #[serde(default = "default_persisted_history")]
    pub persisted_history: usize,
    /// Requests dispatched per queue pass.
    #[serde(default = "default_queue_batch")]
    pub queue_batch_size: usize,
}

impl DelegatorConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Reject settings that would stall the delegator.
    pub fn validate(&self) -> AurixResult<()> {
        if self.queue_batch_size == 0 {
            return Err(AurixError::Config(
                "queue_batch_size must be at least 1".to_string(),
            ));
        }
        if self.history_capacity < self.persisted_history {
            return Err(AurixError::Config(format!(
                "persisted_history ({}) cannot exceed history_capacity ({})",
                self.persisted_history, self.history_capacity
            )));
        }
        Ok(())
    }
}

impl Default for DelegatorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            default_max_retries: default_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            history_capacity: default_delegation_history(),
            persisted_history: default_persisted_history(),
            queue_batch_size: default_queue_batch(),
        }
    }
}

/// Settings for the [`TaskManager`](crate::TaskManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskManagerConfig {
    /// Hard cap on simultaneously running tasks.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    /// Timeout passed to every delegation the manager issues.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Retry budget passed to every delegation the manager issues.
    #[serde(default = "default_retries")]
    pub retry_attempts: u32,
    /// Order pending tasks by priority on each tick.
    #[serde(default = "default_true")]
    pub enable_priority_queue: bool,
    /// Hold tasks back until their dependencies completed.
    #[serde(default = "default_true")]
    pub enable_dependency_resolution: bool,
    /// Interval between automatic scheduling passes.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Finished tasks kept by `cleanup`.
    #[serde(default = "default_completed_retention")]
    pub completed_retention: usize,
}

impl TaskManagerConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Reject settings the manager cannot run with.
    pub fn validate(&self) -> AurixResult<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(AurixError::Config(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(AurixError::Config(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            default_timeout_ms: default_timeout_ms(),
            retry_attempts: default_retries(),
            enable_priority_queue: true,
            enable_dependency_resolution: true,
            tick_interval_ms: default_tick_interval_ms(),
            completed_retention: default_completed_retention(),
        }
    }
}

/// Top-level configuration grouping every pipeline component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AurixConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub delegation: DelegatorConfig,
    #[serde(default)]
    pub task_manager: TaskManagerConfig,
}

impl AurixConfig {
    /// Parse a TOML document. Missing sections and keys take their defaults.
    pub fn from_toml(source: &str) -> AurixResult<Self> {
        let config: AurixConfig =
            toml::from_str(source).map_err(|e| AurixError::Config(e.to_string()))?;
        config.delegation.validate()?;
        config.task_manager.validate()?;
        Ok(config)
    }
}

fn default_execution_history() -> usize {
    100
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_delegation_history() -> usize {
    1_000
}
fn default_persisted_history() -> usize {
    100
}
fn default_queue_batch() -> usize {
    5
}
fn default_max_concurrent() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_tick_interval_ms() -> u64 {
    1_000
}
fn default_completed_retention() -> usize {
    100
}
