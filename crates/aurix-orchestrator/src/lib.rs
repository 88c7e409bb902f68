//! Task orchestration pipeline: execution, delegation and scheduling.
//!
//! Work flows top-down through three layers. The [`TaskManager`] owns a pool
//! of managed tasks and starts them under dependency, priority and
//! concurrency constraints. Every start goes through the [`Delegator`], which
//! adds timeout, retry with exponential backoff, queueing and chaining. The
//! delegator runs each attempt on the [`Executor`], which coalesces identical
//! in-flight requests and calls the worker.
//!
//! # Main types
//!
//! - [`Executor`]: Single-flight task execution with bounded history.
//! - [`Delegator`]: Timeout, retry, priority queue and chains over the executor.
//! - [`TaskManager`]: Managed task pool with a periodic scheduling pass.
//! - [`Pipeline`]: The three layers wired over one registry and memory store.
//! - [`AurixConfig`]: TOML-loadable settings for every layer.

/// Simulated workers for demos and tests.
pub mod builtins;
/// Layer settings and TOML loading.
pub mod config;
/// Timeout, retry, queue and chain delegation.
pub mod delegator;
/// Single-flight task execution.
pub mod executor;
/// The layers wired together.
pub mod pipeline;
/// Managed task pool and scheduling.
pub mod task_manager;

pub use builtins::{default_registry, BuiltinWorker, KindRule};
pub use config::{AurixConfig, DelegatorConfig, ExecutorConfig, TaskManagerConfig};
pub use delegator::{
    ChainStep, DelegationInfo, DelegationOutcome, DelegationRequest, DelegationStats, Delegator,
};
pub use executor::{ExecutionRecord, ExecutionStats, Executor};
pub use pipeline::{Pipeline, PipelineStats};
pub use task_manager::{
    ManagedTask, ManagedTaskMetadata, StartRejection, TaskManager, TaskStats, TaskStatus,
};
