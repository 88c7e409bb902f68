//! Core types and error definitions for the Aurix orchestration pipeline.
//!
//! This crate provides the types shared by the executor, delegator and task
//! manager, plus the two narrow interfaces the pipeline depends on: a worker
//! registry and a memory store.
//!
//! # Main types
//!
//! - [`AurixError`]: Unified error enum for all Aurix subsystems.
//! - [`AurixResult`]: Convenience alias for `Result<T, AurixError>`.
//! - [`Task`]: A unit of requested work with a kind and an opaque config.
//! - [`Outcome`]: The success/failure record of one execution attempt.
//! - [`Priority`]: Rank shared by the delegation queue and the task manager.
//! - [`Worker`] / [`WorkerRegistry`]: Named workers that perform tasks.
//! - [`MemoryStore`]: Key-scoped side-channel store for history snapshots.

/// Error type and result alias.
pub mod error;
/// Memory store trait and in-process implementation.
pub mod memory;
/// Task, outcome and priority types.
pub mod task;
/// Worker trait and registry.
pub mod worker;

pub use error::{AurixError, AurixResult};
pub use memory::{InMemoryStore, MemoryRecord, MemoryStore};
pub use task::{FailureKind, Outcome, OutcomeMetadata, Priority, Task, TaskMetadata};
pub use worker::{Worker, WorkerRegistry};
