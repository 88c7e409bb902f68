use thiserror::Error;

/// A convenience `Result` alias using [`AurixError`].
pub type AurixResult<T> = Result<T, AurixError>;

/// Top-level error type for the Aurix pipeline.
///
/// Each variant corresponds to a subsystem that can produce errors. Errors
/// never cross the executor, delegator or task-manager boundary as-is: they
/// are folded into an [`Outcome`](crate::Outcome) first.
#[derive(Error, Debug)]
pub enum AurixError {
    /// A worker could not be resolved or registered.
    #[error("Worker error: {0}")]
    Worker(String),

    /// A worker raised a fault while executing a task.
    #[error("Execution error: {0}")]
    Execution(String),

    /// A delegation could not be carried out.
    #[error("Delegation error: {0}")]
    Delegation(String),

    /// An error from the task manager.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// The memory store rejected a write or read.
    #[error("Memory error: {0}")]
    Memory(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
