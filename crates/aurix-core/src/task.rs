use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;

use crate::error::AurixError;

/// Optional bookkeeping attached to a [`Task`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A unit of requested work.
///
/// `config` is opaque to the pipeline: only the worker that receives the task
/// decodes it. The one exception is chain composition, which writes the
/// previous stage's data into `config.previousResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TaskMetadata>,
}

impl Task {
    pub fn new(kind: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            config,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: TaskMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The project this task belongs to, if any.
    pub fn project_id(&self) -> Option<&str> {
        self.metadata.as_ref()?.project_id.as_deref()
    }

    /// Deterministic identity of running this task on `worker`.
    ///
    /// Two tasks with the same kind and config produce the same signature for
    /// the same worker; metadata does not participate.
    pub fn signature(&self, worker: &str) -> String {
        let content = serde_json::json!({
            "worker": worker,
            "kind": self.kind,
            "config": self.config,
        });
        let content_str = serde_json::to_string(&content).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(content_str.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Store `value` under `config.previousResult`.
    ///
    /// A null config becomes an empty object first; any other non-object
    /// config is kept under `config.input`.
    pub fn inject_previous_result(&mut self, value: serde_json::Value) {
        if !self.config.is_object() {
            let old = std::mem::take(&mut self.config);
            let mut map = serde_json::Map::new();
            if !old.is_null() {
                map.insert("input".to_string(), old);
            }
            self.config = serde_json::Value::Object(map);
        }
        if let Some(map) = self.config.as_object_mut() {
            map.insert("previousResult".to_string(), value);
        }
    }
}

/// Scheduling priority shared by the delegation queue and the task manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Numeric rank; higher runs first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Urgent => 4,
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

impl FromStr for Priority {
    type Err = AurixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(AurixError::Config(format!("unknown priority '{other}'"))),
        }
    }
}

/// Why an [`Outcome`] is unsuccessful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No worker registered under the requested name.
    WorkerNotFound,
    /// The worker refused the task in `validate`.
    ValidationFailed,
    /// The worker raised an error or panicked.
    ExecutionFault,
    /// The delegation timer fired before the worker finished.
    DelegationTimeout,
    /// Every delegation attempt faulted.
    DelegationExhausted,
    /// The worker completed but reported the task as unsuccessful.
    Rejected,
}

impl FailureKind {
    /// Whether the delegation layer should try again after this failure.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::ExecutionFault | FailureKind::DelegationTimeout
        )
    }
}

/// Execution bookkeeping stamped on every [`Outcome`] by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeMetadata {
    pub worker: String,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// The success/failure record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<OutcomeMetadata>,
}

impl Outcome {
    /// Creates a successful outcome carrying `data`.
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            failure: None,
            metadata: None,
        }
    }

    /// Creates a failed outcome with null data.
    pub fn failure(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(error.into()),
            failure: Some(kind),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: OutcomeMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn execution_time_ms(&self) -> u64 {
        self.metadata.as_ref().map_or(0, |m| m.execution_time_ms)
    }

    pub fn is_retryable(&self) -> bool {
        !self.success && self.failure.is_some_and(FailureKind::is_retryable)
    }
}
