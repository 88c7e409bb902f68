use aurix_core::{AurixError, AurixResult, Priority, Task, TaskMetadata};
use aurix_orchestrator::{ManagedTaskMetadata, TaskManager, TaskStats, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// A set of named tasks to submit to a [`TaskManager`].
///
/// ```toml
/// deadline_ms = 60000
///
/// [[tasks]]
/// name = "ui"
/// worker = "dev_ui"
/// kind = "generate_ui"
/// priority = "high"
///
/// [[tasks]]
/// name = "feature"
/// worker = "dev_builder"
/// kind = "implement_feature"
/// depends_on = ["ui"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default)]
    pub tasks: Vec<PlannedTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub name: String,
    pub worker: String,
    pub kind: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_deadline_ms() -> u64 {
    60_000
}
fn default_poll_ms() -> u64 {
    50
}

/// Final state of one planned task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTaskReport {
    pub name: String,
    pub id: Uuid,
    pub worker: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What `aurix plan` prints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReport {
    /// False when the deadline passed with tasks still running.
    pub settled: bool,
    pub tasks: Vec<PlannedTaskReport>,
    pub stats: TaskStats,
}

impl TaskPlan {
    pub fn from_toml(source: &str) -> AurixResult<Self> {
        let plan: TaskPlan =
            toml::from_str(source).map_err(|e| AurixError::Config(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    pub async fn load(path: &Path) -> AurixResult<Self> {
        let source = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&source)
    }

    fn validate(&self) -> AurixResult<()> {
        let mut names = HashSet::new();
        for task in &self.tasks {
            if !names.insert(task.name.as_str()) {
                return Err(AurixError::Config(format!(
                    "duplicate task name '{}'",
                    task.name
                )));
            }
        }
        for task in &self.tasks {
            if let Some(dep) = task.depends_on.iter().find(|d| !names.contains(d.as_str())) {
                return Err(AurixError::Config(format!(
                    "task '{}' depends on unknown task '{dep}'",
                    task.name
                )));
            }
        }
        Ok(())
    }

    /// Add every task to `manager` and wire up dependencies.
    ///
    /// Returns the id of each task by name. Fails, after submitting, if the
    /// dependencies form a cycle.
    pub fn submit(&self, manager: &TaskManager) -> AurixResult<BTreeMap<String, Uuid>> {
        let mut ids = BTreeMap::new();
        for planned in &self.tasks {
            let metadata = TaskMetadata {
                project_id: planned.project.clone(),
                ..Default::default()
            };
            let task = Task::new(&planned.kind, planned.config.clone()).with_metadata(metadata);
            let managed_metadata = ManagedTaskMetadata {
                project_id: planned.project.clone(),
                tags: planned.tags.clone(),
                ..Default::default()
            };
            let id = manager.add_task(
                task,
                &planned.worker,
                planned.priority,
                Vec::new(),
                Some(managed_metadata),
            );
            ids.insert(planned.name.clone(), id);
        }

        for planned in &self.tasks {
            for dep in &planned.depends_on {
                if let (Some(&task_id), Some(&dep_id)) = (ids.get(&planned.name), ids.get(dep)) {
                    manager.add_dependency(task_id, dep_id);
                }
            }
        }

        if manager.has_dependency_cycle() {
            return Err(AurixError::Scheduler(
                "task plan contains a dependency cycle".to_string(),
            ));
        }
        info!(tasks = ids.len(), "Task plan submitted");
        Ok(ids)
    }

    /// Submit the plan and drive the manager until nothing is running and
    /// nothing more can start, or the deadline passes.
    pub async fn run(&self, manager: &TaskManager) -> AurixResult<PlanReport> {
        let ids = self.submit(manager)?;
        let poll = Duration::from_millis(self.poll_ms.max(1));

        let driven = tokio::time::timeout(Duration::from_millis(self.deadline_ms), async {
            loop {
                let started = manager.process_pending();
                if started == 0 && manager.running_count() == 0 {
                    return;
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await;

        let settled = driven.is_ok();
        if !settled {
            warn!(deadline_ms = self.deadline_ms, "Task plan deadline passed");
        }

        let tasks = self
            .tasks
            .iter()
            .filter_map(|planned| {
                let id = *ids.get(&planned.name)?;
                let managed = manager.get_task(id)?;
                Some(PlannedTaskReport {
                    name: planned.name.clone(),
                    id,
                    worker: managed.assigned_worker,
                    status: managed.status,
                    error: managed.outcome.and_then(|o| o.outcome.error),
                })
            })
            .collect();

        Ok(PlanReport {
            settled,
            tasks,
            stats: manager.stats(),
        })
    }
}
