#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Plan and config files loaded from disk and run against the built-in workers.

use aurix_cli::{load_config, TaskPlan};
use aurix_core::{InMemoryStore, Priority};
use aurix_orchestrator::{default_registry, AurixConfig, Pipeline, TaskStatus};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn write_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn pipeline() -> Pipeline {
    Pipeline::new(
        Arc::new(default_registry()),
        Arc::new(InMemoryStore::new()),
        AurixConfig::default(),
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_config_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(&dir.path().join("aurix.toml")).await.unwrap();
    assert_eq!(config.task_manager.max_concurrent_tasks, 5);
}

#[tokio::test]
async fn test_config_file_overrides() {
    let file = write_file(
        r#"
        [task_manager]
        max_concurrent_tasks = 1
        tick_interval_ms = 250

        [delegation]
        default_max_retries = 0
        "#,
    );
    let config = load_config(file.path()).await.unwrap();
    assert_eq!(config.task_manager.max_concurrent_tasks, 1);
    assert_eq!(config.task_manager.tick_interval_ms, 250);
    assert_eq!(config.delegation.default_max_retries, 0);
}

#[tokio::test]
async fn test_invalid_config_file_is_rejected() {
    let file = write_file("[task_manager]\ntick_interval_ms = 0\n");
    assert!(load_config(file.path()).await.is_err());
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

const FEATURE_PLAN: &str = r#"
deadline_ms = 10000

[[tasks]]
name = "design"
worker = "architect"
kind = "design_checkout"
priority = "urgent"
project = "shop"

[[tasks]]
name = "ui"
worker = "dev_ui"
kind = "generate_ui"
priority = "high"
depends_on = ["design"]
project = "shop"
config = { pages = 3 }

[[tasks]]
name = "feature"
worker = "dev_builder"
kind = "implement_feature"
priority = "low"
depends_on = ["design", "ui"]

[[tasks]]
name = "qa"
worker = "qa_tester"
kind = "test_checkout"
depends_on = ["feature"]
tags = ["release"]
"#;

#[tokio::test]
async fn test_plan_runs_in_dependency_order() {
    let file = write_file(FEATURE_PLAN);
    let plan = TaskPlan::load(file.path()).await.unwrap();
    assert_eq!(plan.tasks.len(), 4);
    assert_eq!(plan.tasks[0].priority, Priority::Urgent);
    assert_eq!(plan.tasks[3].priority, Priority::Medium);

    let pipeline = pipeline();
    let report = plan.run(pipeline.task_manager()).await.unwrap();

    assert!(report.settled);
    assert!(report
        .tasks
        .iter()
        .all(|t| t.status == TaskStatus::Completed));
    assert_eq!(report.stats.completed, 4);
    assert_eq!(report.stats.success_rate, 100.0);

    let manager = pipeline.task_manager();
    assert_eq!(manager.get_tasks_by_project("shop").len(), 2);
    let by_name = |name: &str| {
        let id = report.tasks.iter().find(|t| t.name == name).unwrap().id;
        manager.get_task(id).unwrap()
    };
    assert!(by_name("ui").started_at.unwrap() >= by_name("design").completed_at.unwrap());
    assert!(by_name("qa").started_at.unwrap() >= by_name("feature").completed_at.unwrap());
    assert_eq!(by_name("ui").task.config["pages"], 3);
}

#[tokio::test]
async fn test_plan_with_rejected_task_leaves_dependents_pending() {
    let plan = TaskPlan::from_toml(
        r#"
        [[tasks]]
        name = "wrong"
        worker = "architect"
        kind = "implement_feature"

        [[tasks]]
        name = "after"
        worker = "qa_tester"
        kind = "test_feature"
        depends_on = ["wrong"]
        "#,
    )
    .unwrap();

    let pipeline = pipeline();
    let report = plan.run(pipeline.task_manager()).await.unwrap();

    assert!(report.settled);
    assert_eq!(report.tasks[0].status, TaskStatus::Failed);
    assert!(report.tasks[0].error.as_deref().unwrap().contains("architect"));
    assert_eq!(report.tasks[1].status, TaskStatus::Pending);
}

#[test]
fn test_plan_validation() {
    let duplicate = r#"
        [[tasks]]
        name = "a"
        worker = "dev_ui"
        kind = "generate_ui"

        [[tasks]]
        name = "a"
        worker = "dev_ui"
        kind = "generate_ui"
    "#;
    assert!(TaskPlan::from_toml(duplicate)
        .unwrap_err()
        .to_string()
        .contains("duplicate"));

    let unknown = r#"
        [[tasks]]
        name = "a"
        worker = "dev_ui"
        kind = "generate_ui"
        depends_on = ["missing"]
    "#;
    assert!(TaskPlan::from_toml(unknown)
        .unwrap_err()
        .to_string()
        .contains("missing"));
}

#[tokio::test]
async fn test_plan_cycle_is_rejected() {
    let plan = TaskPlan::from_toml(
        r#"
        [[tasks]]
        name = "a"
        worker = "dev_ui"
        kind = "generate_ui"
        depends_on = ["b"]

        [[tasks]]
        name = "b"
        worker = "dev_ui"
        kind = "responsive_ui"
        depends_on = ["a"]
        "#,
    )
    .unwrap();

    let pipeline = pipeline();
    let err = plan.run(pipeline.task_manager()).await.unwrap_err();
    assert!(err.to_string().contains("cycle"));
}
