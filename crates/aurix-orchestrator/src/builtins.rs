use async_trait::async_trait;
use aurix_core::{AurixResult, Outcome, Task, Worker, WorkerRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// How a built-in worker decides whether it accepts a task kind.
#[derive(Debug, Clone, Copy)]
pub enum KindRule {
    /// The kind starts with one of the prefixes.
    Prefix(&'static [&'static str]),
    /// The kind contains one of the fragments.
    Contains(&'static [&'static str]),
}

impl KindRule {
    pub fn accepts(&self, kind: &str) -> bool {
        match self {
            KindRule::Prefix(prefixes) => prefixes.iter().any(|p| kind.starts_with(p)),
            KindRule::Contains(fragments) => fragments.iter().any(|f| kind.contains(f)),
        }
    }
}

/// A simulated worker returning a canned result for the kinds it accepts.
pub struct BuiltinWorker {
    name: &'static str,
    rule: KindRule,
    respond: fn(&Task) -> Value,
    latency: Duration,
}

impl BuiltinWorker {
    pub fn new(name: &'static str, rule: KindRule, respond: fn(&Task) -> Value) -> Self {
        Self {
            name,
            rule,
            respond,
            latency: Duration::ZERO,
        }
    }

    /// Sleep for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl Worker for BuiltinWorker {
    fn name(&self) -> &str {
        self.name
    }

    fn validate(&self, task: &Task) -> bool {
        self.rule.accepts(&task.kind)
    }

    async fn execute(&self, task: Task) -> AurixResult<Outcome> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        tracing::debug!(worker = self.name, kind = %task.kind, "Simulated work");
        Ok(Outcome::success((self.respond)(&task)))
    }
}

/// The six simulated workers, each answering after `latency`.
pub fn default_workers(latency: Duration) -> Vec<BuiltinWorker> {
    vec![
        BuiltinWorker::new(
            "architect",
            KindRule::Prefix(&["analyze_", "design_", "create_"]),
            architect_result,
        ),
        BuiltinWorker::new(
            "dev_builder",
            KindRule::Prefix(&["implement_", "refactor_", "optimize_"]),
            builder_result,
        ),
        BuiltinWorker::new(
            "dev_ui",
            KindRule::Contains(&["ui", "component", "responsive"]),
            ui_result,
        ),
        BuiltinWorker::new(
            "llm_architect",
            KindRule::Contains(&["llm", "automation", "prompt"]),
            llm_result,
        ),
        BuiltinWorker::new(
            "qa_tester",
            KindRule::Contains(&["test", "validate", "quality"]),
            qa_result,
        ),
        BuiltinWorker::new(
            "manager",
            KindRule::Contains(&["manage", "orchestrate", "coordinate"]),
            manager_result,
        ),
    ]
    .into_iter()
    .map(|w| w.with_latency(latency))
    .collect()
}

/// Registry holding every built-in worker with no simulated latency.
pub fn default_registry() -> WorkerRegistry {
    registry_with_latency(Duration::ZERO)
}

pub fn registry_with_latency(latency: Duration) -> WorkerRegistry {
    default_workers(latency)
        .into_iter()
        .fold(WorkerRegistry::new(), |registry, worker| {
            registry.with_worker(Arc::new(worker))
        })
}

fn architect_result(task: &Task) -> Value {
    json!({
        "kind": task.kind,
        "architecture": "Microservices with API Gateway",
        "technologies": ["Rust", "tokio", "PostgreSQL"],
        "plan": "Phase 1: core API, Phase 2: frontend, Phase 3: integration",
    })
}

fn builder_result(task: &Task) -> Value {
    json!({
        "kind": task.kind,
        "files_created": ["src/lib.rs", "src/service.rs"],
        "lines_of_code": 250,
        "tests_added": 4,
    })
}

fn ui_result(task: &Task) -> Value {
    json!({
        "kind": task.kind,
        "components": ["Header", "Navigation", "Dashboard"],
        "responsive": true,
        "accessibility_score": 95,
    })
}

fn llm_result(task: &Task) -> Value {
    json!({
        "kind": task.kind,
        "prompts_designed": 3,
        "automations": ["summarize_issues", "triage_requests"],
    })
}

fn qa_result(task: &Task) -> Value {
    json!({
        "kind": task.kind,
        "tests_run": 42,
        "tests_passed": 42,
        "coverage": 87.5,
    })
}

fn manager_result(task: &Task) -> Value {
    json!({
        "kind": task.kind,
        "coordinated": true,
        "next_steps": ["review", "deploy"],
    })
}
