//! Support code for the `aurix` binary: config and task plan loading.

/// Task plan files.
pub mod plan;

use aurix_core::AurixResult;
use aurix_orchestrator::AurixConfig;
use std::path::Path;
use tracing::info;

pub use plan::{PlanReport, PlannedTask, PlannedTaskReport, TaskPlan};

/// Load pipeline settings from `path`, or the defaults when it does not exist.
pub async fn load_config(path: &Path) -> AurixResult<AurixConfig> {
    if !tokio::fs::try_exists(path).await? {
        info!(path = %path.display(), "Config file not found, using defaults");
        return Ok(AurixConfig::default());
    }
    let source = tokio::fs::read_to_string(path).await?;
    AurixConfig::from_toml(&source)
}
