use aurix_cli::{load_config, TaskPlan};
use aurix_core::{InMemoryStore, Task};
use aurix_orchestrator::builtins::registry_with_latency;
use aurix_orchestrator::{DelegationRequest, Pipeline};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aurix", about = "Aurix task orchestration pipeline")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "aurix.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Simulated latency of the built-in workers, in milliseconds
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in workers
    Workers,
    /// Delegate a single task and print its outcome
    Exec {
        /// Worker to run the task on
        #[arg(long)]
        worker: String,
        /// Task kind
        #[arg(long)]
        kind: String,
        /// Task config as JSON
        #[arg(long)]
        config: Option<String>,
        /// Worker the delegation is issued from
        #[arg(long, default_value = "cli")]
        from: String,
        /// Retries after the first attempt (overrides config)
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Run a task plan file and print task statistics
    Plan {
        /// Path to the plan TOML file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = load_config(&cli.config).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to load config file '{}': {e}",
            cli.config.display()
        )
    })?;

    let registry = Arc::new(registry_with_latency(Duration::from_millis(cli.latency_ms)));
    let pipeline = Pipeline::new(registry.clone(), Arc::new(InMemoryStore::new()), config)?;

    match cli.command {
        Commands::Workers => {
            for name in registry.list() {
                println!("{name}");
            }
        }
        Commands::Exec {
            worker,
            kind,
            config,
            from,
            max_retries,
        } => {
            let task_config = match config {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("Invalid --config JSON: {e}"))?,
                None => serde_json::json!({}),
            };
            let mut request = DelegationRequest::new(from, worker, Task::new(kind, task_config));
            if let Some(retries) = max_retries {
                request = request.with_max_retries(retries);
            }

            let outcome = pipeline.delegator().delegate(request).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success() {
                std::process::exit(1);
            }
        }
        Commands::Plan { file } => {
            let plan = TaskPlan::load(&file).await.map_err(|e| {
                anyhow::anyhow!("Failed to load plan file '{}': {e}", file.display())
            })?;
            info!(tasks = plan.tasks.len(), "Running task plan");

            let report = plan.run(pipeline.task_manager()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            pipeline.shutdown();
        }
    }

    Ok(())
}
