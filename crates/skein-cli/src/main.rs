mod actions;
mod config;
mod submission_file;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use skein_core::action::ActionRegistry;
use skein_core::coordinator::{run_coordinator, CoordinatorConfig};
use skein_core::events::EventBus;
use skein_core::planner;
use skein_core::queue::ReadyQueue;
use skein_core::worker::{run_worker_pool, WorkerConfig};
use skein_db::pool;
use skein_db::queries::{executions as execution_db, tasks as task_db};

use config::SkeinConfig;

#[derive(Parser)]
#[command(name = "skein", about = "Durable DAG workflow orchestrator")]
struct Cli {
    /// Database URL (overrides SKEIN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and migrate the database
    DbInit,
    /// Submit a workflow from a JSON submission file
    Submit {
        /// Path to a JSON submission file (see spec §6 for the shape)
        file: String,
    },
    /// Show workflow execution status and task progress
    Status {
        /// Execution ID to show status for (omit to list all executions)
        execution_id: Option<String>,
    },
    /// Run the Coordinator and Worker Pool until interrupted
    Run {
        /// Number of concurrent workers
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Wall-clock limit per action invocation, in seconds
        #[arg(long, default_value_t = 300)]
        action_timeout: u64,
    },
}

async fn cmd_db_init(cli_database_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = SkeinConfig::resolve(cli_database_url)?;

    println!("Initializing skein database...");
    pool::ensure_database_exists(&resolved.db_config).await?;

    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("skein db-init complete.");
    Ok(())
}

async fn cmd_submit(cli_database_url: Option<&str>, file: &str) -> anyhow::Result<()> {
    let resolved = SkeinConfig::resolve(cli_database_url)?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let submission = submission_file::load(file)?;

    // A bare `submit` doesn't run a worker pool; we still need a live
    // `ReadyQueue` to receive the root pushes, even though nothing drains
    // it in this process. Recovery of queued-but-unconsumed roots is the
    // sweeper's job (out of scope) if a `run` process isn't already up.
    let queue = ReadyQueue::new();
    let execution = planner::submit(&db_pool, &queue, &submission).await?;

    println!("{{\"id\": \"{}\"}}", execution.id);

    db_pool.close().await;
    Ok(())
}

async fn cmd_status(cli_database_url: Option<&str>, execution_id: Option<&str>) -> anyhow::Result<()> {
    let resolved = SkeinConfig::resolve(cli_database_url)?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    match execution_id {
        Some(id_str) => {
            let id = Uuid::parse_str(id_str)
                .with_context(|| format!("invalid execution ID: {id_str}"))?;
            let (execution, tasks) = execution_db::get_workflow_with_tasks(&db_pool, id)
                .await?
                .with_context(|| format!("execution {id} not found"))?;
            let progress = task_db::get_execution_progress(&db_pool, id).await?;

            println!("execution {} ({}): {}", execution.id, execution.workflow_type, execution.status);
            println!(
                "  pending={} queued={} running={} completed={} failed={} skipped={} total={}",
                progress.pending,
                progress.queued,
                progress.running,
                progress.completed,
                progress.failed,
                progress.skipped,
                progress.total
            );

            for task in &tasks {
                println!(
                    "    {} [{}] action={} status={} in_degree={} retry_count={}/{}",
                    task.id, task.ref_id, task.action, task.status, task.in_degree, task.retry_count, task.max_retries
                );
            }
        }
        None => {
            let executions = execution_db::list_executions(&db_pool).await?;
            for execution in &executions {
                println!("{} ({}): {}", execution.id, execution.workflow_type, execution.status);
            }
        }
    }

    db_pool.close().await;
    Ok(())
}

async fn cmd_run(cli_database_url: Option<&str>, workers: usize, action_timeout: u64) -> anyhow::Result<()> {
    let resolved = SkeinConfig::resolve(cli_database_url)?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let bus = EventBus::new();
    let queue = ReadyQueue::new();
    let cancel = CancellationToken::new();
    let registry = Arc::new(actions::demo_registry());

    let coordinator_handle = tokio::spawn(run_coordinator(
        db_pool.clone(),
        bus.clone(),
        queue.clone(),
        CoordinatorConfig::default(),
        cancel.clone(),
    ));

    let worker_handle = tokio::spawn(run_worker_pool(
        db_pool.clone(),
        queue,
        bus,
        registry,
        WorkerConfig {
            num_workers: workers,
            action_timeout: Duration::from_secs(action_timeout),
        },
        cancel.clone(),
    ));

    tracing::info!(workers, "skein run: coordinator and worker pool started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutdown signal received, cancelling");
    cancel.cancel();

    let _ = coordinator_handle.await;
    let _ = worker_handle.await;

    db_pool.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::DbInit => cmd_db_init(cli.database_url.as_deref()).await,
        Commands::Submit { file } => cmd_submit(cli.database_url.as_deref(), &file).await,
        Commands::Status { execution_id } => {
            cmd_status(cli.database_url.as_deref(), execution_id.as_deref()).await
        }
        Commands::Run {
            workers,
            action_timeout,
        } => cmd_run(cli.database_url.as_deref(), workers, action_timeout).await,
    };

    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    Ok(())
}
