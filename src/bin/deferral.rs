//! deferral CLI: run a processor against Postgres and inspect tasks.

use deferral::config::Config;
use deferral::config::secrets::ExposeSecret;
use deferral::db::Db;
use deferral::engine::Processor;
use deferral::model::{Task, TaskId};
use deferral::registrar::{FnPerformer, PerformError, Registrar};
use deferral::scheduler::Scheduler;
use deferral::store::Store;
use deferral::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "deferral", about = "Background task processor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the processor until interrupted
    Serve {
        /// Worker pool size (overrides DEFERRAL_WORKERS)
        #[arg(long)]
        workers: Option<usize>,
        /// Idle poll interval in milliseconds (overrides DEFERRAL_POLL_INTERVAL_MS)
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },
    /// Task operations
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Schedule a new task
    Schedule {
        /// Registered function name
        func_name: String,
        /// JSON arguments
        #[arg(long)]
        args: Option<String>,
        /// Delay before the task becomes ready, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },
    /// List pending tasks
    Pending,
    /// Show a task and its invocations
    Show {
        /// Task ID (full UUID)
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve {
            workers,
            poll_interval_ms,
        } => cmd_serve(config, workers, poll_interval_ms).await,
        Command::Task { action } => {
            let db = Db::connect(config.database_url.expose_secret()).await?;
            db.migrate().await?;

            match action {
                TaskAction::Schedule {
                    func_name,
                    args,
                    delay_ms,
                } => cmd_task_schedule(Arc::new(db), func_name, args, delay_ms).await,
                TaskAction::Pending => cmd_task_pending(&db).await,
                TaskAction::Show { id } => cmd_task_show(&db, id).await,
            }
        }
    }
}

/// Functions every deployment of the binary understands.
fn builtin_registrar() -> Registrar {
    let registrar = Registrar::new();
    registrar.register("noop", |_task: &Task| {
        Ok(FnPerformer::new(|| async { Ok::<(), PerformError>(()) }))
    });
    // Arguments are a JSON string, as written by `task schedule --args`.
    registrar.register("echo", |task: &Task| {
        let text: String = task.json_args()?;
        Ok(FnPerformer::new(move || async move {
            tracing::info!(%text, "echo");
            Ok::<(), PerformError>(())
        }))
    });
    registrar
}

async fn cmd_serve(
    config: Config,
    workers: Option<usize>,
    poll_interval_ms: Option<u64>,
) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    let mut processor_config = config.processor_config();
    if let Some(workers) = workers {
        processor_config.workers = workers;
    }
    if let Some(ms) = poll_interval_ms {
        processor_config.poll_interval = Duration::from_millis(ms);
    }

    let registrar = builtin_registrar();
    tracing::info!(functions = ?registrar.names(), "registered functions");

    let processor = Processor::start(Arc::new(db), Arc::new(registrar), processor_config)?;

    tokio::signal::ctrl_c().await?;
    let report = processor.shutdown().await?;
    tracing::info!(
        acknowledged = report.acknowledged,
        requeued = report.requeued,
        "shutdown complete"
    );
    Ok(())
}

async fn cmd_task_schedule(
    db: Arc<Db>,
    func_name: String,
    args: Option<String>,
    delay_ms: Option<u64>,
) -> anyhow::Result<()> {
    let mut task = match args {
        Some(json) => {
            let value: serde_json::Value = serde_json::from_str(&json)?;
            Task::with_json_args(func_name, &value)?
        }
        None => Task::new(func_name, Vec::new()),
    };
    if let Some(ms) = delay_ms {
        task = task.delay(Duration::from_millis(ms));
    }

    let task = Scheduler::new(db).schedule(task).await?;
    match task.run_at {
        Some(at) => println!("Scheduled: {} (runs at {})", task.id, at.format("%Y-%m-%d %H:%M:%S")),
        None => println!("Scheduled: {}", task.id),
    }
    Ok(())
}

async fn cmd_task_pending(db: &Db) -> anyhow::Result<()> {
    let tasks = db.tasks().pending().await?;

    if tasks.is_empty() {
        println!("No pending tasks.");
        return Ok(());
    }

    println!("{:<8}  {:<24}  {:<19}  CREATED", "ID", "FUNCTION", "RUN AT");
    println!("{}", "-".repeat(80));

    for task in &tasks {
        let run_at = task
            .run_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8}  {:<24}  {:<19}  {}",
            task.id.short(),
            task.func_name,
            run_at,
            task.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} task(s)", tasks.len());
    Ok(())
}

async fn cmd_task_show(db: &Db, id: String) -> anyhow::Result<()> {
    let id: TaskId = id.parse()?;
    let task = db.tasks().by_id(id).await?;
    let invocations = db.invocations().all_by_task(id).await?;

    println!("ID:         {}", task.id);
    println!("Function:   {}", task.func_name);
    println!("Status:     {}", task.status);
    println!("Args:       {} bytes", task.args.len());
    if let Some(at) = task.run_at {
        println!("Run At:     {at}");
    }
    println!("Created:    {}", task.created_at);
    println!("Updated:    {}", task.updated_at);

    if invocations.is_empty() {
        println!("---\nNo invocations.");
        return Ok(());
    }

    println!("---");
    for invocation in &invocations {
        let outcome = if invocation.result { "passed" } else { "failed" };
        match invocation.error {
            Some(ref err) => println!("{}  {outcome}  {err}", invocation.created_at),
            None => println!("{}  {outcome}", invocation.created_at),
        }
    }
    Ok(())
}
