//! dq-manager: operator interface to the delegate queue manager.

use clap::{Parser, Subcommand};
use delegate_queue::config::Config;
use delegate_queue::config::secrets::ExposeSecret;
use delegate_queue::db::Db;
use delegate_queue::engine::{Collaborators, ControlPlane, strategy};
use delegate_queue::model::{TaskId, TaskStatus};
use delegate_queue::services::broadcast::BROADCAST_QUEUE;
use delegate_queue::services::notify::OUTCOME_QUEUE;
use delegate_queue::services::{
    BroadcastBackoff, CAPABILITY_ASSIGNMENT, DelegateRegistry, PgmqBroadcaster,
    PgmqOutcomeNotifier, StaticFeatureFlags,
};
use delegate_queue::store::TaskStore;
use delegate_queue::telemetry::{TelemetryConfig, init_telemetry};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

#[derive(Parser)]
#[command(name = "dq-manager", about = "Delegate task queue reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciliation loop until Ctrl-C
    Serve {
        /// Skip expiry sweeps on this replica
        #[arg(long)]
        secondary: bool,
    },
    /// Run a single reconciliation tick and print what it did
    Tick {
        /// Skip expiry sweeps
        #[arg(long)]
        secondary: bool,
    },
    /// Inspect stored tasks
    Tasks {
        #[command(subcommand)]
        action: TasksAction,
    },
}

#[derive(Subcommand)]
enum TasksAction {
    /// List tasks, oldest first
    List {
        /// Filter by status (queued, parked, started, ...)
        #[arg(long)]
        status: Option<String>,
        /// Maximum tasks to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one task document
    Show {
        /// Task UUID
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve { secondary } => cmd_serve(config, secondary).await,
        Command::Tick { secondary } => cmd_tick(config, secondary).await,
        Command::Tasks { action } => {
            let db = Db::connect(config.database_url.expose_secret()).await?;
            db.migrate().await?;
            match action {
                TasksAction::List { status, limit } => cmd_tasks_list(&db, status, limit).await,
                TasksAction::Show { id } => cmd_tasks_show(&db, id).await,
            }
        }
    }
}

async fn connect(config: &Config) -> anyhow::Result<Arc<Db>> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    db.health_check().await?;
    db.create_queue(BROADCAST_QUEUE).await?;
    db.create_queue(OUTCOME_QUEUE).await?;
    Ok(Arc::new(db))
}

fn control_plane(db: Arc<Db>, config: &Config) -> ControlPlane {
    let registry = Arc::new(DelegateRegistry::new(
        Arc::clone(&db),
        config.heartbeat_timeout,
    ));
    let flags = Arc::new(
        StaticFeatureFlags::new().enable(CAPABILITY_ASSIGNMENT, config.capability_accounts.clone()),
    );
    let collaborators = Collaborators {
        store: Arc::clone(&db) as Arc<dyn TaskStore>,
        assignment: registry.clone(),
        selection_log: registry.clone(),
        notifier: Arc::new(PgmqOutcomeNotifier::new(Arc::clone(&db))),
        broadcaster: Arc::new(PgmqBroadcaster::new(db, BroadcastBackoff::default())),
        strategy: strategy::for_mode(config.assignment_mode, registry, flags),
    };
    ControlPlane::new(collaborators, config.reconcile())
}

fn telemetry_config(config: &Config, endpoint: Option<String>, primary: bool) -> TelemetryConfig {
    TelemetryConfig {
        endpoint,
        service_name: "dq-manager".to_string(),
        service_version: config.manager_version.clone(),
        log_level: config.log_level.clone(),
        assignment_mode: config.assignment_mode,
        primary,
        batch_size: config.batch_size,
    }
}

async fn cmd_serve(config: Config, secondary: bool) -> anyhow::Result<()> {
    let is_primary = config.primary && !secondary;
    let _guard = init_telemetry(telemetry_config(&config, config.otel_endpoint.clone(), is_primary))?;

    let db = connect(&config).await?;
    let primary = Arc::new(AtomicBool::new(is_primary));
    let control = control_plane(db, &config).with_primary_flag(primary);

    let ctrl = control.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    control.run().await?;
    Ok(())
}

async fn cmd_tick(config: Config, secondary: bool) -> anyhow::Result<()> {
    let is_primary = config.primary && !secondary;
    let _guard = init_telemetry(telemetry_config(&config, None, is_primary))?;

    let db = connect(&config).await?;
    let control = control_plane(db, &config);
    let now = chrono::Utc::now().timestamp_millis();
    let report = control.tick(now, is_primary).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_tasks_list(db: &Db, status: Option<String>, limit: usize) -> anyhow::Result<()> {
    let status: Option<TaskStatus> = status.map(|s| s.parse()).transpose()?;
    let tasks = db.list(status, limit).await?;

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<12}  {:<8}  {:<5}  {:<20}  EXPIRY",
        "ID", "ACCOUNT", "STATUS", "BCAST", "DELEGATE"
    );
    println!("{}", "-".repeat(110));

    for task in &tasks {
        let delegate = task
            .delegate_id
            .as_ref()
            .or(task.pre_assigned_delegate_id.as_ref())
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        let expiry = chrono::DateTime::from_timestamp_millis(task.expiry)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| task.expiry.to_string());
        println!(
            "{:<36}  {:<12}  {:<8}  {:<5}  {:<20}  {}",
            task.uuid, task.account_id, task.status, task.broadcast_count, delegate, expiry
        );
    }

    println!("\n{} task(s)", tasks.len());
    Ok(())
}

async fn cmd_tasks_show(db: &Db, id: String) -> anyhow::Result<()> {
    let id = TaskId(uuid::Uuid::parse_str(&id)?);
    match db.get(id).await? {
        Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
        None => anyhow::bail!("no task {id}"),
    }
    Ok(())
}
