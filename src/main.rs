use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskloom::config::Config;
use taskloom::core::{is_gated, Task, TaskGraph, TaskId};
use taskloom::orchestration::{
    critical_path, parallel_groups, progress, ready_tasks, sequential_tasks, topological_order,
    validate, Dispatch, Dispatcher, Driver, Router,
};
use taskloom::{Error, Result};

/// Taskloom - task graph scheduler and agent message router
#[derive(Parser, Debug)]
#[command(name = "taskloom")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    TASKLOOM_HOME      Base directory (default ~/.taskloom)\n    TASKLOOM_LOG       Log filter directive, e.g. taskloom=debug\n    TASKLOOM_DEBUG=1   Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (written to stderr)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file to use instead of ~/.taskloom/taskloom.toml
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Check a task graph file for cycles and dangling references
    Validate {
        /// Path to the task graph JSON
        file: PathBuf,
    },

    /// Validate and store a task graph
    Import {
        /// Path to the task graph JSON
        file: PathBuf,
    },

    /// List tasks that can start now
    Ready { product: String },

    /// Show ready tasks partitioned into parallel groups
    Groups { product: String },

    /// Show the longest duration-weighted dependency chain
    CriticalPath { product: String },

    /// Show per-status counts and tasks in dependency order
    Status { product: String },

    /// Validate and route an agent message
    Route {
        /// Message JSON file, or "-" for stdin
        #[arg(default_value = "-")]
        file: String,
    },

    /// Show messages queued for an agent
    Inbox {
        agent: String,

        /// Remove the messages after printing them
        #[arg(long)]
        take: bool,
    },

    /// List checkpoints for a product
    Checkpoints { product: String },

    /// Approve a checkpoint, reopening scheduling
    ResolveCheckpoint {
        product: String,
        id: Uuid,

        /// Decision recorded with the checkpoint
        #[arg(long, short = 'r', default_value = "approved")]
        resolution: String,
    },

    /// List blockers for a product
    Blockers { product: String },

    /// Mark a blocker as resolved
    ResolveBlocker { product: String, id: Uuid },

    /// Dispatch ready work until the graph settles, printing batches as JSON lines
    Drive { product: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    taskloom::log::init(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli.command, config))
}

async fn run(command: Command, config: Config) -> Result<()> {
    debug!(?command, "running command");

    // Commands that never touch stored state.
    if let Command::Validate { file } = &command {
        return run_validate(file).await;
    }

    let router = Arc::new(Router::from_config(&config)?);

    match command {
        Command::Validate { .. } => Ok(()),
        Command::Import { file } => {
            let graph = read_graph(&file).await?;
            let product = graph.product.clone();
            let tasks = graph.len();
            router.import_graph(graph).await?;
            println!("Imported {} tasks for {}", tasks, product);
            Ok(())
        }
        Command::Ready { product } => {
            let graph = checked_graph(&router, &product).await?;
            let checkpoints = router.checkpoints(&product).await?;
            print_json(&ready_tasks(&graph, &checkpoints))
        }
        Command::Groups { product } => {
            let graph = checked_graph(&router, &product).await?;
            let checkpoints = router.checkpoints(&product).await?;
            let ready = ready_tasks(&graph, &checkpoints);
            print_json(&serde_json::json!({
                "parallel": parallel_groups(&ready).iter().map(|g| task_ids(g)).collect::<Vec<_>>(),
                "sequential": task_ids(&sequential_tasks(&ready)),
            }))
        }
        Command::CriticalPath { product } => {
            let graph = checked_graph(&router, &product).await?;
            print_json(&critical_path(&graph)?)
        }
        Command::Status { product } => {
            let graph = checked_graph(&router, &product).await?;
            let checkpoints = router.checkpoints(&product).await?;
            let order: Vec<_> = topological_order(&graph)?
                .into_iter()
                .map(|t| serde_json::json!({ "id": t.id, "agent": t.agent, "status": t.status }))
                .collect();
            print_json(&serde_json::json!({
                "product": graph.product,
                "version": graph.version,
                "gated": is_gated(&product, &checkpoints),
                "progress": progress(&graph),
                "tasks": order,
            }))
        }
        Command::Route { file } => {
            let raw = read_input(&file).await?;
            let response = router.ingest(&raw).await?;
            print_json(&response)?;
            if response.success {
                Ok(())
            } else {
                Err(Error::InvalidMessage(response.errors))
            }
        }
        Command::Inbox { agent, take } => {
            let messages = if take {
                router.take_inbox(&agent).await?
            } else {
                router.inbox(&agent).await?
            };
            print_json(&messages)
        }
        Command::Checkpoints { product } => print_json(&router.checkpoints(&product).await?),
        Command::ResolveCheckpoint {
            product,
            id,
            resolution,
        } => print_json(&router.resolve_checkpoint(&product, id, &resolution).await?),
        Command::Blockers { product } => print_json(&router.blockers(&product).await?),
        Command::ResolveBlocker { product, id } => {
            print_json(&router.resolve_blocker(&product, id).await?)
        }
        Command::Drive { product } => run_drive(router, &product, &config).await,
    }
}

async fn run_validate(file: &Path) -> Result<()> {
    let graph = read_graph(file).await?;
    let report = validate(&graph);
    print_json(&report)?;
    report.into_result()
}

async fn run_drive(router: Arc<Router>, product: &str, config: &Config) -> Result<()> {
    let driver = Driver::new(router, Arc::new(StdoutDispatcher), config.poll_interval());
    let cancel = CancellationToken::new();

    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping driver");
                cancel.cancel();
            }
        })
    };

    let summary = driver.run(product, cancel).await;
    ctrl_c.abort();
    let summary = summary?;
    info!(
        rounds = summary.rounds,
        dispatched = summary.dispatched,
        stop = ?summary.stop,
        "driver finished"
    );
    eprintln!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

/// Prints each dispatched batch as a JSON line for an external agent runner.
struct StdoutDispatcher;

#[async_trait]
impl Dispatcher for StdoutDispatcher {
    async fn dispatch(&self, product: &str, batch: Dispatch) -> Result<()> {
        let line = serde_json::to_string(&serde_json::json!({
            "product": product,
            "batch": batch,
        }))?;
        println!("{}", line);
        Ok(())
    }
}

fn task_ids(tasks: &[&Task]) -> Vec<TaskId> {
    tasks.iter().map(|t| t.id.clone()).collect()
}

async fn checked_graph(router: &Router, product: &str) -> Result<TaskGraph> {
    let graph = router.graph(product).await?;
    let report = validate(&graph);
    if !report.valid {
        warn!(product, errors = report.errors.len(), "stored graph is invalid");
    }
    report.into_result()?;
    Ok(graph)
}

async fn read_graph(file: &Path) -> Result<TaskGraph> {
    TaskGraph::from_json(&tokio::fs::read_to_string(file).await?)
}

async fn read_input(file: &str) -> Result<String> {
    if file == "-" {
        let mut raw = String::new();
        tokio::io::stdin().read_to_string(&mut raw).await?;
        Ok(raw)
    } else {
        Ok(tokio::fs::read_to_string(file).await?)
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
