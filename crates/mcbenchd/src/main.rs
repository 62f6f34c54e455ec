//! mcbenchd — the MC-Bench daemon.
//!
//! Single binary that assembles the work pipeline:
//! - Task store (redb)
//! - In-process broker
//! - Admission scheduler + reconciliation sweep
//! - Build worker (Docker) with orphan container sweeps
//!
//! plus offline operator commands against the same task store.
//!
//! # Usage
//!
//! ```text
//! mcbenchd --data-dir /var/lib/mcbench standalone --worker-id build-1
//! mcbenchd enqueue b-42 --payload @build.json --priority -1
//! mcbenchd list --queue build --status failed
//! ```
//!
//! The store holds an exclusive lock, so operator commands run while the
//! daemon is stopped.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mcbench_core::{Settings, TaskStatus};

mod ops;
mod standalone;

const DEFAULT_LOG_FILTER: &str = "info,mcbenchd=debug,mcbench=debug";

#[derive(Debug, Parser)]
#[command(name = "mcbenchd", about = "MC-Bench scheduling and build daemon", version)]
struct Cli {
    /// TOML settings file. Environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the task store.
    #[arg(long, global = true, default_value = "/var/lib/mcbench")]
    data_dir: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run scheduler, reconciler and build worker in one process.
    Standalone {
        /// Identity recorded on leases taken by this worker.
        #[arg(long, default_value = "standalone-1")]
        worker_id: String,

        /// Snapshot output directory (default: <data-dir>/objects).
        #[arg(long)]
        objects_dir: Option<PathBuf>,

        /// Container client binary.
        #[arg(long, default_value = "docker")]
        docker: String,
    },
    /// Add a pending task.
    Enqueue {
        id: String,

        /// Task payload as JSON, or `@path` to read it from a file.
        #[arg(long)]
        payload: String,

        /// Override the payload's default queue.
        #[arg(long)]
        queue: Option<String>,

        /// Lower is more urgent.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,
    },
    /// Show one task as JSON.
    Status { id: String },
    /// Cancel a task (running tasks stop at the next command boundary).
    Cancel { id: String },
    /// Start a failed or cancelled task over from attempt zero.
    Retry { id: String },
    /// List tasks, optionally filtered.
    List {
        #[arg(long)]
        queue: Option<String>,

        #[arg(long, value_parser = parse_status)]
        status: Option<TaskStatus>,
    },
}

fn parse_status(raw: &str) -> Result<TaskStatus, String> {
    raw.parse()
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Standalone {
            worker_id,
            objects_dir,
            docker,
        } => {
            standalone::run_standalone(standalone::Options {
                settings,
                data_dir: cli.data_dir,
                worker_id,
                objects_dir,
                docker,
            })
            .await
        }
        Command::Enqueue {
            id,
            payload,
            queue,
            priority,
        } => {
            let store = ops::open_store(&cli.data_dir)?;
            let payload = ops::parse_payload(&payload)?;
            let task = ops::enqueue(&store, &id, payload, queue, priority)?;
            println!("{}", ops::summary(&task));
            Ok(())
        }
        Command::Status { id } => {
            let store = ops::open_store(&cli.data_dir)?;
            let task = ops::status(&store, &id)?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(())
        }
        Command::Cancel { id } => {
            let store = ops::open_store(&cli.data_dir)?;
            println!("{}", ops::cancel(&store, &id)?);
            Ok(())
        }
        Command::Retry { id } => {
            let store = ops::open_store(&cli.data_dir)?;
            let task = ops::rerun(&store, &id)?;
            println!("{}", ops::summary(&task));
            Ok(())
        }
        Command::List { queue, status } => {
            let store = ops::open_store(&cli.data_dir)?;
            for task in ops::list(&store, queue, status)? {
                println!("{}", ops::summary(&task));
            }
            Ok(())
        }
    }
}
