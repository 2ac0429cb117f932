//! Command-line surface for the queuectl job queue.
//!
//! Every subcommand opens the shared SQLite database (at `$QUEUECTL_DB_PATH`
//! or `~/.queuectl/queue.db`) and talks to it through the store operations —
//! the same path worker processes use, so an enqueue here is immediately
//! visible to workers running elsewhere.
//!
//! Usage:
//!   queuectl enqueue '{"command":"echo hi"}'
//!   queuectl worker start --count 4
//!   queuectl status
//!   queuectl dlq retry <id>

use clap::{Parser, Subcommand};
use comfy_table::Table;
use queuectl::{
    EnqueueRequest, Job, JobState, JobStore, Result, SqliteJobQueue, Worker, WorkerPool,
    queue::sqlite::default_db_path,
};
use std::process;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "queuectl",
    version,
    about = "Persistent multi-process job queue for shell commands"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    #[command(about = "Enqueue a job (inline JSON or @path to a JSON file)")]
    Enqueue {
        #[arg(value_name = "JOB_JSON", help = "{\"id\"?, \"command\", \"max_retries\"?}")]
        job_json: String,
    },

    #[command(about = "List jobs")]
    List {
        #[arg(short, long, help = "Filter by state (pending|processing|completed|failed|dead)")]
        state: Option<String>,
    },

    #[command(about = "Show a summary of job states and recent jobs")]
    Status,

    #[command(subcommand, about = "Manage dead-letter queue (DLQ) jobs")]
    Dlq(DlqCommand),

    #[command(subcommand, about = "Get or set shared configuration values")]
    Config(ConfigCommand),

    #[command(subcommand, about = "Run or control worker processes")]
    Worker(WorkerCommand),
}

#[derive(Subcommand)]
enum DlqCommand {
    #[command(about = "List dead jobs")]
    List,

    #[command(about = "Retry a dead job (back to pending with attempts reset)")]
    Retry {
        #[arg(value_name = "ID")]
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    #[command(about = "Get one configuration value, or all of them")]
    Get {
        #[arg(value_name = "KEY")]
        key: Option<String>,
    },

    #[command(about = "Set a configuration value (max_retries, backoff_base, ...)")]
    Set {
        #[arg(value_name = "KEY")]
        key: String,
        #[arg(value_name = "VALUE")]
        value: String,
    },
}

#[derive(Subcommand)]
enum WorkerCommand {
    #[command(about = "Start worker loops in this process")]
    Start {
        #[arg(short, long, default_value_t = 1, help = "Number of workers")]
        count: usize,

        #[arg(short, long, help = "Worker id prefix (default: pid-<pid>)")]
        id: Option<String>,
    },

    #[command(about = "Signal all workers (in every process) to stop gracefully")]
    Stop,

    #[command(about = "Claim and process a single job, then exit")]
    Once {
        #[arg(short, long, default_value_t = 10_000, help = "Max wait for a job, in ms")]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run(command: CliCommand) -> Result<()> {
    let queue = Arc::new(SqliteJobQueue::connect(default_db_path()).await?);

    match command {
        CliCommand::Enqueue { job_json } => {
            let payload = if let Some(path) = job_json.strip_prefix('@') {
                std::fs::read_to_string(path)?
            } else {
                job_json
            };
            let request: EnqueueRequest = serde_json::from_str(&payload)?;
            let job = queue.enqueue(request).await?;
            println!("Enqueued job: {}", job.id);
        }

        CliCommand::List { state } => {
            let filter = state.map(|s| JobState::from_str(&s)).transpose()?;
            let jobs = queue.list_jobs(filter).await?;
            print_job_table(&jobs);
        }

        CliCommand::Status => {
            let counts = queue.job_counts().await?;
            let mut table = Table::new();
            table.set_header(vec!["PENDING", "PROCESSING", "COMPLETED", "FAILED", "DEAD", "TOTAL"]);
            table.add_row(vec![
                counts.pending.to_string(),
                counts.processing.to_string(),
                counts.completed.to_string(),
                counts.failed.to_string(),
                counts.dead.to_string(),
                counts.total().to_string(),
            ]);
            println!("{table}");

            let recent: Vec<Job> = queue.list_jobs(None).await?.into_iter().take(10).collect();
            if !recent.is_empty() {
                println!("\nRecent jobs:");
                print_job_table(&recent);
            }

            if queue.workers_stopped().await? {
                println!("\nNote: the stop flag is set; workers will not pick up jobs.");
            }
        }

        CliCommand::Dlq(DlqCommand::List) => {
            let jobs = queue.dead_jobs().await?;
            let mut table = Table::new();
            table.set_header(vec!["ID", "ATTEMPTS", "ERROR", "COMMAND", "UPDATED AT"]);
            for job in &jobs {
                table.add_row(vec![
                    job.id.clone(),
                    job.attempts.to_string(),
                    job.error.clone().unwrap_or_default(),
                    job.command.clone(),
                    job.updated_at.to_rfc3339(),
                ]);
            }
            println!("{table}");
        }

        CliCommand::Dlq(DlqCommand::Retry { id }) => {
            queue.retry_dead_job(&id).await?;
            println!("Job {id} moved back to pending");
        }

        CliCommand::Config(ConfigCommand::Get { key }) => match key {
            Some(key) => match queue.get_config(&key).await? {
                Some(value) => println!("{value}"),
                None => println!("(unset)"),
            },
            None => {
                let mut table = Table::new();
                table.set_header(vec!["KEY", "VALUE"]);
                for (key, default) in queuectl::config::default_entries() {
                    let value = queue.get_config(key).await?.unwrap_or(default);
                    table.add_row(vec![key.to_string(), value]);
                }
                println!("{table}");
            }
        },

        CliCommand::Config(ConfigCommand::Set { key, value }) => {
            queue.set_config(&key, &value).await?;
            println!("{key} = {value}");
        }

        CliCommand::Worker(WorkerCommand::Start { count, id }) => {
            let prefix = id.unwrap_or_else(|| format!("pid-{}", process::id()));
            let mut pool = WorkerPool::new(Arc::clone(&queue));
            pool.spawn_workers(count, &prefix);
            pool.start().await?;
        }

        CliCommand::Worker(WorkerCommand::Stop) => {
            queue.set_workers_stopped(true).await?;
            println!("Stop signal sent; workers finish their current job and exit.");
        }

        CliCommand::Worker(WorkerCommand::Once { timeout_ms }) => {
            let worker = Worker::new(Arc::clone(&queue), format!("once-{}", Uuid::new_v4()));
            let processed = worker.run_once(Duration::from_millis(timeout_ms)).await?;
            if processed {
                println!("Processed one job.");
            } else {
                println!("No job found within {timeout_ms}ms.");
            }
        }
    }

    Ok(())
}

fn print_job_table(jobs: &[Job]) {
    let mut table = Table::new();
    table.set_header(vec!["ID", "STATE", "ATTEMPTS", "COMMAND", "UPDATED AT"]);
    for job in jobs {
        table.add_row(vec![
            job.id.clone(),
            job.state.to_string(),
            format!("{}/{}", job.attempts, job.max_retries),
            job.command.clone(),
            job.updated_at.to_rfc3339(),
        ]);
    }
    println!("{table}");
}
