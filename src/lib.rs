//! # queuectl
//!
//! A persistent, multi-process job queue for shell commands, backed by a single
//! shared SQLite database.
//!
//! Clients enqueue jobs into the durable store; any number of independent
//! worker processes poll it, atomically claim jobs, execute their commands
//! out-of-process, and report outcomes. Failed jobs are retried with
//! exponential backoff up to a per-job limit, after which they land in the
//! dead-letter queue (DLQ) for inspection and manual replay.
//!
//! ## Features
//!
//! - **Durable store**: a single SQLite file (WAL mode) shared by every
//!   process; no lock service, no in-memory coordination
//! - **Atomic claims**: a job is handed to at most one worker, even with many
//!   processes polling concurrently
//! - **Retries with backoff**: deterministic exponential delay
//!   (`backoff_base ^ attempt`), configurable per queue and per job
//! - **Dead-letter queue**: exhausted jobs are retained with their failure
//!   reason and can be replayed with a reset attempt counter
//! - **Lease recovery**: claims expire after a configurable TTL, so jobs held
//!   by a crashed worker become claimable again
//! - **Cooperative stop**: a shared flag lets workers finish their current job
//!   and exit cleanly
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use queuectl::{EnqueueRequest, JobQueue, Worker, queue::JobStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> queuectl::Result<()> {
//!     // Every process pointing at the same file shares one job pool.
//!     let queue = Arc::new(JobQueue::connect("queue.db").await?);
//!
//!     let job = queue
//!         .enqueue(EnqueueRequest::new("echo hello").with_max_retries(2))
//!         .await?;
//!     println!("enqueued {}", job.id);
//!
//!     // Claim and process a single job, waiting up to five seconds for one
//!     // to become eligible.
//!     let worker = Worker::new(Arc::clone(&queue), "worker-1");
//!     worker.run_once(Duration::from_secs(5)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Jobs
//!
//! A [`Job`] is an opaque shell command plus queue bookkeeping: state
//! (`pending`, `processing`, `completed`, `failed`, `dead`), attempt counter,
//! retry limit, eligibility time, and lock ownership. Jobs are created through
//! [`EnqueueRequest`] and mutated only by the claim protocol and the state
//! machine transitions on [`queue::JobStore`].
//!
//! ### Workers
//!
//! A [`Worker`] is a named polling loop: check the shared stop flag, reclaim
//! expired leases, claim the oldest eligible job, run its command via a
//! [`CommandExecutor`], and record the outcome. Execution failure is never a
//! worker error; it always becomes a retry or a DLQ transition. A
//! [`WorkerPool`] runs several workers inside one process.
//!
//! ### Configuration
//!
//! Runtime policy (`max_retries`, `backoff_base`, `worker_poll_interval_ms`,
//! `lease_ttl_ms`, `workers_stopped`) lives in the same database, so every
//! process observes a consistent, operator-adjustable policy.

pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod migrations;
pub mod queue;
pub mod stats;
pub mod worker;

pub use config::QueuePolicy;
pub use error::QueuectlError;
pub use executor::{CommandExecutor, ExecutionOutcome, ShellExecutor};
pub use job::{EnqueueRequest, Job, JobId, JobState};
pub use queue::{JobQueue, JobStore, SqliteJobQueue};
pub use stats::JobCounts;
pub use worker::{Worker, WorkerPool};

/// Convenient type alias for Results with [`QueuectlError`] as the error type.
pub type Result<T> = std::result::Result<T, QueuectlError>;
