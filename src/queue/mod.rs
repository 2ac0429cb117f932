//! The durable job store and its SQLite backend.
//!
//! All coordination between processes happens through the operations defined
//! here; there are no application-level locks. The store operations are
//! defined by the [`JobStore`] trait, with the SQLite realization in the
//! `sqlite` module.

use crate::{
    Result,
    job::{EnqueueRequest, Job, JobState},
    stats::JobCounts,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Database, Pool};
use std::time::Duration;

pub mod sqlite;

/// The main trait defining store operations for the job queue.
///
/// It covers the full lifecycle: enqueue, the atomic claim, the state machine
/// transitions (complete / retry / dead / failed), DLQ replay, inspection
/// reads, and the shared key/value configuration including the cooperative
/// stop flag.
#[async_trait]
pub trait JobStore: Send + Sync {
    type Database: Database;

    // Core job operations
    /// Validate and persist a new pending job, filling defaults
    /// (generated id, `max_retries` from config) for omitted fields.
    ///
    /// Fails with [`crate::QueuectlError::InvalidJob`] on an empty command and
    /// [`crate::QueuectlError::DuplicateJobId`] when the id already exists; in
    /// both cases the store is left unchanged.
    async fn enqueue(&self, request: EnqueueRequest) -> Result<Job>;

    async fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// List jobs, optionally filtered by state, newest first.
    async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>>;

    /// The dead-letter queue: jobs in `dead` state, most recently updated
    /// first.
    async fn dead_jobs(&self) -> Result<Vec<Job>>;

    /// Atomically claim the oldest eligible pending job for `worker_id`.
    ///
    /// Eligible means `state = 'pending'` and `run_at` unset or in the past;
    /// ties go to the earliest `created_at` (FIFO). The selection and the lock
    /// write are one indivisible statement, so concurrent callers can never
    /// claim the same job. Returns `None` — not an error — when nothing is
    /// eligible. Leaves `attempts` and `run_at` untouched.
    async fn claim_job(&self, worker_id: &str) -> Result<Option<Job>>;

    /// `processing -> completed`: record output, clear the lock.
    ///
    /// Like the other worker-driven transitions, the write is fenced on the
    /// caller still holding the claim (`state = 'processing'` and
    /// `locked_by = worker_id`), so a worker whose lease expired and was
    /// reclaimed cannot overwrite its successor's work; the stale caller gets
    /// [`crate::QueuectlError::JobNotFound`] instead.
    async fn complete_job(&self, id: &str, worker_id: &str, output: Option<&str>) -> Result<()>;

    /// `processing -> pending`: increment `attempts`, schedule the next
    /// attempt at `run_at`, clear the lock. Fenced on the caller's claim.
    async fn retry_job(&self, id: &str, worker_id: &str, run_at: DateTime<Utc>) -> Result<()>;

    /// `processing -> dead`: increment `attempts`, record the failure reason,
    /// clear `run_at` and the lock. The job stays in the store as part of the
    /// DLQ. Fenced on the caller's claim.
    async fn mark_job_dead(&self, id: &str, worker_id: &str, error: &str) -> Result<()>;

    /// `processing -> failed`: non-retryable immediate failure. Not produced
    /// by the worker loop, which always routes failures through
    /// [`retry_job`](Self::retry_job) or [`mark_job_dead`](Self::mark_job_dead).
    async fn fail_job(&self, id: &str, error: &str) -> Result<()>;

    /// DLQ replay: `dead -> pending` with `attempts` reset to 0 and
    /// `error`/`run_at` cleared. Fails with
    /// [`crate::QueuectlError::JobNotFound`] when the job is missing or not
    /// dead.
    async fn retry_dead_job(&self, id: &str) -> Result<()>;

    /// Administrative removal. Jobs are never deleted by normal operation.
    async fn delete_job(&self, id: &str) -> Result<()>;

    /// Per-state job totals.
    async fn job_counts(&self) -> Result<JobCounts>;

    // Shared configuration
    async fn get_config(&self, key: &str) -> Result<Option<String>>;

    /// Last-write-wins upsert.
    async fn set_config(&self, key: &str, value: &str) -> Result<()>;

    /// The cooperative stop flag, checked by workers between iterations.
    async fn workers_stopped(&self) -> Result<bool>;

    async fn set_workers_stopped(&self, stopped: bool) -> Result<()>;

    /// Lease recovery: return every `processing` job whose lock is older than
    /// `ttl` to `pending`, clearing the lock and leaving `attempts` untouched.
    /// Returns the number of reclaimed jobs.
    async fn release_expired_leases(&self, ttl: Duration) -> Result<u64>;
}

/// A handle to the shared queue database.
///
/// Cheap to clone; every clone shares the underlying connection pool. The
/// concrete store operations come from the [`JobStore`] implementation for
/// the backend in use ([`SqliteJobQueue`] being the stock one).
pub struct JobQueue<DB: Database> {
    pub pool: Pool<DB>,
}

/// The stock SQLite-backed queue.
pub type SqliteJobQueue = JobQueue<sqlx::Sqlite>;

impl<DB: Database> JobQueue<DB> {
    /// Wrap an existing connection pool. Callers are responsible for having
    /// run [`crate::migrations::migrate`]; prefer the backend's `connect`
    /// (e.g. [`SqliteJobQueue::connect`]) which opens the pool and migrates.
    pub fn new(pool: Pool<DB>) -> Self {
        Self { pool }
    }
}

impl<DB: Database> Clone for JobQueue<DB> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}
