//! Worker loops that drive claim -> execute -> transition.
//!
//! Workers coordinate purely through the shared store: the claim protocol
//! hands each eligible job to at most one of them, and the cooperative stop
//! flag (a config row) is checked between iterations so a worker always
//! finishes its current job before exiting. Command failures are never loop
//! errors — they become retry or DLQ transitions.

use crate::{
    QueuectlError, Result,
    config::QueuePolicy,
    executor::{CommandExecutor, ShellExecutor},
    job::{Job, backoff_delay},
    queue::{JobQueue, JobStore},
};
use chrono::Utc;
use sqlx::Database;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

/// Pause after an unexpected internal error (store unavailable and the like)
/// before the loop carries on.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// A named polling worker bound to a shared queue.
///
/// Any number of `Worker`s may run concurrently, in one process or many; the
/// store's claim protocol keeps them from double-executing a job.
pub struct Worker<DB: Database> {
    queue: Arc<JobQueue<DB>>,
    worker_id: String,
    executor: Arc<dyn CommandExecutor>,
    /// When set, overrides the configured `worker_poll_interval_ms`.
    poll_interval: Option<Duration>,
}

impl<DB> Worker<DB>
where
    DB: Database + Send + Sync + 'static,
    JobQueue<DB>: JobStore<Database = DB>,
{
    pub fn new(queue: Arc<JobQueue<DB>>, worker_id: impl Into<String>) -> Self {
        Self {
            queue,
            worker_id: worker_id.into(),
            executor: Arc::new(ShellExecutor),
            poll_interval: None,
        }
    }

    /// Substitute a different execution backend.
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run until the shared stop flag is raised.
    ///
    /// The loop body never terminates the loop: internal errors are logged
    /// and followed by a short sleep, and job execution failures always turn
    /// into state transitions.
    pub async fn run(&self) -> Result<()> {
        info!(worker = %self.worker_id, "worker started");

        loop {
            match self.queue.workers_stopped().await {
                Ok(true) => {
                    info!(worker = %self.worker_id, "stop signal received, exiting gracefully");
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(worker = %self.worker_id, error = %e, "failed to read stop flag");
                    sleep(ERROR_BACKOFF).await;
                    continue;
                }
            }

            if let Err(e) = self.tick().await {
                error!(worker = %self.worker_id, error = %e, "unexpected worker error");
                sleep(ERROR_BACKOFF).await;
            }
        }

        info!(worker = %self.worker_id, "worker stopped");
        Ok(())
    }

    /// Single-shot mode: claim and process one job, waiting up to `timeout`
    /// for one to become eligible. Returns whether a job was processed.
    pub async fn run_once(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;

        loop {
            let policy = QueuePolicy::load(self.queue.as_ref()).await?;
            self.reclaim_leases(&policy).await?;

            if let Some(job) = self.queue.claim_job(&self.worker_id).await? {
                self.process_job(job, &policy).await?;
                return Ok(true);
            }

            let poll = self.poll_interval.unwrap_or(policy.poll_interval);
            if Instant::now() + poll >= deadline {
                debug!(worker = %self.worker_id, "no job claimed within timeout");
                return Ok(false);
            }
            sleep(poll).await;
        }
    }

    async fn tick(&self) -> Result<()> {
        let policy = QueuePolicy::load(self.queue.as_ref()).await?;
        self.reclaim_leases(&policy).await?;

        match self.queue.claim_job(&self.worker_id).await? {
            Some(job) => self.process_job(job, &policy).await,
            None => {
                sleep(self.poll_interval.unwrap_or(policy.poll_interval)).await;
                Ok(())
            }
        }
    }

    async fn reclaim_leases(&self, policy: &QueuePolicy) -> Result<()> {
        let reclaimed = self.queue.release_expired_leases(policy.lease_ttl).await?;
        if reclaimed > 0 {
            warn!(worker = %self.worker_id, count = reclaimed, "released expired job leases");
        }
        Ok(())
    }

    async fn process_job(&self, job: Job, policy: &QueuePolicy) -> Result<()> {
        debug!(worker = %self.worker_id, job = %job.id, command = %job.command, "claimed job");

        let outcome = self.executor.execute(&job.command).await;

        if outcome.success {
            let output = (!outcome.output.is_empty()).then_some(outcome.output.as_str());
            self.queue
                .complete_job(&job.id, &self.worker_id, output)
                .await?;
            info!(worker = %self.worker_id, job = %job.id, "job completed");
            return Ok(());
        }

        let next_attempts = job.attempts + 1;
        if next_attempts > job.max_retries {
            let reason = format!("exhausted after {next_attempts} attempts");
            self.queue
                .mark_job_dead(&job.id, &self.worker_id, &reason)
                .await?;
            warn!(
                worker = %self.worker_id,
                job = %job.id,
                attempts = next_attempts,
                "job moved to DLQ"
            );
        } else {
            let delay = backoff_delay(policy.backoff_base, next_attempts);
            self.queue
                .retry_job(&job.id, &self.worker_id, Utc::now() + delay)
                .await?;
            info!(
                worker = %self.worker_id,
                job = %job.id,
                attempt = next_attempts,
                delay_secs = delay.num_seconds(),
                "retry scheduled"
            );
        }
        Ok(())
    }
}

/// A set of workers run as tasks within one process.
///
/// Stopping is process-wide and cooperative: [`WorkerPool::shutdown`] raises
/// the shared flag in the store, which also stops workers in *other*
/// processes pointed at the same database.
pub struct WorkerPool<DB: Database> {
    queue: Arc<JobQueue<DB>>,
    workers: Vec<Worker<DB>>,
}

impl<DB> WorkerPool<DB>
where
    DB: Database + Send + Sync + 'static,
    JobQueue<DB>: JobStore<Database = DB>,
{
    pub fn new(queue: Arc<JobQueue<DB>>) -> Self {
        Self {
            queue,
            workers: Vec::new(),
        }
    }

    pub fn add_worker(&mut self, worker: Worker<DB>) {
        self.workers.push(worker);
    }

    /// Add `count` workers named `{prefix}-1` .. `{prefix}-{count}`.
    pub fn spawn_workers(&mut self, count: usize, prefix: &str) {
        for i in 1..=count {
            self.workers.push(Worker::new(
                Arc::clone(&self.queue),
                format!("{prefix}-{i}"),
            ));
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Clear the stop flag and run every worker until it is raised again.
    pub async fn start(&mut self) -> Result<()> {
        self.queue.set_workers_stopped(false).await?;
        info!(count = self.workers.len(), "starting workers");

        let mut handles = Vec::new();
        for worker in self.workers.drain(..) {
            handles.push(tokio::spawn(async move {
                if let Err(e) = worker.run().await {
                    error!(error = %e, "worker exited with error");
                }
            }));
        }

        for handle in handles {
            handle.await.map_err(|e| QueuectlError::Worker {
                message: format!("worker task failed: {e}"),
            })?;
        }

        info!("all workers exited");
        Ok(())
    }

    /// Raise the shared stop flag. Workers finish their current job, then
    /// exit at the top of their next iteration.
    pub async fn shutdown(&self) -> Result<()> {
        info!("sending stop signal to workers");
        self.queue.set_workers_stopped(true).await
    }
}
