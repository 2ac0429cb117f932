//! SQLite realization of the job store.
//!
//! One database file is the sole coordination point for every process.
//! Mutual exclusion comes from SQLite itself: each mutation here is a single
//! statement, and the claim conditions its write on the row still being
//! `pending` at commit time, so SQLite's write serialization makes the
//! select-and-lock indivisible. WAL mode plus a busy timeout keep concurrent
//! readers and writers from tripping over each other.

use super::{JobQueue, JobStore, SqliteJobQueue};
use crate::{
    QueuectlError, Result,
    config::{QueuePolicy, WORKERS_STOPPED},
    job::{EnqueueRequest, Job, JobState},
    migrations,
    stats::JobCounts,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{
    Row, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous},
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, created_at, updated_at, \
                           run_at, locked_by, locked_at, error, output";

impl SqliteJobQueue {
    /// Open (creating if necessary) the queue database at `path` and bring
    /// its schema up to date.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrations::migrate(&pool).await?;
        Ok(JobQueue::new(pool))
    }
}

/// Database location shared by all processes: `$QUEUECTL_DB_PATH` when set,
/// otherwise `~/.queuectl/queue.db`.
pub fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("QUEUECTL_DB_PATH") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".queuectl")
        .join("queue.db")
}

#[async_trait]
impl JobStore for SqliteJobQueue {
    type Database = Sqlite;

    async fn enqueue(&self, request: EnqueueRequest) -> Result<Job> {
        if request.command.trim().is_empty() {
            return Err(QueuectlError::InvalidJob {
                message: "job must include a non-empty \"command\"".to_string(),
            });
        }
        if let Some(n) = request.max_retries {
            if n < 0 {
                return Err(QueuectlError::InvalidJob {
                    message: format!("max_retries must be >= 0, got {n}"),
                });
            }
        }

        let id = request.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let max_retries = match request.max_retries {
            Some(n) => n,
            None => QueuePolicy::load(self).await?.max_retries,
        };
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            "INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at) \
             VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4)",
        )
        .bind(&id)
        .bind(&request.command)
        .bind(max_retries)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                QueuectlError::DuplicateJobId { id: id.clone() }
            } else {
                QueuectlError::Database(e)
            }
        })?;

        self.get_job(&id)
            .await?
            .ok_or(QueuectlError::JobNotFound { id })
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let rows = match state {
            Some(state) => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY created_at DESC"
                ))
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(job_from_row).collect()
    }

    async fn dead_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE state = 'dead' ORDER BY updated_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn claim_job(&self, worker_id: &str) -> Result<Option<Job>> {
        let now = Utc::now().timestamp_millis();

        // Single statement: the subquery picks the FIFO candidate and the
        // outer `state = 'pending'` guard makes the lock conditional on the
        // row still being unclaimed when the write lands. A concurrent claim
        // that commits first re-routes this one to the next candidate or to
        // no rows at all.
        let row = sqlx::query(&format!(
            "UPDATE jobs \
             SET state = 'processing', locked_by = ?1, locked_at = ?2, updated_at = ?2 \
             WHERE state = 'pending' \
               AND id = (\
                   SELECT id FROM jobs \
                   WHERE state = 'pending' AND (run_at IS NULL OR run_at <= ?2) \
                   ORDER BY created_at ASC \
                   LIMIT 1\
               ) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn complete_job(&self, id: &str, worker_id: &str, output: Option<&str>) -> Result<()> {
        // fenced on the claim: a stale worker whose lease was reclaimed must
        // not overwrite the successor's processing row
        let result = sqlx::query(
            "UPDATE jobs \
             SET state = 'completed', output = ?2, updated_at = ?3, \
                 locked_by = NULL, locked_at = NULL \
             WHERE id = ?1 AND state = 'processing' AND locked_by = ?4",
        )
        .bind(id)
        .bind(output)
        .bind(Utc::now().timestamp_millis())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        require_row(result.rows_affected(), id)
    }

    async fn retry_job(&self, id: &str, worker_id: &str, run_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET state = 'pending', attempts = attempts + 1, run_at = ?2, updated_at = ?3, \
                 locked_by = NULL, locked_at = NULL \
             WHERE id = ?1 AND state = 'processing' AND locked_by = ?4",
        )
        .bind(id)
        .bind(run_at.timestamp_millis())
        .bind(Utc::now().timestamp_millis())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        require_row(result.rows_affected(), id)
    }

    async fn mark_job_dead(&self, id: &str, worker_id: &str, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET state = 'dead', attempts = attempts + 1, error = ?2, run_at = NULL, \
                 updated_at = ?3, locked_by = NULL, locked_at = NULL \
             WHERE id = ?1 AND state = 'processing' AND locked_by = ?4",
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now().timestamp_millis())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        require_row(result.rows_affected(), id)
    }

    async fn fail_job(&self, id: &str, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET state = 'failed', error = ?2, updated_at = ?3, \
                 locked_by = NULL, locked_at = NULL \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        require_row(result.rows_affected(), id)
    }

    async fn retry_dead_job(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET state = 'pending', attempts = 0, error = NULL, run_at = NULL, updated_at = ?2 \
             WHERE id = ?1 AND state = 'dead'",
        )
        .bind(id)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        // a job that exists but is not dead is not replayable
        require_row(result.rows_affected(), id)
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        require_row(result.rows_affected(), id)
    }

    async fn job_counts(&self) -> Result<JobCounts> {
        let row = sqlx::query(
            "SELECT \
               COALESCE(SUM(CASE WHEN state = 'pending'    THEN 1 ELSE 0 END), 0) AS pending, \
               COALESCE(SUM(CASE WHEN state = 'processing' THEN 1 ELSE 0 END), 0) AS processing, \
               COALESCE(SUM(CASE WHEN state = 'completed'  THEN 1 ELSE 0 END), 0) AS completed, \
               COALESCE(SUM(CASE WHEN state = 'failed'     THEN 1 ELSE 0 END), 0) AS failed, \
               COALESCE(SUM(CASE WHEN state = 'dead'       THEN 1 ELSE 0 END), 0) AS dead \
             FROM jobs",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(JobCounts {
            pending: row.try_get::<i64, _>("pending")?.max(0) as u64,
            processing: row.try_get::<i64, _>("processing")?.max(0) as u64,
            completed: row.try_get::<i64, _>("completed")?.max(0) as u64,
            failed: row.try_get::<i64, _>("failed")?.max(0) as u64,
            dead: row.try_get::<i64, _>("dead")?.max(0) as u64,
        })
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn workers_stopped(&self) -> Result<bool> {
        Ok(self.get_config(WORKERS_STOPPED).await?.as_deref() == Some("1"))
    }

    async fn set_workers_stopped(&self, stopped: bool) -> Result<()> {
        self.set_config(WORKERS_STOPPED, if stopped { "1" } else { "0" })
            .await
    }

    async fn release_expired_leases(&self, ttl: Duration) -> Result<u64> {
        let now = Utc::now();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.timestamp_millis().saturating_sub(ttl_ms);

        let result = sqlx::query(
            "UPDATE jobs \
             SET state = 'pending', locked_by = NULL, locked_at = NULL, updated_at = ?1 \
             WHERE state = 'processing' AND locked_at IS NOT NULL AND locked_at <= ?2",
        )
        .bind(now.timestamp_millis())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn require_row(rows_affected: u64, id: &str) -> Result<()> {
    if rows_affected == 0 {
        Err(QueuectlError::JobNotFound { id: id.to_string() })
    } else {
        Ok(())
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let state: String = row.try_get("state")?;
    Ok(Job {
        id: row.try_get("id")?,
        command: row.try_get("command")?,
        state: state.parse()?,
        attempts: row.try_get("attempts")?,
        max_retries: row.try_get("max_retries")?,
        created_at: datetime_from_millis(row.try_get("created_at")?),
        updated_at: datetime_from_millis(row.try_get("updated_at")?),
        run_at: row
            .try_get::<Option<i64>, _>("run_at")?
            .map(datetime_from_millis),
        locked_by: row.try_get("locked_by")?,
        locked_at: row
            .try_get::<Option<i64>, _>("locked_at")?
            .map(datetime_from_millis),
        error: row.try_get("error")?,
        output: row.try_get("output")?,
    })
}

fn datetime_from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
