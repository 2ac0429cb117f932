//! Schema setup for the shared queue database.
//!
//! The schema is small enough that migration is a single idempotent pass:
//! `CREATE TABLE IF NOT EXISTS` plus `INSERT OR IGNORE` for the default
//! config rows. Every process runs this on connect, so the first one to touch
//! a fresh database initializes it and the rest are no-ops.
//!
//! Timestamps are stored as integer Unix milliseconds rather than text so the
//! claim query's eligibility comparison (`run_at <= now`) and FIFO ordering
//! are exact.

use crate::Result;
use crate::config;
use sqlx::SqlitePool;
use tracing::debug;

const CREATE_JOBS: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id          TEXT PRIMARY KEY,
        command     TEXT NOT NULL,
        state       TEXT NOT NULL DEFAULT 'pending',
        attempts    INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 3,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL,
        run_at      INTEGER,
        locked_by   TEXT,
        locked_at   INTEGER,
        error       TEXT,
        output      TEXT
    )
"#;

const CREATE_CLAIM_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs (state, run_at, created_at)
"#;

const CREATE_CONFIG: &str = r#"
    CREATE TABLE IF NOT EXISTS config (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
"#;

/// Create tables and indexes and seed default config rows. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(CREATE_JOBS).execute(pool).await?;
    sqlx::query(CREATE_CLAIM_INDEX).execute(pool).await?;
    sqlx::query(CREATE_CONFIG).execute(pool).await?;

    for (key, value) in config::default_entries() {
        sqlx::query("INSERT OR IGNORE INTO config (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
    }

    debug!("queue schema up to date");
    Ok(())
}
