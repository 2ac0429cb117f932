//! Queue-wide runtime policy, stored in the shared database.
//!
//! Configuration lives in the same SQLite file as the jobs so that every
//! process — workers, the CLI, operators — observes one consistent policy.
//! Values are stored as strings and parsed defensively: a garbage value falls
//! back to the built-in default instead of failing the reader.

use crate::Result;
use crate::queue::JobStore;
use std::str::FromStr;
use std::time::Duration;

/// Default retry budget applied when a job is enqueued without one.
pub const MAX_RETRIES: &str = "max_retries";
/// Base of the exponential backoff (`base ^ attempt` seconds).
pub const BACKOFF_BASE: &str = "backoff_base";
/// How long an idle worker sleeps between claim attempts.
pub const WORKER_POLL_INTERVAL_MS: &str = "worker_poll_interval_ms";
/// Claim lease TTL: a `processing` job whose lock is older than this is
/// considered abandoned and returns to `pending`.
pub const LEASE_TTL_MS: &str = "lease_ttl_ms";
/// Cooperative stop flag (`"0"` / `"1"`), checked by every worker between
/// loop iterations.
pub const WORKERS_STOPPED: &str = "workers_stopped";

pub const DEFAULT_MAX_RETRIES: i64 = 3;
pub const DEFAULT_BACKOFF_BASE: u32 = 2;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_LEASE_TTL_MS: u64 = 300_000;

/// Config rows seeded on first migration so operators can discover the knobs
/// with `queuectl config get`.
pub fn default_entries() -> Vec<(&'static str, String)> {
    vec![
        (MAX_RETRIES, DEFAULT_MAX_RETRIES.to_string()),
        (BACKOFF_BASE, DEFAULT_BACKOFF_BASE.to_string()),
        (WORKER_POLL_INTERVAL_MS, DEFAULT_POLL_INTERVAL_MS.to_string()),
        (LEASE_TTL_MS, DEFAULT_LEASE_TTL_MS.to_string()),
        (WORKERS_STOPPED, "0".to_string()),
    ]
}

/// A point-in-time snapshot of the shared runtime policy.
///
/// Workers reload this once per loop iteration, so operator changes take
/// effect without restarting any process (last write wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub max_retries: i64,
    pub backoff_base: u32,
    pub poll_interval: Duration,
    pub lease_ttl: Duration,
}

impl QueuePolicy {
    pub async fn load<S>(store: &S) -> Result<Self>
    where
        S: JobStore + ?Sized,
    {
        Ok(Self {
            max_retries: parse_or(store.get_config(MAX_RETRIES).await?, DEFAULT_MAX_RETRIES),
            backoff_base: parse_or(store.get_config(BACKOFF_BASE).await?, DEFAULT_BACKOFF_BASE),
            poll_interval: Duration::from_millis(parse_or(
                store.get_config(WORKER_POLL_INTERVAL_MS).await?,
                DEFAULT_POLL_INTERVAL_MS,
            )),
            lease_ttl: Duration::from_millis(parse_or(
                store.get_config(LEASE_TTL_MS).await?,
                DEFAULT_LEASE_TTL_MS,
            )),
        })
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            lease_ttl: Duration::from_millis(DEFAULT_LEASE_TTL_MS),
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
