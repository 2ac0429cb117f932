use crate::error::QueuectlError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job identifiers are caller-supplied strings; a UUIDv4 is generated when the
/// caller does not provide one.
pub type JobId = String;

/// Retry delays are capped so `run_at` arithmetic stays in range even for
/// absurd backoff configurations.
const MAX_BACKOFF_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    /// Non-retryable terminal failure. The worker loop never produces this
    /// state; it exists for callers that need an immediate-failure path.
    Failed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueuectlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(QueuectlError::UnknownState(other.to_string())),
        }
    }
}

/// A unit of work: an opaque shell command plus queue bookkeeping.
///
/// `id`, `command`, `max_retries`, and `created_at` are immutable after
/// insertion. Everything else is mutated only by the claim protocol and the
/// state machine transitions on [`crate::queue::JobStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub state: JobState,
    pub attempts: i64,
    pub max_retries: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Eligibility gate: the job may only be claimed when this is `None` or in
    /// the past. Set by the retry transition to implement backoff.
    pub run_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub output: Option<String>,
}

impl Job {
    /// Whether the next failure would exhaust this job's retry budget and
    /// send it to the dead-letter queue.
    pub fn retries_exhausted(&self) -> bool {
        self.attempts + 1 > self.max_retries
    }
}

/// Description of a job to enqueue: `{id?, command, max_retries?}`.
///
/// When `id` is omitted a UUIDv4 is generated; when `max_retries` is omitted
/// the queue-wide `max_retries` config value applies at insert time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    #[serde(default)]
    pub id: Option<JobId>,
    pub command: String,
    #[serde(default)]
    pub max_retries: Option<i64>,
}

impl EnqueueRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: None,
            command: command.into(),
            max_retries: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Delay before a failed job becomes eligible again: `base ^ attempt` seconds,
/// where `attempt` is the attempt count *after* the failure being handled.
///
/// Purely deterministic, no jitter. Saturates rather than overflowing.
pub fn backoff_delay(base: u32, attempt: i64) -> Duration {
    let exp = attempt.clamp(0, u32::MAX as i64) as u32;
    let secs = (base as u64).saturating_pow(exp).min(MAX_BACKOFF_SECS);
    Duration::seconds(secs as i64)
}
