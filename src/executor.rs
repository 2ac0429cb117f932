//! The command execution boundary.
//!
//! Executing a job is logically a capability — "run this string, observe the
//! exit classification" — kept behind a trait so the state machine never
//! depends on a particular spawning primitive. Alternative backends
//! (containerized execution, remote execution) can be substituted without
//! touching the worker or the store.

use async_trait::async_trait;
use tokio::process::Command;

/// Result of one execution attempt.
///
/// `success` is the only field the state machine looks at; `exit_code` and
/// `output` are diagnostics recorded on the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// `None` when the process never started or was killed by a signal.
    pub exit_code: Option<i32>,
    /// Combined stdout/stderr, or the spawn error text.
    pub output: String,
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute a command to completion.
    ///
    /// This is infallible by contract: a command that cannot be started is an
    /// execution failure like any other, reported through the outcome rather
    /// than as an error.
    async fn execute(&self, command: &str) -> ExecutionOutcome;
}

/// Default backend: runs the command through `sh -c` and captures combined
/// stdout/stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellExecutor;

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &str) -> ExecutionOutcome {
        match Command::new("sh").arg("-c").arg(command).output().await {
            Ok(out) => {
                let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&out.stderr);
                if !stderr.is_empty() {
                    if !output.is_empty() && !output.ends_with('\n') {
                        output.push('\n');
                    }
                    output.push_str(&stderr);
                }
                ExecutionOutcome {
                    success: out.status.success(),
                    exit_code: out.status.code(),
                    output,
                }
            }
            Err(e) => ExecutionOutcome {
                success: false,
                exit_code: None,
                output: format!("failed to spawn command: {e}"),
            },
        }
    }
}
