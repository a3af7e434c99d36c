//! Sandbox interface
//!
//! The sandbox is an isolated filesystem plus shell. The engine only ever
//! performs full-file overwrites and bounded command executions, which is
//! what makes a retried step idempotent at the file-write level.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Synthetic exit code reported for a timed-out command (shell convention)
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Result of one command execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Process exit code
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited cleanly
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Output representing a command that hit its timeout
    ///
    /// Timeouts are command failures, not infrastructure failures; they
    /// enter the self-correction loop like any other nonzero exit.
    #[must_use]
    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("command timed out after {}s", timeout.as_secs()),
        }
    }
}

/// Sandbox infrastructure failures
///
/// These abort the step outright; command-level failures are expressed as
/// nonzero exit codes in [`CommandOutput`] instead.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// File write failed
    #[error("file write failed for {path}: {message}")]
    WriteFailed {
        /// Target path
        path: String,
        /// Failure detail
        message: String,
    },

    /// The sandbox itself is unreachable or broken
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
}

/// Isolated filesystem + shell the engine writes to and runs commands in
#[async_trait]
pub trait SandboxClient: Send + Sync {
    /// Write a file, replacing any existing content at the path
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError>;

    /// Run a shell command with a timeout
    ///
    /// Implementations must map a timeout to [`CommandOutput::timed_out`]
    /// rather than an error, so it flows through self-correction.
    async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError>;
}
