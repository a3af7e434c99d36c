//! Command self-correction loop
//!
//! Recovers from failing shell commands without human intervention: each
//! failure is fed back to the oracle, which may answer with a corrected
//! command or refuse with the literal sentinel. The loop is hard-capped by
//! the attempt budget and every attempt lands in the audit log, so the full
//! remediation trail survives in the step result.

use crate::extractor::ResponseExtractor;
use crate::oracle::{CodeGenerationOracle, OracleError};
use crate::sandbox::SandboxClient;
use keel_core::{CommandAttempt, RetryPolicy};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Literal refusal sentinel the oracle answers when no fix exists
pub const CANNOT_FIX_SENTINEL: &str = "Cannot fix.";

/// How a correction run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionOutcome {
    /// Some attempt exited 0
    Succeeded,
    /// The attempt budget ran out
    Exhausted,
    /// The oracle answered the sentinel or proposed nothing
    Refused,
    /// Sandbox or oracle infrastructure failed mid-loop
    Infrastructure {
        /// Failure detail
        message: String,
    },
}

/// Full record of one correction run
#[derive(Debug, Clone)]
pub struct CorrectionLog {
    /// Every attempt, in order, with 1-based numbering
    pub attempts: Vec<CommandAttempt>,
    /// Terminal outcome
    pub outcome: CorrectionOutcome,
    /// stderr of the final executed attempt
    pub last_stderr: String,
}

impl CorrectionLog {
    /// Whether the command ultimately succeeded
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == CorrectionOutcome::Succeeded
    }
}

/// Bounded oracle-assisted retry loop for shell commands
pub struct CommandSelfCorrector<'a> {
    oracle: &'a dyn CodeGenerationOracle,
    sandbox: &'a dyn SandboxClient,
    extractor: ResponseExtractor,
    max_attempts: u32,
    command_timeout: Duration,
    oracle_retry: RetryPolicy,
}

impl<'a> CommandSelfCorrector<'a> {
    /// Create a corrector over the given collaborators
    #[must_use]
    pub fn new(
        oracle: &'a dyn CodeGenerationOracle,
        sandbox: &'a dyn SandboxClient,
        max_attempts: u32,
        command_timeout: Duration,
        oracle_retry: RetryPolicy,
    ) -> Self {
        Self {
            oracle,
            sandbox,
            extractor: ResponseExtractor::new(),
            max_attempts: max_attempts.max(1),
            command_timeout,
            oracle_retry,
        }
    }

    /// Run a command, self-correcting on failure up to the attempt budget
    ///
    /// Termination is guaranteed by the cap: the log never holds more than
    /// `max_attempts` entries.
    pub async fn run(&self, task_description: &str, command: &str) -> CorrectionLog {
        let mut log = CorrectionLog {
            attempts: Vec::new(),
            outcome: CorrectionOutcome::Exhausted,
            last_stderr: String::new(),
        };
        let mut active = command.to_string();

        for attempt in 1..=self.max_attempts {
            let output = match self.sandbox.run_command(&active, self.command_timeout).await {
                Ok(output) => output,
                Err(err) => {
                    warn!(command = %active, attempt, error = %err, "sandbox failure during command run");
                    log.outcome = CorrectionOutcome::Infrastructure {
                        message: err.to_string(),
                    };
                    return log;
                }
            };

            let mut record = CommandAttempt {
                command: active.clone(),
                attempt,
                exit_code: output.exit_code,
                stdout: non_empty(&output.stdout),
                stderr: non_empty(&output.stderr),
                corrected_command: None,
            };
            log.last_stderr = output.stderr.clone();

            if output.success() {
                debug!(command = %active, attempt, "command succeeded");
                log.attempts.push(record);
                log.outcome = CorrectionOutcome::Succeeded;
                return log;
            }

            info!(
                command = %active,
                attempt,
                exit_code = output.exit_code,
                "command failed"
            );

            if attempt == self.max_attempts {
                log.attempts.push(record);
                log.outcome = CorrectionOutcome::Exhausted;
                return log;
            }

            // Fix prompts go through the same retry policy as the step
            // prompt; a transient 5xx mid-correction is not infrastructure.
            let prompt = fix_prompt(task_description, &active, &output.exit_code, &output);
            let reply = match self
                .oracle_retry
                .run(OracleError::is_transient, || self.oracle.complete(&prompt))
                .await
            {
                Ok(reply) => reply,
                Err(err) => {
                    log.attempts.push(record);
                    log.outcome = CorrectionOutcome::Infrastructure {
                        message: err.to_string(),
                    };
                    return log;
                }
            };

            if reply.contains(CANNOT_FIX_SENTINEL) {
                info!(command = %active, "oracle declined to fix");
                log.attempts.push(record);
                log.outcome = CorrectionOutcome::Refused;
                return log;
            }

            match self.extractor.extract_fix_command(&reply) {
                Some(fix) => {
                    record.corrected_command = Some(fix.clone());
                    log.attempts.push(record);
                    active = fix;
                }
                None => {
                    log.attempts.push(record);
                    log.outcome = CorrectionOutcome::Refused;
                    return log;
                }
            }
        }

        log
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn fix_prompt(
    task_description: &str,
    command: &str,
    exit_code: &i32,
    output: &crate::sandbox::CommandOutput,
) -> String {
    format!(
        "While working on the task below, a shell command failed.\n\
         Task: {task_description}\n\
         Command: {command}\n\
         Exit code: {exit_code}\n\
         Stdout:\n{}\n\
         Stderr:\n{}\n\
         Reply with ONLY a single corrected shell command, or with the exact \
         sentence \"{CANNOT_FIX_SENTINEL}\" if no fix is possible.",
        output.stdout, output.stderr
    )
}
