//! Engine error taxonomy

use crate::extractor::ExtractError;
use crate::oracle::OracleError;
use crate::sandbox::SandboxError;
use keel_core::{AgentStatus, StoreError};

/// Errors surfaced by the execution engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The project status forbids advancing a step right now
    #[error("cannot advance while status is {current}")]
    InvalidState {
        /// Status observed at rejection time
        current: AgentStatus,
    },

    /// No executable plan on the project
    #[error("project has no executable plan")]
    PlanMissing,

    /// Oracle call failed after retries
    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// Oracle reply could not be parsed
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// A sandbox file write failed; the step aborts immediately
    #[error("file write failed for {path}: {message}")]
    FileWrite {
        /// Target path
        path: String,
        /// Failure detail
        message: String,
    },

    /// Sandbox infrastructure failure
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// A command still failed after the self-correction budget
    #[error("command exhausted {attempts} attempts: {command}")]
    CommandExhausted {
        /// The last command tried
        command: String,
        /// Attempts consumed
        attempts: u32,
        /// stderr of the final attempt
        stderr: String,
    },

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether simply triggering the step again is a reasonable recovery
    ///
    /// Self-correction exhaustion and unparseable replies need manual
    /// attention; transient oracle/store/sandbox trouble does not.
    #[inline]
    #[must_use]
    pub fn is_retry_safe(&self) -> bool {
        match self {
            Self::Oracle(err) => err.is_transient(),
            Self::Sandbox(_) | Self::Store(_) | Self::FileWrite { .. } => true,
            Self::InvalidState { .. }
            | Self::PlanMissing
            | Self::Extract(_)
            | Self::CommandExhausted { .. } => false,
        }
    }

    /// Human-readable guidance for the failure
    #[must_use]
    pub fn user_guidance(&self) -> String {
        if self.is_retry_safe() {
            format!("{self} (retry is safe)")
        } else {
            format!("{self} (manual action required)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn transient_oracle_errors_are_retry_safe() {
        let err = EngineError::Oracle(OracleError::Timeout(Duration::from_secs(30)));
        assert!(err.is_retry_safe());
        assert!(err.user_guidance().contains("retry is safe"));
    }

    #[test]
    fn exhaustion_requires_manual_action() {
        let err = EngineError::CommandExhausted {
            command: "npm test".into(),
            attempts: 3,
            stderr: "1 failing".into(),
        };
        assert!(!err.is_retry_safe());
        assert!(err.user_guidance().contains("manual action required"));
    }

    #[test]
    fn invalid_state_names_the_status() {
        let err = EngineError::InvalidState {
            current: AgentStatus::Executing,
        };
        assert!(err.to_string().contains("EXECUTING"));
    }
}
