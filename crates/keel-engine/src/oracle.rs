//! Code-generation oracle interface
//!
//! The oracle is a text-in/text-out collaborator: given a prompt it returns
//! unstructured text containing code blocks, shell blocks, and a summary.
//! Nothing in the engine depends on which model or service sits behind it.

use async_trait::async_trait;
use std::time::Duration;

/// Oracle call failures
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// The call exceeded its time budget
    #[error("oracle request timed out after {0:?}")]
    Timeout(Duration),

    /// Network failure or 5xx-class response
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    /// The oracle refused or could not serve the request
    #[error("oracle rejected request: {0}")]
    Rejected(String),
}

impl OracleError {
    /// Whether a retry with backoff is worthwhile
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

/// Text-in/text-out code-generation service
#[async_trait]
pub trait CodeGenerationOracle: Send + Sync {
    /// Produce a completion for the prompt
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}
