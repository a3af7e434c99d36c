//! Engine configuration

use crate::retry::RetryPolicy;
use std::time::Duration;

/// Tunables for step execution
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-command timeout inside the sandbox
    pub command_timeout: Duration,
    /// Total attempt cap in the command self-correction loop
    pub max_command_attempts: u32,
    /// How many prior step results are summarized into the prompt
    pub history_summary_limit: usize,
    /// Retry policy wrapped around oracle calls
    pub oracle_retry: RetryPolicy,
}

impl EngineConfig {
    /// Create the default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With command timeout
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// With command attempt cap
    #[inline]
    #[must_use]
    pub fn with_max_command_attempts(mut self, attempts: u32) -> Self {
        self.max_command_attempts = attempts.max(1);
        self
    }

    /// With history summary bound
    #[inline]
    #[must_use]
    pub fn with_history_summary_limit(mut self, limit: usize) -> Self {
        self.history_summary_limit = limit;
        self
    }

    /// With oracle retry policy
    #[inline]
    #[must_use]
    pub fn with_oracle_retry(mut self, policy: RetryPolicy) -> Self {
        self.oracle_retry = policy;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(300),
            max_command_attempts: 3,
            history_summary_limit: 20,
            oracle_retry: RetryPolicy::new(3),
        }
    }
}
