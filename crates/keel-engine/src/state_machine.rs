//! Execution state machine
//!
//! The authoritative transition table for [`AgentStatus`]. The status field
//! is the engine's re-entrancy guard: advancing a step is legal only from
//! the states listed in [`advance_allowed_from`], and the transition into
//! `Executing` happens before any long-running work starts.

use crate::error::EngineError;
use keel_core::AgentStatus;

/// States from which "advance one step" may be accepted
pub const ADVANCE_ALLOWED_FROM: &[AgentStatus] = &[
    AgentStatus::ReadyToExecute,
    AgentStatus::PausedAfterStep,
    AgentStatus::PausedForPreview,
    AgentStatus::Error,
];

/// Whether a step advance may start from this status
#[inline]
#[must_use]
pub fn advance_allowed_from(status: AgentStatus) -> bool {
    ADVANCE_ALLOWED_FROM.contains(&status)
}

/// Legal transitions out of a status
#[must_use]
pub fn allowed_transitions(from: AgentStatus) -> Vec<AgentStatus> {
    use AgentStatus::*;
    match from {
        // Side branches out of planning are entered by the planning
        // phase, not by execution.
        Planning => vec![ReadyToExecute, PendingUserInput, PendingConfiguration, Error],
        PendingUserInput => vec![Planning],
        PendingConfiguration => vec![Planning],
        ReadyToExecute => vec![Executing, Planning],
        PausedAfterStep => vec![Executing, Planning],
        PausedForPreview => vec![Executing, Planning],
        Error => vec![Executing, Planning],
        Executing => vec![PausedAfterStep, PausedForPreview, Error, Complete],
        Complete => vec![Planning],
    }
}

/// Validate a transition against the table
///
/// # Errors
/// [`EngineError::InvalidState`] naming the current status when the
/// transition is not in the table. No side effect occurs on rejection.
pub fn validate_transition(from: AgentStatus, to: AgentStatus) -> Result<(), EngineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(EngineError::InvalidState { current: from })
    }
}

/// Status to commit after a successful step
///
/// `Complete` exactly when the incremented index reaches the plan length.
#[inline]
#[must_use]
pub fn status_after_success(next_step: usize, plan_len: usize) -> AgentStatus {
    if next_step >= plan_len {
        AgentStatus::Complete
    } else {
        AgentStatus::PausedAfterStep
    }
}
