//! Project store interface
//!
//! The engine never owns a store handle globally; an implementation is
//! injected wherever state is read or mutated, so tests can substitute an
//! in-memory fake. All mutations are read-modify-write with the status
//! field acting as the guard (see `set_status_guarded`).

use crate::types::{AgentStatus, Plan, ProjectId, ProjectRecord, StepResult};
use async_trait::async_trait;

/// Store-level errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record for the project
    #[error("project not found: {0}")]
    NotFound(ProjectId),

    /// Guarded status write lost the race
    #[error("status conflict: expected {expected}, found {actual}")]
    Conflict {
        /// Status the caller observed
        expected: AgentStatus,
        /// Status actually in the store
        actual: AgentStatus,
    },

    /// Underlying storage failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Persistent store for project plan, status, and history
///
/// `set_status_guarded` is the concurrency primitive: the transition into
/// `Executing` must be durably written before any oracle or sandbox work
/// begins, so a concurrent second trigger observes `Executing` and is
/// rejected deterministically rather than racing.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Load the full project record
    async fn load(&self, id: ProjectId) -> Result<ProjectRecord, StoreError>;

    /// Insert a new project record
    async fn insert(&self, record: ProjectRecord) -> Result<(), StoreError>;

    /// Compare-and-set the status
    ///
    /// Writes `next` only if the stored status still equals `expected`;
    /// otherwise fails with [`StoreError::Conflict`] carrying the actual
    /// value and performs no mutation.
    async fn set_status_guarded(
        &self,
        id: ProjectId,
        expected: AgentStatus,
        next: AgentStatus,
    ) -> Result<(), StoreError>;

    /// Atomically append a step result, set the step index, and set status
    ///
    /// This is the single commit point for a step; history is append-only.
    async fn commit_step(
        &self,
        id: ProjectId,
        result: StepResult,
        next_step: usize,
        next_status: AgentStatus,
    ) -> Result<(), StoreError>;

    /// Replace the plan wholesale (re-planning)
    ///
    /// Resets the step index to 0 and clears execution history.
    async fn replace_plan(&self, id: ProjectId, plan: Plan) -> Result<(), StoreError>;
}
