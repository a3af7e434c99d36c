//! Core primitives for the keel build-plan execution engine
//!
//! Provides the shared vocabulary of the workspace:
//! - Plan, task, and execution-history data model
//! - Project status enum (the engine's concurrency guard)
//! - The project store interface
//! - Retry/backoff policies shared by the engine and provisioning

pub mod config;
pub mod retry;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use retry::{Backoff, RetryPolicy};
pub use store::{ProjectStore, StoreError};
pub use types::{
    AgentStatus, CommandAttempt, FileWriteRecord, Plan, ProjectId, ProjectRecord, ResourceId,
    StepResult, StepStatus, Task,
};
