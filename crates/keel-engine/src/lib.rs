//! Keel execution engine
//!
//! Turns an ordered build plan into real file writes and shell commands
//! inside an isolated sandbox, one resumable step at a time:
//! - `ExecutionStateMachine` rules guard re-entrancy via the project status
//! - `StepExecutor` drives one plan step end-to-end
//! - `CommandSelfCorrector` re-prompts the oracle to fix failing commands
//! - `ResponseExtractor` turns raw oracle text into typed files and commands
//!
//! The oracle, sandbox, store, and event bus are external collaborators
//! reached only through the traits defined here and in `keel-core`.

pub mod corrector;
pub mod error;
pub mod events;
pub mod executor;
pub mod extractor;
pub mod oracle;
pub mod sandbox;
pub mod state_machine;

pub use corrector::{CommandSelfCorrector, CorrectionLog, CANNOT_FIX_SENTINEL};
pub use error::EngineError;
pub use events::{EventBus, ExecuteStepRequested, IdempotencyKey, PublishError};
pub use executor::{AdvanceOutcome, StepExecutor};
pub use extractor::{ExtractError, ExtractedFile, ExtractedResponse, ResponseExtractor};
pub use oracle::{CodeGenerationOracle, OracleError};
pub use sandbox::{CommandOutput, SandboxClient, SandboxError};
