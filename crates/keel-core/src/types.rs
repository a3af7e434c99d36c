//! Core types for the execution engine
//!
//! Defines the persisted data model:
//! - Project and resource identifiers
//! - Plans and their tasks
//! - Agent status (single source of truth for what the engine may do next)
//! - Step results and the append-only execution history

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ulid::Ulid;

/// Unique project identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub Ulid);

impl ProjectId {
    /// Generate new project ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an externally provisioned resource, as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One build task within a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Human-readable description of the work
    pub description: String,
}

impl Task {
    /// Create a task from a description
    #[inline]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// Ordered build plan
///
/// Immutable once generated; replaced wholesale only by re-planning,
/// which also resets execution position and history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    tasks: Vec<Task>,
}

impl Plan {
    /// Create a plan from an ordered task list
    #[inline]
    #[must_use]
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    /// Build a plan from plain descriptions
    pub fn from_descriptions<I, S>(descriptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tasks: descriptions.into_iter().map(Task::new).collect(),
        }
    }

    /// Number of tasks
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the plan has no tasks
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task at the given step index
    #[inline]
    #[must_use]
    pub fn task(&self, index: usize) -> Option<&Task> {
        self.tasks.get(index)
    }

    /// Iterate tasks in order
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}

/// Project execution status
///
/// Exactly one value at a time; the transition into `Executing` is the
/// concurrency guard for step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    /// No executable plan yet
    Planning,
    /// Plan exists, step 0 not started
    ReadyToExecute,
    /// A step is actively running
    Executing,
    /// Step succeeded, awaiting the next trigger
    PausedAfterStep,
    /// Step succeeded, awaiting human review
    PausedForPreview,
    /// Planning phase needs user input
    PendingUserInput,
    /// Planning phase needs configuration values
    PendingConfiguration,
    /// Step failed terminally; retry is allowed
    Error,
    /// Terminal: all plan steps executed
    Complete,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planning => "PLANNING",
            Self::ReadyToExecute => "READY_TO_EXECUTE",
            Self::Executing => "EXECUTING",
            Self::PausedAfterStep => "PAUSED_AFTER_STEP",
            Self::PausedForPreview => "PAUSED_FOR_PREVIEW",
            Self::PendingUserInput => "PENDING_USER_INPUT",
            Self::PendingConfiguration => "PENDING_CONFIGURATION",
            Self::Error => "ERROR",
            Self::Complete => "COMPLETE",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a single executed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// All file writes and commands succeeded
    Success,
    /// The step aborted; index unchanged
    Error,
}

/// Record of one attempted file write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWriteRecord {
    /// Path relative to the sandbox root
    pub path: String,
    /// Whether the write succeeded
    pub success: bool,
    /// Failure detail, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Record of one command attempt, including self-correction retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAttempt {
    /// The command actually executed on this attempt
    pub command: String,
    /// 1-based attempt number within the step
    pub attempt: u32,
    /// Process exit code (synthetic 124 on timeout)
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Replacement proposed by the oracle for the next attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_command: Option<String>,
}

impl CommandAttempt {
    /// Whether this attempt succeeded
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Durable record of one step's outcome
///
/// Append-only: the ordered list of these forms the project's execution
/// history, which is never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Plan index at which this result was produced
    pub task_index: usize,
    /// Description of the executed task
    pub task_description: String,
    /// Success or error
    pub status: StepStatus,
    /// Oracle-provided summary of what was done
    pub summary: String,
    /// File writes attempted during the step, in order
    pub files_written: Vec<FileWriteRecord>,
    /// Full command log including self-correction attempts
    pub commands_run: Vec<CommandAttempt>,
    /// Step start time
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Step end time
    pub finished_at: chrono::DateTime<chrono::Utc>,
    /// Human-readable failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Machine-oriented failure detail (last stderr, write error, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

/// Persisted per-project state consumed and produced by the engine
///
/// No other engine-owned persisted state exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Project identifier
    pub id: ProjectId,
    /// The current plan
    pub plan: Plan,
    /// Next step to execute; equals `plan.len()` iff complete
    pub current_step: usize,
    /// Current status
    pub status: AgentStatus,
    /// Ordered step results, appended strictly in task-index order
    pub history: Vec<StepResult>,
    /// User-supplied configuration values forwarded into prompts
    pub user_config: HashMap<String, String>,
}

impl ProjectRecord {
    /// Create a fresh record in the planning state
    #[must_use]
    pub fn new(id: ProjectId) -> Self {
        Self {
            id,
            plan: Plan::default(),
            current_step: 0,
            status: AgentStatus::Planning,
            history: Vec::new(),
            user_config: HashMap::new(),
        }
    }

    /// Create a record with a plan, ready to execute step 0
    #[must_use]
    pub fn with_plan(id: ProjectId, plan: Plan) -> Self {
        Self {
            id,
            plan,
            current_step: 0,
            status: AgentStatus::ReadyToExecute,
            history: Vec::new(),
            user_config: HashMap::new(),
        }
    }

    /// Add a user configuration value
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_config.insert(key.into(), value.into());
        self
    }

    /// Whether every plan step has executed
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == AgentStatus::Complete
    }

    /// Check the record's structural invariants
    ///
    /// `current_step` stays within `[0, plan.len()]` and equals the plan
    /// length exactly when the project is complete; history indices are
    /// strictly non-decreasing and retries reuse the failed index.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.current_step > self.plan.len() {
            return Err(format!(
                "current_step {} out of range (plan has {} tasks)",
                self.current_step,
                self.plan.len()
            ));
        }
        // Iff: the index reaches the plan length exactly when the project
        // is complete. Records without a plan yet are exempt.
        if !self.plan.is_empty()
            && (self.status == AgentStatus::Complete) != (self.current_step == self.plan.len())
        {
            return Err(format!(
                "status {} inconsistent with current_step {} (plan has {} tasks)",
                self.status,
                self.current_step,
                self.plan.len()
            ));
        }
        let mut last_success: Option<usize> = None;
        for result in &self.history {
            if let Some(prev) = last_success {
                if result.task_index <= prev {
                    return Err(format!(
                        "step result for index {} recorded after success at {}",
                        result.task_index, prev
                    ));
                }
            }
            if result.status == StepStatus::Success {
                last_success = Some(result.task_index);
            }
        }
        Ok(())
    }
}
