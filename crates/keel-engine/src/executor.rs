//! Step executor
//!
//! Drives one plan step end-to-end: guards the state transition, builds the
//! prompt from bounded history, consults the oracle once, applies file
//! writes, runs commands through self-correction, and commits exactly one
//! step result. A step either advances the index with a `success` result or
//! leaves it unchanged with an `error` result, never both, never neither.

use crate::corrector::{CommandSelfCorrector, CorrectionOutcome};
use crate::error::EngineError;
use crate::extractor::{ExtractedResponse, ResponseExtractor};
use crate::oracle::{CodeGenerationOracle, OracleError};
use crate::sandbox::SandboxClient;
use crate::state_machine;
use keel_core::{
    AgentStatus, CommandAttempt, EngineConfig, FileWriteRecord, ProjectId, ProjectRecord,
    ProjectStore, StepResult, StepStatus, StoreError, Task,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one advance call
#[derive(Debug, Clone)]
pub struct AdvanceOutcome {
    /// Status after the call
    pub status: AgentStatus,
    /// Step index after the call
    pub next_step_index: usize,
    /// The committed step result, when a step actually ran
    pub step_result: Option<StepResult>,
}

/// What a step body produced before commit
struct StepBody {
    summary: String,
    files: Vec<FileWriteRecord>,
    commands: Vec<CommandAttempt>,
    /// `(message, details)` when the step aborted
    failure: Option<(String, String)>,
}

/// Executes plan steps against the injected store, oracle, and sandbox
pub struct StepExecutor {
    store: Arc<dyn ProjectStore>,
    oracle: Arc<dyn CodeGenerationOracle>,
    sandbox: Arc<dyn SandboxClient>,
    extractor: ResponseExtractor,
    config: EngineConfig,
}

impl StepExecutor {
    /// Create an executor
    #[must_use]
    pub fn new(
        store: Arc<dyn ProjectStore>,
        oracle: Arc<dyn CodeGenerationOracle>,
        sandbox: Arc<dyn SandboxClient>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            oracle,
            sandbox,
            extractor: ResponseExtractor::new(),
            config,
        }
    }

    /// Advance the project by one plan step
    ///
    /// Legal only from `READY_TO_EXECUTE`, `PAUSED_AFTER_STEP`,
    /// `PAUSED_FOR_PREVIEW`, or `ERROR`; the transition into `EXECUTING` is
    /// compare-and-set against the store before any oracle or sandbox work,
    /// so a concurrent second trigger is rejected deterministically.
    ///
    /// # Errors
    /// [`EngineError::InvalidState`] when the status forbids execution,
    /// [`EngineError::PlanMissing`] when no plan exists, plus store errors.
    /// Step-level failures are not errors: they commit an `error` result,
    /// set status `ERROR`, and return normally.
    pub async fn advance_step(&self, project_id: ProjectId) -> Result<AdvanceOutcome, EngineError> {
        let record = self.store.load(project_id).await?;

        if record.plan.is_empty() {
            return Err(EngineError::PlanMissing);
        }

        // Idempotent completion: nothing left to run, no side effects.
        if record.current_step >= record.plan.len() {
            return Ok(AdvanceOutcome {
                status: AgentStatus::Complete,
                next_step_index: record.current_step,
                step_result: None,
            });
        }

        if !state_machine::advance_allowed_from(record.status) {
            return Err(EngineError::InvalidState {
                current: record.status,
            });
        }

        // Status is the mutex: this write must land before long work starts.
        match self
            .store
            .set_status_guarded(project_id, record.status, AgentStatus::Executing)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict { actual, .. }) => {
                return Err(EngineError::InvalidState { current: actual });
            }
            Err(other) => return Err(other.into()),
        }

        let task_index = record.current_step;
        let task = record
            .plan
            .task(task_index)
            .cloned()
            .ok_or(EngineError::PlanMissing)?;

        info!(project = %project_id, step = task_index, task = %task.description, "executing step");

        let started_at = chrono::Utc::now();
        let body = self.run_step_body(&record, &task).await;
        let finished_at = chrono::Utc::now();

        match body.failure {
            None => {
                let result = StepResult {
                    task_index,
                    task_description: task.description.clone(),
                    status: StepStatus::Success,
                    summary: body.summary,
                    files_written: body.files,
                    commands_run: body.commands,
                    started_at,
                    finished_at,
                    error_message: None,
                    error_details: None,
                };
                let next_step = task_index + 1;
                let next_status = state_machine::status_after_success(next_step, record.plan.len());
                self.store
                    .commit_step(project_id, result.clone(), next_step, next_status)
                    .await?;
                info!(project = %project_id, step = task_index, status = %next_status, "step succeeded");
                Ok(AdvanceOutcome {
                    status: next_status,
                    next_step_index: next_step,
                    step_result: Some(result),
                })
            }
            Some((message, details)) => {
                warn!(project = %project_id, step = task_index, error = %message, "step failed");
                let result = StepResult {
                    task_index,
                    task_description: task.description.clone(),
                    status: StepStatus::Error,
                    summary: body.summary,
                    files_written: body.files,
                    commands_run: body.commands,
                    started_at,
                    finished_at,
                    error_message: Some(message),
                    error_details: Some(details),
                };
                // Index unchanged: a retried ERROR -> EXECUTING transition
                // re-runs the same step from scratch.
                self.store
                    .commit_step(project_id, result.clone(), task_index, AgentStatus::Error)
                    .await?;
                Ok(AdvanceOutcome {
                    status: AgentStatus::Error,
                    next_step_index: task_index,
                    step_result: Some(result),
                })
            }
        }
    }

    /// Run the fallible middle of a step; never touches the store
    async fn run_step_body(&self, record: &ProjectRecord, task: &Task) -> StepBody {
        let mut body = StepBody {
            summary: String::new(),
            files: Vec::new(),
            commands: Vec::new(),
            failure: None,
        };

        let prompt = self.build_prompt(record, task);
        let reply = match self
            .config
            .oracle_retry
            .run(OracleError::is_transient, || self.oracle.complete(&prompt))
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                let err = EngineError::Oracle(err);
                body.failure = Some((err.user_guidance(), err.to_string()));
                return body;
            }
        };

        let extracted: ExtractedResponse = match self.extractor.extract(&reply) {
            Ok(extracted) => extracted,
            Err(err) => {
                let err = EngineError::Extract(err);
                body.failure = Some((err.user_guidance(), err.to_string()));
                return body;
            }
        };
        body.summary = extracted.summary;

        // File writes first; the first failure aborts the step with no
        // partial-success commit.
        for file in &extracted.files {
            match self.sandbox.write_file(&file.path, &file.contents).await {
                Ok(()) => body.files.push(FileWriteRecord {
                    path: file.path.clone(),
                    success: true,
                    message: None,
                }),
                Err(err) => {
                    body.files.push(FileWriteRecord {
                        path: file.path.clone(),
                        success: false,
                        message: Some(err.to_string()),
                    });
                    let err = EngineError::FileWrite {
                        path: file.path.clone(),
                        message: err.to_string(),
                    };
                    body.failure = Some((err.user_guidance(), err.to_string()));
                    return body;
                }
            }
        }

        let corrector = CommandSelfCorrector::new(
            self.oracle.as_ref(),
            self.sandbox.as_ref(),
            self.config.max_command_attempts,
            self.config.command_timeout,
            self.config.oracle_retry.clone(),
        );

        for command in &extracted.commands {
            let log = corrector.run(&task.description, command).await;
            let attempts = log.attempts.len() as u32;
            body.commands.extend(log.attempts.clone());

            match log.outcome {
                CorrectionOutcome::Succeeded => {}
                CorrectionOutcome::Exhausted => {
                    let err = EngineError::CommandExhausted {
                        command: command.clone(),
                        attempts,
                        stderr: log.last_stderr.clone(),
                    };
                    body.failure = Some((err.user_guidance(), log.last_stderr));
                    return body;
                }
                CorrectionOutcome::Refused => {
                    body.failure = Some((
                        format!(
                            "command '{command}' failed and the oracle could not \
                             propose a fix (manual action required)"
                        ),
                        log.last_stderr,
                    ));
                    return body;
                }
                CorrectionOutcome::Infrastructure { message } => {
                    body.failure = Some((
                        format!("infrastructure failure while running '{command}': {message} (retry is safe)"),
                        log.last_stderr,
                    ));
                    return body;
                }
            }
        }

        body
    }

    /// Assemble the step prompt from bounded history, config, and the task
    ///
    /// Prior steps contribute only index, description, and outcome, which
    /// bounds prompt growth on long plans.
    fn build_prompt(&self, record: &ProjectRecord, task: &Task) -> String {
        let mut prompt = String::from(
            "You are building a project one step at a time inside a sandbox.\n",
        );

        let skip = record
            .history
            .len()
            .saturating_sub(self.config.history_summary_limit);
        if record.history.len() > skip {
            prompt.push_str("\nCompleted so far:\n");
            for result in &record.history[skip..] {
                let outcome = match result.status {
                    StepStatus::Success => "success",
                    StepStatus::Error => "error",
                };
                prompt.push_str(&format!(
                    "- step {}: {} -> {}\n",
                    result.task_index, result.task_description, outcome
                ));
            }
        }

        if !record.user_config.is_empty() {
            prompt.push_str("\nUser configuration:\n");
            let mut keys: Vec<_> = record.user_config.keys().collect();
            keys.sort();
            for key in keys {
                prompt.push_str(&format!("- {} = {}\n", key, record.user_config[key]));
            }
        }

        prompt.push_str(&format!("\nCurrent task: {}\n", task.description));
        prompt.push_str(
            "\nReply with:\n\
             - one fenced code block per file to write, with `path=<relative path>` \
             in the fence info string\n\
             - one fenced `bash` block listing shell commands to run, one per line\n\
             - a short prose summary of what this step does\n",
        );
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::Plan;

    fn record_with_history(limit_test_entries: usize) -> ProjectRecord {
        let mut record = ProjectRecord::with_plan(
            ProjectId::new(),
            Plan::from_descriptions(["current task"]),
        );
        for i in 0..limit_test_entries {
            record.history.push(StepResult {
                task_index: i,
                task_description: format!("task {i}"),
                status: StepStatus::Success,
                summary: "x".repeat(10_000),
                files_written: vec![],
                commands_run: vec![],
                started_at: chrono::Utc::now(),
                finished_at: chrono::Utc::now(),
                error_message: None,
                error_details: None,
            });
        }
        record
    }

    #[test]
    fn prompt_summarizes_history_without_full_content() {
        let record = record_with_history(3);
        let executor_config = EngineConfig::new();
        let record_task = Task::new("current task");

        // Only the prompt builder is under test; collaborators are unused.
        let prompt = build_prompt_for_test(&executor_config, &record, &record_task);
        assert!(prompt.contains("step 0: task 0 -> success"));
        assert!(prompt.contains("Current task: current task"));
        // Full summaries must not leak into the prompt.
        assert!(!prompt.contains(&"x".repeat(100)));
    }

    #[test]
    fn prompt_history_is_bounded() {
        let record = record_with_history(30);
        let config = EngineConfig::new().with_history_summary_limit(5);
        let task = Task::new("current task");

        let prompt = build_prompt_for_test(&config, &record, &task);
        assert!(!prompt.contains("step 24:"));
        assert!(prompt.contains("step 25:"));
        assert!(prompt.contains("step 29:"));
    }

    #[test]
    fn prompt_config_keys_are_sorted() {
        let record = record_with_history(0)
            .with_config("zeta", "1")
            .with_config("alpha", "2");
        let config = EngineConfig::new();
        let task = Task::new("current task");

        let prompt = build_prompt_for_test(&config, &record, &task);
        let alpha = prompt.find("alpha = 2").unwrap();
        let zeta = prompt.find("zeta = 1").unwrap();
        assert!(alpha < zeta);
    }

    fn build_prompt_for_test(
        config: &EngineConfig,
        record: &ProjectRecord,
        task: &Task,
    ) -> String {
        struct NoopOracle;
        #[async_trait::async_trait]
        impl CodeGenerationOracle for NoopOracle {
            async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
                Err(OracleError::Rejected("noop".into()))
            }
        }
        struct NoopSandbox;
        #[async_trait::async_trait]
        impl SandboxClient for NoopSandbox {
            async fn write_file(
                &self,
                _path: &str,
                _contents: &str,
            ) -> Result<(), crate::sandbox::SandboxError> {
                Ok(())
            }
            async fn run_command(
                &self,
                _command: &str,
                _timeout: std::time::Duration,
            ) -> Result<crate::sandbox::CommandOutput, crate::sandbox::SandboxError> {
                Ok(crate::sandbox::CommandOutput {
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
        }
        struct NoopStore;
        #[async_trait::async_trait]
        impl ProjectStore for NoopStore {
            async fn load(&self, id: ProjectId) -> Result<ProjectRecord, StoreError> {
                Err(StoreError::NotFound(id))
            }
            async fn insert(&self, _record: ProjectRecord) -> Result<(), StoreError> {
                Ok(())
            }
            async fn set_status_guarded(
                &self,
                _id: ProjectId,
                _expected: AgentStatus,
                _next: AgentStatus,
            ) -> Result<(), StoreError> {
                Ok(())
            }
            async fn commit_step(
                &self,
                _id: ProjectId,
                _result: StepResult,
                _next_step: usize,
                _next_status: AgentStatus,
            ) -> Result<(), StoreError> {
                Ok(())
            }
            async fn replace_plan(&self, _id: ProjectId, _plan: Plan) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let executor = StepExecutor::new(
            Arc::new(NoopStore),
            Arc::new(NoopOracle),
            Arc::new(NoopSandbox),
            config.clone(),
        );
        executor.build_prompt(record, task)
    }
}
