//! Event-bus messages for the asynchronous execution path
//!
//! The HTTP-facing trigger may return immediately while the step runs in
//! the background; this module defines the message that crosses the bus
//! and the idempotency key that keeps duplicate delivery from
//! double-executing a step. Delivery itself is an external concern behind
//! the [`EventBus`] trait.

use async_trait::async_trait;
use keel_core::ProjectId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Message type tag for step-execution requests
pub const EXECUTE_STEP_REQUESTED: &str = "agent.execute.step.requested";

/// Deduplication key for bus messages
///
/// Incorporates project id, step index, and a nonce, so redelivery of the
/// same message is detectable while distinct triggers for the same step
/// stay distinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derive a key for one trigger of one step
    #[must_use]
    pub fn derive(project_id: ProjectId, step_index: usize) -> Self {
        Self(format!("{project_id}:{step_index}:{}", Uuid::new_v4()))
    }

    /// The key as a string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request to execute one plan step, published to the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteStepRequested {
    /// Message type tag (always [`EXECUTE_STEP_REQUESTED`])
    #[serde(rename = "type")]
    pub message_type: String,
    /// Deduplication key
    pub idempotency_key: IdempotencyKey,
    /// Target project
    pub project_id: ProjectId,
    /// Step to execute
    pub step_index: usize,
    /// Description of the step's task
    pub task_description: String,
    /// Bounded summary of the overall blueprint
    pub blueprint_summary: String,
    /// User-supplied configuration values
    pub user_config: HashMap<String, String>,
    /// Opaque credentials for reaching the project's sandbox
    pub sandbox_credentials: HashMap<String, String>,
}

impl ExecuteStepRequested {
    /// Build a request with a fresh idempotency key
    #[must_use]
    pub fn new(
        project_id: ProjectId,
        step_index: usize,
        task_description: impl Into<String>,
    ) -> Self {
        Self {
            message_type: EXECUTE_STEP_REQUESTED.to_string(),
            idempotency_key: IdempotencyKey::derive(project_id, step_index),
            project_id,
            step_index,
            task_description: task_description.into(),
            blueprint_summary: String::new(),
            user_config: HashMap::new(),
            sandbox_credentials: HashMap::new(),
        }
    }

    /// With a blueprint summary
    #[must_use]
    pub fn with_blueprint_summary(mut self, summary: impl Into<String>) -> Self {
        self.blueprint_summary = summary.into();
        self
    }

    /// With user configuration
    #[must_use]
    pub fn with_user_config(mut self, config: HashMap<String, String>) -> Self {
        self.user_config = config;
        self
    }
}

/// Publish failures
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The bus rejected or dropped the message
    #[error("event publish failed: {0}")]
    Failed(String),
}

/// Decoupling seam between request handling and background execution
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a step-execution request
    async fn publish(&self, event: &ExecuteStepRequested) -> Result<(), PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_embeds_project_and_step() {
        let project = ProjectId::new();
        let key = IdempotencyKey::derive(project, 4);
        assert!(key.as_str().starts_with(&format!("{project}:4:")));
    }

    #[test]
    fn distinct_triggers_get_distinct_keys() {
        let project = ProjectId::new();
        let a = IdempotencyKey::derive(project, 1);
        let b = IdempotencyKey::derive(project, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn message_serializes_with_type_tag() {
        let event = ExecuteStepRequested::new(ProjectId::new(), 0, "init repo");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], EXECUTE_STEP_REQUESTED);
        assert_eq!(json["step_index"], 0);
    }

    #[tokio::test]
    async fn bus_receives_published_requests() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct RecordingBus {
            published: Mutex<Vec<ExecuteStepRequested>>,
        }

        #[async_trait]
        impl EventBus for RecordingBus {
            async fn publish(&self, event: &ExecuteStepRequested) -> Result<(), PublishError> {
                self.published
                    .lock()
                    .map_err(|e| PublishError::Failed(e.to_string()))?
                    .push(event.clone());
                Ok(())
            }
        }

        let bus = RecordingBus::default();
        let project = ProjectId::new();
        let event = ExecuteStepRequested::new(project, 2, "add auth")
            .with_blueprint_summary("two-step web app");

        bus.publish(&event).await.unwrap();

        let published = bus.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].project_id, project);
        assert_eq!(published[0].step_index, 2);
        assert_eq!(published[0].idempotency_key, event.idempotency_key);
    }
}
