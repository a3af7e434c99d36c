//! Testing utilities for the keel workspace
//!
//! Hand-rolled fakes for every external collaborator: in-memory project
//! store, scripted oracle, in-memory sandbox, and scripted provider
//! adapter.

#![allow(missing_docs)]

use async_trait::async_trait;
use dashmap::DashMap;
use keel_core::{
    AgentStatus, Plan, ProjectId, ProjectRecord, ProjectStore, StepResult, StoreError,
};
use keel_engine::{
    CodeGenerationOracle, CommandOutput, OracleError, SandboxClient, SandboxError,
};
use keel_provision::{
    DatabaseCredentials, DatabaseProviderAdapter, ExistingResource, ProviderError,
    ProviderKind, ProvisionRequest, ProvisionedResource, ReadinessBackoff, ResourceStatus,
};
use keel_core::ResourceId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

/// Initialize tracing for a test binary (idempotent)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Project store
// ---------------------------------------------------------------------------

/// In-memory [`ProjectStore`] with the same atomicity guarantees a real
/// backend must provide: guarded status writes compare-and-set under a lock.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<ProjectId, ProjectRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct read of a record, bypassing the trait (assertions)
    pub fn snapshot(&self, id: ProjectId) -> Option<ProjectRecord> {
        self.records.lock().get(&id).cloned()
    }

    /// Direct write of a status, bypassing the guard (test setup)
    pub fn force_status(&self, id: ProjectId, status: AgentStatus) {
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.status = status;
        }
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn load(&self, id: ProjectId) -> Result<ProjectRecord, StoreError> {
        self.records
            .lock()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn insert(&self, record: ProjectRecord) -> Result<(), StoreError> {
        self.records.lock().insert(record.id, record);
        Ok(())
    }

    async fn set_status_guarded(
        &self,
        id: ProjectId,
        expected: AgentStatus,
        next: AgentStatus,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if record.status != expected {
            return Err(StoreError::Conflict {
                expected,
                actual: record.status,
            });
        }
        record.status = next;
        Ok(())
    }

    async fn commit_step(
        &self,
        id: ProjectId,
        result: StepResult,
        next_step: usize,
        next_status: AgentStatus,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.history.push(result);
        record.current_step = next_step;
        record.status = next_status;
        Ok(())
    }

    async fn replace_plan(&self, id: ProjectId, plan: Plan) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.plan = plan;
        record.current_step = 0;
        record.history.clear();
        record.status = AgentStatus::ReadyToExecute;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Oracle that replays a scripted sequence of replies and errors
#[derive(Default)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<String, OracleError>>>,
    prompts_seen: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.script.lock().push_back(Ok(reply.into()));
    }

    pub fn push_transient_error(&self, message: impl Into<String>) {
        self.script
            .lock()
            .push_back(Err(OracleError::Unavailable(message.into())));
    }

    pub fn push_rejection(&self, message: impl Into<String>) {
        self.script
            .lock()
            .push_back(Err(OracleError::Rejected(message.into())));
    }

    /// Prompts received so far, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts_seen.lock().clone()
    }
}

#[async_trait]
impl CodeGenerationOracle for ScriptedOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        self.prompts_seen.lock().push(prompt.to_string());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Rejected("oracle script exhausted".into())))
    }
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

/// In-memory sandbox: files land in a map, command outcomes are scripted
/// per exact command string (unscripted commands succeed)
#[derive(Default)]
pub struct MemorySandbox {
    files: DashMap<String, String>,
    scripted: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    commands_seen: Mutex<Vec<String>>,
    failing_write_paths: Mutex<HashSet<String>>,
}

impl MemorySandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for a command; popped in order, then default success
    pub fn script_command(&self, command: impl Into<String>, outcomes: Vec<CommandOutput>) {
        self.scripted
            .lock()
            .entry(command.into())
            .or_default()
            .extend(outcomes);
    }

    /// Make writes to this exact path fail
    pub fn fail_writes_to(&self, path: impl Into<String>) {
        self.failing_write_paths.lock().insert(path.into());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.get(path).map(|v| v.value().clone())
    }

    /// Commands executed so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands_seen.lock().clone()
    }
}

/// Convenience constructor for a failing command outcome
pub fn failing_output(exit_code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl SandboxClient for MemorySandbox {
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError> {
        if self.failing_write_paths.lock().contains(path) {
            return Err(SandboxError::WriteFailed {
                path: path.to_string(),
                message: "disk quota exceeded".to_string(),
            });
        }
        self.files.insert(path.to_string(), contents.to_string());
        Ok(())
    }

    async fn run_command(
        &self,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, SandboxError> {
        self.commands_seen.lock().push(command.to_string());
        let scripted = self
            .scripted
            .lock()
            .get_mut(command)
            .and_then(VecDeque::pop_front);
        Ok(scripted.unwrap_or(CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Provider adapter
// ---------------------------------------------------------------------------

/// Per-region scripted behavior for [`ScriptedAdapter`]
#[derive(Debug, Clone)]
pub enum RegionScript {
    /// Creation succeeds in this region
    Succeed,
    /// Creation fails with this error text
    Fail(String),
}

/// Provider adapter with scripted regions, listings, and status sequences
pub struct ScriptedAdapter {
    kind: ProviderKind,
    default_region: String,
    failover: Vec<String>,
    existing: Mutex<Vec<ExistingResource>>,
    regions: Mutex<HashMap<String, RegionScript>>,
    statuses: Mutex<VecDeque<ResourceStatus>>,
    provision_calls: Mutex<Vec<ProvisionRequest>>,
    readiness: ReadinessBackoff,
    list_fails: Mutex<Option<String>>,
}

impl ScriptedAdapter {
    pub fn new(kind: ProviderKind, default_region: &str, failover: Vec<&str>) -> Self {
        Self {
            kind,
            default_region: default_region.to_string(),
            failover: failover.into_iter().map(str::to_string).collect(),
            existing: Mutex::new(Vec::new()),
            regions: Mutex::new(HashMap::new()),
            statuses: Mutex::new(VecDeque::new()),
            provision_calls: Mutex::new(Vec::new()),
            // Fast schedule so readiness tests finish quickly.
            readiness: ReadinessBackoff {
                initial: Duration::from_millis(1),
                multiplier: 2.0,
                cap: Duration::from_millis(4),
                timeout: Duration::from_millis(20),
            },
            list_fails: Mutex::new(None),
        }
    }

    pub fn add_existing(&self, id: &str, name: &str) {
        self.existing.lock().push(ExistingResource {
            id: ResourceId(id.to_string()),
            name: name.to_string(),
        });
    }

    pub fn script_region(&self, region: &str, script: RegionScript) {
        self.regions.lock().insert(region.to_string(), script);
    }

    /// Queue statuses returned by `get_status`; empty queue means ready
    pub fn script_statuses(&self, statuses: Vec<ResourceStatus>) {
        *self.statuses.lock() = statuses.into();
    }

    pub fn fail_listing(&self, message: &str) {
        *self.list_fails.lock() = Some(message.to_string());
    }

    /// Creation requests observed so far
    pub fn provision_calls(&self) -> Vec<ProvisionRequest> {
        self.provision_calls.lock().clone()
    }
}

#[async_trait]
impl DatabaseProviderAdapter for ScriptedAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn default_region(&self) -> &str {
        &self.default_region
    }

    fn failover_regions(&self, primary: &str) -> Vec<String> {
        self.failover
            .iter()
            .filter(|r| !r.eq_ignore_ascii_case(primary))
            .cloned()
            .collect()
    }

    fn readiness_backoff(&self) -> ReadinessBackoff {
        self.readiness.clone()
    }

    async fn list_resources(&self) -> Result<Vec<ExistingResource>, ProviderError> {
        if let Some(message) = self.list_fails.lock().clone() {
            return Err(ProviderError::Api(message));
        }
        Ok(self.existing.lock().clone())
    }

    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedResource, ProviderError> {
        self.provision_calls.lock().push(request.clone());
        let script = self
            .regions
            .lock()
            .get(&request.region)
            .cloned()
            .unwrap_or(RegionScript::Succeed);
        match script {
            RegionScript::Fail(message) => Err(ProviderError::Api(message)),
            RegionScript::Succeed => {
                let id = format!("res-{}-{}", request.name, request.region);
                Ok(ProvisionedResource {
                    id: ResourceId(id.clone()),
                    url: Some(format!("https://console.example.com/{id}")),
                    region: request.region.clone(),
                    credentials: fake_credentials(self.kind, request),
                    estimated_monthly_cost: 0.0,
                })
            }
        }
    }

    async fn delete(&self, _id: &ResourceId) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn get_status(&self, _id: &ResourceId) -> Result<ResourceStatus, ProviderError> {
        Ok(self
            .statuses
            .lock()
            .pop_front()
            .unwrap_or(ResourceStatus::Ready))
    }
}

/// Complete credential bundle derived from a provisioning request
pub fn fake_credentials(kind: ProviderKind, request: &ProvisionRequest) -> DatabaseCredentials {
    DatabaseCredentials {
        provider: kind,
        database_type: "postgresql".to_string(),
        host: format!("db.{}.example.com", request.region),
        port: 5432,
        username: "app_owner".to_string(),
        password: request.password.clone(),
        database: request.name.clone(),
        ssl_mode: "require".to_string(),
        connection_string: format!(
            "postgresql://app_owner:{}@db.{}.example.com:5432/{}?sslmode=require",
            request.password, request.region, request.name
        ),
        direct_url: None,
        additional_env_vars: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_guard_rejects_stale_expectation() {
        let store = MemoryStore::new();
        let record = ProjectRecord::with_plan(ProjectId::new(), Plan::from_descriptions(["a"]));
        let id = record.id;
        store.insert(record).await.unwrap();

        store
            .set_status_guarded(id, AgentStatus::ReadyToExecute, AgentStatus::Executing)
            .await
            .unwrap();

        // A second caller still expecting READY_TO_EXECUTE loses the race.
        let err = store
            .set_status_guarded(id, AgentStatus::ReadyToExecute, AgentStatus::Executing)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                actual: AgentStatus::Executing,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn replace_plan_resets_position_and_history() {
        let store = MemoryStore::new();
        let mut record =
            ProjectRecord::with_plan(ProjectId::new(), Plan::from_descriptions(["a"]));
        record.current_step = 1;
        record.status = AgentStatus::Complete;
        let id = record.id;
        store.insert(record).await.unwrap();

        store
            .replace_plan(id, Plan::from_descriptions(["x", "y"]))
            .await
            .unwrap();

        let record = store.load(id).await.unwrap();
        assert_eq!(record.current_step, 0);
        assert_eq!(record.status, AgentStatus::ReadyToExecute);
        assert!(record.history.is_empty());
        assert_eq!(record.plan.len(), 2);
    }

    #[tokio::test]
    async fn scripted_oracle_replays_in_order() {
        let oracle = ScriptedOracle::new();
        oracle.push_reply("one");
        oracle.push_transient_error("hiccup");

        assert_eq!(oracle.complete("p").await.unwrap(), "one");
        assert!(oracle.complete("p").await.is_err());
        // Exhausted script fails closed.
        assert!(oracle.complete("p").await.is_err());
    }

    #[tokio::test]
    async fn memory_sandbox_scripts_commands() {
        let sandbox = MemorySandbox::new();
        sandbox.script_command("make", vec![failing_output(2, "no rule")]);

        let first = sandbox
            .run_command("make", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(first.exit_code, 2);

        let second = sandbox
            .run_command("make", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(second.success());
    }
}
