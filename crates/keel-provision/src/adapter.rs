//! Database provider adapter contract
//!
//! One uniform interface per provider, regardless of the provider's actual
//! endpoint shapes, auth headers, or response envelopes. Adapters absorb
//! API quirks internally; raw provider envelopes never reach the
//! orchestrator.

use crate::types::{DatabaseCredentials, ProviderKind};
use async_trait::async_trait;
use keel_core::ResourceId;
use std::time::Duration;

/// Provider API failures
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider's API returned an error
    #[error("provider api error: {0}")]
    Api(String),

    /// HTTP transport failure
    #[error("provider request failed: {0}")]
    Transport(String),

    /// A required field was absent from the provider response
    #[error("provider response missing field: {0}")]
    MissingField(String),

    /// Credentials failed validation
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Lifecycle status of a provisioned resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Accepting connections
    Ready,
    /// Still coming up
    Initializing,
    /// The provider reports a failure
    Failed {
        /// Provider-reported reason
        reason: String,
    },
}

/// Inputs for one creation attempt
///
/// The password is generated once by the orchestrator and reused verbatim
/// across failover attempts, so a retried region produces identical
/// credentials.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Resource name
    pub name: String,
    /// Target region for this attempt
    pub region: String,
    /// Provider tier/plan
    pub tier: String,
    /// Pre-generated database password
    pub password: String,
}

/// What a successful creation yields
#[derive(Debug, Clone)]
pub struct ProvisionedResource {
    /// Provider-side identifier
    pub id: ResourceId,
    /// Console URL, when the provider has one
    pub url: Option<String>,
    /// Region the resource actually landed in
    pub region: String,
    /// Assembled connection credentials
    pub credentials: DatabaseCredentials,
    /// Rough monthly cost estimate in USD
    pub estimated_monthly_cost: f64,
}

/// A resource already present at the provider
#[derive(Debug, Clone)]
pub struct ExistingResource {
    /// Provider-side identifier
    pub id: ResourceId,
    /// Resource name
    pub name: String,
}

/// Readiness-polling tuning, set per provider
///
/// Provisioning latency varies from seconds (Neon) to several minutes
/// (Supabase), so each adapter brings its own schedule.
#[derive(Debug, Clone)]
pub struct ReadinessBackoff {
    /// First polling interval
    pub initial: Duration,
    /// Interval growth factor
    pub multiplier: f64,
    /// Interval cap
    pub cap: Duration,
    /// Give up after this much wall-clock time
    pub timeout: Duration,
}

/// Uniform provider contract
#[async_trait]
pub trait DatabaseProviderAdapter: Send + Sync {
    /// Which provider this adapter talks to
    fn kind(&self) -> ProviderKind;

    /// Region used when the caller does not name one
    fn default_region(&self) -> &str;

    /// Static preference list of nearby regions to fail over to
    ///
    /// The primary itself is excluded; order matters.
    fn failover_regions(&self, primary: &str) -> Vec<String>;

    /// Readiness-polling schedule for this provider
    fn readiness_backoff(&self) -> ReadinessBackoff;

    /// List live resources (idempotency lookup)
    async fn list_resources(&self) -> Result<Vec<ExistingResource>, ProviderError>;

    /// Create a resource in the requested region
    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedResource, ProviderError>;

    /// Delete a resource
    async fn delete(&self, id: &ResourceId) -> Result<(), ProviderError>;

    /// Current lifecycle status of a resource
    async fn get_status(&self, id: &ResourceId) -> Result<ResourceStatus, ProviderError>;

    /// Format-level validation of assembled credentials
    ///
    /// No generic database client is assumed to exist in the runtime, so
    /// this checks shape and required fields only, and fails closed when
    /// any are missing.
    fn test_connection(&self, credentials: &DatabaseCredentials) -> Result<(), ProviderError> {
        credentials
            .validate()
            .map_err(ProviderError::InvalidCredentials)
    }

    /// Canonical connection string for the credentials
    fn build_connection_string(&self, credentials: &DatabaseCredentials) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}?sslmode={}",
            credentials.username,
            credentials.password,
            credentials.host,
            credentials.port,
            credentials.database,
            credentials.ssl_mode,
        )
    }
}
