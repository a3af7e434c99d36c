//! Keel resource provisioning
//!
//! Allocates managed databases for generated projects:
//! - `ProvisioningOrchestrator` enforces name idempotency, walks a regional
//!   failover chain, polls readiness, and assembles credentials
//! - `DatabaseProviderAdapter` normalizes each provider's REST API behind a
//!   uniform contract; concrete adapters exist for Neon and Supabase
//! - Transient-vs-fatal error classification is a single testable function,
//!   and secret-shaped values are redacted before anything is logged or
//!   returned at error level

pub mod adapter;
pub mod classify;
pub mod orchestrator;
pub mod providers;
pub mod redact;
pub mod registry;
pub mod types;

pub use adapter::{
    DatabaseProviderAdapter, ExistingResource, ProviderError, ProvisionRequest,
    ProvisionedResource, ReadinessBackoff, ResourceStatus,
};
pub use classify::{classify_provider_error, ErrorClass};
pub use orchestrator::ProvisioningOrchestrator;
pub use providers::{neon::NeonAdapter, supabase::SupabaseAdapter};
pub use redact::redact_secrets;
pub use registry::{ProviderRegistry, RegistryError};
pub use types::{
    DatabaseCredentials, ProviderKind, ProvisioningOptions, ProvisioningResult,
};
