//! Provisioning orchestrator
//!
//! Allocates a managed database without creating duplicates and while
//! tolerating regional capacity failures. All outcomes are expressed as a
//! structured [`ProvisioningResult`] so callers branch on `success` instead
//! of catching errors.
//!
//! The idempotency check is a best-effort name lookup against the
//! provider's own listing API; there is no distributed lock, so two
//! concurrent calls targeting the same name can race. That is an accepted,
//! documented limitation of this design, not silently handled.

use crate::adapter::{DatabaseProviderAdapter, ProviderError, ProvisionRequest, ResourceStatus};
use crate::classify::{classify_provider_error, ErrorClass};
use crate::redact::redact_secrets;
use crate::registry::{ProviderRegistry, RegistryError};
use crate::types::{DatabaseCredentials, ProviderKind, ProvisioningOptions, ProvisioningResult};
use keel_core::retry::Backoff;
use keel_core::ResourceId;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::time::Instant;
use tracing::{info, warn};

/// Errors from the pass-through operations (`delete`, `test_connection`)
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Registry lookup failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Provider call failed
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Orchestrates provisioning across registered provider adapters
pub struct ProvisioningOrchestrator {
    registry: ProviderRegistry,
}

impl ProvisioningOrchestrator {
    /// Create an orchestrator over a registry
    #[must_use]
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    /// Provision a database for a project
    ///
    /// Sequence: idempotency check by case-insensitive name, then creation
    /// attempts along the region failover chain with one generated password
    /// reused throughout, then readiness polling (timeout is a warning, not
    /// a failure), then credential validation. Never silently reuses an
    /// existing resource: the original password may be irretrievable.
    pub async fn provision(&self, options: &ProvisioningOptions) -> ProvisioningResult {
        let started = Instant::now();
        let mut warnings = Vec::new();

        let adapter = match self.registry.get(options.provider) {
            Ok(adapter) => adapter,
            Err(err) => {
                return ProvisioningResult::failed(err.to_string(), ms(&started), warnings);
            }
        };

        // Idempotency: a live resource with this name blocks provisioning.
        match adapter.list_resources().await {
            Ok(existing) => {
                if let Some(hit) = existing
                    .iter()
                    .find(|r| r.name.eq_ignore_ascii_case(&options.project_name))
                {
                    warn!(name = %options.project_name, existing = %hit.id, "provisioning conflict");
                    return ProvisioningResult::failed(
                        format!(
                            "a {} resource named '{}' already exists (id: {}); delete it or \
                             choose a new name, its original credentials cannot be recovered \
                             (manual action required)",
                            options.provider, options.project_name, hit.id
                        ),
                        ms(&started),
                        warnings,
                    );
                }
            }
            Err(err) => {
                return ProvisioningResult::failed(
                    format!(
                        "could not check for existing resources: {} (retry is safe)",
                        redact_secrets(&err.to_string())
                    ),
                    ms(&started),
                    warnings,
                );
            }
        }

        // Region chain: requested region first, then the provider's static
        // preference list, deduplicated.
        let primary = options
            .region
            .clone()
            .unwrap_or_else(|| adapter.default_region().to_string());
        let mut chain = vec![primary.clone()];
        for region in adapter.failover_regions(&primary) {
            if !chain.iter().any(|c| c.eq_ignore_ascii_case(&region)) {
                chain.push(region);
            }
        }

        // One password for all attempts; a failed-over region must yield
        // the same credentials a first-try success would have.
        let password = generate_password();
        let mut attempted: Vec<String> = Vec::new();
        let mut last_error = String::new();
        let mut provisioned = None;

        for region in &chain {
            attempted.push(region.clone());
            let request = ProvisionRequest {
                name: options.project_name.clone(),
                region: region.clone(),
                tier: options.tier.clone(),
                password: password.clone(),
            };
            match adapter.provision(&request).await {
                Ok(resource) => {
                    info!(provider = %options.provider, region = %region, id = %resource.id, "resource created");
                    if !region.eq_ignore_ascii_case(&primary) {
                        warnings.push(format!(
                            "primary region {primary} was unavailable; failed over to {region}"
                        ));
                    }
                    provisioned = Some(resource);
                    break;
                }
                Err(err) => {
                    let text = err.to_string();
                    let redacted = redact_secrets(&text);
                    match classify_provider_error(&text) {
                        ErrorClass::RegionTransient => {
                            warn!(region = %region, error = %redacted, "region-transient failure, trying next region");
                            last_error = redacted;
                        }
                        ErrorClass::Fatal => {
                            return ProvisioningResult::failed(
                                format!(
                                    "provisioning failed in {region}: {redacted} (manual action required)"
                                ),
                                ms(&started),
                                warnings,
                            );
                        }
                    }
                }
            }
        }

        let Some(resource) = provisioned else {
            warnings.push(format!("regions attempted: {}", attempted.join(", ")));
            return ProvisioningResult::failed(
                format!(
                    "all regions exhausted ({}); last error: {last_error} (retry is safe)",
                    attempted.join(", ")
                ),
                ms(&started),
                warnings,
            );
        };

        if let Some(warning) = self.await_ready(adapter.as_ref(), &resource.id).await {
            warnings.push(warning);
        }

        if let Err(reason) = resource.credentials.validate() {
            return ProvisioningResult::failed(
                format!("provider returned incomplete credentials: {reason} (manual action required)"),
                ms(&started),
                warnings,
            );
        }

        ProvisioningResult::ok(
            resource.credentials,
            resource.id,
            resource.url,
            resource.estimated_monthly_cost,
            ms(&started),
            warnings,
        )
    }

    /// Delete a provisioned resource
    ///
    /// # Errors
    /// Registry or provider failures.
    pub async fn delete(
        &self,
        provider: ProviderKind,
        id: &ResourceId,
    ) -> Result<(), OrchestratorError> {
        let adapter = self.registry.get(provider)?;
        adapter.delete(id).await?;
        Ok(())
    }

    /// Validate credentials through the provider adapter
    ///
    /// # Errors
    /// Registry failures or failed validation.
    pub fn test_connection(
        &self,
        provider: ProviderKind,
        credentials: &DatabaseCredentials,
    ) -> Result<(), OrchestratorError> {
        let adapter = self.registry.get(provider)?;
        adapter.test_connection(credentials)?;
        Ok(())
    }

    /// Poll until ready; any non-success becomes a warning, not a failure
    ///
    /// The resource was already created, and several providers finish
    /// initializing after the create call returns.
    async fn await_ready(
        &self,
        adapter: &dyn DatabaseProviderAdapter,
        id: &ResourceId,
    ) -> Option<String> {
        let tuning = adapter.readiness_backoff();
        let deadline = Instant::now() + tuning.timeout;
        let mut intervals = Backoff::new(tuning.initial, tuning.multiplier, tuning.cap);

        loop {
            match adapter.get_status(id).await {
                Ok(ResourceStatus::Ready) => return None,
                Ok(ResourceStatus::Initializing) => {}
                Ok(ResourceStatus::Failed { reason }) => {
                    return Some(format!(
                        "resource {id} reported '{}' during initialization; it may still \
                         become ready on the provider side",
                        redact_secrets(&reason)
                    ));
                }
                Err(err) => {
                    let text = err.to_string();
                    if classify_provider_error(&text) == ErrorClass::Fatal {
                        return Some(format!(
                            "readiness check failed: {}",
                            redact_secrets(&text)
                        ));
                    }
                    // Transient poll failure: keep waiting.
                }
            }

            let interval = intervals.next().unwrap_or(tuning.cap);
            if Instant::now() + interval >= deadline {
                return Some(format!(
                    "resource {id} was created but did not report ready within {}s; \
                     credentials are returned anyway",
                    tuning.timeout.as_secs()
                ));
            }
            tokio::time::sleep(interval).await;
        }
    }
}

/// Generate a 24-character alphanumeric database password
fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

fn ms(started: &Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
