//! Provider registry
//!
//! Maps a provider identifier to a configured adapter. Configuration
//! presence is validated when adapters are constructed, so a registry never
//! hands out a half-configured adapter.

use crate::adapter::DatabaseProviderAdapter;
use crate::types::ProviderKind;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry and configuration errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No adapter registered for the provider
    #[error("provider not configured: {0} (manual action required)")]
    ProviderNotConfigured(ProviderKind),

    /// A required configuration key is absent or empty
    #[error("missing provider configuration: {key} (manual action required)")]
    MissingConfiguration {
        /// The absent key
        key: String,
    },
}

/// Read a required configuration value
///
/// # Errors
/// [`RegistryError::MissingConfiguration`] when the key is absent or empty.
pub fn require_config<'a>(
    config: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str, RegistryError> {
    config
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RegistryError::MissingConfiguration {
            key: key.to_string(),
        })
}

/// Provider id -> configured adapter
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn DatabaseProviderAdapter>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own kind
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn DatabaseProviderAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    /// Look up the adapter for a provider
    ///
    /// # Errors
    /// [`RegistryError::ProviderNotConfigured`] when nothing is registered.
    pub fn get(
        &self,
        kind: ProviderKind,
    ) -> Result<Arc<dyn DatabaseProviderAdapter>, RegistryError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or(RegistryError::ProviderNotConfigured(kind))
    }

    /// Registered provider kinds
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.adapters.keys().copied().collect()
    }
}
