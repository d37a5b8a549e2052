//! Plugin-based provider registry
//!
//! The registry maps provider type names to factories, so API clients are
//! built from configuration without hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use zonesync_core::registry::ProviderRegistry;
//! use zonesync_core::config::ProviderConfig;
//!
//! let registry = ProviderRegistry::new();
//! zonesync_provider_ns1::register(&registry);
//!
//! let config = ProviderConfig::Ns1 { .. };
//! let api = registry.create_provider(&config)?;
//! ```
//!
//! ## Registration
//!
//! Provider crates register themselves during initialization:
//!
//! ```rust,ignore
//! pub fn register(registry: &ProviderRegistry) {
//!     registry.register_provider("ns1", Box::new(Ns1Factory));
//! }
//! ```

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::traits::{DnsApi, DnsApiFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Provider registry for plugin-based API client creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ProviderRegistry {
    /// Registered API client factories
    providers: RwLock<HashMap<String, Box<dyn DnsApiFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an API client factory
    ///
    /// # Parameters
    ///
    /// - `name`: Provider type name (e.g., "ns1")
    /// - `factory`: Factory object for creating client instances
    pub fn register_provider(&self, name: impl Into<String>, factory: Box<dyn DnsApiFactory>) {
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        providers.insert(name.into(), factory);
    }

    /// Create an API client from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn DnsApi>)`: Created client, shareable across workers
    /// - `Err(Error)`: If the provider type is not registered or creation fails
    pub fn create_provider(&self, config: &ProviderConfig) -> Result<Arc<dyn DnsApi>> {
        config.validate()?;

        let provider_type = config.type_name();
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = providers
            .get(provider_type)
            .ok_or_else(|| Error::config(format!("Unknown provider type: {}", provider_type)))?;

        factory.create(config)
    }

    /// List all registered provider types
    pub fn list_providers(&self) -> Vec<String> {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider type is registered
    pub fn has_provider(&self, name: &str) -> bool {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        providers.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockProviderFactory;

    impl DnsApiFactory for MockProviderFactory {
        fn create(&self, _config: &ProviderConfig) -> Result<Arc<dyn DnsApi>> {
            Err(Error::not_found("Mock provider not implemented"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = ProviderRegistry::new();

        assert!(!registry.has_provider("mock"));

        registry.register_provider("mock", Box::new(MockProviderFactory));

        assert!(registry.has_provider("mock"));
        assert_eq!(registry.list_providers(), vec!["mock".to_string()]);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let registry = ProviderRegistry::new();
        let config = ProviderConfig::Custom {
            factory: "route53".into(),
            config: serde_json::json!({"region": "us-east-1"}),
        };

        let err = registry.create_provider(&config).err().unwrap();
        assert!(err.to_string().contains("Unknown provider type: route53"));
    }

    #[test]
    fn test_invalid_config_rejected_before_lookup() {
        let registry = ProviderRegistry::new();
        registry.register_provider("mock", Box::new(MockProviderFactory));

        let config = ProviderConfig::Custom {
            factory: "mock".into(),
            config: serde_json::Value::Null,
        };
        assert!(matches!(
            registry.create_provider(&config),
            Err(Error::Config(_))
        ));
    }
}
