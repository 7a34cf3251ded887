//! Connector registry
//!
//! Static, build-once map of connector implementations keyed by normalized
//! name. Request-time code only reads from it.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use tracing::info;

use crate::config::AppConfig;
use crate::connectors::bank_feed::BankFeedConnector;
use crate::connectors::example::ExampleConnector;
use crate::connectors::exchange_rates::ExchangeRatesConnector;
use crate::connectors::metadata::{ConnectorDescriptor, ConnectorMetadata};
use crate::connectors::trait_::Connector;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Connector '{name}' not found")]
    NotFound { name: String },
    #[error("Connector '{name}' is already registered")]
    Duplicate { name: String },
    #[error("Connector '{name}' could not be initialized: {reason}")]
    Initialization { name: String, reason: String },
}

/// Lower-cases and trims a connector name for lookup.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Registry of connectors and their cached descriptors
#[derive(Clone, Default)]
pub struct Registry {
    connectors: BTreeMap<String, Arc<dyn Connector>>,
    descriptors: OnceLock<Vec<ConnectorDescriptor>>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every connector shipped with the service.
    pub fn builtin(config: &AppConfig) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        registry.register(Arc::new(ExampleConnector))?;

        let exchange_rates =
            ExchangeRatesConnector::from_config(config).map_err(|err| {
                RegistryError::Initialization {
                    name: ExchangeRatesConnector::NAME.to_string(),
                    reason: err.to_string(),
                }
            })?;
        registry.register(Arc::new(exchange_rates))?;

        let bank_feed = BankFeedConnector::from_config(config).map_err(|err| {
            RegistryError::Initialization {
                name: BankFeedConnector::NAME.to_string(),
                reason: err.to_string(),
            }
        })?;
        registry.register(Arc::new(bank_feed))?;

        info!(connectors = ?registry.names_only(), "Connector registry initialized");
        Ok(registry)
    }

    /// Register a connector under its normalized name.
    pub fn register(&mut self, connector: Arc<dyn Connector>) -> Result<(), RegistryError> {
        let key = normalize_name(connector.name());
        if self.connectors.contains_key(&key) {
            return Err(RegistryError::Duplicate { name: key });
        }
        self.connectors.insert(key, connector);
        self.descriptors = OnceLock::new();
        Ok(())
    }

    /// Descriptors of every registered connector, sorted by name. Computed once.
    pub fn all(&self) -> &[ConnectorDescriptor] {
        self.descriptors.get_or_init(|| {
            self.connectors
                .values()
                .map(|connector| ConnectorDescriptor::of(connector.as_ref()))
                .collect()
        })
    }

    /// Case-insensitive lookup.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(&normalize_name(name)).cloned()
    }

    /// Case-insensitive lookup failing with [`RegistryError::NotFound`].
    pub fn find_required(&self, name: &str) -> Result<Arc<dyn Connector>, RegistryError> {
        self.find(name).ok_or_else(|| RegistryError::NotFound {
            name: name.to_string(),
        })
    }

    /// Cached descriptor for one connector.
    pub fn descriptor(&self, name: &str) -> Option<&ConnectorDescriptor> {
        let key = normalize_name(name);
        self.all()
            .iter()
            .find(|descriptor| normalize_name(&descriptor.name) == key)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connectors.contains_key(&normalize_name(name))
    }

    pub fn names_only(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }

    pub fn metadata(&self) -> Vec<ConnectorMetadata> {
        self.all().iter().map(ConnectorMetadata::from).collect()
    }

    /// Drop the descriptor cache so the next read recomputes it.
    pub fn reload(&mut self) {
        self.descriptors = OnceLock::new();
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::trait_::{ConnectorError, FieldSpec, SyncContext, SyncOutcome};
    use async_trait::async_trait;

    struct NamedConnector(&'static str);

    #[async_trait]
    impl Connector for NamedConnector {
        fn name(&self) -> &str {
            self.0
        }

        fn version(&self) -> &str {
            "0.0.1"
        }

        fn description(&self) -> &str {
            "test connector"
        }

        fn credential_fields(&self) -> Vec<FieldSpec> {
            Vec::new()
        }

        fn setting_fields(&self) -> Vec<FieldSpec> {
            Vec::new()
        }

        async fn sync(&self, _ctx: SyncContext) -> Result<SyncOutcome, ConnectorError> {
            Ok(SyncOutcome::succeeded())
        }
    }

    #[test]
    fn test_registry_unknown_connector() {
        let registry = Registry::new();

        assert!(registry.find("unknown").is_none());
        match registry.find_required("Unknown") {
            Err(RegistryError::NotFound { name }) => assert_eq!(name, "Unknown"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected NotFound"),
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let config = AppConfig::default();
        let registry = Registry::builtin(&config).expect("builtin registry");

        for spelling in ["EXAMPLE", "Example", "example", "  example "] {
            let connector = registry.find(spelling).expect("resolves");
            assert_eq!(connector.name(), "example");
        }
        assert_eq!(
            registry.descriptor("EXAMPLE"),
            registry.descriptor("example")
        );
    }

    #[test]
    fn test_builtin_registers_shipped_connectors() {
        let registry = Registry::builtin(&AppConfig::default()).expect("builtin registry");
        assert_eq!(
            registry.names_only(),
            vec!["bank_feed", "example", "exchange_rates"]
        );

        let bank_feed = registry.descriptor("bank_feed").expect("registered");
        assert!(bank_feed.requires_credentials());
        let example = registry.descriptor("example").expect("registered");
        assert!(!example.requires_credentials());
    }

    #[test]
    fn test_listing_is_sorted_and_flattened() {
        let mut registry = Registry::new();
        for name in ["zebra", "apple", "banana"] {
            registry
                .register(Arc::new(NamedConnector(name)))
                .expect("registers");
        }

        let metadata = registry.metadata();
        let names: Vec<&str> = metadata.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["apple", "banana", "zebra"]);
        assert_eq!(metadata[0].version, "0.0.1");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = Registry::new();
        registry
            .register(Arc::new(NamedConnector("dup")))
            .expect("first registration");
        assert_eq!(
            registry.register(Arc::new(NamedConnector("dup"))),
            Err(RegistryError::Duplicate {
                name: "dup".to_string()
            })
        );
    }

    #[test]
    fn test_reload_recomputes_descriptors() {
        let mut registry = Registry::new();
        registry
            .register(Arc::new(NamedConnector("one")))
            .expect("registers");
        assert_eq!(registry.all().len(), 1);

        registry.reload();
        assert_eq!(registry.all().len(), 1);
        assert_eq!(registry.len(), 1);
    }
}
