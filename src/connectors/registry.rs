//! Backend-tag to connector constructor mapping.
//!
//! ```text
//! ConnectorRegistry
//!   ├── postgresql → PostgresConnector
//!   ├── mysql      → MySqlConnector
//!   ├── sqlite     → SqliteConnector
//!   └── mongodb    → MongoConnector
//! ```

use super::{Connector, ConnectorOptions, MongoConnector, MySqlConnector, PostgresConnector, SqliteConnector};
use crate::models::{BackendType, ConnectionDescriptor};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Constructor for one backend's connector.
pub type ConnectorFactory =
    Arc<dyn Fn(&ConnectionDescriptor, &ConnectorOptions) -> Arc<dyn Connector> + Send + Sync>;

/// Maps each backend tag to the constructor of its connector.
///
/// Construction never touches the network; an unregistered tag is the only
/// failure.
#[derive(Clone)]
pub struct ConnectorRegistry {
    factories: HashMap<BackendType, ConnectorFactory>,
    options: ConnectorOptions,
}

impl ConnectorRegistry {
    /// Creates a registry with every built-in backend registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::with_options(ConnectorOptions::default())
    }

    /// Creates a registry with every built-in backend and explicit options.
    #[must_use]
    pub fn with_options(options: ConnectorOptions) -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            options,
        };
        registry.register(BackendType::PostgreSql, |d, o| {
            Arc::new(PostgresConnector::new(d.clone(), *o))
        });
        registry.register(BackendType::MySql, |d, o| {
            Arc::new(MySqlConnector::new(d.clone(), *o))
        });
        registry.register(BackendType::Sqlite, |d, _| {
            Arc::new(SqliteConnector::new(d.clone()))
        });
        registry.register(BackendType::MongoDb, |d, o| {
            Arc::new(MongoConnector::new(d.clone(), *o))
        });
        registry
    }

    /// Creates a registry with nothing registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            options: ConnectorOptions::default(),
        }
    }

    /// Registers (or replaces) the constructor for a backend tag.
    pub fn register<F>(&mut self, backend: BackendType, factory: F)
    where
        F: Fn(&ConnectionDescriptor, &ConnectorOptions) -> Arc<dyn Connector> + Send + Sync + 'static,
    {
        self.factories.insert(backend, Arc::new(factory));
    }

    /// Options handed to every constructor.
    #[must_use]
    pub const fn options(&self) -> &ConnectorOptions {
        &self.options
    }

    /// Builds a disconnected connector for a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedBackend`] when no constructor is
    /// registered for the descriptor's backend.
    pub fn create(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn Connector>> {
        let factory = self
            .factories
            .get(&descriptor.backend)
            .ok_or_else(|| Error::UnsupportedBackend(descriptor.backend.to_string()))?;
        tracing::debug!(
            connection_id = %descriptor.id,
            backend = %descriptor.backend,
            "Created connector"
        );
        Ok(factory(descriptor, &self.options))
    }

    /// Builds a connector from a textual backend tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedBackend`] for an unknown or unregistered tag.
    pub fn create_from_tag(
        &self,
        tag: &str,
        mut descriptor: ConnectionDescriptor,
    ) -> Result<Arc<dyn Connector>> {
        descriptor.backend = tag.parse()?;
        self.create(&descriptor)
    }

    /// Registered backend tags in declaration order.
    #[must_use]
    pub fn supported_types(&self) -> Vec<BackendType> {
        BackendType::all()
            .into_iter()
            .filter(|b| self.factories.contains_key(b))
            .collect()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("backends", &self.supported_types())
            .field("options", &self.options)
            .finish()
    }
}
