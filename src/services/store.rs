//! Connection descriptor store.

use crate::config::DbkitConfig;
use crate::models::{ConnectionDescriptor, ConnectionId};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Source of connection descriptors.
pub trait ConnectionStore: Send + Sync {
    /// Looks up a descriptor by id.
    fn get_connection(&self, connection_id: &ConnectionId) -> Option<ConnectionDescriptor>;
}

/// Process-local descriptor store, typically seeded from configuration.
#[derive(Debug, Default)]
pub struct InMemoryConnectionStore {
    connections: RwLock<HashMap<ConnectionId, ConnectionDescriptor>>,
}

impl InMemoryConnectionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding every `[[connections]]` entry of a config.
    ///
    /// Later duplicates of an id replace earlier ones.
    #[must_use]
    pub fn from_config(config: &DbkitConfig) -> Self {
        let connections = config
            .connections
            .iter()
            .map(|d| (d.id.clone(), d.clone()))
            .collect();
        Self {
            connections: RwLock::new(connections),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ConnectionId, ConnectionDescriptor>> {
        self.connections.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Connection store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ConnectionId, ConnectionDescriptor>> {
        self.connections.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Connection store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Adds a new descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the id is already present.
    pub fn add(&self, descriptor: ConnectionDescriptor) -> Result<()> {
        let mut connections = self.write();
        if connections.contains_key(&descriptor.id) {
            return Err(Error::InvalidInput(format!(
                "connection '{}' already exists",
                descriptor.id
            )));
        }
        connections.insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    /// Replaces an existing descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn update(&self, descriptor: ConnectionDescriptor) -> Result<()> {
        let mut connections = self.write();
        let slot = connections
            .get_mut(&descriptor.id)
            .ok_or_else(|| Error::NotFound(format!("connection '{}'", descriptor.id)))?;
        *slot = descriptor;
        Ok(())
    }

    /// Removes a descriptor; returns whether it existed.
    pub fn remove(&self, connection_id: &ConnectionId) -> bool {
        self.write().remove(connection_id).is_some()
    }

    /// Every descriptor, ordered by display name.
    #[must_use]
    pub fn list(&self) -> Vec<ConnectionDescriptor> {
        let mut all: Vec<_> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        all
    }
}

impl ConnectionStore for InMemoryConnectionStore {
    fn get_connection(&self, connection_id: &ConnectionId) -> Option<ConnectionDescriptor> {
        self.read().get(connection_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendType;

    #[test]
    fn test_add_get_update_remove() {
        let store = InMemoryConnectionStore::new();
        let descriptor = ConnectionDescriptor::sqlite("local", "/tmp/a.db");
        store.add(descriptor.clone()).unwrap();
        assert!(store.add(descriptor).is_err());

        let id = ConnectionId::new("local");
        let renamed = ConnectionDescriptor {
            name: "renamed".to_string(),
            ..store.get_connection(&id).unwrap()
        };
        store.update(renamed).unwrap();
        assert_eq!(store.get_connection(&id).unwrap().name, "renamed");

        assert!(store.remove(&id));
        assert!(!store.remove(&id));
        assert!(store.get_connection(&id).is_none());
    }

    #[test]
    fn test_update_unknown_is_not_found() {
        let store = InMemoryConnectionStore::new();
        let err = store
            .update(ConnectionDescriptor::new("x", "x", BackendType::MySql))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_list_sorted_by_name() {
        let store = InMemoryConnectionStore::new();
        store
            .add(ConnectionDescriptor::new("2", "zeta", BackendType::MySql))
            .unwrap();
        store
            .add(ConnectionDescriptor::new("1", "alpha", BackendType::MongoDb))
            .unwrap();
        let names: Vec<String> = store.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }

    #[test]
    fn test_seeded_from_config() {
        let mut config = DbkitConfig::default();
        config
            .connections
            .push(ConnectionDescriptor::sqlite("local", "/tmp/a.db"));
        let store = InMemoryConnectionStore::from_config(&config);
        assert!(store.get_connection(&ConnectionId::new("local")).is_some());
    }
}
