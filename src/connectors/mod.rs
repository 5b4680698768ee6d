//! Backend connectors.
//!
//! Every backend implements the [`Connector`] contract: connect, disconnect,
//! test, list schemas/tables/columns, and execute a query. Relational
//! backends run query text directly; the document store first parses it as a
//! shell command.
//!
//! | Backend | Module | Driver | Feature |
//! |---------|--------|--------|---------|
//! | PostgreSQL | `postgresql` | `tokio-postgres` + `deadpool-postgres` | `postgres` |
//! | MySQL / MariaDB | `mysql` | `sqlx` | `mysql` |
//! | `SQLite` | `sqlite` | `rusqlite` | always |
//! | MongoDB | `mongodb` | `mongodb` | `mongodb` |
//!
//! With a driver feature disabled the backend still has a connector; its
//! `connect` returns [`Error::FeatureNotEnabled`](crate::Error::FeatureNotEnabled).

mod dialect;
mod mongodb;
mod mysql;
mod postgresql;
mod registry;
mod sqlite;

pub use crate::models::Row;
pub use dialect::{SINGLE_KEY_COLUMN, SqlDialect};
pub use mongodb::MongoConnector;
pub use mysql::MySqlConnector;
pub use postgresql::PostgresConnector;
pub use registry::{ConnectorFactory, ConnectorRegistry};
pub use sqlite::SqliteConnector;

use crate::models::{BackendType, ColumnInfo};
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a connect attempt.
///
/// An unreachable backend is a value the caller branches on, not an error;
/// errors from `connect` are reserved for failures beneath the handshake
/// such as a driver compiled out.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum ConnectOutcome {
    /// A live backend handle is held.
    Connected,
    /// The backend refused or could not be reached.
    Refused {
        /// Backend that refused.
        backend: BackendType,
        /// Why.
        reason: String,
    },
}

impl ConnectOutcome {
    /// Returns true when connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Converts a refusal into [`Error::Connection`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the outcome is `Refused`.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Connected => Ok(()),
            Self::Refused { backend, reason } => Err(Error::Connection {
                backend: backend.to_string(),
                reason,
            }),
        }
    }
}

/// Settings shared by every connector a registry builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorOptions {
    /// Handshake deadline for network backends.
    pub connect_timeout: Duration,
    /// Result cap for document-store `find` and `aggregate`.
    pub max_documents: usize,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_documents: 1000,
        }
    }
}

impl ConnectorOptions {
    /// Builds options from loaded configuration.
    #[must_use]
    pub const fn from_config(config: &crate::config::DbkitConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            max_documents: config.max_documents,
        }
    }
}

/// Capability contract implemented once per backend.
///
/// Connectors keep their live handle behind interior mutability so they can
/// be shared as `Arc<dyn Connector>`; callers serialize operations on one
/// connection through [`OperationLock`](crate::services::OperationLock).
#[async_trait]
pub trait Connector: Send + Sync {
    /// Backend this connector talks to.
    fn backend(&self) -> BackendType;

    /// Returns true while a live handle is held.
    fn is_connected(&self) -> bool;

    /// Opens the backend handle.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures beneath the handshake (for example
    /// [`Error::FeatureNotEnabled`]); an unreachable backend is reported as
    /// [`ConnectOutcome::Refused`] and leaves the connector disconnected.
    async fn connect(&self) -> Result<ConnectOutcome>;

    /// Drops the backend handle. Disconnecting twice is a no-op.
    async fn disconnect(&self) -> Result<()>;

    /// Connects if needed and runs a trivial round trip.
    async fn test_connection(&self) -> bool;

    /// Lists schemas (databases on MySQL and MongoDB) in backend order.
    async fn get_schemas(&self) -> Result<Vec<String>>;

    /// Lists tables (collections on MongoDB) of a schema, or of the default
    /// schema when `None`.
    async fn get_tables(&self, schema: Option<&str>) -> Result<Vec<String>>;

    /// Lists column metadata in ordinal order.
    async fn get_columns(&self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnInfo>>;

    /// Executes query text and returns the rows.
    ///
    /// Statements without a result set return an empty list.
    async fn execute_query(&self, query: &str) -> Result<Vec<Row>>;
}

/// Maps a driver error to [`Error::Execution`].
pub(crate) fn execution_error(e: impl std::fmt::Display) -> Error {
    Error::Execution(e.to_string())
}

/// Error for an operation attempted without a live handle.
pub(crate) fn not_connected(backend: BackendType) -> Error {
    Error::NotConnected(backend.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refused_into_connection_error() {
        let outcome = ConnectOutcome::Refused {
            backend: BackendType::PostgreSql,
            reason: "connection refused".to_string(),
        };
        assert!(!outcome.is_connected());
        let err = outcome.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "connection to postgresql failed: connection refused"
        );
        assert!(ConnectOutcome::Connected.into_result().is_ok());
    }

    #[test]
    fn test_options_from_config() {
        let config = crate::config::DbkitConfig::default().with_max_documents(5);
        let options = ConnectorOptions::from_config(&config);
        assert_eq!(options.max_documents, 5);
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
    }
}
