//! # dbkit
//!
//! A unified query-and-edit layer over heterogeneous database backends.
//!
//! One client opens a connection, lists schema metadata, runs a query and
//! applies cell-level edits without knowing which engine is underneath.
//!
//! ## Features
//!
//! - One [`Connector`](connectors::Connector) contract implemented for
//!   PostgreSQL, MySQL/MariaDB, `SQLite` and MongoDB
//! - A shell-syntax parser for document-store commands
//!   (`db.users.find({"age": {"$gt": 21}})`)
//! - Per-connection operation locking with FIFO ordering
//! - Cell editing with change tracking, validation and ordered rollback
//! - A TTL schema cache in front of schema introspection
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbkit::connectors::ConnectorRegistry;
//! use dbkit::models::{BackendType, ConnectionDescriptor};
//! use dbkit::services::{InMemoryHistory, OperationLock, QueryExecutor};
//! use std::sync::Arc;
//!
//! let descriptor = ConnectionDescriptor::sqlite("local", "app.db");
//! let connector = ConnectorRegistry::with_defaults().create(&descriptor)?;
//! connector.connect().await?.into_result()?;
//!
//! let executor = QueryExecutor::new(Arc::new(OperationLock::new()), Arc::new(InMemoryHistory::default()));
//! let outcome = executor.execute(&descriptor.id, connector, "SELECT * FROM users", None).await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod cache;
pub mod config;
pub mod connectors;
pub mod models;
pub mod observability;
pub mod services;
pub mod shell;

pub use cache::SchemaCache;
pub use config::DbkitConfig;
pub use connectors::{ConnectOutcome, Connector, ConnectorRegistry, Row};
pub use models::{
    BackendType, CellChange, ChangeKind, ColumnInfo, ConnectionDescriptor, ConnectionId,
    EditSession, RowKey, TableConstraint,
};
pub use services::{
    DataEditor, InMemoryConnectionStore, InMemoryHistory, OperationLock, QueryExecutor,
    SchemaExplorer,
};
pub use shell::{ShellCommand, parse_command};

/// Error type for dbkit operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `UnsupportedBackend` | A backend tag has no connector (construction error) |
/// | `Connection` | The backend is unreachable or refused the handshake |
/// | `Syntax` | A shell-syntax command does not match the grammar |
/// | `Validation` | The validator rejected a proposed cell value |
/// | `Execution` | The backend rejected a statement |
/// | `Timeout` | A backend call missed a caller-supplied deadline |
/// | `Busy` | A fail-fast lock attempt found the connection in use |
#[derive(Debug, ThisError)]
pub enum Error {
    /// No connector is registered for the backend tag.
    ///
    /// This is the only construction-time error; it is never retried.
    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),

    /// The backend could not be reached.
    ///
    /// The connector is left disconnected.
    #[error("connection to {backend} failed: {reason}")]
    Connection {
        /// Backend wire name.
        backend: String,
        /// Why the handshake failed.
        reason: String,
    },

    /// A shell command did not match the grammar.
    #[error("syntax error: {message} (at `{fragment}`)")]
    Syntax {
        /// What the parser expected.
        message: String,
        /// The offending fragment, verbatim.
        fragment: String,
    },

    /// The validator rejected a value. No backend call was attempted.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The backend rejected a statement after validation passed.
    #[error("execution failed: {0}")]
    Execution(String),

    /// A backend call did not complete within the deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Another operation currently holds the connection.
    #[error("connection '{0}' is busy with another operation")]
    Busy(String),

    /// The connector has no live backend handle.
    #[error("not connected to {0}")]
    NotConnected(String),

    /// A referenced connection, table or column does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),

    /// An I/O, configuration or runtime operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Builds a syntax error from a message and the offending fragment.
    pub fn syntax(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
            fragment: fragment.into(),
        }
    }

    /// Returns true when the caller may reasonably try the same call again.
    ///
    /// Nothing in this crate retries on its own.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Busy(_))
    }
}

/// Result type alias for dbkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Acquires a std mutex, recovering from poison.
///
/// A panic inside a critical section leaves the guarded state usable for
/// every structure in this crate, so the guard is recovered and the event
/// logged.
pub(crate) fn acquire_lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Mutex was poisoned, recovering");
            metrics::counter!("dbkit_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}
