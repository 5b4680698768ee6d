//! Data models for dbkit.
//!
//! Connection descriptors, schema metadata, edit-session records and query
//! outcomes shared by connectors and services.

mod connection;
mod edit;
mod query;
mod schema;

pub use connection::{BackendType, ConnectionDescriptor, ConnectionId};
pub use edit::{CellChange, ChangeKind, EditSession, RowKey};
pub use query::{HistoryEntry, QueryOutcome, Row};
pub use schema::{
    ColumnInfo, ConstraintKind, SchemaNode, SchemaTree, TableConstraint, TableInfo, TableNode,
};
