//! Services over the connector contract.
//!
//! Services share process-scoped state by handle: one [`OperationLock`]
//! table, one schema cache, one history. Nothing here is a global.
//!
//! | Service | Role |
//! |---------|------|
//! | [`QueryExecutor`] | runs query text under the connection lock, records history |
//! | [`DataEditor`] | validated cell edits, commit and rollback |
//! | [`SchemaExplorer`] | cached schema trees and table samples |
//! | [`OperationLock`] | per-connection FIFO mutual exclusion |

mod editor;
mod executor;
mod history;
mod lock;
mod schema_explorer;
mod store;
mod validator;

pub use editor::DataEditor;
pub use executor::QueryExecutor;
pub use history::{DEFAULT_HISTORY_CAPACITY, InMemoryHistory, QueryHistory};
pub use lock::{OperationGuard, OperationLock};
pub use schema_explorer::{SAMPLE_ROWS, SchemaExplorer};
pub use store::{ConnectionStore, InMemoryConnectionStore};
pub use validator::{TypeClass, sanitize_value, validate_cell_change};
