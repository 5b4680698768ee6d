//! Cell editing with change tracking.
//!
//! Every edit runs under the connection's operation lock. A change is
//! validated before any statement reaches the backend, then applied, then
//! recorded in the session so it can be replayed or rolled back.
//!
//! # Non-atomic commit
//!
//! [`DataEditor::commit_changes`] replays pending changes one statement at a
//! time. A failure partway leaves earlier changes applied and the rest
//! pending; nothing is reversed automatically.

use crate::acquire_lock;
use crate::connectors::{Connector, Row, SqlDialect};
use crate::models::{
    BackendType, CellChange, ChangeKind, ColumnInfo, ConnectionId, ConstraintKind, EditSession,
    RowKey, TableConstraint,
};
use crate::services::lock::OperationLock;
use crate::services::validator::{TypeClass, sanitize_value, validate_cell_change};
use crate::shell::{CollectionOp, Document, ShellCommand};
use crate::{Error, Result};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// Key field of a document row.
const DOCUMENT_KEY_FIELD: &str = "_id";

/// Declared type for document fields absent from the sampled document.
const DOCUMENT_FIELD_TYPE: &str = "mixed";

/// Edits cells on one connection and tracks them in an [`EditSession`].
pub struct DataEditor {
    connection_id: ConnectionId,
    connector: Arc<dyn Connector>,
    lock: Arc<OperationLock>,
    session: Mutex<EditSession>,
    auto_commit: bool,
}

impl DataEditor {
    /// Creates an editor with an empty session.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        connector: Arc<dyn Connector>,
        lock: Arc<OperationLock>,
    ) -> Self {
        Self {
            session: Mutex::new(EditSession::new(connection_id.clone())),
            connection_id,
            connector,
            lock,
            auto_commit: false,
        }
    }

    /// In auto-commit mode applied changes are not recorded.
    #[must_use]
    pub const fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Connection this editor works on.
    #[must_use]
    pub const fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn session(&self) -> EditSession {
        acquire_lock(&self.session).clone()
    }

    /// Returns true when changes are pending.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        acquire_lock(&self.session).has_changes()
    }

    /// Swaps in another session, returning the previous one.
    ///
    /// Used to replay an inverse session built with
    /// [`EditSession::inverse_of`]. Waits for any running commit or rollback,
    /// which edit the session by position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the session belongs to another
    /// connection.
    pub async fn replace_session(&self, session: EditSession) -> Result<EditSession> {
        if session.connection_id != self.connection_id {
            return Err(Error::InvalidInput(format!(
                "session belongs to connection '{}', editor to '{}'",
                session.connection_id, self.connection_id
            )));
        }
        let _guard = self.lock.acquire(&self.connection_id).await;
        Ok(std::mem::replace(&mut *acquire_lock(&self.session), session))
    }

    /// Drops one pending change without touching the backend.
    pub async fn remove_change(
        &self,
        table: &str,
        row_key: &RowKey,
        column: &str,
        schema: Option<&str>,
    ) -> Option<CellChange> {
        let _guard = self.lock.acquire(&self.connection_id).await;
        acquire_lock(&self.session).remove_change(table, row_key, column, schema)
    }

    fn dialect(&self) -> Option<SqlDialect> {
        SqlDialect::for_backend(self.connector.backend())
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.connector.is_connected() {
            return Ok(());
        }
        self.connector.connect().await?.into_result()
    }

    /// Updates one cell.
    ///
    /// The value is validated against the column before anything is sent; a
    /// rejected value yields [`Error::Validation`] and leaves the backend and
    /// the session untouched. Otherwise the current value is read, the update
    /// is executed and the change recorded. A change whose statement fails is
    /// still recorded (unless auto-commit is on) so it can be retried by
    /// [`commit_changes`](Self::commit_changes) or undone by
    /// [`rollback_changes`](Self::rollback_changes).
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a rejected value
    /// - [`Error::NotFound`] for an unknown relational column
    /// - the connector's error if a read or the update fails
    #[instrument(
        skip(self, row_key, new_value),
        fields(operation = "update_cell", connection_id = %self.connection_id)
    )]
    pub async fn update_cell(
        &self,
        table: &str,
        row_key: RowKey,
        column: &str,
        new_value: Value,
        schema: Option<&str>,
    ) -> Result<CellChange> {
        let _guard = self.lock.acquire(&self.connection_id).await;
        self.ensure_connected().await?;

        let info = self.column_info(table, column, schema).await?;
        let mut change = CellChange::update(
            table,
            schema.map(str::to_string),
            row_key,
            column,
            Value::Null,
            new_value,
        );

        let errors = validate_cell_change(&change, &info);
        if !errors.is_empty() {
            metrics::counter!("dbkit_edit_validation_failures_total").increment(1);
            tracing::debug!(errors = ?errors, "Cell change rejected");
            return Err(Error::Validation(errors));
        }
        // Decimal text stays text so no precision is lost.
        if TypeClass::of(&info.data_type) != TypeClass::Decimal {
            change.new_value = sanitize_value(&change.new_value, &info.data_type);
        }

        change.old_value = self.read_cell(&change).await?;
        let applied = self.apply(&change).await;

        if !self.auto_commit {
            acquire_lock(&self.session).record(change.clone());
        }
        metrics::counter!("dbkit_edit_changes_total", "kind" => change.kind.as_str()).increment(1);

        applied.map(|()| change)
    }

    /// Replays every pending change in session order, then clears them.
    ///
    /// Returns the replayed changes, which callers can keep as an undo log.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Execution`] naming the failing position. Changes
    /// before it stay applied and leave the session; it and later changes
    /// stay pending.
    #[instrument(skip(self), fields(operation = "commit_changes", connection_id = %self.connection_id))]
    pub async fn commit_changes(&self) -> Result<Vec<CellChange>> {
        let _guard = self.lock.acquire(&self.connection_id).await;
        let pending = acquire_lock(&self.session).pending().to_vec();
        if pending.is_empty() {
            return Ok(pending);
        }
        self.ensure_connected().await?;

        let total = pending.len();
        for (position, change) in pending.iter().enumerate() {
            if let Err(e) = self.apply(change).await {
                acquire_lock(&self.session).drain_front(position);
                tracing::warn!(position, total, error = %e, "Commit stopped");
                return Err(Error::Execution(format!(
                    "commit stopped at change {} of {total}: {e}",
                    position + 1
                )));
            }
        }

        acquire_lock(&self.session).clear();
        tracing::info!(changes = total, "Committed changes");
        Ok(pending)
    }

    /// Undoes every pending change, newest first, then clears them.
    ///
    /// Returns the inverse changes that were applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Execution`] on the first failure. Changes already
    /// undone leave the session; the rest stay pending.
    #[instrument(skip(self), fields(operation = "rollback_changes", connection_id = %self.connection_id))]
    pub async fn rollback_changes(&self) -> Result<Vec<CellChange>> {
        let _guard = self.lock.acquire(&self.connection_id).await;
        let pending = acquire_lock(&self.session).pending().to_vec();
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_connected().await?;

        let mut undone = Vec::with_capacity(pending.len());
        for change in pending.iter().rev() {
            let inverse = change.inverse();
            if let Err(e) = self.apply(&inverse).await {
                acquire_lock(&self.session).truncate_back(undone.len());
                tracing::warn!(undone = undone.len(), error = %e, "Rollback stopped");
                return Err(Error::Execution(format!(
                    "rollback stopped after {} of {} changes: {e}",
                    undone.len(),
                    pending.len()
                )));
            }
            undone.push(inverse);
        }

        acquire_lock(&self.session).clear();
        tracing::info!(changes = undone.len(), "Rolled back changes");
        Ok(undone)
    }

    /// Lists a table's constraints from backend metadata. Never cached.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if introspection fails.
    #[instrument(skip(self), fields(operation = "get_table_constraints", connection_id = %self.connection_id))]
    pub async fn get_table_constraints(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<TableConstraint>> {
        let _guard = self.lock.acquire(&self.connection_id).await;
        self.ensure_connected().await?;

        match self.connector.backend() {
            BackendType::PostgreSql => {
                let dialect = SqlDialect::Postgres;
                let query = format!(
                    "SELECT tc.constraint_name::text AS constraint_name, \
                     tc.constraint_type::text AS constraint_type, \
                     kcu.column_name::text AS column_name, \
                     ccu.table_name::text AS foreign_table_name, \
                     ccu.column_name::text AS foreign_column_name \
                     FROM information_schema.table_constraints tc \
                     LEFT JOIN information_schema.key_column_usage kcu \
                       ON tc.constraint_name = kcu.constraint_name \
                      AND tc.table_schema = kcu.table_schema \
                      AND tc.table_name = kcu.table_name \
                     LEFT JOIN information_schema.constraint_column_usage ccu \
                       ON tc.constraint_name = ccu.constraint_name \
                      AND tc.constraint_type = 'FOREIGN KEY' \
                     WHERE tc.table_name = {} AND tc.table_schema = {} \
                     ORDER BY tc.constraint_name, kcu.ordinal_position",
                    dialect.literal(&json!(table)),
                    dialect.literal(&json!(schema.unwrap_or("public")))
                );
                let rows = self.connector.execute_query(&query).await?;
                Ok(group_constraint_rows(&rows))
            },
            BackendType::MySql => {
                let dialect = SqlDialect::MySql;
                let schema = schema.map_or_else(
                    || "DATABASE()".to_string(),
                    |s| dialect.literal(&json!(s)),
                );
                let query = format!(
                    "SELECT tc.CONSTRAINT_NAME AS constraint_name, \
                     tc.CONSTRAINT_TYPE AS constraint_type, \
                     kcu.COLUMN_NAME AS column_name, \
                     kcu.REFERENCED_TABLE_NAME AS foreign_table_name, \
                     kcu.REFERENCED_COLUMN_NAME AS foreign_column_name \
                     FROM information_schema.TABLE_CONSTRAINTS tc \
                     LEFT JOIN information_schema.KEY_COLUMN_USAGE kcu \
                       ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
                      AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA \
                      AND tc.TABLE_NAME = kcu.TABLE_NAME \
                     WHERE tc.TABLE_NAME = {} AND tc.TABLE_SCHEMA = {schema} \
                     ORDER BY tc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION",
                    dialect.literal(&json!(table))
                );
                let rows = self.connector.execute_query(&query).await?;
                Ok(group_constraint_rows(&rows))
            },
            BackendType::Sqlite => self.sqlite_constraints(table, schema).await,
            BackendType::MongoDb => self.document_constraints(table).await,
        }
    }

    async fn sqlite_constraints(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<TableConstraint>> {
        let dialect = SqlDialect::Sqlite;
        let prefix = schema.map_or_else(String::new, |s| format!("{}.", dialect.quote_ident(s)));
        let pragma = |name: &str, arg: &str| format!("PRAGMA {prefix}{name}({})", dialect.quote_ident(arg));
        let mut constraints = Vec::new();

        let columns = self.connector.execute_query(&pragma("table_info", table)).await?;
        let mut primary: Vec<(i64, String)> = Vec::new();
        let mut not_null = Vec::new();
        for row in &columns {
            let Some(name) = text_field(row, "name") else {
                continue;
            };
            let pk = int_field(row, "pk");
            if pk > 0 {
                primary.push((pk, name));
            } else if int_field(row, "notnull") == 1 {
                not_null.push(name);
            }
        }
        if !primary.is_empty() {
            primary.sort_by_key(|(position, _)| *position);
            let columns = primary.into_iter().map(|(_, name)| name).collect();
            constraints.push(TableConstraint::new("PRIMARY", ConstraintKind::PrimaryKey, columns));
        }

        let keys = self.connector.execute_query(&pragma("foreign_key_list", table)).await?;
        for row in &keys {
            let name = format!("fk_{table}_{}", int_field(row, "id"));
            if !constraints.iter().any(|c: &TableConstraint| c.name == name) {
                let mut fk = TableConstraint::new(&name, ConstraintKind::ForeignKey, Vec::new());
                fk.referenced_table = text_field(row, "table");
                fk.referenced_columns = Some(Vec::new());
                constraints.push(fk);
            }
            let Some(fk) = constraints.iter_mut().find(|c| c.name == name) else {
                continue;
            };
            if let Some(from) = text_field(row, "from") {
                fk.columns.push(from);
            }
            if let (Some(to), Some(refs)) = (text_field(row, "to"), fk.referenced_columns.as_mut()) {
                refs.push(to);
            }
        }

        let indexes = self.connector.execute_query(&pragma("index_list", table)).await?;
        for row in &indexes {
            let unique = int_field(row, "unique") == 1;
            let from_pk = text_field(row, "origin").as_deref() == Some("pk");
            let Some(index) = text_field(row, "name").filter(|_| unique && !from_pk) else {
                continue;
            };
            let info = self.connector.execute_query(&pragma("index_info", &index)).await?;
            let columns = info.iter().filter_map(|r| text_field(r, "name")).collect();
            constraints.push(TableConstraint::new(index, ConstraintKind::Unique, columns));
        }

        constraints.extend(not_null.into_iter().map(|column| {
            TableConstraint::new(
                format!("{table}_{column}_not_null"),
                ConstraintKind::NotNull,
                vec![column],
            )
        }));
        Ok(constraints)
    }

    async fn document_constraints(&self, collection: &str) -> Result<Vec<TableConstraint>> {
        let command = ShellCommand::Collection {
            collection: collection.to_string(),
            op: CollectionOp::ListIndexes,
        };
        let rows = self.connector.execute_query(&command.to_string()).await?;
        let constraints = rows
            .iter()
            .filter_map(|row| {
                let name = text_field(row, "name")?;
                let columns = row
                    .get("key")
                    .and_then(Value::as_object)
                    .map(|keys| keys.keys().cloned().collect())
                    .unwrap_or_default();
                let kind = if name == "_id_" {
                    ConstraintKind::PrimaryKey
                } else if row.get("unique").and_then(Value::as_bool) == Some(true) {
                    ConstraintKind::Unique
                } else {
                    return None;
                };
                Some(TableConstraint::new(name, kind, columns))
            })
            .collect();
        Ok(constraints)
    }

    /// Checks that `value` exists in `referenced_table.referenced_column`.
    ///
    /// Null always passes. Lookup failures are reported as a message, not
    /// an error.
    pub async fn validate_foreign_key(
        &self,
        value: &Value,
        referenced_table: &str,
        referenced_column: &str,
    ) -> Vec<String> {
        let text = match value {
            Value::Null => return Vec::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if text.trim().is_empty() {
            return vec!["Foreign key cannot be empty string".to_string()];
        }

        let query = match self.dialect() {
            Some(dialect) => format!(
                "SELECT 1 FROM {} WHERE {} = {} LIMIT 1",
                dialect.qualified(None, referenced_table),
                dialect.quote_ident(referenced_column),
                dialect.literal(value)
            ),
            None => {
                let mut filter = Document::new();
                filter.insert(referenced_column.to_string(), value.clone());
                let mut projection = Document::new();
                projection.insert(DOCUMENT_KEY_FIELD.to_string(), json!(1));
                ShellCommand::Collection {
                    collection: referenced_table.to_string(),
                    op: CollectionOp::FindOne {
                        filter,
                        projection: Some(projection),
                    },
                }
                .to_string()
            },
        };

        let _guard = self.lock.acquire(&self.connection_id).await;
        let lookup = match self.ensure_connected().await {
            Ok(()) => self.connector.execute_query(&query).await,
            Err(e) => Err(e),
        };
        match lookup {
            Ok(rows) if rows.is_empty() => vec![format!(
                "Referenced value '{text}' not found in {referenced_table}.{referenced_column}"
            )],
            Ok(_) => Vec::new(),
            Err(e) => vec![format!("Foreign key validation failed: {e}")],
        }
    }

    async fn column_info(&self, table: &str, column: &str, schema: Option<&str>) -> Result<ColumnInfo> {
        let columns = self.connector.get_columns(table, schema).await?;
        match columns.into_iter().find(|c| c.name == column) {
            Some(info) => Ok(info),
            // Documents have no fixed shape; an unseen field may be set freely.
            None if self.dialect().is_none() => Ok(ColumnInfo::new(column, DOCUMENT_FIELD_TYPE)),
            None => Err(Error::NotFound(format!("column '{column}' in table '{table}'"))),
        }
    }

    async fn read_cell(&self, change: &CellChange) -> Result<Value> {
        let query = match self.dialect() {
            Some(dialect) => dialect.select_cell(change),
            None => {
                let mut projection = Document::new();
                projection.insert(change.column.clone(), json!(1));
                ShellCommand::Collection {
                    collection: change.table.clone(),
                    op: CollectionOp::FindOne {
                        filter: document_filter(change),
                        projection: Some(projection),
                    },
                }
                .to_string()
            },
        };
        let rows = self.connector.execute_query(&query).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get(&change.column))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn apply(&self, change: &CellChange) -> Result<()> {
        let statement = match self.dialect() {
            Some(dialect) => dialect.statement_for(change),
            None => document_statement(change).to_string(),
        };
        tracing::debug!(
            table = %change.table,
            column = %change.column,
            kind = change.kind.as_str(),
            "Applying change"
        );
        self.connector.execute_query(&statement).await.map(|_| ())
    }
}

impl std::fmt::Debug for DataEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataEditor")
            .field("connection_id", &self.connection_id)
            .field("backend", &self.connector.backend())
            .field("auto_commit", &self.auto_commit)
            .finish_non_exhaustive()
    }
}

fn document_filter(change: &CellChange) -> Document {
    change.row_key.predicates(DOCUMENT_KEY_FIELD).into_iter().collect()
}

/// Shell command applying a change to a document collection.
fn document_statement(change: &CellChange) -> ShellCommand {
    let filter = document_filter(change);
    let op = match change.kind {
        ChangeKind::Update => {
            let mut set = Document::new();
            set.insert(change.column.clone(), change.new_value.clone());
            let mut update = Document::new();
            update.insert("$set".to_string(), Value::Object(set));
            CollectionOp::UpdateOne { filter, update }
        },
        ChangeKind::Insert => {
            let mut document = filter;
            document.insert(change.column.clone(), change.new_value.clone());
            CollectionOp::InsertOne { document }
        },
        ChangeKind::Delete => CollectionOp::DeleteOne { filter },
    };
    ShellCommand::Collection {
        collection: change.table.clone(),
        op,
    }
}

/// Folds one-row-per-column constraint listings into constraints.
fn group_constraint_rows(rows: &[Row]) -> Vec<TableConstraint> {
    let mut constraints: Vec<TableConstraint> = Vec::new();
    for row in rows {
        let Some(name) = text_field(row, "constraint_name") else {
            continue;
        };
        let Some(kind) = text_field(row, "constraint_type").and_then(|t| ConstraintKind::parse(&t))
        else {
            continue;
        };
        if !constraints.iter().any(|c| c.name == name) {
            constraints.push(TableConstraint::new(&name, kind, Vec::new()));
        }
        let Some(constraint) = constraints.iter_mut().find(|c| c.name == name) else {
            continue;
        };
        if let Some(column) = text_field(row, "column_name").filter(|c| !constraint.applies_to(c)) {
            constraint.columns.push(column);
        }
        if kind == ConstraintKind::ForeignKey {
            if let Some(table) = text_field(row, "foreign_table_name") {
                constraint.referenced_table = Some(table);
            }
            if let Some(column) = text_field(row, "foreign_column_name") {
                let refs = constraint.referenced_columns.get_or_insert_with(Vec::new);
                if !refs.contains(&column) {
                    refs.push(column);
                }
            }
        }
    }
    constraints
}

fn text_field(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn int_field(row: &Row, key: &str) -> i64 {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
