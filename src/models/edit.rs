//! Cell changes and edit sessions.

use super::ConnectionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifies one row.
///
/// Single-key tables are matched on a column literally named `id` (`_id` on
/// the document store); composite keys are matched on every pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowKey {
    /// Column/value pairs, matched by conjunction of equality predicates.
    Composite(Map<String, Value>),
    /// A scalar key value.
    Single(Value),
}

impl RowKey {
    /// Expands the key into ordered `(column, value)` predicates.
    #[must_use]
    pub fn predicates(&self, single_key_column: &str) -> Vec<(String, Value)> {
        match self {
            Self::Composite(pairs) => pairs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Self::Single(value) => vec![(single_key_column.to_string(), value.clone())],
        }
    }

    /// Canonical form used to tell whether two keys address the same row.
    ///
    /// A scalar key and a one-pair key on `id` or `_id` collapse to the same
    /// form, and an integer written as text matches the integer. Composite
    /// pairs are compared regardless of order.
    #[must_use]
    pub fn identity(&self) -> Vec<(Option<String>, String)> {
        match self {
            Self::Single(value) => vec![(None, key_literal(value))],
            Self::Composite(pairs) if pairs.len() == 1 => pairs
                .iter()
                .map(|(column, value)| {
                    let column = (!matches!(column.as_str(), "id" | "_id")).then(|| column.clone());
                    (column, key_literal(value))
                })
                .collect(),
            Self::Composite(pairs) => {
                let mut identity: Vec<_> = pairs
                    .iter()
                    .map(|(column, value)| (Some(column.clone()), key_literal(value)))
                    .collect();
                identity.sort();
                identity
            },
        }
    }

    /// Returns true when both keys address the same row.
    #[must_use]
    pub fn same_row(&self, other: &Self) -> bool {
        self == other || self.identity() == other.identity()
    }

    /// Builds a composite key from pairs.
    #[must_use]
    pub fn composite<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Composite(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Renders a key value so `1` and `"1"` compare equal but `"01"` does not.
fn key_literal(value: &Value) -> String {
    match value {
        Value::String(text) => match text.parse::<i64>() {
            Ok(n) if n.to_string() == *text => text.clone(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}

impl From<Value> for RowKey {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Composite(map),
            other => Self::Single(other),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(v) => write!(f, "{v}"),
            Self::Composite(m) => write!(f, "{}", Value::Object(m.clone())),
        }
    }
}

/// Kind of a cell change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A row was inserted.
    Insert,
    /// One column of one row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

impl ChangeKind {
    /// Returns the kind that undoes this one.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Insert => Self::Delete,
            Self::Update => Self::Update,
            Self::Delete => Self::Insert,
        }
    }

    /// Returns the lowercase name used in metrics labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A single proposed or applied edit to one column of one row.
///
/// Values are opaque; their semantic type comes from the target column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellChange {
    /// Target table (or collection).
    pub table: String,
    /// Optional schema.
    pub schema: Option<String>,
    /// Row identity.
    pub row_key: RowKey,
    /// Target column.
    pub column: String,
    /// Value before the change.
    pub old_value: Value,
    /// Value after the change.
    pub new_value: Value,
    /// Change kind.
    pub kind: ChangeKind,
    /// When the change was made.
    pub timestamp: DateTime<Utc>,
}

impl CellChange {
    /// Creates an update change stamped with the current time.
    #[must_use]
    pub fn update(
        table: impl Into<String>,
        schema: Option<String>,
        row_key: RowKey,
        column: impl Into<String>,
        old_value: Value,
        new_value: Value,
    ) -> Self {
        Self {
            table: table.into(),
            schema,
            row_key,
            column: column.into(),
            old_value,
            new_value,
            kind: ChangeKind::Update,
            timestamp: Utc::now(),
        }
    }

    /// Returns the change that undoes this one: old and new swapped,
    /// insert and delete swapped.
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            old_value: self.new_value.clone(),
            new_value: self.old_value.clone(),
            kind: self.kind.inverse(),
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    /// Returns true when `other` targets the same cell.
    #[must_use]
    pub fn same_cell(&self, other: &Self) -> bool {
        self.targets(&other.table, &other.row_key, &other.column, other.schema.as_deref())
    }

    /// Returns true when this change targets the given cell.
    #[must_use]
    pub fn targets(&self, table: &str, row_key: &RowKey, column: &str, schema: Option<&str>) -> bool {
        self.table == table
            && self.schema.as_deref() == schema
            && self.column == column
            && self.row_key.same_row(row_key)
    }
}

/// Ordered, deduplicated pending changes for one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditSession {
    /// Owning connection.
    pub connection_id: ConnectionId,
    changes: Vec<CellChange>,
}

impl EditSession {
    /// Creates an empty session.
    #[must_use]
    pub const fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            changes: Vec::new(),
        }
    }

    /// Builds a session that undoes `applied`: each change inverted, in
    /// reverse order.
    #[must_use]
    pub fn inverse_of(connection_id: ConnectionId, applied: &[CellChange]) -> Self {
        Self {
            connection_id,
            changes: applied.iter().rev().map(CellChange::inverse).collect(),
        }
    }

    /// Records a change.
    ///
    /// A change for a cell that already has a pending change replaces it and
    /// moves to the end. The earliest `old_value` is kept so rollback lands on
    /// the value the cell had before the session touched it.
    pub fn record(&mut self, mut change: CellChange) {
        if let Some(pos) = self.changes.iter().position(|c| c.same_cell(&change)) {
            let previous = self.changes.remove(pos);
            change.old_value = previous.old_value;
        }
        self.changes.push(change);
    }

    /// Removes the pending change for a cell, returning it.
    pub fn remove_change(
        &mut self,
        table: &str,
        row_key: &RowKey,
        column: &str,
        schema: Option<&str>,
    ) -> Option<CellChange> {
        let pos = self
            .changes
            .iter()
            .position(|c| c.targets(table, row_key, column, schema))?;
        Some(self.changes.remove(pos))
    }

    /// Pending changes in session order.
    #[must_use]
    pub fn pending(&self) -> &[CellChange] {
        &self.changes
    }

    /// Pending changes that touch `table`.
    #[must_use]
    pub fn changes_for_table(&self, table: &str) -> Vec<&CellChange> {
        self.changes.iter().filter(|c| c.table == table).collect()
    }

    /// Returns true when anything is pending.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Number of pending changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Drops every pending change.
    pub fn clear(&mut self) {
        self.changes.clear();
    }

    /// Drops the first `n` pending changes.
    pub fn drain_front(&mut self, n: usize) {
        self.changes.drain(..n.min(self.changes.len()));
    }

    /// Drops the last `n` pending changes.
    pub fn truncate_back(&mut self, n: usize) {
        let keep = self.changes.len().saturating_sub(n);
        self.changes.truncate(keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(row: i64, column: &str, old: Value, new: Value) -> CellChange {
        CellChange::update("users", None, RowKey::Single(json!(row)), column, old, new)
    }

    #[test]
    fn test_record_replaces_same_cell() {
        let mut session = EditSession::new(ConnectionId::new("c1"));
        session.record(change(1, "name", json!("a"), json!("b")));
        session.record(change(1, "name", json!("b"), json!("c")));

        assert_eq!(session.len(), 1);
        let pending = &session.pending()[0];
        assert_eq!(pending.new_value, json!("c"));
        assert_eq!(pending.old_value, json!("a"));
    }

    #[test]
    fn test_record_keeps_distinct_cells_in_order() {
        let mut session = EditSession::new(ConnectionId::new("c1"));
        session.record(change(1, "name", json!("a"), json!("b")));
        session.record(change(2, "name", json!("x"), json!("y")));
        session.record(change(1, "email", Value::Null, json!("e@x.io")));
        session.record(change(1, "name", json!("b"), json!("z")));

        let columns: Vec<_> = session
            .pending()
            .iter()
            .map(|c| (c.row_key.to_string(), c.column.clone()))
            .collect();
        assert_eq!(
            columns,
            vec![
                ("2".to_string(), "name".to_string()),
                ("1".to_string(), "email".to_string()),
                ("1".to_string(), "name".to_string()),
            ]
        );
    }

    #[test]
    fn test_inverse_swaps_values_and_kinds() {
        let update = change(1, "name", json!("a"), json!("b"));
        let inverse = update.inverse();
        assert_eq!(inverse.old_value, json!("b"));
        assert_eq!(inverse.new_value, json!("a"));
        assert_eq!(inverse.kind, ChangeKind::Update);

        let insert = CellChange {
            kind: ChangeKind::Insert,
            ..update
        };
        assert_eq!(insert.inverse().kind, ChangeKind::Delete);
        assert_eq!(insert.inverse().inverse().kind, ChangeKind::Insert);
    }

    #[test]
    fn test_inverse_of_reverses_order() {
        let applied = vec![
            change(1, "name", json!("a"), json!("b")),
            change(2, "name", json!("c"), json!("d")),
        ];
        let session = EditSession::inverse_of(ConnectionId::new("c1"), &applied);
        let firsts: Vec<_> = session.pending().iter().map(|c| c.new_value.clone()).collect();
        assert_eq!(firsts, vec![json!("c"), json!("a")]);
    }

    #[test]
    fn test_remove_and_filter() {
        let mut session = EditSession::new(ConnectionId::new("c1"));
        session.record(change(1, "name", json!("a"), json!("b")));
        session.record(CellChange::update(
            "orders",
            Some("public".to_string()),
            RowKey::composite([("tenant", json!(1)), ("id", json!(7))]),
            "total",
            json!(1),
            json!(2),
        ));

        assert_eq!(session.changes_for_table("orders").len(), 1);
        let removed = session.remove_change("users", &RowKey::Single(json!(1)), "name", None);
        assert!(removed.is_some());
        assert!(session.has_changes());
        session.clear();
        assert!(!session.has_changes());
    }

    #[test]
    fn test_record_merges_equivalent_row_keys() {
        let mut session = EditSession::new(ConnectionId::new("c1"));
        let keyed = |key: RowKey, old: &str, new: &str| {
            CellChange::update("users", None, key, "name", json!(old), json!(new))
        };
        session.record(keyed(RowKey::Single(json!(1)), "a", "b"));
        session.record(keyed(RowKey::composite([("id", json!(1))]), "b", "c"));
        session.record(keyed(RowKey::Single(json!("1")), "c", "d"));

        assert_eq!(session.len(), 1);
        assert_eq!(session.pending()[0].old_value, json!("a"));
        assert_eq!(session.pending()[0].new_value, json!("d"));

        let removed = session.remove_change("users", &RowKey::composite([("_id", json!("1"))]), "name", None);
        assert!(removed.is_some());
        assert!(session.is_empty());
    }

    #[test]
    fn test_row_key_identity() {
        let ab = RowKey::composite([("a", json!(1)), ("b", json!("x"))]);
        let ba = RowKey::composite([("b", json!("x")), ("a", json!("1"))]);
        assert!(ab.same_row(&ba));
        assert!(!RowKey::Single(json!("01")).same_row(&RowKey::Single(json!(1))));
        assert!(!RowKey::Single(json!(1)).same_row(&RowKey::composite([("tenant", json!(1))])));
        assert!(!RowKey::Single(json!("abc")).same_row(&RowKey::Single(json!("abd"))));
    }

    #[test]
    fn test_row_key_from_value() {
        assert_eq!(RowKey::from(json!(5)), RowKey::Single(json!(5)));
        let key = RowKey::from(json!({"id": 1, "tenant": "a"}));
        assert_eq!(
            key.predicates("id"),
            vec![("id".to_string(), json!(1)), ("tenant".to_string(), json!("a"))]
        );
        assert_eq!(RowKey::Single(json!(3)).predicates("_id"), vec![("_id".to_string(), json!(3))]);
    }

    #[test]
    fn test_drain_and_truncate() {
        let mut session = EditSession::new(ConnectionId::new("c1"));
        for row in 0..4 {
            session.record(change(row, "name", json!("a"), json!("b")));
        }
        session.drain_front(1);
        session.truncate_back(1);
        assert_eq!(session.len(), 2);
        assert_eq!(session.pending()[0].row_key, RowKey::Single(json!(1)));
    }
}
