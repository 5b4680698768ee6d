//! SQL rendering per relational backend.
//!
//! Edits are replayed as literal statements because every connector only
//! accepts query text. Identifiers are always quoted and literals always
//! escaped; nothing user-supplied is spliced in raw.

use crate::models::{BackendType, CellChange, ChangeKind};
use serde_json::Value;

/// Column matched by a single-value row key.
pub const SINGLE_KEY_COLUMN: &str = "id";

/// Quoting and literal rules for one SQL backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// PostgreSQL.
    Postgres,
    /// MySQL / MariaDB.
    MySql,
    /// `SQLite`.
    Sqlite,
}

impl SqlDialect {
    /// Dialect of a backend, or `None` for the document store.
    #[must_use]
    pub const fn for_backend(backend: BackendType) -> Option<Self> {
        match backend {
            BackendType::PostgreSql => Some(Self::Postgres),
            BackendType::MySql => Some(Self::MySql),
            BackendType::Sqlite => Some(Self::Sqlite),
            BackendType::MongoDb => None,
        }
    }

    /// Quotes an identifier, doubling any embedded quote character.
    #[must_use]
    pub fn quote_ident(self, ident: &str) -> String {
        let quote = match self {
            Self::MySql => '`',
            Self::Postgres | Self::Sqlite => '"',
        };
        let mut out = String::with_capacity(ident.len() + 2);
        out.push(quote);
        for c in ident.chars() {
            if c == quote {
                out.push(quote);
            }
            out.push(c);
        }
        out.push(quote);
        out
    }

    /// Quotes `schema.table`, or just `table` without a schema.
    #[must_use]
    pub fn qualified(self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(schema) if !schema.is_empty() => {
                format!("{}.{}", self.quote_ident(schema), self.quote_ident(table))
            },
            _ => self.quote_ident(table),
        }
    }

    /// Renders a JSON value as a SQL literal.
    ///
    /// Arrays and objects are written as their JSON text.
    #[must_use]
    pub fn literal(self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => match (self, b) {
                (Self::Postgres, true) => "TRUE".to_string(),
                (Self::Postgres, false) => "FALSE".to_string(),
                (_, true) => "1".to_string(),
                (_, false) => "0".to_string(),
            },
            Value::Number(n) => n.to_string(),
            Value::String(s) => self.string_literal(s),
            other => self.string_literal(&other.to_string()),
        }
    }

    fn string_literal(self, s: &str) -> String {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('\'');
        for c in s.chars() {
            match c {
                '\'' => out.push_str("''"),
                '\\' if self == Self::MySql => out.push_str("\\\\"),
                _ => out.push(c),
            }
        }
        out.push('\'');
        out
    }

    /// `WHERE` body matching a change's row.
    fn key_predicate(self, change: &CellChange) -> String {
        change
            .row_key
            .predicates(SINGLE_KEY_COLUMN)
            .iter()
            .map(|(column, value)| {
                if value.is_null() {
                    format!("{} IS NULL", self.quote_ident(column))
                } else {
                    format!("{} = {}", self.quote_ident(column), self.literal(value))
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// `UPDATE` that writes the change's new value.
    #[must_use]
    pub fn update_statement(self, change: &CellChange) -> String {
        format!(
            "UPDATE {} SET {} = {} WHERE {}",
            self.qualified(change.schema.as_deref(), &change.table),
            self.quote_ident(&change.column),
            self.literal(&change.new_value),
            self.key_predicate(change)
        )
    }

    /// `INSERT` of a row holding the key and the change's column.
    #[must_use]
    pub fn insert_statement(self, change: &CellChange) -> String {
        let mut pairs = change.row_key.predicates(SINGLE_KEY_COLUMN);
        if !pairs.iter().any(|(column, _)| column == &change.column) {
            pairs.push((change.column.clone(), change.new_value.clone()));
        }
        let columns: Vec<String> = pairs.iter().map(|(c, _)| self.quote_ident(c)).collect();
        let values: Vec<String> = pairs.iter().map(|(_, v)| self.literal(v)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified(change.schema.as_deref(), &change.table),
            columns.join(", "),
            values.join(", ")
        )
    }

    /// `DELETE` of the change's row.
    #[must_use]
    pub fn delete_statement(self, change: &CellChange) -> String {
        format!(
            "DELETE FROM {} WHERE {}",
            self.qualified(change.schema.as_deref(), &change.table),
            self.key_predicate(change)
        )
    }

    /// Statement applying a change according to its kind.
    #[must_use]
    pub fn statement_for(self, change: &CellChange) -> String {
        match change.kind {
            ChangeKind::Insert => self.insert_statement(change),
            ChangeKind::Update => self.update_statement(change),
            ChangeKind::Delete => self.delete_statement(change),
        }
    }

    /// `SELECT` of one cell, used to capture the value before an edit.
    #[must_use]
    pub fn select_cell(self, change: &CellChange) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            self.quote_ident(&change.column),
            self.qualified(change.schema.as_deref(), &change.table),
            self.key_predicate(change)
        )
    }

    /// Query returning the first `limit` rows of a table.
    #[must_use]
    pub fn sample_query(self, table: &str, schema: Option<&str>, limit: usize) -> String {
        format!(
            "SELECT * FROM {} LIMIT {limit}",
            self.qualified(schema, table)
        )
    }
}
