//! Schema metadata: columns, constraints and schema trees.

use super::{ConnectionId, Row};
use crate::models::BackendType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column metadata used by the validator and the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type name as reported by the backend.
    pub data_type: String,
    /// Whether NULL is accepted.
    pub nullable: bool,
    /// Part of the primary key.
    pub primary_key: bool,
    /// Part of a foreign key.
    pub foreign_key: bool,
    /// Default expression, if any.
    pub default_value: Option<Value>,
    /// Maximum character length.
    pub max_length: Option<u32>,
    /// Numeric precision (total significant digits).
    pub numeric_precision: Option<u32>,
    /// Numeric scale (digits after the decimal point).
    pub numeric_scale: Option<u32>,
}

impl ColumnInfo {
    /// Creates a nullable, unconstrained column.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            primary_key: false,
            foreign_key: false,
            default_value: None,
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    /// Marks the column NOT NULL.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the column as (part of) the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Sets the maximum length.
    #[must_use]
    pub const fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Sets precision and scale.
    #[must_use]
    pub const fn with_precision(mut self, precision: u32, scale: Option<u32>) -> Self {
        self.numeric_precision = Some(precision);
        self.numeric_scale = scale;
        self
    }
}

/// Kind of table constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// PRIMARY KEY.
    PrimaryKey,
    /// FOREIGN KEY.
    ForeignKey,
    /// UNIQUE.
    Unique,
    /// CHECK.
    Check,
    /// NOT NULL.
    NotNull,
}

impl ConstraintKind {
    /// Parses `information_schema` constraint type strings.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace('_', " ").as_str() {
            "PRIMARY KEY" | "PRIMARY" => Some(Self::PrimaryKey),
            "FOREIGN KEY" => Some(Self::ForeignKey),
            "UNIQUE" => Some(Self::Unique),
            "CHECK" => Some(Self::Check),
            "NOT NULL" => Some(Self::NotNull),
            _ => None,
        }
    }

    /// Returns the SQL spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryKey => "PRIMARY KEY",
            Self::ForeignKey => "FOREIGN KEY",
            Self::Unique => "UNIQUE",
            Self::Check => "CHECK",
            Self::NotNull => "NOT NULL",
        }
    }
}

/// A constraint derived from backend metadata. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConstraint {
    /// Constraint name.
    pub name: String,
    /// Constraint kind.
    pub kind: ConstraintKind,
    /// Participating columns.
    pub columns: Vec<String>,
    /// Referenced table for foreign keys.
    pub referenced_table: Option<String>,
    /// Referenced columns for foreign keys.
    pub referenced_columns: Option<Vec<String>>,
}

impl TableConstraint {
    /// Creates a constraint with no reference.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ConstraintKind, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            columns,
            referenced_table: None,
            referenced_columns: None,
        }
    }

    /// Returns true when the constraint covers `column`.
    #[must_use]
    pub fn applies_to(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// Tables and columns of one schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaNode {
    /// Schema (or database) name.
    pub name: String,
    /// Tables in backend order.
    pub tables: Vec<TableNode>,
}

/// Columns of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableNode {
    /// Table (or collection) name.
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnInfo>,
}

/// Full schema walk for one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaTree {
    /// Connection the tree was built from.
    pub connection_id: ConnectionId,
    /// Backend tag.
    pub backend: BackendType,
    /// Schemas in backend order.
    pub schemas: Vec<SchemaNode>,
}

impl SchemaTree {
    /// Total number of tables across schemas.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }

    /// Looks up a table by schema and name.
    #[must_use]
    pub fn table(&self, schema: &str, table: &str) -> Option<&TableNode> {
        self.schemas
            .iter()
            .find(|s| s.name == schema)
            .and_then(|s| s.tables.iter().find(|t| t.name == table))
    }
}

/// Columns plus a handful of sample rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    /// Schema name, if any.
    pub schema: Option<String>,
    /// Table name.
    pub table: String,
    /// Column metadata.
    pub columns: Vec<ColumnInfo>,
    /// Up to five rows.
    pub sample_rows: Vec<Row>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_kind_parse() {
        assert_eq!(ConstraintKind::parse("PRIMARY KEY"), Some(ConstraintKind::PrimaryKey));
        assert_eq!(ConstraintKind::parse("foreign key"), Some(ConstraintKind::ForeignKey));
        assert_eq!(ConstraintKind::parse("NOT_NULL"), Some(ConstraintKind::NotNull));
        assert_eq!(ConstraintKind::parse("EXCLUDE"), None);
    }

    #[test]
    fn test_constraint_applies_to() {
        let pk = TableConstraint::new(
            "pk_orders",
            ConstraintKind::PrimaryKey,
            vec!["tenant".to_string(), "id".to_string()],
        );
        assert!(pk.applies_to("id"));
        assert!(!pk.applies_to("name"));
    }

    #[test]
    fn test_primary_key_column_is_not_nullable() {
        let column = ColumnInfo::new("id", "INTEGER").primary_key();
        assert!(column.primary_key);
        assert!(!column.nullable);
    }

    #[test]
    fn test_schema_tree_lookup() {
        let tree = SchemaTree {
            connection_id: ConnectionId::new("c1"),
            backend: BackendType::Sqlite,
            schemas: vec![SchemaNode {
                name: "main".to_string(),
                tables: vec![TableNode {
                    name: "users".to_string(),
                    columns: vec![ColumnInfo::new("id", "INTEGER")],
                }],
            }],
        };
        assert_eq!(tree.table_count(), 1);
        assert!(tree.table("main", "users").is_some());
        assert!(tree.table("main", "orders").is_none());
    }
}
