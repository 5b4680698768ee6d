//! Structured shell commands.

use crate::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// A document (JSON object) argument.
pub type Document = Map<String, Value>;

/// A parsed shell command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ShellCommand {
    /// `use <name>`: switch the active logical database.
    Use {
        /// Database name.
        database: String,
    },
    /// `show dbs` / `show databases`.
    ShowDatabases,
    /// `show collections`.
    ShowCollections,
    /// `show users`.
    ShowUsers,
    /// `db.<collection>.<method>(<args>)`.
    Collection {
        /// Target collection.
        collection: String,
        /// Typed method call.
        op: CollectionOp,
    },
}

/// Target of `dropIndex`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndexTarget {
    /// An index name.
    Name(String),
    /// A key specification, resolved to its default name.
    Keys(Document),
}

impl IndexTarget {
    /// Resolves the index name.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Name(name) => name.clone(),
            Self::Keys(keys) => default_index_name(keys),
        }
    }
}

/// Collection method with typed arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum CollectionOp {
    /// `find(filter?, projection?)`.
    Find {
        /// Query filter.
        filter: Document,
        /// Optional projection.
        projection: Option<Document>,
    },
    /// `findOne(filter?, projection?)`.
    FindOne {
        /// Query filter.
        filter: Document,
        /// Optional projection.
        projection: Option<Document>,
    },
    /// `count(filter?)` / `countDocuments(filter?)`.
    CountDocuments {
        /// Query filter.
        filter: Document,
    },
    /// `distinct(field?, filter?)`.
    Distinct {
        /// Field name, `_id` by default.
        field: String,
        /// Query filter.
        filter: Document,
    },
    /// `aggregate(pipeline?)`.
    Aggregate {
        /// Pipeline stages.
        pipeline: Vec<Document>,
    },
    /// `insertOne(document)`.
    InsertOne {
        /// Document to insert.
        document: Document,
    },
    /// `insertMany(documents)`.
    InsertMany {
        /// Documents to insert.
        documents: Vec<Document>,
    },
    /// `updateOne(filter, update)`.
    UpdateOne {
        /// Query filter.
        filter: Document,
        /// Update document.
        update: Document,
    },
    /// `updateMany(filter, update)`.
    UpdateMany {
        /// Query filter.
        filter: Document,
        /// Update document.
        update: Document,
    },
    /// `deleteOne(filter)`.
    DeleteOne {
        /// Query filter.
        filter: Document,
    },
    /// `deleteMany(filter)`.
    DeleteMany {
        /// Query filter.
        filter: Document,
    },
    /// `createIndex(keys, options?)`.
    CreateIndex {
        /// Key specification.
        keys: Document,
        /// Index options such as `unique` or `name`.
        options: Document,
    },
    /// `dropIndex(name | keys)`.
    DropIndex {
        /// Index to drop.
        index: IndexTarget,
    },
    /// `listIndexes()` / `getIndexes()`.
    ListIndexes,
}

impl CollectionOp {
    /// Builds a typed operation from a method name and parsed arguments.
    ///
    /// Missing arguments take the shell's defaults (empty filter, `_id` for
    /// `distinct`, empty pipeline).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Syntax`] for an unknown method or an argument of the
    /// wrong shape.
    pub fn from_call(method: &str, args: Vec<Value>) -> Result<Self> {
        let mut args = Args::new(method, args);
        let op = match method {
            "find" => Self::Find {
                filter: args.document_or_empty("filter")?,
                projection: args.optional_document("projection")?,
            },
            "findOne" => Self::FindOne {
                filter: args.document_or_empty("filter")?,
                projection: args.optional_document("projection")?,
            },
            "count" | "countDocuments" => Self::CountDocuments {
                filter: args.document_or_empty("filter")?,
            },
            "distinct" => Self::Distinct {
                field: args.optional_string("field")?.unwrap_or_else(|| "_id".to_string()),
                filter: args.document_or_empty("filter")?,
            },
            "aggregate" => Self::Aggregate {
                pipeline: args.document_list("pipeline")?,
            },
            "insertOne" => Self::InsertOne {
                document: args.document_or_empty("document")?,
            },
            "insertMany" => Self::InsertMany {
                documents: args.document_list("documents")?,
            },
            "updateOne" => Self::UpdateOne {
                filter: args.document_or_empty("filter")?,
                update: args.document_or_empty("update")?,
            },
            "updateMany" => Self::UpdateMany {
                filter: args.document_or_empty("filter")?,
                update: args.document_or_empty("update")?,
            },
            "deleteOne" => Self::DeleteOne {
                filter: args.document_or_empty("filter")?,
            },
            "deleteMany" => Self::DeleteMany {
                filter: args.document_or_empty("filter")?,
            },
            "createIndex" => Self::CreateIndex {
                keys: args.document_or_empty("keys")?,
                options: args.document_or_empty("options")?,
            },
            "dropIndex" => Self::DropIndex {
                index: args.index_target()?,
            },
            "listIndexes" | "getIndexes" => Self::ListIndexes,
            other => {
                return Err(Error::syntax(
                    format!("unsupported collection method: {other}"),
                    other,
                ));
            },
        };
        args.finish()?;
        Ok(op)
    }

    /// Canonical shell method name.
    #[must_use]
    pub const fn method_name(&self) -> &'static str {
        match self {
            Self::Find { .. } => "find",
            Self::FindOne { .. } => "findOne",
            Self::CountDocuments { .. } => "countDocuments",
            Self::Distinct { .. } => "distinct",
            Self::Aggregate { .. } => "aggregate",
            Self::InsertOne { .. } => "insertOne",
            Self::InsertMany { .. } => "insertMany",
            Self::UpdateOne { .. } => "updateOne",
            Self::UpdateMany { .. } => "updateMany",
            Self::DeleteOne { .. } => "deleteOne",
            Self::DeleteMany { .. } => "deleteMany",
            Self::CreateIndex { .. } => "createIndex",
            Self::DropIndex { .. } => "dropIndex",
            Self::ListIndexes => "listIndexes",
        }
    }

    /// Returns true when the operation modifies data or indexes.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        !matches!(
            self,
            Self::Find { .. }
                | Self::FindOne { .. }
                | Self::CountDocuments { .. }
                | Self::Distinct { .. }
                | Self::Aggregate { .. }
                | Self::ListIndexes
        )
    }

    /// Arguments in call order, trailing defaults omitted.
    #[must_use]
    pub fn arguments(&self) -> Vec<Value> {
        let doc = |d: &Document| Value::Object(d.clone());
        let docs = |ds: &[Document]| Value::Array(ds.iter().map(doc).collect());
        match self {
            Self::Find { filter, projection } | Self::FindOne { filter, projection } => {
                let mut args = vec![doc(filter)];
                if let Some(p) = projection {
                    args.push(doc(p));
                }
                args
            },
            Self::CountDocuments { filter }
            | Self::DeleteOne { filter }
            | Self::DeleteMany { filter } => vec![doc(filter)],
            Self::Distinct { field, filter } => vec![Value::String(field.clone()), doc(filter)],
            Self::Aggregate { pipeline } => vec![docs(pipeline)],
            Self::InsertOne { document } => vec![doc(document)],
            Self::InsertMany { documents } => vec![docs(documents)],
            Self::UpdateOne { filter, update } | Self::UpdateMany { filter, update } => {
                vec![doc(filter), doc(update)]
            },
            Self::CreateIndex { keys, options } => {
                let mut args = vec![doc(keys)];
                if !options.is_empty() {
                    args.push(doc(options));
                }
                args
            },
            Self::DropIndex { index } => match index {
                IndexTarget::Name(name) => vec![Value::String(name.clone())],
                IndexTarget::Keys(keys) => vec![doc(keys)],
            },
            Self::ListIndexes => Vec::new(),
        }
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Use { database } => write!(f, "use {database}"),
            Self::ShowDatabases => f.write_str("show dbs"),
            Self::ShowCollections => f.write_str("show collections"),
            Self::ShowUsers => f.write_str("show users"),
            Self::Collection { collection, op } => {
                let args: Vec<String> = op.arguments().iter().map(Value::to_string).collect();
                write!(f, "db.{collection}.{}({})", op.method_name(), args.join(", "))
            },
        }
    }
}

/// Builds the driver's default index name: `field_direction` pairs joined by `_`.
#[must_use]
pub fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, dir)| match dir {
            Value::String(s) => format!("{field}_{s}"),
            other => format!("{field}_{other}"),
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// Positional argument reader with shape checks.
struct Args<'a> {
    method: &'a str,
    values: std::vec::IntoIter<Value>,
}

impl<'a> Args<'a> {
    fn new(method: &'a str, values: Vec<Value>) -> Self {
        Self {
            method,
            values: values.into_iter(),
        }
    }

    fn shape_error(&self, name: &str, expected: &str, got: &Value) -> Error {
        Error::syntax(
            format!("{}: {name} must be {expected}", self.method),
            got.to_string(),
        )
    }

    fn optional_document(&mut self, name: &str) -> Result<Option<Document>> {
        match self.values.next() {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => Err(self.shape_error(name, "a document", &other)),
        }
    }

    fn document_or_empty(&mut self, name: &str) -> Result<Document> {
        Ok(self.optional_document(name)?.unwrap_or_default())
    }

    fn optional_string(&mut self, name: &str) -> Result<Option<String>> {
        match self.values.next() {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(self.shape_error(name, "a string", &other)),
        }
    }

    fn document_list(&mut self, name: &str) -> Result<Vec<Document>> {
        match self.values.next() {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(map),
                    other => Err(self.shape_error(name, "an array of documents", &other)),
                })
                .collect(),
            Some(other) => Err(self.shape_error(name, "an array of documents", &other)),
        }
    }

    fn index_target(&mut self) -> Result<IndexTarget> {
        match self.values.next() {
            Some(Value::String(name)) => Ok(IndexTarget::Name(name)),
            Some(Value::Object(keys)) if !keys.is_empty() => Ok(IndexTarget::Keys(keys)),
            Some(other) => Err(self.shape_error("index", "a name or key document", &other)),
            None => Err(Error::syntax(
                format!("{}: index name or key document required", self.method),
                self.method,
            )),
        }
    }

    fn finish(mut self) -> Result<()> {
        match self.values.next() {
            None => Ok(()),
            Some(extra) => Err(Error::syntax(
                format!("{}: too many arguments", self.method),
                extra.to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_find_defaults() {
        let op = CollectionOp::from_call("find", vec![]).unwrap();
        assert_eq!(
            op,
            CollectionOp::Find {
                filter: Document::new(),
                projection: None
            }
        );
    }

    #[test]
    fn test_find_with_projection() {
        let op = CollectionOp::from_call("find", vec![json!({"a": 1}), json!({"a": 1, "_id": 0})]).unwrap();
        assert_eq!(
            op,
            CollectionOp::Find {
                filter: obj(json!({"a": 1})),
                projection: Some(obj(json!({"a": 1, "_id": 0})))
            }
        );
    }

    #[test]
    fn test_count_aliases() {
        let a = CollectionOp::from_call("count", vec![]).unwrap();
        let b = CollectionOp::from_call("countDocuments", vec![json!({})]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_defaults_to_id() {
        let op = CollectionOp::from_call("distinct", vec![]).unwrap();
        assert_eq!(
            op,
            CollectionOp::Distinct {
                field: "_id".to_string(),
                filter: Document::new()
            }
        );
    }

    #[test]
    fn test_unknown_method_names_method() {
        let err = CollectionOp::from_call("frobnicate", vec![]).unwrap_err();
        assert!(
            matches!(err, Error::Syntax { ref message, ref fragment } if message.contains("frobnicate") && fragment == "frobnicate")
        );
    }

    #[test]
    fn test_wrong_shape_rejected() {
        assert!(CollectionOp::from_call("find", vec![json!(5)]).is_err());
        assert!(CollectionOp::from_call("aggregate", vec![json!({"$match": {}})]).is_err());
        assert!(CollectionOp::from_call("insertMany", vec![json!([1, 2])]).is_err());
        assert!(CollectionOp::from_call("dropIndex", vec![]).is_err());
        assert!(CollectionOp::from_call("deleteOne", vec![json!({}), json!({})]).is_err());
    }

    #[test]
    fn test_drop_index_by_keys_resolves_name() {
        let op = CollectionOp::from_call("dropIndex", vec![json!({"email": 1, "created": -1})]).unwrap();
        let CollectionOp::DropIndex { index } = op else {
            panic!("expected dropIndex");
        };
        assert_eq!(index.name(), "email_1_created_-1");
        assert_eq!(IndexTarget::Name("x_1".to_string()).name(), "x_1");
    }

    #[test]
    fn test_get_indexes_alias() {
        assert_eq!(
            CollectionOp::from_call("getIndexes", vec![]).unwrap(),
            CollectionOp::ListIndexes
        );
    }

    #[test]
    fn test_display_is_canonical() {
        let command = ShellCommand::Collection {
            collection: "users".to_string(),
            op: CollectionOp::from_call("count", vec![json!({"active": true})]).unwrap(),
        };
        assert_eq!(command.to_string(), r#"db.users.countDocuments({"active":true})"#);
        assert_eq!(
            ShellCommand::Use {
                database: "shop".to_string()
            }
            .to_string(),
            "use shop"
        );
    }

    #[test]
    fn test_is_write() {
        assert!(!CollectionOp::ListIndexes.is_write());
        assert!(
            CollectionOp::from_call("deleteMany", vec![])
                .unwrap()
                .is_write()
        );
    }
}
