//! MongoDB connector.
//!
//! Query text is shell syntax (`use`, `show ...`, `db.<collection>.<method>(...)`)
//! parsed by [`crate::shell`] and dispatched to the driver. Every returned
//! document is flattened to plain JSON: object ids become hex strings and
//! dates become RFC 3339 text.
//!
//! | Method | Result rows |
//! |--------|-------------|
//! | `find`, `aggregate` | the documents, capped at `max_documents` |
//! | `findOne` | zero or one document |
//! | `countDocuments` | `{"count": n}` |
//! | `distinct` | `{"distinct_values": [...]}` |
//! | `insertOne` / `insertMany` | `{"inserted_id"}` / `{"inserted_ids"}` |
//! | `updateOne` / `updateMany` | `{"matched_count", "modified_count"}` |
//! | `deleteOne` / `deleteMany` | `{"deleted_count"}` |
//!
//! The driver rejects unacknowledged write concerns, so a returned write row
//! always reflects a server acknowledgement.
//! | `createIndex` / `dropIndex` | `{"index_name"}` / `{"dropped": true}` |
//! | `listIndexes` | one row per index |

#[cfg(feature = "mongodb")]
mod implementation {
    use crate::acquire_lock;
    use crate::connectors::{
        ConnectOutcome, Connector, ConnectorOptions, Row, execution_error, not_connected,
    };
    use crate::models::{BackendType, ColumnInfo, ConnectionDescriptor};
    use crate::shell::{self, CollectionOp, ShellCommand};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use mongodb::bson::spec::ElementType;
    use mongodb::bson::{self, Bson, Document, doc, oid::ObjectId};
    use mongodb::options::{ClientOptions, Credential, IndexOptions, ServerAddress};
    use mongodb::{Client, Collection, Cursor, Database, IndexModel};
    use serde::de::DeserializeOwned;
    use serde_json::{Number, Value};
    use std::sync::Mutex;

    const DEFAULT_DATABASE: &str = "test";
    const SYSTEM_DATABASES: [&str; 3] = ["admin", "local", "config"];
    const USERS_PRIVILEGE_ERROR: &str = "Insufficient privileges to show users";

    /// Connector for a MongoDB deployment.
    pub struct MongoConnector {
        descriptor: ConnectionDescriptor,
        options: ConnectorOptions,
        client: Mutex<Option<Client>>,
        database: Mutex<String>,
    }

    impl MongoConnector {
        /// Creates a disconnected connector.
        #[must_use]
        pub fn new(descriptor: ConnectionDescriptor, options: ConnectorOptions) -> Self {
            let database = descriptor
                .database
                .clone()
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
            Self {
                descriptor,
                options,
                client: Mutex::new(None),
                database: Mutex::new(database),
            }
        }

        /// Name of the database `use` last switched to.
        #[must_use]
        pub fn active_database(&self) -> String {
            acquire_lock(&self.database).clone()
        }

        fn client_options(&self) -> ClientOptions {
            let mut options = ClientOptions::default();
            options.hosts = vec![ServerAddress::Tcp {
                host: self.descriptor.host_or_default().to_string(),
                port: self.descriptor.port_or_default(),
            }];
            options.connect_timeout = Some(self.options.connect_timeout);
            options.server_selection_timeout = Some(self.options.connect_timeout);
            if let Some(username) = &self.descriptor.username {
                let mut credential = Credential::default();
                credential.username = Some(username.clone());
                credential.password = self.descriptor.password().map(String::from);
                options.credential = Some(credential);
            }
            options
        }

        fn current_client(&self) -> Result<Client> {
            acquire_lock(&self.client)
                .clone()
                .ok_or_else(|| not_connected(BackendType::MongoDb))
        }

        fn current_database(&self) -> Result<Database> {
            Ok(self.current_client()?.database(&self.active_database()))
        }

        async fn open(&self) -> std::result::Result<Client, String> {
            let client = Client::with_options(self.client_options()).map_err(|e| e.to_string())?;
            client
                .database("admin")
                .run_command(doc! { "ping": 1 })
                .await
                .map_err(|e| e.to_string())?;
            Ok(client)
        }

        async fn run(&self, command: ShellCommand) -> Result<Vec<Row>> {
            match command {
                ShellCommand::Use { database } => {
                    self.current_client()?;
                    *acquire_lock(&self.database) = database.clone();
                    tracing::debug!(database = %database, "Switched active database");
                    Ok(vec![row([("switched_to", Value::String(database))])])
                },
                ShellCommand::ShowDatabases => {
                    let names = self
                        .current_client()?
                        .list_database_names()
                        .await
                        .map_err(execution_error)?;
                    Ok(names
                        .into_iter()
                        .map(|n| row([("database", Value::String(n))]))
                        .collect())
                },
                ShellCommand::ShowCollections => {
                    let names = self
                        .current_database()?
                        .list_collection_names()
                        .await
                        .map_err(execution_error)?;
                    Ok(names
                        .into_iter()
                        .map(|n| row([("collection", Value::String(n))]))
                        .collect())
                },
                ShellCommand::ShowUsers => {
                    let database = self.current_database()?;
                    match database.run_command(doc! { "usersInfo": 1 }).await {
                        Ok(reply) => Ok(reply
                            .get_array("users")
                            .map(|users| users.iter().filter_map(bson_to_row).collect())
                            .unwrap_or_default()),
                        Err(e) => {
                            tracing::warn!(error = %e, "usersInfo failed");
                            Ok(vec![row([(
                                "error",
                                Value::String(USERS_PRIVILEGE_ERROR.to_string()),
                            )])])
                        },
                    }
                },
                ShellCommand::Collection { collection, op } => {
                    let collection = self.current_database()?.collection::<Document>(&collection);
                    self.run_collection_op(&collection, op).await
                },
            }
        }

        #[allow(clippy::too_many_lines)]
        async fn run_collection_op(
            &self,
            collection: &Collection<Document>,
            op: CollectionOp,
        ) -> Result<Vec<Row>> {
            let cap = self.options.max_documents;
            match op {
                CollectionOp::Find { filter, projection } => {
                    let mut action = collection
                        .find(filter_document(filter)?)
                        .limit(i64::try_from(cap).unwrap_or(i64::MAX));
                    if let Some(projection) = projection {
                        action = action.projection(to_document(projection)?);
                    }
                    let cursor = action.await.map_err(execution_error)?;
                    collect_documents(cursor, cap).await
                },
                CollectionOp::FindOne { filter, projection } => {
                    let mut action = collection.find_one(filter_document(filter)?);
                    if let Some(projection) = projection {
                        action = action.projection(to_document(projection)?);
                    }
                    let found = action.await.map_err(execution_error)?;
                    Ok(found.map(|d| document_to_row(&d)).into_iter().collect())
                },
                CollectionOp::CountDocuments { filter } => {
                    let count = collection
                        .count_documents(filter_document(filter)?)
                        .await
                        .map_err(execution_error)?;
                    Ok(vec![row([("count", Value::from(count))])])
                },
                CollectionOp::Distinct { field, filter } => {
                    let values = collection
                        .distinct(&field, filter_document(filter)?)
                        .await
                        .map_err(execution_error)?;
                    let values = values.iter().map(serialize_bson).collect();
                    Ok(vec![row([("distinct_values", Value::Array(values))])])
                },
                CollectionOp::Aggregate { pipeline } => {
                    let stages = pipeline
                        .into_iter()
                        .map(to_document)
                        .collect::<Result<Vec<_>>>()?;
                    let cursor = collection.aggregate(stages).await.map_err(execution_error)?;
                    collect_documents(cursor, cap).await
                },
                CollectionOp::InsertOne { document } => {
                    let result = collection
                        .insert_one(to_document(document)?)
                        .await
                        .map_err(execution_error)?;
                    Ok(vec![row([(
                        "inserted_id",
                        Value::String(id_text(&result.inserted_id)),
                    )])])
                },
                CollectionOp::InsertMany { documents } => {
                    let documents = documents
                        .into_iter()
                        .map(to_document)
                        .collect::<Result<Vec<_>>>()?;
                    let result = collection
                        .insert_many(documents)
                        .await
                        .map_err(execution_error)?;
                    let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
                    ids.sort_by_key(|(index, _)| *index);
                    let ids = ids
                        .iter()
                        .map(|(_, id)| Value::String(id_text(id)))
                        .collect();
                    Ok(vec![row([("inserted_ids", Value::Array(ids))])])
                },
                CollectionOp::UpdateOne { filter, update } => {
                    let result = collection
                        .update_one(filter_document(filter)?, to_document(update)?)
                        .await
                        .map_err(execution_error)?;
                    Ok(vec![update_row(result.matched_count, result.modified_count)])
                },
                CollectionOp::UpdateMany { filter, update } => {
                    let result = collection
                        .update_many(filter_document(filter)?, to_document(update)?)
                        .await
                        .map_err(execution_error)?;
                    Ok(vec![update_row(result.matched_count, result.modified_count)])
                },
                CollectionOp::DeleteOne { filter } => {
                    let result = collection
                        .delete_one(filter_document(filter)?)
                        .await
                        .map_err(execution_error)?;
                    Ok(vec![delete_row(result.deleted_count)])
                },
                CollectionOp::DeleteMany { filter } => {
                    let result = collection
                        .delete_many(filter_document(filter)?)
                        .await
                        .map_err(execution_error)?;
                    Ok(vec![delete_row(result.deleted_count)])
                },
                CollectionOp::CreateIndex { keys, options } => {
                    let options: Option<IndexOptions> = if options.is_empty() {
                        None
                    } else {
                        Some(bson::from_document(to_document(options)?).map_err(|e| {
                            Error::InvalidInput(format!("createIndex options: {e}"))
                        })?)
                    };
                    let model = IndexModel::builder()
                        .keys(to_document(keys)?)
                        .options(options)
                        .build();
                    let result = collection.create_index(model).await.map_err(execution_error)?;
                    Ok(vec![row([("index_name", Value::String(result.index_name))])])
                },
                CollectionOp::DropIndex { index } => {
                    collection
                        .drop_index(index.name())
                        .await
                        .map_err(execution_error)?;
                    Ok(vec![row([("dropped", Value::Bool(true))])])
                },
                CollectionOp::ListIndexes => {
                    let cursor = collection.list_indexes().await.map_err(execution_error)?;
                    let models: Vec<IndexModel> = drain(cursor, usize::MAX).await?;
                    models
                        .iter()
                        .map(|m| {
                            bson::to_document(m)
                                .map(|d| document_to_row(&d))
                                .map_err(execution_error)
                        })
                        .collect()
                },
            }
        }
    }

    fn row<const N: usize>(pairs: [(&str, Value); N]) -> Row {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    pub(super) fn update_row(matched: u64, modified: u64) -> Row {
        row([
            ("matched_count", Value::from(matched)),
            ("modified_count", Value::from(modified)),
        ])
    }

    pub(super) fn delete_row(deleted: u64) -> Row {
        row([("deleted_count", Value::from(deleted))])
    }

    async fn drain<T>(mut cursor: Cursor<T>, cap: usize) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync + Unpin,
    {
        let mut out = Vec::new();
        while out.len() < cap && cursor.advance().await.map_err(execution_error)? {
            out.push(cursor.deserialize_current().map_err(execution_error)?);
        }
        Ok(out)
    }

    async fn collect_documents(cursor: Cursor<Document>, cap: usize) -> Result<Vec<Row>> {
        let documents = drain(cursor, cap).await?;
        Ok(documents.iter().map(document_to_row).collect())
    }

    fn to_document(map: shell::Document) -> Result<Document> {
        bson::to_document(&map).map_err(|e| Error::InvalidInput(e.to_string()))
    }

    /// Converts a filter, turning 24-hex `_id` strings into object ids.
    fn filter_document(map: shell::Document) -> Result<Document> {
        let mut filter = to_document(map)?;
        if let Some(id) = filter.get_mut("_id") {
            coerce_object_id(id);
        }
        Ok(filter)
    }

    /// Rewrites hex strings to object ids, descending into operator
    /// objects (`{"$in": [...]}`) and arrays.
    pub(super) fn coerce_object_id(value: &mut Bson) {
        match value {
            Bson::String(s) => {
                if let Ok(oid) = ObjectId::parse_str(s.as_str()) {
                    *value = Bson::ObjectId(oid);
                }
            },
            Bson::Document(operators) => {
                for (key, inner) in operators.iter_mut() {
                    if key.starts_with('$') {
                        coerce_object_id(inner);
                    }
                }
            },
            Bson::Array(items) => items.iter_mut().for_each(coerce_object_id),
            _ => {},
        }
    }

    fn id_text(id: &Bson) -> String {
        match serialize_bson(id) {
            Value::String(s) => s,
            other => other.to_string(),
        }
    }

    fn bson_to_row(value: &Bson) -> Option<Row> {
        value.as_document().map(document_to_row)
    }

    pub(super) fn document_to_row(document: &Document) -> Row {
        document
            .iter()
            .map(|(k, v)| (k.clone(), serialize_bson(v)))
            .collect()
    }

    /// Flattens a BSON value to plain JSON.
    pub(super) fn serialize_bson(value: &Bson) -> Value {
        match value {
            Bson::Null | Bson::Undefined => Value::Null,
            Bson::Boolean(b) => Value::Bool(*b),
            Bson::Int32(i) => Value::from(*i),
            Bson::Int64(i) => Value::from(*i),
            Bson::Double(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Bson::String(s) => Value::String(s.clone()),
            Bson::ObjectId(oid) => Value::String(oid.to_hex()),
            Bson::DateTime(dt) => Value::String(
                dt.try_to_rfc3339_string()
                    .unwrap_or_else(|_| dt.timestamp_millis().to_string()),
            ),
            Bson::Document(d) => Value::Object(document_to_row(d)),
            Bson::Array(items) => Value::Array(items.iter().map(serialize_bson).collect()),
            Bson::Binary(binary) => Value::String(hex::encode(&binary.bytes)),
            Bson::Timestamp(ts) => Value::String(format!("Timestamp({}, {})", ts.time, ts.increment)),
            Bson::RegularExpression(re) => Value::String(format!("/{}/{}", re.pattern, re.options)),
            other => Value::String(other.to_string()),
        }
    }

    /// Coarse type name reported as a column's data type.
    pub(super) fn bson_type_name(value: &Bson) -> &'static str {
        match value.element_type() {
            ElementType::Double => "double",
            ElementType::String => "string",
            ElementType::EmbeddedDocument => "object",
            ElementType::Array => "array",
            ElementType::Binary => "binData",
            ElementType::ObjectId => "objectId",
            ElementType::Boolean => "bool",
            ElementType::DateTime => "datetime",
            ElementType::Null | ElementType::Undefined => "null",
            ElementType::Int32 => "int",
            ElementType::Int64 => "long",
            ElementType::Decimal128 => "decimal",
            ElementType::Timestamp => "timestamp",
            _ => "mixed",
        }
    }

    #[async_trait]
    impl Connector for MongoConnector {
        fn backend(&self) -> BackendType {
            BackendType::MongoDb
        }

        fn is_connected(&self) -> bool {
            acquire_lock(&self.client).is_some()
        }

        async fn connect(&self) -> Result<ConnectOutcome> {
            match self.open().await {
                Ok(client) => {
                    *acquire_lock(&self.client) = Some(client);
                    tracing::info!(address = %self.descriptor.address(), "Connected to MongoDB");
                    Ok(ConnectOutcome::Connected)
                },
                Err(reason) => {
                    tracing::warn!(
                        address = %self.descriptor.address(),
                        error = %reason,
                        "MongoDB connect failed"
                    );
                    Ok(ConnectOutcome::Refused {
                        backend: BackendType::MongoDb,
                        reason,
                    })
                },
            }
        }

        async fn disconnect(&self) -> Result<()> {
            let client = acquire_lock(&self.client).take();
            if let Some(client) = client {
                client.shutdown().await;
                tracing::debug!(address = %self.descriptor.address(), "Disconnected from MongoDB");
            }
            Ok(())
        }

        async fn test_connection(&self) -> bool {
            if !self.is_connected() && !matches!(self.connect().await, Ok(ConnectOutcome::Connected)) {
                return false;
            }
            match self.current_client() {
                Ok(client) => client
                    .database("admin")
                    .run_command(doc! { "ping": 1 })
                    .await
                    .is_ok(),
                Err(_) => false,
            }
        }

        async fn get_schemas(&self) -> Result<Vec<String>> {
            let names = self
                .current_client()?
                .list_database_names()
                .await
                .map_err(execution_error)?;
            Ok(names
                .into_iter()
                .filter(|n| !SYSTEM_DATABASES.contains(&n.as_str()))
                .collect())
        }

        async fn get_tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
            let client = self.current_client()?;
            let database = schema.map_or_else(|| self.active_database(), String::from);
            let mut names = client
                .database(&database)
                .list_collection_names()
                .await
                .map_err(execution_error)?;
            names.sort();
            Ok(names)
        }

        async fn get_columns(&self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnInfo>> {
            let client = self.current_client()?;
            let database = schema.map_or_else(|| self.active_database(), String::from);
            let sample = client
                .database(&database)
                .collection::<Document>(table)
                .find_one(doc! {})
                .await
                .map_err(execution_error)?;
            Ok(sample
                .map(|document| {
                    document
                        .iter()
                        .map(|(key, value)| ColumnInfo::new(key.clone(), bson_type_name(value)))
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn execute_query(&self, query: &str) -> Result<Vec<Row>> {
            let command = shell::parse_command(query)?;
            tracing::debug!(command = %command, "Executing shell command");
            self.run(command).await
        }
    }
}

#[cfg(not(feature = "mongodb"))]
mod stub {
    use crate::connectors::{ConnectOutcome, Connector, ConnectorOptions, Row, not_connected};
    use crate::models::{BackendType, ColumnInfo, ConnectionDescriptor};
    use crate::{Error, Result};
    use async_trait::async_trait;

    /// Stub MongoDB connector when the feature is not enabled.
    ///
    /// Query text is still parsed, so syntax errors surface before the
    /// missing driver does.
    pub struct MongoConnector {
        descriptor: ConnectionDescriptor,
    }

    impl MongoConnector {
        /// Creates a connector (stub).
        #[must_use]
        pub const fn new(descriptor: ConnectionDescriptor, _options: ConnectorOptions) -> Self {
            Self { descriptor }
        }
    }

    #[async_trait]
    impl Connector for MongoConnector {
        fn backend(&self) -> BackendType {
            BackendType::MongoDb
        }

        fn is_connected(&self) -> bool {
            false
        }

        async fn connect(&self) -> Result<ConnectOutcome> {
            tracing::debug!(connection_id = %self.descriptor.id, "mongodb feature not enabled");
            Err(Error::FeatureNotEnabled("mongodb".to_string()))
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn test_connection(&self) -> bool {
            false
        }

        async fn get_schemas(&self) -> Result<Vec<String>> {
            Err(not_connected(BackendType::MongoDb))
        }

        async fn get_tables(&self, _schema: Option<&str>) -> Result<Vec<String>> {
            Err(not_connected(BackendType::MongoDb))
        }

        async fn get_columns(&self, _table: &str, _schema: Option<&str>) -> Result<Vec<ColumnInfo>> {
            Err(not_connected(BackendType::MongoDb))
        }

        async fn execute_query(&self, query: &str) -> Result<Vec<Row>> {
            crate::shell::parse_command(query)?;
            Err(not_connected(BackendType::MongoDb))
        }
    }
}

#[cfg(feature = "mongodb")]
pub use implementation::MongoConnector;

#[cfg(not(feature = "mongodb"))]
pub use stub::MongoConnector;
