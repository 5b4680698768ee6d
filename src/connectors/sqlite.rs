//! `SQLite` connector.
//!
//! rusqlite is blocking, so every call runs on the blocking pool with the
//! connection behind a mutex.

use super::{ConnectOutcome, Connector, Row, SqlDialect, execution_error, not_connected};
use crate::models::{BackendType, ColumnInfo, ConnectionDescriptor};
use crate::{Error, Result, acquire_lock};
use async_trait::async_trait;
use regex::Regex;
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde_json::{Number, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

/// `NAME(n)` or `NAME(p, s)` declared types.
static SIZED_TYPE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z ]*?)\s*\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\)").ok()
});

const DEFAULT_SCHEMA: &str = "main";

/// Connector for a `SQLite` database file.
pub struct SqliteConnector {
    descriptor: ConnectionDescriptor,
    conn: Arc<Mutex<Option<Connection>>>,
    connected: AtomicBool,
}

impl SqliteConnector {
    /// Creates a disconnected connector.
    #[must_use]
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self {
            descriptor,
            conn: Arc::new(Mutex::new(None)),
            connected: AtomicBool::new(false),
        }
    }

    /// Runs `f` against the open connection on the blocking pool.
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = acquire_lock(&conn);
            let conn = guard
                .as_ref()
                .ok_or_else(|| not_connected(BackendType::Sqlite))?;
            f(conn)
        })
        .await
        .map_err(|e| Error::OperationFailed {
            operation: "sqlite_blocking_task".to_string(),
            cause: e.to_string(),
        })?
    }
}

/// Applies per-connection settings.
///
/// Journal mode is left alone; the file belongs to the user.
fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "busy_timeout", "5000")
        .map_err(|e| Error::OperationFailed {
            operation: "sqlite_configure".to_string(),
            cause: e.to_string(),
        })?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| Error::OperationFailed {
            operation: "sqlite_configure".to_string(),
            cause: e.to_string(),
        })
}

/// Converts one column value to JSON. Blobs become lowercase hex.
fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

/// Runs one statement; statements without result columns return no rows.
fn run_query(conn: &Connection, query: &str) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(query).map_err(execution_error)?;
    if stmt.column_count() == 0 {
        stmt.execute([]).map_err(execution_error)?;
        return Ok(Vec::new());
    }
    let names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let mut rows = stmt.query([]).map_err(execution_error)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(execution_error)? {
        let mut record = Row::new();
        for (i, name) in names.iter().enumerate() {
            let value = row.get_ref(i).map_err(execution_error)?;
            record.insert(name.clone(), value_to_json(value));
        }
        out.push(record);
    }
    Ok(out)
}

/// Extracts `(length_or_precision, scale)` from a declared type.
fn parse_declared_size(declared: &str) -> Option<(String, u32, Option<u32>)> {
    let re = SIZED_TYPE.as_ref()?;
    let caps = re.captures(declared)?;
    let base = caps.get(1)?.as_str().trim().to_uppercase();
    let first = caps.get(2)?.as_str().parse().ok()?;
    let second = caps.get(3).and_then(|m| m.as_str().parse().ok());
    Some((base, first, second))
}

fn column_info(
    name: String,
    declared: String,
    not_null: bool,
    default: Option<String>,
    pk: bool,
    foreign: bool,
) -> ColumnInfo {
    let mut column = ColumnInfo::new(name, declared.clone());
    column.nullable = !not_null;
    column.default_value = default.map(Value::String);
    if pk {
        column = column.primary_key();
    }
    column.foreign_key = foreign;
    if let Some((base, first, second)) = parse_declared_size(&declared) {
        if base.contains("DEC") || base.contains("NUMERIC") {
            column = column.with_precision(first, second);
        } else if base.contains("CHAR") || base.contains("TEXT") || base.contains("CLOB") {
            column = column.with_max_length(first);
        }
    }
    column
}

fn load_columns(conn: &Connection, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
    let dialect = SqlDialect::Sqlite;
    let schema_q = dialect.quote_ident(schema);
    let table_q = dialect.quote_ident(table);

    let mut fk_stmt = conn
        .prepare(&format!("PRAGMA {schema_q}.foreign_key_list({table_q})"))
        .map_err(execution_error)?;
    let foreign: HashSet<String> = fk_stmt
        .query_map([], |row| row.get::<_, String>("from"))
        .map_err(execution_error)?
        .collect::<std::result::Result<_, _>>()
        .map_err(execution_error)?;

    let mut stmt = conn
        .prepare(&format!("PRAGMA {schema_q}.table_info({table_q})"))
        .map_err(execution_error)?;
    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get("name")?;
            let declared: String = row.get("type")?;
            let not_null: i64 = row.get("notnull")?;
            let default: Option<String> = row.get("dflt_value")?;
            let pk: i64 = row.get("pk")?;
            let is_foreign = foreign.contains(&name);
            Ok(column_info(
                name,
                declared,
                not_null != 0,
                default,
                pk > 0,
                is_foreign,
            ))
        })
        .map_err(execution_error)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(execution_error)?;
    Ok(columns)
}

#[async_trait]
impl Connector for SqliteConnector {
    fn backend(&self) -> BackendType {
        BackendType::Sqlite
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn connect(&self) -> Result<ConnectOutcome> {
        let Some(path) = self.descriptor.file_path.clone() else {
            return Ok(ConnectOutcome::Refused {
                backend: BackendType::Sqlite,
                reason: "SQLite connection requires a file path".to_string(),
            });
        };
        let conn = Arc::clone(&self.conn);
        let opened = tokio::task::spawn_blocking(move || -> std::result::Result<(), String> {
            let connection =
                Connection::open(&path).map_err(|e| format!("{}: {e}", path.display()))?;
            configure_connection(&connection).map_err(|e| e.to_string())?;
            *acquire_lock(&conn) = Some(connection);
            Ok(())
        })
        .await
        .map_err(|e| Error::OperationFailed {
            operation: "sqlite_blocking_task".to_string(),
            cause: e.to_string(),
        })?;

        match opened {
            Ok(()) => {
                self.connected.store(true, Ordering::Release);
                tracing::info!(path = %self.descriptor.address(), "Connected to SQLite");
                Ok(ConnectOutcome::Connected)
            },
            Err(e) => {
                tracing::warn!(path = %self.descriptor.address(), error = %e, "SQLite connect failed");
                Ok(ConnectOutcome::Refused {
                    backend: BackendType::Sqlite,
                    reason: e,
                })
            },
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        // A running query holds the mutex; wait for it off the runtime.
        let conn = Arc::clone(&self.conn);
        let closed = tokio::task::spawn_blocking(move || {
            let Some(previous) = acquire_lock(&conn).take() else {
                return Ok(false);
            };
            previous
                .close()
                .map(|()| true)
                .map_err(|(_, e)| Error::OperationFailed {
                    operation: "sqlite_close".to_string(),
                    cause: e.to_string(),
                })
        })
        .await
        .map_err(|e| Error::OperationFailed {
            operation: "sqlite_blocking_task".to_string(),
            cause: e.to_string(),
        })??;
        if closed {
            tracing::debug!(path = %self.descriptor.address(), "Disconnected from SQLite");
        }
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        if !self.is_connected() {
            match self.connect().await {
                Ok(ConnectOutcome::Connected) => {},
                _ => return false,
            }
        }
        self.with_connection(|conn| run_query(conn, "SELECT 1"))
            .await
            .is_ok()
    }

    async fn get_schemas(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("PRAGMA database_list")
                .map_err(execution_error)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>("name"))
                .map_err(execution_error)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(execution_error)?;
            Ok(names)
        })
        .await
    }

    async fn get_tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
        let schema = schema.unwrap_or(DEFAULT_SCHEMA).to_string();
        self.with_connection(move |conn| {
            let sql = format!(
                "SELECT name FROM {}.sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                SqlDialect::Sqlite.quote_ident(&schema)
            );
            let mut stmt = conn.prepare(&sql).map_err(execution_error)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(execution_error)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(execution_error)?;
            Ok(names)
        })
        .await
    }

    async fn get_columns(&self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnInfo>> {
        let schema = schema.unwrap_or(DEFAULT_SCHEMA).to_string();
        let table = table.to_string();
        self.with_connection(move |conn| load_columns(conn, &schema, &table))
            .await
    }

    async fn execute_query(&self, query: &str) -> Result<Vec<Row>> {
        let query = query.to_string();
        self.with_connection(move |conn| run_query(conn, &query))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn connected(dir: &TempDir) -> SqliteConnector {
        let descriptor = ConnectionDescriptor::sqlite("local", dir.path().join("test.db"));
        let connector = SqliteConnector::new(descriptor);
        connector.connect().await.unwrap().into_result().unwrap();
        connector
    }

    #[tokio::test]
    async fn test_missing_path_is_refused() {
        let connector =
            SqliteConnector::new(ConnectionDescriptor::new("x", "x", BackendType::Sqlite));
        let outcome = connector.connect().await.unwrap();
        assert!(matches!(outcome, ConnectOutcome::Refused { .. }));
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_unopenable_path_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("nested").join("x.db");
        let connector = SqliteConnector::new(ConnectionDescriptor::sqlite("x", path));
        let outcome = connector.connect().await.unwrap();
        assert!(!outcome.is_connected());
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_query_before_connect_fails() {
        let dir = TempDir::new().unwrap();
        let connector =
            SqliteConnector::new(ConnectionDescriptor::sqlite("x", dir.path().join("x.db")));
        let err = connector.execute_query("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_execute_maps_value_types() {
        let dir = TempDir::new().unwrap();
        let connector = connected(&dir).await;
        let created = connector
            .execute_query("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL, data BLOB)")
            .await
            .unwrap();
        assert!(created.is_empty());
        connector
            .execute_query("INSERT INTO t VALUES (1, 'ann', 1.5, x'CAFE'), (2, NULL, NULL, NULL)")
            .await
            .unwrap();

        let rows = connector
            .execute_query("SELECT * FROM t ORDER BY id")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["name"], json!("ann"));
        assert_eq!(rows[0]["score"], json!(1.5));
        assert_eq!(rows[0]["data"], json!("cafe"));
        assert_eq!(rows[1]["name"], Value::Null);
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, ["id", "name", "score", "data"]);
    }

    #[tokio::test]
    async fn test_rejected_statement_is_execution_error() {
        let dir = TempDir::new().unwrap();
        let connector = connected(&dir).await;
        let err = connector.execute_query("SELEC nonsense").await.unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }

    #[tokio::test]
    async fn test_introspection() {
        let dir = TempDir::new().unwrap();
        let connector = connected(&dir).await;
        connector
            .execute_query("CREATE TABLE parent (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        connector
            .execute_query(
                "CREATE TABLE child (id INTEGER PRIMARY KEY, name VARCHAR(40) NOT NULL, \
                 price DECIMAL(8, 2) DEFAULT 0, parent_id INTEGER REFERENCES parent(id))",
            )
            .await
            .unwrap();

        assert_eq!(connector.get_schemas().await.unwrap(), vec!["main"]);
        assert_eq!(
            connector.get_tables(None).await.unwrap(),
            vec!["child", "parent"]
        );

        let columns = connector.get_columns("child", None).await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "name", "price", "parent_id"]);
        assert!(columns[0].primary_key);
        assert!(!columns[1].nullable);
        assert_eq!(columns[1].max_length, Some(40));
        assert_eq!(columns[2].numeric_precision, Some(8));
        assert_eq!(columns[2].numeric_scale, Some(2));
        assert_eq!(columns[2].default_value, Some(json!("0")));
        assert!(columns[3].foreign_key);
        assert!(columns[3].nullable);
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_noop() {
        let dir = TempDir::new().unwrap();
        let connector = connected(&dir).await;
        assert!(connector.test_connection().await);
        connector.disconnect().await.unwrap();
        connector.disconnect().await.unwrap();
        assert!(!connector.is_connected());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_disconnect_during_query_keeps_runtime_responsive() {
        let dir = TempDir::new().unwrap();
        let connector = connected(&dir).await;
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(2));
                loop {
                    interval.tick().await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let slow = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 3000000) \
                    SELECT count(*) AS n FROM c";
        let (query, ticks_during_disconnect) = tokio::join!(connector.execute_query(slow), async {
            // Give the query time to take the connection first.
            tokio::time::sleep(Duration::from_millis(20)).await;
            let before = ticks.load(Ordering::SeqCst);
            connector.disconnect().await.unwrap();
            ticks.load(Ordering::SeqCst) - before
        });
        ticker.abort();

        assert_eq!(query.unwrap()[0]["n"], json!(3_000_000));
        assert!(ticks_during_disconnect > 0);
        assert!(!connector.is_connected());
    }

        #[tokio::test]
    async fn test_test_connection_connects_lazily() {
        let dir = TempDir::new().unwrap();
        let connector =
            SqliteConnector::new(ConnectionDescriptor::sqlite("x", dir.path().join("x.db")));
        assert!(connector.test_connection().await);
        assert!(connector.is_connected());
    }

    #[test]
    fn test_parse_declared_size() {
        assert_eq!(
            parse_declared_size("varchar(255)"),
            Some(("VARCHAR".to_string(), 255, None))
        );
        assert_eq!(
            parse_declared_size("NUMERIC(10, 3)"),
            Some(("NUMERIC".to_string(), 10, Some(3)))
        );
        assert_eq!(parse_declared_size("INTEGER"), None);
    }
}
