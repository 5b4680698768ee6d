//! PostgreSQL connector.
//!
//! Queries run through the simple-query protocol so arbitrary statement text
//! works and every value comes back in the server's text representation.

#[cfg(feature = "postgres")]
mod implementation {
    use crate::acquire_lock;
    use crate::connectors::{
        ConnectOutcome, Connector, ConnectorOptions, Row, execution_error, not_connected,
    };
    use crate::models::{BackendType, ColumnInfo, ConnectionDescriptor};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use deadpool_postgres::{Config, Pool, Runtime};
    use serde_json::Value;
    use std::sync::Mutex;
    use tokio_postgres::{NoTls, SimpleQueryMessage};

    const DEFAULT_SCHEMA: &str = "public";
    const POOL_MAX_SIZE: usize = 4;

    const SCHEMAS_SQL: &str = "SELECT schema_name::text FROM information_schema.schemata \
        WHERE schema_name NOT IN ('information_schema', 'pg_catalog', 'pg_toast') \
        ORDER BY schema_name";

    const TABLES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
        WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name";

    const COLUMNS_SQL: &str = r"
        SELECT c.column_name::text,
               c.data_type::text,
               c.is_nullable::text = 'YES' AS nullable,
               c.column_default::text,
               c.character_maximum_length::int,
               c.numeric_precision::int,
               c.numeric_scale::int,
               EXISTS (
                   SELECT 1 FROM information_schema.table_constraints tc
                   JOIN information_schema.key_column_usage kcu
                     ON tc.constraint_name = kcu.constraint_name
                    AND tc.table_schema = kcu.table_schema
                   WHERE tc.table_schema = c.table_schema
                     AND tc.table_name = c.table_name
                     AND kcu.column_name = c.column_name
                     AND tc.constraint_type = 'PRIMARY KEY'
               ) AS is_pk,
               EXISTS (
                   SELECT 1 FROM information_schema.table_constraints tc
                   JOIN information_schema.key_column_usage kcu
                     ON tc.constraint_name = kcu.constraint_name
                    AND tc.table_schema = kcu.table_schema
                   WHERE tc.table_schema = c.table_schema
                     AND tc.table_name = c.table_name
                     AND kcu.column_name = c.column_name
                     AND tc.constraint_type = 'FOREIGN KEY'
               ) AS is_fk
        FROM information_schema.columns c
        WHERE c.table_schema = $1 AND c.table_name = $2
        ORDER BY c.ordinal_position";

    /// Connector for a PostgreSQL server.
    pub struct PostgresConnector {
        descriptor: ConnectionDescriptor,
        options: ConnectorOptions,
        pool: Mutex<Option<Pool>>,
    }

    fn pool_error(e: impl std::fmt::Display) -> Error {
        Error::OperationFailed {
            operation: "postgres_get_client".to_string(),
            cause: e.to_string(),
        }
    }

    #[allow(clippy::cast_sign_loss)]
    fn non_negative(value: Option<i32>) -> Option<u32> {
        value.filter(|v| *v >= 0).map(|v| v as u32)
    }

    impl PostgresConnector {
        /// Creates a disconnected connector.
        #[must_use]
        pub const fn new(descriptor: ConnectionDescriptor, options: ConnectorOptions) -> Self {
            Self {
                descriptor,
                options,
                pool: Mutex::new(None),
            }
        }

        /// Builds a deadpool config from the descriptor.
        fn build_pool_config(&self) -> Config {
            let mut cfg = Config::new();
            cfg.host = Some(self.descriptor.host_or_default().to_string());
            cfg.port = self.descriptor.port_or_default();
            cfg.user.clone_from(&self.descriptor.username);
            cfg.password = self.descriptor.password().map(String::from);
            cfg.dbname = Some(
                self.descriptor
                    .database
                    .clone()
                    .unwrap_or_else(|| "postgres".to_string()),
            );
            cfg.connect_timeout = Some(self.options.connect_timeout);

            cfg.pool = Some(deadpool_postgres::PoolConfig {
                max_size: POOL_MAX_SIZE,
                timeouts: deadpool_postgres::Timeouts {
                    wait: Some(std::time::Duration::from_secs(5)),
                    create: Some(self.options.connect_timeout),
                    recycle: Some(std::time::Duration::from_secs(5)),
                },
                ..Default::default()
            });
            cfg.manager = Some(deadpool_postgres::ManagerConfig {
                recycling_method: deadpool_postgres::RecyclingMethod::Fast,
            });
            cfg
        }

        fn current_pool(&self) -> Result<Pool> {
            acquire_lock(&self.pool)
                .clone()
                .ok_or_else(|| not_connected(BackendType::PostgreSql))
        }

        async fn client(&self) -> Result<deadpool_postgres::Object> {
            self.current_pool()?.get().await.map_err(pool_error)
        }

        async fn open(&self) -> std::result::Result<Pool, String> {
            let pool = self
                .build_pool_config()
                .create_pool(Some(Runtime::Tokio1), NoTls)
                .map_err(|e| e.to_string())?;
            let client = pool.get().await.map_err(|e| e.to_string())?;
            client
                .simple_query("SELECT 1")
                .await
                .map_err(|e| e.to_string())?;
            Ok(pool)
        }
    }

    #[async_trait]
    impl Connector for PostgresConnector {
        fn backend(&self) -> BackendType {
            BackendType::PostgreSql
        }

        fn is_connected(&self) -> bool {
            acquire_lock(&self.pool).is_some()
        }

        async fn connect(&self) -> Result<ConnectOutcome> {
            match self.open().await {
                Ok(pool) => {
                    *acquire_lock(&self.pool) = Some(pool);
                    tracing::info!(address = %self.descriptor.address(), "Connected to PostgreSQL");
                    Ok(ConnectOutcome::Connected)
                },
                Err(reason) => {
                    tracing::warn!(
                        address = %self.descriptor.address(),
                        error = %reason,
                        "PostgreSQL connect failed"
                    );
                    Ok(ConnectOutcome::Refused {
                        backend: BackendType::PostgreSql,
                        reason,
                    })
                },
            }
        }

        async fn disconnect(&self) -> Result<()> {
            if let Some(pool) = acquire_lock(&self.pool).take() {
                pool.close();
                tracing::debug!(address = %self.descriptor.address(), "Disconnected from PostgreSQL");
            }
            Ok(())
        }

        async fn test_connection(&self) -> bool {
            if !self.is_connected() && !matches!(self.connect().await, Ok(ConnectOutcome::Connected)) {
                return false;
            }
            match self.client().await {
                Ok(client) => client.simple_query("SELECT 1").await.is_ok(),
                Err(_) => false,
            }
        }

        async fn get_schemas(&self) -> Result<Vec<String>> {
            let client = self.client().await?;
            let rows = client
                .query(SCHEMAS_SQL, &[])
                .await
                .map_err(execution_error)?;
            Ok(rows.iter().map(|r| r.get(0)).collect())
        }

        async fn get_tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
            let client = self.client().await?;
            let schema = schema.unwrap_or(DEFAULT_SCHEMA);
            let rows = client
                .query(TABLES_SQL, &[&schema])
                .await
                .map_err(execution_error)?;
            Ok(rows.iter().map(|r| r.get(0)).collect())
        }

        async fn get_columns(&self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnInfo>> {
            let client = self.client().await?;
            let schema = schema.unwrap_or(DEFAULT_SCHEMA);
            let rows = client
                .query(COLUMNS_SQL, &[&schema, &table])
                .await
                .map_err(execution_error)?;
            Ok(rows
                .iter()
                .map(|row| {
                    let name: String = row.get(0);
                    let data_type: String = row.get(1);
                    let mut column = ColumnInfo::new(name, data_type);
                    column.nullable = row.get(2);
                    column.default_value = row.get::<_, Option<String>>(3).map(Value::String);
                    column.max_length = non_negative(row.get(4));
                    column.numeric_precision = non_negative(row.get(5));
                    column.numeric_scale = non_negative(row.get(6));
                    if row.get::<_, bool>(7) {
                        column = column.primary_key();
                    }
                    column.foreign_key = row.get(8);
                    column
                })
                .collect())
        }

        async fn execute_query(&self, query: &str) -> Result<Vec<Row>> {
            let client = self.client().await?;
            let messages = client
                .simple_query(query)
                .await
                .map_err(execution_error)?;
            let mut rows = Vec::new();
            for message in messages {
                if let SimpleQueryMessage::Row(row) = message {
                    let mut record = Row::new();
                    for (i, column) in row.columns().iter().enumerate() {
                        let value = row
                            .get(i)
                            .map_or(Value::Null, |s| Value::String(s.to_string()));
                        record.insert(column.name().to_string(), value);
                    }
                    rows.push(record);
                }
            }
            Ok(rows)
        }
    }
}

#[cfg(not(feature = "postgres"))]
mod stub {
    use crate::connectors::{ConnectOutcome, Connector, ConnectorOptions, Row, not_connected};
    use crate::models::{BackendType, ColumnInfo, ConnectionDescriptor};
    use crate::{Error, Result};
    use async_trait::async_trait;

    /// Stub PostgreSQL connector when the feature is not enabled.
    pub struct PostgresConnector {
        descriptor: ConnectionDescriptor,
    }

    impl PostgresConnector {
        /// Creates a connector (stub).
        #[must_use]
        pub const fn new(descriptor: ConnectionDescriptor, _options: ConnectorOptions) -> Self {
            Self { descriptor }
        }
    }

    #[async_trait]
    impl Connector for PostgresConnector {
        fn backend(&self) -> BackendType {
            BackendType::PostgreSql
        }

        fn is_connected(&self) -> bool {
            false
        }

        async fn connect(&self) -> Result<ConnectOutcome> {
            tracing::debug!(connection_id = %self.descriptor.id, "postgres feature not enabled");
            Err(Error::FeatureNotEnabled("postgres".to_string()))
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn test_connection(&self) -> bool {
            false
        }

        async fn get_schemas(&self) -> Result<Vec<String>> {
            Err(not_connected(BackendType::PostgreSql))
        }

        async fn get_tables(&self, _schema: Option<&str>) -> Result<Vec<String>> {
            Err(not_connected(BackendType::PostgreSql))
        }

        async fn get_columns(&self, _table: &str, _schema: Option<&str>) -> Result<Vec<ColumnInfo>> {
            Err(not_connected(BackendType::PostgreSql))
        }

        async fn execute_query(&self, _query: &str) -> Result<Vec<Row>> {
            Err(not_connected(BackendType::PostgreSql))
        }
    }
}

#[cfg(feature = "postgres")]
pub use implementation::PostgresConnector;

#[cfg(not(feature = "postgres"))]
pub use stub::PostgresConnector;

#[cfg(all(test, not(feature = "postgres")))]
mod stub_tests {
    use super::*;
    use crate::Error;
    use crate::connectors::{Connector, ConnectorOptions};
    use crate::models::{BackendType, ConnectionDescriptor};

    #[tokio::test]
    async fn test_stub_reports_feature_not_enabled() {
        let connector = PostgresConnector::new(
            ConnectionDescriptor::new("pg", "pg", BackendType::PostgreSql),
            ConnectorOptions::default(),
        );
        assert!(matches!(
            connector.connect().await,
            Err(Error::FeatureNotEnabled(f)) if f == "postgres"
        ));
        assert!(!connector.test_connection().await);
        assert!(connector.execute_query("SELECT 1").await.is_err());
    }
}

#[cfg(all(test, feature = "postgres"))]
mod tests {
    use super::*;
    use crate::connectors::{Connector, ConnectorOptions};
    use crate::models::{BackendType, ConnectionDescriptor};
    use std::env;

    /// Gets test database URL from environment or skips test.
    fn get_test_db_url() -> Option<String> {
        env::var("DBKIT_TEST_POSTGRES_URL").ok()
    }

    fn descriptor_from_url(url: &str) -> Option<ConnectionDescriptor> {
        let config: tokio_postgres::Config = url.parse().ok()?;
        let host = match config.get_hosts().first()? {
            tokio_postgres::config::Host::Tcp(h) => h.clone(),
            #[cfg(unix)]
            tokio_postgres::config::Host::Unix(p) => p.to_string_lossy().to_string(),
        };
        let mut descriptor = ConnectionDescriptor::new("pg", "pg", BackendType::PostgreSql)
            .with_host(host, config.get_ports().first().copied());
        if let (Some(user), Some(password)) = (config.get_user(), config.get_password()) {
            descriptor =
                descriptor.with_credentials(user, String::from_utf8_lossy(password).to_string());
        }
        if let Some(db) = config.get_dbname() {
            descriptor = descriptor.with_database(db);
        }
        Some(descriptor)
    }

    #[tokio::test]
    async fn test_round_trip_against_server() {
        let Some(url) = get_test_db_url() else {
            eprintln!("Skipping: DBKIT_TEST_POSTGRES_URL not set");
            return;
        };
        let descriptor = descriptor_from_url(&url).unwrap();
        let connector = PostgresConnector::new(descriptor, ConnectorOptions::default());
        connector.connect().await.unwrap().into_result().unwrap();

        connector
            .execute_query("CREATE TEMP TABLE dbkit_scratch (id int primary key, name varchar(20) not null)")
            .await
            .unwrap();
        connector
            .execute_query("INSERT INTO dbkit_scratch VALUES (1, 'ann')")
            .await
            .unwrap();
        let rows = connector
            .execute_query("SELECT id, name FROM dbkit_scratch")
            .await
            .unwrap();
        assert_eq!(rows[0]["name"], serde_json::json!("ann"));
        assert!(
            connector
                .get_schemas()
                .await
                .unwrap()
                .iter()
                .all(|s| s != "pg_catalog")
        );
        connector.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_server_is_refused() {
        let descriptor = ConnectionDescriptor::new("pg", "pg", BackendType::PostgreSql)
            .with_host("127.0.0.1", Some(1));
        let connector = PostgresConnector::new(descriptor, ConnectorOptions::default());
        let outcome = connector.connect().await.unwrap();
        assert!(!outcome.is_connected());
        assert!(!connector.is_connected());
    }
}
