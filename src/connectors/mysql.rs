//! MySQL / MariaDB connector.
//!
//! Query text is sent unprepared over the text protocol, so every value is
//! returned as the server renders it.

#[cfg(feature = "mysql")]
mod implementation {
    use crate::acquire_lock;
    use crate::connectors::{
        ConnectOutcome, Connector, ConnectorOptions, Row, execution_error, not_connected,
    };
    use crate::models::{BackendType, ColumnInfo, ConnectionDescriptor};
    use crate::Result;
    use async_trait::async_trait;
    use serde_json::Value;
    use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
    use sqlx::{Column, Row as _};
    use std::sync::Mutex;

    const POOL_MAX_SIZE: u32 = 4;

    const SCHEMAS_SQL: &str = "SELECT CAST(SCHEMA_NAME AS CHAR) FROM information_schema.SCHEMATA \
        WHERE SCHEMA_NAME NOT IN ('information_schema', 'performance_schema', 'mysql', 'sys') \
        ORDER BY SCHEMA_NAME";

    const TABLES_SQL: &str = "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES \
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_TYPE = 'BASE TABLE' \
        ORDER BY TABLE_NAME";

    const COLUMNS_SQL: &str = r"
        SELECT CAST(c.COLUMN_NAME AS CHAR),
               CAST(c.DATA_TYPE AS CHAR),
               CAST(c.IS_NULLABLE = 'YES' AS SIGNED),
               CAST(c.COLUMN_DEFAULT AS CHAR),
               CAST(c.CHARACTER_MAXIMUM_LENGTH AS SIGNED),
               CAST(c.NUMERIC_PRECISION AS SIGNED),
               CAST(c.NUMERIC_SCALE AS SIGNED),
               CAST(c.COLUMN_KEY = 'PRI' AS SIGNED),
               CAST(EXISTS (
                   SELECT 1 FROM information_schema.KEY_COLUMN_USAGE k
                   WHERE k.TABLE_SCHEMA = c.TABLE_SCHEMA
                     AND k.TABLE_NAME = c.TABLE_NAME
                     AND k.COLUMN_NAME = c.COLUMN_NAME
                     AND k.REFERENCED_TABLE_NAME IS NOT NULL
               ) AS SIGNED)
        FROM information_schema.COLUMNS c
        WHERE c.TABLE_SCHEMA = COALESCE(?, DATABASE()) AND c.TABLE_NAME = ?
        ORDER BY c.ORDINAL_POSITION";

    /// Connector for a MySQL or MariaDB server.
    pub struct MySqlConnector {
        descriptor: ConnectionDescriptor,
        options: ConnectorOptions,
        pool: Mutex<Option<MySqlPool>>,
    }

    fn u32_from(value: Option<i64>) -> Option<u32> {
        value.and_then(|v| u32::try_from(v).ok())
    }

    fn row_to_json(row: &MySqlRow) -> Result<Row> {
        let mut record = Row::new();
        for (i, column) in row.columns().iter().enumerate() {
            let raw: Option<Vec<u8>> = row.try_get_unchecked(i).map_err(execution_error)?;
            let value = raw.map_or(Value::Null, |bytes| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            });
            record.insert(column.name().to_string(), value);
        }
        Ok(record)
    }

    fn column_from_row(row: &MySqlRow) -> std::result::Result<ColumnInfo, sqlx::Error> {
        let name: String = row.try_get(0)?;
        let data_type: String = row.try_get(1)?;
        let mut column = ColumnInfo::new(name, data_type);
        column.nullable = row.try_get::<i64, _>(2)? != 0;
        column.default_value = row.try_get::<Option<String>, _>(3)?.map(Value::String);
        column.max_length = u32_from(row.try_get(4)?);
        column.numeric_precision = u32_from(row.try_get(5)?);
        column.numeric_scale = u32_from(row.try_get(6)?);
        if row.try_get::<i64, _>(7)? != 0 {
            column = column.primary_key();
        }
        column.foreign_key = row.try_get::<i64, _>(8)? != 0;
        Ok(column)
    }

    impl MySqlConnector {
        /// Creates a disconnected connector.
        #[must_use]
        pub const fn new(descriptor: ConnectionDescriptor, options: ConnectorOptions) -> Self {
            Self {
                descriptor,
                options,
                pool: Mutex::new(None),
            }
        }

        fn connect_options(&self) -> MySqlConnectOptions {
            let mut options = MySqlConnectOptions::new().host(self.descriptor.host_or_default());
            if let Some(port) = self.descriptor.port_or_default() {
                options = options.port(port);
            }
            if let Some(user) = &self.descriptor.username {
                options = options.username(user);
            }
            if let Some(password) = self.descriptor.password() {
                options = options.password(password);
            }
            if let Some(db) = &self.descriptor.database {
                options = options.database(db);
            }
            options
        }

        fn current_pool(&self) -> Result<MySqlPool> {
            acquire_lock(&self.pool)
                .clone()
                .ok_or_else(|| not_connected(BackendType::MySql))
        }
    }

    #[async_trait]
    impl Connector for MySqlConnector {
        fn backend(&self) -> BackendType {
            BackendType::MySql
        }

        fn is_connected(&self) -> bool {
            acquire_lock(&self.pool).is_some()
        }

        async fn connect(&self) -> Result<ConnectOutcome> {
            let opened = MySqlPoolOptions::new()
                .max_connections(POOL_MAX_SIZE)
                .acquire_timeout(self.options.connect_timeout)
                .connect_with(self.connect_options())
                .await;
            match opened {
                Ok(pool) => {
                    *acquire_lock(&self.pool) = Some(pool);
                    tracing::info!(address = %self.descriptor.address(), "Connected to MySQL");
                    Ok(ConnectOutcome::Connected)
                },
                Err(e) => {
                    tracing::warn!(
                        address = %self.descriptor.address(),
                        error = %e,
                        "MySQL connect failed"
                    );
                    Ok(ConnectOutcome::Refused {
                        backend: BackendType::MySql,
                        reason: e.to_string(),
                    })
                },
            }
        }

        async fn disconnect(&self) -> Result<()> {
            let pool = acquire_lock(&self.pool).take();
            if let Some(pool) = pool {
                pool.close().await;
                tracing::debug!(address = %self.descriptor.address(), "Disconnected from MySQL");
            }
            Ok(())
        }

        async fn test_connection(&self) -> bool {
            if !self.is_connected() && !matches!(self.connect().await, Ok(ConnectOutcome::Connected)) {
                return false;
            }
            match self.current_pool() {
                Ok(pool) => sqlx::query("SELECT 1").execute(&pool).await.is_ok(),
                Err(_) => false,
            }
        }

        async fn get_schemas(&self) -> Result<Vec<String>> {
            let pool = self.current_pool()?;
            let rows = sqlx::query(SCHEMAS_SQL)
                .fetch_all(&pool)
                .await
                .map_err(execution_error)?;
            rows.iter()
                .map(|r| r.try_get::<String, _>(0).map_err(execution_error))
                .collect()
        }

        async fn get_tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
            let pool = self.current_pool()?;
            let rows = sqlx::query(TABLES_SQL)
                .bind(schema)
                .fetch_all(&pool)
                .await
                .map_err(execution_error)?;
            rows.iter()
                .map(|r| r.try_get::<String, _>(0).map_err(execution_error))
                .collect()
        }

        async fn get_columns(&self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnInfo>> {
            let pool = self.current_pool()?;
            let rows = sqlx::query(COLUMNS_SQL)
                .bind(schema)
                .bind(table)
                .fetch_all(&pool)
                .await
                .map_err(execution_error)?;
            rows.iter()
                .map(|r| column_from_row(r).map_err(execution_error))
                .collect()
        }

        async fn execute_query(&self, query: &str) -> Result<Vec<Row>> {
            let pool = self.current_pool()?;
            let rows = sqlx::raw_sql(query)
                .fetch_all(&pool)
                .await
                .map_err(execution_error)?;
            rows.iter().map(row_to_json).collect()
        }
    }
}

#[cfg(not(feature = "mysql"))]
mod stub {
    use crate::connectors::{ConnectOutcome, Connector, ConnectorOptions, Row, not_connected};
    use crate::models::{BackendType, ColumnInfo, ConnectionDescriptor};
    use crate::{Error, Result};
    use async_trait::async_trait;

    /// Stub MySQL connector when the feature is not enabled.
    pub struct MySqlConnector {
        descriptor: ConnectionDescriptor,
    }

    impl MySqlConnector {
        /// Creates a connector (stub).
        #[must_use]
        pub const fn new(descriptor: ConnectionDescriptor, _options: ConnectorOptions) -> Self {
            Self { descriptor }
        }
    }

    #[async_trait]
    impl Connector for MySqlConnector {
        fn backend(&self) -> BackendType {
            BackendType::MySql
        }

        fn is_connected(&self) -> bool {
            false
        }

        async fn connect(&self) -> Result<ConnectOutcome> {
            tracing::debug!(connection_id = %self.descriptor.id, "mysql feature not enabled");
            Err(Error::FeatureNotEnabled("mysql".to_string()))
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn test_connection(&self) -> bool {
            false
        }

        async fn get_schemas(&self) -> Result<Vec<String>> {
            Err(not_connected(BackendType::MySql))
        }

        async fn get_tables(&self, _schema: Option<&str>) -> Result<Vec<String>> {
            Err(not_connected(BackendType::MySql))
        }

        async fn get_columns(&self, _table: &str, _schema: Option<&str>) -> Result<Vec<ColumnInfo>> {
            Err(not_connected(BackendType::MySql))
        }

        async fn execute_query(&self, _query: &str) -> Result<Vec<Row>> {
            Err(not_connected(BackendType::MySql))
        }
    }
}

#[cfg(feature = "mysql")]
pub use implementation::MySqlConnector;

#[cfg(not(feature = "mysql"))]
pub use stub::MySqlConnector;


#[cfg(all(test, feature = "mysql"))]
mod tests {
    use super::*;
    use crate::connectors::{Connector, ConnectorOptions};
    use crate::models::{BackendType, ConnectionDescriptor};
    use std::env;

    /// Reads `host:port/db` style settings from the environment or skips.
    fn test_descriptor() -> Option<ConnectionDescriptor> {
        let host = env::var("DBKIT_TEST_MYSQL_HOST").ok()?;
        let user = env::var("DBKIT_TEST_MYSQL_USER").unwrap_or_else(|_| "root".to_string());
        let password = env::var("DBKIT_TEST_MYSQL_PASSWORD").unwrap_or_default();
        let database = env::var("DBKIT_TEST_MYSQL_DATABASE").unwrap_or_else(|_| "test".to_string());
        Some(
            ConnectionDescriptor::new("my", "my", BackendType::MySql)
                .with_host(host, None)
                .with_credentials(user, password)
                .with_database(database),
        )
    }

    #[tokio::test]
    async fn test_round_trip_against_server() {
        let Some(descriptor) = test_descriptor() else {
            eprintln!("Skipping: DBKIT_TEST_MYSQL_HOST not set");
            return;
        };
        let connector = MySqlConnector::new(descriptor, ConnectorOptions::default());
        connector.connect().await.unwrap().into_result().unwrap();
        connector
            .execute_query("CREATE TEMPORARY TABLE dbkit_scratch (id INT PRIMARY KEY, name VARCHAR(20))")
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
        assert_eq!(rows[0]["id"], serde_json::json!("1"));
        assert!(
            !connector
                .get_schemas()
                .await
                .unwrap()
                .contains(&"mysql".to_string())
        );
        connector.disconnect().await.unwrap();
    }
}
