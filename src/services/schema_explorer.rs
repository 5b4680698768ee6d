//! Cached schema trees.

use crate::cache::SchemaCache;
use crate::config::DbkitConfig;
use crate::connectors::{Connector, SqlDialect};
use crate::models::{ConnectionId, SchemaNode, SchemaTree, TableInfo, TableNode};
use crate::services::lock::OperationLock;
use crate::shell::{CollectionOp, Document, ShellCommand};
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Rows returned by [`SchemaExplorer::table_info`].
pub const SAMPLE_ROWS: usize = 5;

fn cache_key(connection_id: &ConnectionId) -> String {
    format!("{connection_id}_schema")
}

/// Walks schemas, tables and columns, caching the result per connection.
#[derive(Clone)]
pub struct SchemaExplorer {
    cache: Arc<SchemaCache<SchemaTree>>,
    lock: Arc<OperationLock>,
}

impl SchemaExplorer {
    /// Creates an explorer over a shared cache and lock table.
    #[must_use]
    pub const fn new(cache: Arc<SchemaCache<SchemaTree>>, lock: Arc<OperationLock>) -> Self {
        Self { cache, lock }
    }

    /// Creates an explorer with a cache sized and timed from configuration.
    #[must_use]
    pub fn from_config(config: &DbkitConfig, lock: Arc<OperationLock>) -> Self {
        let cache = SchemaCache::new(
            config.schema_cache_capacity,
            Duration::from_secs(config.schema_cache_ttl_secs),
        );
        Self::new(Arc::new(cache), lock)
    }

    /// Returns the connection's schema tree, walking the backend on a miss.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if any introspection call fails; nothing
    /// is cached in that case.
    #[instrument(skip(self, connector), fields(operation = "schema_tree", connection_id = %connection_id))]
    pub async fn schema_tree(
        &self,
        connection_id: &ConnectionId,
        connector: &dyn Connector,
    ) -> Result<SchemaTree> {
        let key = cache_key(connection_id);
        if let Some(tree) = self.cache.get(&key) {
            tracing::debug!("Schema tree served from cache");
            return Ok(tree);
        }

        let _guard = self.lock.acquire(connection_id).await;
        let start = Instant::now();
        let mut schemas = Vec::new();
        for schema in connector.get_schemas().await? {
            let mut tables = Vec::new();
            for table in connector.get_tables(Some(&schema)).await? {
                let columns = connector.get_columns(&table, Some(&schema)).await?;
                tables.push(TableNode { name: table, columns });
            }
            schemas.push(SchemaNode { name: schema, tables });
        }

        let tree = SchemaTree {
            connection_id: connection_id.clone(),
            backend: connector.backend(),
            schemas,
        };
        metrics::histogram!("dbkit_schema_walk_ms").record(start.elapsed().as_secs_f64() * 1000.0);
        tracing::info!(
            schemas = tree.schemas.len(),
            tables = tree.table_count(),
            elapsed_ms = start.elapsed().as_millis(),
            "Built schema tree"
        );
        self.cache.set(key, tree.clone(), None);
        Ok(tree)
    }

    /// Drops the cached tree so the next call walks the backend again.
    ///
    /// Returns true when a tree was cached.
    pub fn refresh_schema(&self, connection_id: &ConnectionId) -> bool {
        self.cache.delete(&cache_key(connection_id))
    }

    /// Keys of the trees currently cached.
    #[must_use]
    pub fn cached_keys(&self) -> Vec<String> {
        self.cache.keys()
    }

    /// Columns of one table plus up to [`SAMPLE_ROWS`] rows.
    ///
    /// # Errors
    ///
    /// Returns the connector's error.
    pub async fn table_info(
        &self,
        connection_id: &ConnectionId,
        connector: &dyn Connector,
        table: &str,
        schema: Option<&str>,
    ) -> Result<TableInfo> {
        let _guard = self.lock.acquire(connection_id).await;
        let columns = connector.get_columns(table, schema).await?;
        let query = match SqlDialect::for_backend(connector.backend()) {
            Some(dialect) => dialect.sample_query(table, schema, SAMPLE_ROWS),
            None => {
                let mut limit = Document::new();
                limit.insert("$limit".to_string(), json!(SAMPLE_ROWS));
                ShellCommand::Collection {
                    collection: table.to_string(),
                    op: CollectionOp::Aggregate {
                        pipeline: vec![limit],
                    },
                }
                .to_string()
            },
        };
        let mut sample_rows = connector.execute_query(&query).await?;
        sample_rows.truncate(SAMPLE_ROWS);
        Ok(TableInfo {
            schema: schema.map(str::to_string),
            table: table.to_string(),
            columns,
            sample_rows,
        })
    }
}

impl std::fmt::Debug for SchemaExplorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaExplorer")
            .field("cached", &self.cache.len())
            .field("locks", &self.lock.tracked())
            .finish()
    }
}
