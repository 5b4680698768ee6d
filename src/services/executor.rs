//! Query execution under the per-connection lock.
//!
//! Every attempt, successful or not, produces exactly one history entry.
//! The entry is written after the lock is released.

use crate::connectors::Connector;
use crate::models::{ConnectionId, HistoryEntry, QueryOutcome, Row};
use crate::services::history::QueryHistory;
use crate::services::lock::{OperationGuard, OperationLock};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Dispatches query text to a connector while holding its connection's lock.
pub struct QueryExecutor {
    lock: Arc<OperationLock>,
    history: Arc<dyn QueryHistory>,
    default_timeout: Option<Duration>,
}

impl QueryExecutor {
    /// Creates an executor with no default deadline.
    #[must_use]
    pub fn new(lock: Arc<OperationLock>, history: Arc<dyn QueryHistory>) -> Self {
        Self {
            lock,
            history,
            default_timeout: None,
        }
    }

    /// Sets the deadline used when a call supplies none.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// The lock table shared with other services.
    #[must_use]
    pub fn lock(&self) -> &Arc<OperationLock> {
        &self.lock
    }

    /// Runs `query`, waiting for the connection if another operation holds it.
    ///
    /// With a deadline the backend call runs on its own task, which keeps the
    /// lock until the call settles. On expiry the caller gets
    /// [`Error::Timeout`]; the call is abandoned, not killed.
    ///
    /// # Errors
    ///
    /// Returns the connector's error, or [`Error::Timeout`].
    #[instrument(
        skip(self, connection_id, connector, query),
        fields(operation = "execute_query", connection_id = %connection_id, backend = %connector.backend())
    )]
    pub async fn execute(
        &self,
        connection_id: &ConnectionId,
        connector: Arc<dyn Connector>,
        query: &str,
        timeout: Option<Duration>,
    ) -> Result<QueryOutcome> {
        let guard = self.lock.acquire(connection_id).await;
        self.run_locked(guard, connector, query, timeout).await
    }

    /// Runs `query` only if the connection is free right now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] without touching the backend or the history
    /// when another operation holds the connection; otherwise as
    /// [`execute`](Self::execute).
    pub async fn try_execute(
        &self,
        connection_id: &ConnectionId,
        connector: Arc<dyn Connector>,
        query: &str,
        timeout: Option<Duration>,
    ) -> Result<QueryOutcome> {
        let guard = self.lock.try_acquire(connection_id)?;
        self.run_locked(guard, connector, query, timeout).await
    }

    async fn run_locked(
        &self,
        guard: OperationGuard,
        connector: Arc<dyn Connector>,
        query: &str,
        timeout: Option<Duration>,
    ) -> Result<QueryOutcome> {
        let connection_id = guard.connection_id().clone();
        let backend = connector.backend();
        let start = Instant::now();

        let result = match timeout.or(self.default_timeout) {
            None => {
                let rows = connector.execute_query(query).await;
                drop(guard);
                rows
            },
            Some(deadline) => run_with_deadline(guard, connector, query.to_string(), deadline).await,
        };
        let elapsed = start.elapsed();

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!("dbkit_queries_total", "backend" => backend.as_str(), "status" => status)
            .increment(1);
        metrics::histogram!("dbkit_query_duration_ms", "backend" => backend.as_str())
            .record(elapsed.as_secs_f64() * 1000.0);

        let entry = HistoryEntry {
            connection_id,
            query: query.to_string(),
            success: result.is_ok(),
            elapsed,
            row_count: result.as_ref().map_or(0, Vec::len),
            error: result.as_ref().err().map(ToString::to_string),
            recorded_at: Utc::now(),
        };
        self.history.add_entry(entry);

        match result {
            Ok(rows) => {
                tracing::debug!(rows = rows.len(), elapsed_ms = elapsed.as_millis(), "Query executed");
                Ok(QueryOutcome::new(rows, elapsed))
            },
            Err(e) => {
                tracing::warn!(error = %e, elapsed_ms = elapsed.as_millis(), "Query failed");
                Err(e)
            },
        }
    }
}

async fn run_with_deadline(
    guard: OperationGuard,
    connector: Arc<dyn Connector>,
    query: String,
    deadline: Duration,
) -> Result<Vec<Row>> {
    let task = tokio::spawn(async move {
        let rows = connector.execute_query(&query).await;
        drop(guard);
        rows
    });
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(rows)) => rows,
        Ok(Err(join_error)) => Err(Error::OperationFailed {
            operation: "execute_query".to_string(),
            cause: join_error.to_string(),
        }),
        Err(_) => {
            metrics::counter!("dbkit_query_timeouts_total").increment(1);
            Err(Error::Timeout(deadline))
        },
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}
