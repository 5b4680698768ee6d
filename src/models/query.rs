//! Query results and history entries.

use super::ConnectionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// One result row (or document), keys in backend order.
pub type Row = Map<String, Value>;

/// Rows plus timing for one executed query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    /// Result rows.
    pub rows: Vec<Row>,
    /// Number of rows returned.
    pub row_count: usize,
    /// Wall time spent in the backend call.
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl QueryOutcome {
    /// Creates an outcome from rows and elapsed time.
    #[must_use]
    pub fn new(rows: Vec<Row>, elapsed: Duration) -> Self {
        Self {
            row_count: rows.len(),
            rows,
            elapsed,
        }
    }
}

/// One recorded execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Connection the query ran against.
    pub connection_id: ConnectionId,
    /// Query text, verbatim.
    pub query: String,
    /// Whether the backend call succeeded.
    pub success: bool,
    /// Wall time of the attempt.
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    /// Rows returned on success.
    pub row_count: usize,
    /// Error text on failure.
    pub error: Option<String>,
    /// When the entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
