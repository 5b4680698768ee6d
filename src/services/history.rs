//! Query history.

use crate::acquire_lock;
use crate::models::{ConnectionId, HistoryEntry};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Default number of entries kept per connection.
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Receives one entry per execution attempt.
pub trait QueryHistory: Send + Sync {
    /// Appends an entry.
    fn add_entry(&self, entry: HistoryEntry);
}

/// Bounded in-memory history, newest entries kept per connection.
#[derive(Debug)]
pub struct InMemoryHistory {
    capacity: usize,
    entries: Mutex<HashMap<ConnectionId, VecDeque<HistoryEntry>>>,
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl InMemoryHistory {
    /// Creates a history keeping at most `capacity` entries per connection.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Most recent entries first, at most `limit`.
    #[must_use]
    pub fn history(&self, connection_id: &ConnectionId, limit: usize) -> Vec<HistoryEntry> {
        acquire_lock(&self.entries)
            .get(connection_id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Entries whose query text contains `needle`, case-insensitively,
    /// most recent first.
    #[must_use]
    pub fn search(&self, connection_id: &ConnectionId, needle: &str) -> Vec<HistoryEntry> {
        let needle = needle.to_lowercase();
        acquire_lock(&self.entries)
            .get(connection_id)
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .filter(|e| e.query.to_lowercase().contains(&needle))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops every entry of one connection.
    pub fn clear(&self, connection_id: &ConnectionId) {
        acquire_lock(&self.entries).remove(connection_id);
    }

    /// Drops entries older than `age`; returns how many were removed.
    pub fn cleanup_older_than(&self, age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(age) else {
            return 0;
        };
        let cutoff = Utc::now() - age;
        let mut entries = acquire_lock(&self.entries);
        let mut removed = 0;
        for list in entries.values_mut() {
            let before = list.len();
            list.retain(|e| e.recorded_at >= cutoff);
            removed += before - list.len();
        }
        entries.retain(|_, list| !list.is_empty());
        removed
    }

    /// Total entries across all connections.
    #[must_use]
    pub fn len(&self) -> usize {
        acquire_lock(&self.entries).values().map(VecDeque::len).sum()
    }

    /// Returns true when nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QueryHistory for InMemoryHistory {
    fn add_entry(&self, entry: HistoryEntry) {
        let mut entries = acquire_lock(&self.entries);
        let list = entries.entry(entry.connection_id.clone()).or_default();
        if list.len() >= self.capacity {
            list.pop_front();
        }
        list.push_back(entry);
    }
}
