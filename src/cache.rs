//! Time-to-live cache in front of schema introspection.
//!
//! Entries are immutable once set and are overwritten wholesale, so races on
//! the same key are benign. Expired entries are purged lazily on read or by an
//! explicit [`SchemaCache::cleanup_expired`] sweep.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Default time-to-live for entries set without an explicit TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of entries.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    /// `None` when the TTL runs past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Keyed TTL cache bounded by an LRU capacity.
///
/// # Example
///
/// ```rust,ignore
/// use dbkit::SchemaCache;
/// use std::time::Duration;
///
/// let cache: SchemaCache<String> = SchemaCache::default();
/// cache.set("conn-1_schema", "tree".to_string(), Some(Duration::from_secs(1)));
/// assert_eq!(cache.get("conn-1_schema").as_deref(), Some("tree"));
/// ```
pub struct SchemaCache<V> {
    entries: RwLock<LruCache<String, CacheEntry<V>>>,
    default_ttl: Duration,
}

impl<V: Clone> SchemaCache<V> {
    /// Creates a cache.
    ///
    /// A zero capacity is treated as one.
    #[must_use]
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(cap)),
            default_ttl,
        }
    }

    /// Returns the TTL applied when `set` is called without one.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn write(&self) -> RwLockWriteGuard<'_, LruCache<String, CacheEntry<V>>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Schema cache lock was poisoned, recovering");
            metrics::counter!("dbkit_cache_lock_poisoned_total").increment(1);
            PoisonError::into_inner(poisoned)
        })
    }

    /// Returns the value if present and not expired.
    ///
    /// An expired entry found here is deleted.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.write();

        let lookup = entries
            .get(key)
            .map(|entry| (!entry.is_expired(now)).then(|| entry.value.clone()));
        let hit = match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                entries.pop(key);
                tracing::debug!(key, "Evicted expired cache entry");
                None
            },
            None => None,
        };

        if hit.is_some() {
            metrics::counter!("dbkit_cache_hits_total").increment(1);
        } else {
            metrics::counter!("dbkit_cache_misses_total").increment(1);
        }
        hit
    }

    /// Stores a value, replacing any previous entry for the key.
    ///
    /// A TTL too large to add to the current instant never expires.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = CacheEntry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.write().put(key.into(), entry);
    }

    /// Removes a key. Returns true when something was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.write().pop(key).is_some()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Removes every key containing `pattern`, returning how many were removed.
    ///
    /// Keys start with the connection id, so passing one drops every entry
    /// cached for that connection.
    pub fn clear_matching(&self, pattern: &str) -> usize {
        let mut entries = self.write();
        let matched: Vec<String> = entries
            .iter()
            .filter(|(k, _)| k.contains(pattern))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &matched {
            entries.pop(key);
        }
        tracing::debug!(pattern, removed = matched.len(), "Cleared matching cache entries");
        matched.len()
    }

    /// Returns true when the key is present and not expired.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.peek(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Removes every expired entry, returning how many were purged.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        if !expired.is_empty() {
            tracing::debug!(purged = expired.len(), "Purged expired cache entries");
        }
        expired.len()
    }

    /// Live keys, most recently used first.
    ///
    /// Expired entries are purged before enumerating.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.cleanup_expired();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Number of stored entries, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for SchemaCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}
