//! Per-connection operation lock.
//!
//! Every connection id maps to one async mutex, created on first use.
//! Waiters are served in arrival order, so two operations against the same
//! connection run in acquisition order and never interleave. Different ids
//! never contend.

use crate::models::ConnectionId;
use crate::{Error, Result, acquire_lock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Map of connection id to its mutual-exclusion handle.
#[derive(Debug, Default)]
pub struct OperationLock {
    locks: Mutex<HashMap<ConnectionId, Arc<AsyncMutex<()>>>>,
}

/// Exclusive hold on one connection. Dropping it releases the lock.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct OperationGuard {
    connection_id: ConnectionId,
    acquired_at: Instant,
    _guard: OwnedMutexGuard<()>,
}

impl OperationGuard {
    /// Connection this guard holds.
    #[must_use]
    pub const fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Releases the lock explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        tracing::trace!(
            connection_id = %self.connection_id,
            held_ms = self.acquired_at.elapsed().as_millis(),
            "Released operation lock"
        );
    }
}

impl OperationLock {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, connection_id: &ConnectionId) -> Arc<AsyncMutex<()>> {
        let mut locks = acquire_lock(&self.locks);
        Arc::clone(
            locks
                .entry(connection_id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Returns true while an operation holds the connection.
    ///
    /// Read-only; use [`try_acquire`](Self::try_acquire) to check
    /// and take the lock in one step.
    #[must_use]
    pub fn is_locked(&self, connection_id: &ConnectionId) -> bool {
        acquire_lock(&self.locks)
            .get(connection_id)
            .is_some_and(|m| m.try_lock().is_err())
    }

    /// Waits for the connection, in arrival order.
    pub async fn acquire(&self, connection_id: &ConnectionId) -> OperationGuard {
        let handle = self.handle(connection_id);
        let start = Instant::now();
        let guard = handle.lock_owned().await;
        let waited = start.elapsed();
        metrics::histogram!("dbkit_lock_wait_ms").record(waited.as_secs_f64() * 1000.0);
        tracing::trace!(
            connection_id = %connection_id,
            wait_ms = waited.as_millis(),
            "Acquired operation lock"
        );
        OperationGuard {
            connection_id: connection_id.clone(),
            acquired_at: Instant::now(),
            _guard: guard,
        }
    }

    /// Takes the lock only if it is free right now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] when another operation holds the connection
    /// or is already queued for it.
    pub fn try_acquire(&self, connection_id: &ConnectionId) -> Result<OperationGuard> {
        let handle = self.handle(connection_id);
        handle.try_lock_owned().map_or_else(
            |_| {
                metrics::counter!("dbkit_lock_busy_total").increment(1);
                tracing::debug!(connection_id = %connection_id, "Connection busy");
                Err(Error::Busy(connection_id.to_string()))
            },
            |guard| {
                Ok(OperationGuard {
                    connection_id: connection_id.clone(),
                    acquired_at: Instant::now(),
                    _guard: guard,
                })
            },
        )
    }

    /// Forgets the lock of a disconnected connection.
    ///
    /// Returns `false`, leaving the entry in place, while any operation holds
    /// or waits on the lock. An unknown id is already clean.
    pub fn cleanup(&self, connection_id: &ConnectionId) -> bool {
        let mut locks = acquire_lock(&self.locks);
        let Some(handle) = locks.get(connection_id) else {
            return true;
        };
        // The map's own reference is the only one when nobody holds or waits.
        if Arc::strong_count(handle) == 1 && handle.try_lock().is_ok() {
            locks.remove(connection_id);
            tracing::debug!(connection_id = %connection_id, "Removed operation lock");
            true
        } else {
            false
        }
    }

    /// Number of connection ids with a lock entry.
    #[must_use]
    pub fn tracked(&self) -> usize {
        acquire_lock(&self.locks).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(s: &str) -> ConnectionId {
        ConnectionId::new(s)
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let lock = OperationLock::new();
        assert!(!lock.is_locked(&id("a")));
        let guard = lock.acquire(&id("a")).await;
        assert!(lock.is_locked(&id("a")));
        assert_eq!(guard.connection_id().as_str(), "a");
        guard.release();
        assert!(!lock.is_locked(&id("a")));
    }

    #[tokio::test]
    async fn test_try_acquire_reports_busy() {
        let lock = OperationLock::new();
        let _held = lock.acquire(&id("a")).await;
        let err = lock.try_acquire(&id("a")).unwrap_err();
        assert!(matches!(err, Error::Busy(ref c) if c == "a"));
        assert!(lock.try_acquire(&id("b")).is_ok());
    }

    #[tokio::test]
    async fn test_waiters_run_in_arrival_order() {
        let lock = Arc::new(OperationLock::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = lock.acquire(&id("a")).await;

        let mut handles = Vec::new();
        for n in 0..5 {
            let lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire(&id("a")).await;
                order.lock().unwrap().push(n);
            }));
            // Let each task enqueue before the next is spawned.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cleanup_refuses_while_held() {
        let lock = OperationLock::new();
        let guard = lock.acquire(&id("a")).await;
        assert!(!lock.cleanup(&id("a")));
        assert_eq!(lock.tracked(), 1);
        drop(guard);
        assert!(lock.cleanup(&id("a")));
        assert_eq!(lock.tracked(), 0);
        assert!(lock.cleanup(&id("never-used")));
    }

    #[tokio::test]
    async fn test_cleanup_refuses_while_waiting() {
        let lock = Arc::new(OperationLock::new());
        let guard = lock.acquire(&id("a")).await;
        let waiter = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                let _g = lock.acquire(&id("a")).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!lock.cleanup(&id("a")));
        drop(guard);
        waiter.await.unwrap();
        assert!(lock.cleanup(&id("a")));
    }

    #[test]
    fn test_queued_acquire_wakes_on_release() {
        let lock = OperationLock::new();
        let held = tokio_test::block_on(lock.acquire(&id("a")));
        let target = id("a");
        let mut waiter = tokio_test::task::spawn(lock.acquire(&target));
        tokio_test::assert_pending!(waiter.poll());
        assert!(lock.try_acquire(&id("a")).is_err());

        drop(held);
        assert!(waiter.is_woken());
        let guard = tokio_test::assert_ready!(waiter.poll());
        assert_eq!(guard.connection_id().as_str(), "a");
    }
}
