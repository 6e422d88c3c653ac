//! Spool lock manager (C9): single-writer guarantee per entry. The
//! in-process implementation here tracks TTL'd leases in a map guarded
//! by a short critical section; a distributed implementation (SET-if-
//! absent with TTL + refresh) is a drop-in behind the same trait.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[async_trait::async_trait]
pub trait LockManager: Send + Sync {
    /// Attempt to acquire the lock for `id`; `true` on success.
    async fn try_lock(&self, id: &str) -> bool;
    async fn unlock(&self, id: &str);
    /// Reclaim locks whose TTL has elapsed without a matching `unlock`
    /// (e.g. the worker holding it crashed).
    async fn purge_orphaned_locks(&self) -> usize;
}

pub struct InMemoryLockManager {
    ttl: Duration,
    held: Mutex<HashMap<String, Instant>>,
}

impl InMemoryLockManager {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        InMemoryLockManager { ttl, held: Mutex::new(HashMap::new()) }
    }
}

#[async_trait::async_trait]
impl LockManager for InMemoryLockManager {
    async fn try_lock(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut held = self.held.lock().unwrap();
        if let Some(expires) = held.get(id) {
            if *expires > now {
                return false;
            }
        }
        held.insert(id.to_string(), now + self.ttl);
        true
    }

    async fn unlock(&self, id: &str) {
        self.held.lock().unwrap().remove(id);
    }

    async fn purge_orphaned_locks(&self) -> usize {
        let now = Instant::now();
        let mut held = self.held.lock().unwrap();
        let before = held.len();
        held.retain(|_, expires| *expires > now);
        before - held.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn second_lock_attempt_fails_until_unlocked() {
        let mgr = InMemoryLockManager::new(Duration::from_secs(60));
        assert!(mgr.try_lock("a").await);
        assert!(!mgr.try_lock("a").await);
        mgr.unlock("a").await;
        assert!(mgr.try_lock("a").await);
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let mgr = InMemoryLockManager::new(Duration::from_millis(1));
        assert!(mgr.try_lock("a").await);
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert!(mgr.try_lock("a").await);
    }

    #[tokio::test]
    async fn purge_reclaims_expired_entries() {
        let mgr = InMemoryLockManager::new(Duration::from_millis(1));
        mgr.try_lock("a").await;
        mgr.try_lock("b").await;
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert_eq!(mgr.purge_orphaned_locks().await, 2);
    }

    #[tokio::test]
    async fn independent_ids_do_not_block_each_other() {
        let mgr = InMemoryLockManager::new(Duration::from_secs(60));
        assert!(mgr.try_lock("a").await);
        assert!(mgr.try_lock("b").await);
    }
}
