//! Per-conversation lock registry.
//!
//! One exclusive lock per conversation identifier, created lazily on
//! first reference. The registry's own map is guarded by a short,
//! always-released critical section distinct from the per-conversation
//! locks it hands out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Lazily-populated table of one exclusive lock per conversation.
pub struct LockRegistry {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self { locks: RwLock::new(HashMap::new()) }
    }

    /// Return the lock for `id`, creating it if absent.
    ///
    /// Compare-and-create: when two requests race on a new id, exactly
    /// one creation wins and the other observes the winner's lock; the
    /// returned `Arc` identity is stable for a given id.
    pub async fn acquire_for(&self, id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(id) {
            return Arc::clone(lock);
        }

        let mut locks = self.locks.write().await;
        Arc::clone(
            locks
                .entry(id.to_string())
                .or_insert_with(|| {
                    tracing::debug!(thread_id = %id, "Lock created");
                    Arc::new(Mutex::new(()))
                }),
        )
    }

    /// Remove every lock whose id is not in `valid_ids`; returns the
    /// number removed.
    ///
    /// Best-effort cleanup only: callers must guarantee no request still
    /// holds an orphaned lock (the sweeper satisfies this by passing ids
    /// already absent from the session store).
    pub async fn release_orphans(&self, valid_ids: &HashSet<String>) -> usize {
        let mut locks = self.locks.write().await;
        let before = locks.len();
        locks.retain(|id, _| {
            let keep = valid_ids.contains(id);
            if !keep {
                tracing::debug!(thread_id = %id, "Orphaned lock removed");
            }
            keep
        });
        before - locks.len()
    }

    /// Number of registered locks.
    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.read().await.is_empty()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_creates_lazily() {
        let registry = LockRegistry::new();
        assert!(registry.is_empty().await);

        registry.acquire_for("t1").await;
        assert_eq!(registry.len().await, 1);

        // Second acquisition does not create a second entry
        registry.acquire_for("t1").await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_same_id_yields_same_lock_identity() {
        let registry = LockRegistry::new();
        let a = registry.acquire_for("t1").await;
        let b = registry.acquire_for("t1").await;
        let other = registry.acquire_for("t2").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn test_concurrent_acquires_no_duplicate_locks() {
        let registry = Arc::new(LockRegistry::new());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.acquire_for("race").await })
            })
            .collect();

        let mut locks = Vec::new();
        for handle in handles {
            locks.push(handle.await.unwrap());
        }

        assert_eq!(registry.len().await, 1);
        for lock in &locks[1..] {
            assert!(Arc::ptr_eq(&locks[0], lock));
        }
    }

    #[tokio::test]
    async fn test_release_orphans() {
        let registry = LockRegistry::new();
        registry.acquire_for("alive").await;
        registry.acquire_for("dead-1").await;
        registry.acquire_for("dead-2").await;

        let valid: HashSet<String> = ["alive".to_string()].into_iter().collect();
        let removed = registry.release_orphans(&valid).await;

        assert_eq!(removed, 2);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_release_orphans_keeps_valid_lock_identity() {
        let registry = LockRegistry::new();
        let before = registry.acquire_for("alive").await;

        let valid: HashSet<String> = ["alive".to_string()].into_iter().collect();
        registry.release_orphans(&valid).await;

        let after = registry.acquire_for("alive").await;
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn test_release_orphans_empty_registry() {
        let registry = LockRegistry::new();
        assert_eq!(registry.release_orphans(&HashSet::new()).await, 0);
    }
}
