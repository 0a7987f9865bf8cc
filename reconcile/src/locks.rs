//! Per-identity-key mutual exclusion.
//!
//! A reconciliation reads the store, decides, then writes. Two requests for
//! the same provider id or email must not interleave between those steps, so
//! the service holds a lock on every identity key it touches for the whole
//! read-decide-write sequence. Unrelated keys never contend.
//!
//! Keys are always acquired in sorted order, so two callers locking
//! overlapping key sets cannot deadlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

/// Async locks keyed by identity string (e.g. `provider:github:123`).
///
/// Slots are created on demand and dropped when the last guard for them is
/// released.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl KeyedLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key in `keys`, waiting for current holders.
    ///
    /// Duplicate keys are locked once.
    pub async fn acquire<I, K>(&self, keys: I) -> KeyedGuard
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort_unstable();
        keys.dedup();

        // Keys are recorded before waiting so a cancelled acquire still
        // prunes every slot it created.
        let mut held = KeyedGuard {
            locks: self.clone(),
            keys: Vec::with_capacity(keys.len()),
            guards: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            let slot = self.slot(&key);
            tracing::debug!(%key, "acquiring identity lock");
            held.keys.push(key);
            held.guards.push(slot.lock_owned().await);
        }

        held
    }

    /// Number of keys currently held or waited on.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Returns `true` if no key is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &str) -> Slot {
        Arc::clone(self.table().entry(key.to_string()).or_default())
    }

    // The table only maps keys to slots, so a poisoned guard still holds a
    // consistent map.
    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds a set of identity keys until dropped.
#[must_use = "keys are released as soon as the guard is dropped"]
pub struct KeyedGuard {
    locks: KeyedLocks,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyedGuard {
    /// Keys held by this guard, sorted.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl std::fmt::Debug for KeyedGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedGuard").field("keys", &self.keys).finish()
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.guards.clear();

        let mut table = self.locks.table();
        for key in &self.keys {
            if table.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
                table.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_slots_are_pruned_after_release() {
        let locks = KeyedLocks::new();
        {
            let guard = locks.acquire(["email:a@b.com", "provider:github:1"]).await;
            assert_eq!(guard.keys().len(), 2);
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_locked_once() {
        let locks = KeyedLocks::new();
        let guard = locks.acquire(["user:1", "user:1"]).await;
        assert_eq!(guard.keys(), ["user:1".to_string()]);
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let guard = locks.acquire(["email:a@b.com"]).await;

        let contender = locks.clone();
        let handle = tokio::spawn(async move {
            let _guard = contender.acquire(["email:a@b.com"]).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        drop(guard);
        handle.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_acquire_prunes_partially_locked_slots() {
        let locks = KeyedLocks::new();
        let holder = locks.acquire(["b"]).await;

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), locks.acquire(["a", "b"])).await;
        assert!(cancelled.is_err());
        assert_eq!(locks.len(), 1);

        drop(holder);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_disjoint_keys_do_not_contend() {
        let locks = KeyedLocks::new();
        let _first = locks.acquire(["email:a@b.com"]).await;

        let second = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(["email:c@d.com"]),
        )
        .await;
        assert!(second.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_sets_in_any_order_do_not_deadlock() {
        let locks = KeyedLocks::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let locks = locks.clone();
            handles.push(tokio::spawn(async move {
                let keys = if i % 2 == 0 { ["a", "b"] } else { ["b", "a"] };
                let _guard = locks.acquire(keys).await;
                tokio::task::yield_now().await;
            }));
        }

        let all = async {
            for handle in handles {
                handle.await.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(5), all).await.unwrap();
        assert!(locks.is_empty());
    }
}
