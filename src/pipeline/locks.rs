//! Keyed critical sections.
//!
//! One async mutex per key, created on first use. Waiters on the same key
//! are served in arrival order (tokio's mutex is FIFO); different keys never
//! contend beyond the brief map lookup.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Entries idle beyond this many are pruned on the next lookup.
const PRUNE_THRESHOLD: usize = 256;

pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            if locks.len() > PRUNE_THRESHOLD {
                // Only the map holds an idle entry.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key).or_default().clone()
        };
        entry.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.lock(1u32).await;
        let waiter = {
            let locks = locks.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let _g = locks.lock(1u32).await;
                log.lock().await.push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        log.lock().await.push("first");
        drop(guard);
        waiter.await.unwrap();

        assert_eq!(*log.lock().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a".to_string()).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock("b".to_string())).await;
        assert!(b.is_ok());
        assert_eq!(locks.len().await, 2);
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = KeyedLocks::new();
        for key in 0..=PRUNE_THRESHOLD as u32 {
            drop(locks.lock(key).await);
        }
        drop(locks.lock(u32::MAX).await);
        assert_eq!(locks.len().await, 1);
    }
}
