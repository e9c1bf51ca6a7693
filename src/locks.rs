//! Per-key async mutexes.
//!
//! Operations on the same key (a site id) serialize; operations on different
//! keys never contend beyond the brief map lookup.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.inner
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }

    /// Exclusive access to `key` if nobody holds it right now.
    pub fn try_lock(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        self.entry(key).try_lock_owned().ok()
    }

    /// Drop the entry for `key` once it is no longer in use.
    pub fn forget(&self, key: &str) {
        let mut map = self.inner.lock();
        if let Some(lock) = map.get(key) {
            // Only the map holds it: nobody is waiting.
            if Arc::strong_count(lock) == 1 {
                map.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = Arc::new(KeyedLocks::new());
        let active = Arc::new(AtomicU32::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("site-a").await;
                assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        assert!(locks.try_lock("b").is_some());
        assert!(locks.try_lock("a").is_none());
    }

    #[tokio::test]
    async fn forget_keeps_held_entries() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("a").await;
        locks.forget("a");
        assert_eq!(locks.len(), 1);
        drop(guard);
        locks.forget("a");
        assert_eq!(locks.len(), 0);
    }
}
