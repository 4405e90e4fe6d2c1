//! Per-recommendation mutual exclusion.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// One async mutex per recommendation id, created on first use and dropped
/// once nobody holds or waits for it.
#[derive(Default)]
pub struct RecommendationLocks {
    inner: Arc<LockMap>,
}

/// Exclusive access to one id. Releasing the last interest in an id removes
/// its entry.
pub struct RecommendationLock {
    guard: Option<OwnedMutexGuard<()>>,
    id: String,
    map: Arc<LockMap>,
}

impl Drop for RecommendationLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the Arc, so a count of one means the map's
        // copy is the only one left.
        self.map
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl RecommendationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`. Released when the lock drops.
    pub async fn acquire(&self, id: &str) -> RecommendationLock {
        let lock = self
            .inner
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let guard = lock.lock_owned().await;
        RecommendationLock {
            guard: Some(guard),
            id: id.to_string(),
            map: self.inner.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_is_exclusive() {
        let locks = Arc::new(RecommendationLocks::new());
        let guard = locks.acquire("a").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("a").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // The waiter keeps the entry alive past the first release.
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_ids_do_not_block() {
        let locks = RecommendationLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_entries_removed_after_release() {
        let locks = RecommendationLocks::new();
        for id in ["a", "b", "c"] {
            let _g = locks.acquire(id).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());

        let held = locks.acquire("a").await;
        {
            let _other = locks.acquire("b").await;
        }
        assert_eq!(locks.len(), 1);
        drop(held);
        assert_eq!(locks.len(), 0);
    }
}
