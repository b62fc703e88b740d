//! Per-fingerprint exclusion so identical concurrent misses render once.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::trace;

/// Keyed async locks.
///
/// Holders of the same key run one at a time; different keys never contend
/// beyond the brief map access.
#[derive(Debug, Default)]
pub struct SingleFlight {
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SingleFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `key`.
    pub async fn lock(&self, key: &str) -> FlightGuard {
        let mutex = self.get_or_create(key).await;
        let guard = mutex.lock_owned().await;
        trace!(key = %key, "Acquired single-flight lock");
        FlightGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of keys currently tracked.
    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.locks.read().await.len()
    }

    async fn get_or_create(&self, key: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(mutex) = locks.get(key) {
                return Arc::clone(mutex);
            }
        }

        let mut locks = self.locks.write().await;
        // Double-check after taking the write lock.
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// Exclusive hold on one key. Dropping it releases the key and forgets the
/// entry once nobody else references it.
pub struct FlightGuard {
    key: String,
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl std::fmt::Debug for FlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightGuard").field("key", &self.key).finish()
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Pruning is best effort; a contended map just keeps the entry until
        // the next release.
        if let Ok(mut locks) = self.locks.try_write() {
            let unused = locks
                .get(&self.key)
                .is_some_and(|mutex| Arc::strong_count(mutex) == 1);
            if unused {
                locks.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let flights = Arc::new(SingleFlight::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let flights = Arc::clone(&flights);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = flights.lock("fp").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(flights.tracked_keys().await, 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let flights = SingleFlight::new();
        let _a = flights.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), flights.lock("b")).await;
        assert!(b.is_ok());
        assert_eq!(flights.tracked_keys().await, 2);
    }

    #[tokio::test]
    async fn test_entry_pruned_after_release() {
        let flights = SingleFlight::new();
        drop(flights.lock("a").await);
        assert_eq!(flights.tracked_keys().await, 0);
    }
}
