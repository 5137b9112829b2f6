//! Run-scoped memo for upstream API calls
//!
//! Values are keyed by operation name (plus parameters) and never evicted.
//! Each key has its own async lock, so concurrent callers for the same key
//! collapse into a single upstream fetch while unrelated keys never contend.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;

type CachedValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct Cache {
    values: RwLock<HashMap<String, CachedValue>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("len", &self.len()).finish()
    }
}

/// Exclusive hold on one cache key, released when dropped
#[must_use = "dropping the guard releases the key immediately"]
pub struct CacheGuard {
    key: String,
    _lock: OwnedMutexGuard<()>,
}

impl CacheGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-locking read. A value stored with another type reads as absent.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned().and_then(|v| v.downcast::<T>().ok())
    }

    /// Wait for the key's lock, then read it.
    ///
    /// On a miss the caller is expected to fetch and [`put`](Self::put)
    /// before dropping the guard; callers queued on the same key then see
    /// the stored value.
    pub async fn get_and_lock<T: Any + Send + Sync>(
        &self,
        key: &str,
    ) -> (Option<Arc<T>>, CacheGuard) {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        let value = self.get(key);
        (
            value,
            CacheGuard {
                key: key.to_string(),
                _lock: guard,
            },
        )
    }

    pub fn unlock(&self, guard: CacheGuard) {
        drop(guard);
    }

    pub fn put<T: Any + Send + Sync>(&self, key: &str, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.clone() as CachedValue);
        value
    }

    /// Single-flight fetch. Errors are returned as is and not cached.
    pub async fn get_or_fetch<T, E, F, Fut>(&self, key: &str, fetch: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let (cached, guard) = self.get_and_lock::<T>(key).await;
        if let Some(value) = cached {
            tracing::debug!("Cache hit for {}", key);
            return Ok(value);
        }

        let value = fetch().await?;
        let value = self.put(key, value);
        self.unlock(guard);
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.values.read().map(|v| v.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
