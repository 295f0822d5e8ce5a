//! Bounded-staleness read cache.
//!
//! Each cache has one TTL. A value older than the TTL is never returned.
//! `invalidate` drops a key immediately and bumps its generation, so a read
//! that was already in flight when the key was invalidated cannot write its
//! (pre-mutation) result back afterwards.
//!
//! Errors are never cached: [`TtlCache::get_or_fetch`] only stores `Ok`
//! values and hands upstream errors back untouched.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// A cached value and when it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() <= ttl
    }
}

#[derive(Debug)]
struct Slots<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    generations: HashMap<K, u64>,
    /// Bumped by `clear`; covers keys that were never individually invalidated.
    epoch: u64,
}

impl<K: Eq + Hash, V> Slots<K, V> {
    fn stamp(&self, key: &K) -> (u64, u64) {
        (self.epoch, self.generations.get(key).copied().unwrap_or(0))
    }
}

/// Per-key TTL cache.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    slots: RwLock<Slots<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            slots: RwLock::new(Slots {
                entries: HashMap::new(),
                generations: HashMap::new(),
                epoch: 0,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, or `None` on a miss or a stale entry.
    pub async fn get(&self, key: &K) -> Option<V> {
        let slots = self.slots.read().await;
        slots
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(self.ttl))
            .map(|entry| entry.value.clone())
    }

    /// Age of the stored entry, fresh or not.
    pub async fn age(&self, key: &K) -> Option<Duration> {
        self.slots
            .read()
            .await
            .entries
            .get(key)
            .map(|entry| entry.stored_at.elapsed())
    }

    pub async fn put(&self, key: K, value: V) {
        let mut slots = self.slots.write().await;
        slots.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop `key`. Returns whether an entry was present.
    pub async fn invalidate(&self, key: &K) -> bool {
        let mut slots = self.slots.write().await;
        *slots.generations.entry(key.clone()).or_insert(0) += 1;
        let removed = slots.entries.remove(key).is_some();
        if removed {
            tracing::trace!("Cache '{}' invalidated {:?}", self.name, key);
        }
        removed
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        let mut slots = self.slots.write().await;
        slots.epoch += 1;
        slots.entries.clear();
    }

    /// Store `value` only if `key` was not invalidated since `stamp` was taken.
    async fn put_if_current(&self, key: K, value: V, stamp: (u64, u64)) -> bool {
        let mut slots = self.slots.write().await;
        if slots.stamp(&key) != stamp {
            tracing::trace!(
                "Cache '{}' dropped result for {:?}: invalidated during fetch",
                self.name,
                key
            );
            return false;
        }
        slots.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
        true
    }

    /// Return the cached value, or run `fetch` and cache its `Ok` result.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            tracing::trace!("Cache '{}' hit {:?}", self.name, key);
            return Ok(value);
        }

        let stamp = self.slots.read().await.stamp(&key);
        let value = fetch().await?;
        self.put_if_current(key, value.clone(), stamp).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache: TtlCache<&str, u32> = TtlCache::new("test", Duration::from_secs(10));
        cache.put("k", 1).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get(&"k").await, Some(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get(&"k").await, None);
        assert!(cache.age(&"k").await.is_some());
    }

    #[tokio::test]
    async fn invalidate_forces_miss() {
        let cache: TtlCache<&str, u32> = TtlCache::new("test", Duration::from_secs(60));
        cache.put("k", 1).await;
        assert!(cache.invalidate(&"k").await);
        assert_eq!(cache.get(&"k").await, None);
        assert!(!cache.invalidate(&"k").await);
    }

    #[tokio::test]
    async fn get_or_fetch_caches_ok_values_only() {
        let cache: TtlCache<&str, u32> = TtlCache::new("test", Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let err: Result<u32, String> = cache
            .get_or_fetch("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("upstream down".to_string())
            })
            .await;
        assert_eq!(err, Err("upstream down".to_string()));

        for _ in 0..3 {
            let v: Result<u32, String> = cache
                .get_or_fetch("k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await;
            assert_eq!(v, Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidation_during_fetch_discards_result() {
        let cache: TtlCache<&str, u32> = TtlCache::new("test", Duration::from_secs(60));

        let v: Result<u32, ()> = cache
            .get_or_fetch("k", || async {
                // A mutation lands while the read is in flight.
                cache.invalidate(&"k").await;
                Ok(1)
            })
            .await;
        assert_eq!(v, Ok(1));
        assert_eq!(cache.get(&"k").await, None);
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let cache: TtlCache<u8, u8> = TtlCache::new("test", Duration::from_secs(60));
        cache.put(1, 1).await;
        cache.put(2, 2).await;
        cache.clear().await;
        assert_eq!(cache.get(&1).await, None);
        assert_eq!(cache.get(&2).await, None);
    }
}
