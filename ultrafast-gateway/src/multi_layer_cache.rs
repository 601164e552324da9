//! # Bounded memory cache (L2) and memory/KV chain (L3)
//!
//! L2 is a single-process LRU bounded by both entry count and an
//! approximate total byte budget — two independent eviction pressures,
//! either of which can trigger a pop. L3 chains L2 in front of the shared
//! KV client (`crate::kv`): a miss in memory checks KV and promotes the
//! value back into memory on a hit, so a value fetched once by any node
//! stays warm locally afterward.

use crate::kv::KvClient;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Entry {
    data: String,
    size_bytes: usize,
    expires_at: Instant,
}

/// L2: an in-process LRU cache bounded by entry count and total byte size.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Entry>>,
    max_bytes: usize,
    current_bytes: AtomicUsize,
}

impl MemoryCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            max_bytes,
            current_bytes: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("memory cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.data.clone()),
            Some(_) => {
                if let Some(stale) = entries.pop(key) {
                    self.current_bytes
                        .fetch_sub(stale.size_bytes, Ordering::SeqCst);
                }
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: String, ttl: Duration) {
        let size_bytes = value.len();
        let mut entries = self.entries.lock().expect("memory cache lock poisoned");

        if let Some(old) = entries.put(
            key.to_string(),
            Entry {
                data: value,
                size_bytes,
                expires_at: Instant::now() + ttl,
            },
        ) {
            self.current_bytes.fetch_sub(old.size_bytes, Ordering::SeqCst);
        }
        self.current_bytes.fetch_add(size_bytes, Ordering::SeqCst);

        while self.current_bytes.load(Ordering::SeqCst) > self.max_bytes {
            match entries.pop_lru() {
                Some((_, evicted)) => {
                    self.current_bytes
                        .fetch_sub(evicted.size_bytes, Ordering::SeqCst);
                }
                None => break,
            }
        }
    }

    pub fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().expect("memory cache lock poisoned");
        if let Some(old) = entries.pop(key) {
            self.current_bytes.fetch_sub(old.size_bytes, Ordering::SeqCst);
        }
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().expect("memory cache lock poisoned");
        entries.clear();
        self.current_bytes.store(0, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("memory cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.current_bytes.load(Ordering::SeqCst)
    }
}

/// L3: memory (L2) in front of the shared KV client, with write-through
/// on `set` and promotion back into memory on a remote hit.
pub struct MultiLayerCache {
    memory: Arc<MemoryCache>,
    kv: Arc<dyn KvClient>,
    default_ttl: Duration,
}

impl MultiLayerCache {
    pub fn new(memory: Arc<MemoryCache>, kv: Arc<dyn KvClient>, default_ttl: Duration) -> Self {
        Self {
            memory,
            kv,
            default_ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.memory.get(key) {
            return Some(value);
        }
        match self.kv.get(key).await {
            Ok(Some(value)) => {
                self.memory.set(key, value.clone(), self.default_ttl);
                Some(value)
            }
            _ => None,
        }
    }

    pub async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.memory.set(key, value.clone(), ttl);
        if let Err(e) = self.kv.set(key, &value, Some(ttl)).await {
            tracing::warn!("shared KV write failed for {key}: {e}");
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.memory.remove(key);
        let _ = self.kv.del(key).await;
    }

    pub fn memory_stats(&self) -> (usize, usize) {
        (self.memory.len(), self.memory.total_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;

    #[test]
    fn memory_cache_evicts_by_byte_budget() {
        let cache = MemoryCache::new(100, 10);
        cache.set("a", "12345".to_string(), Duration::from_secs(60));
        cache.set("b", "67890".to_string(), Duration::from_secs(60));
        assert!(cache.total_bytes() <= 10);
        cache.set("c", "abcde".to_string(), Duration::from_secs(60));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("c").as_deref(), Some("abcde"));
    }

    #[test]
    fn memory_cache_expires_entries() {
        let cache = MemoryCache::new(10, 1000);
        cache.set("a", "value".to_string(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("a").is_none());
    }

    #[tokio::test]
    async fn multi_layer_cache_promotes_kv_hit_to_memory() {
        let kv = InMemoryKv::new();
        kv.set("k", "remote-value", None).await.unwrap();
        let memory = Arc::new(MemoryCache::new(10, 10_000));
        let cache = MultiLayerCache::new(memory.clone(), kv, Duration::from_secs(60));

        assert_eq!(cache.get("k").await.as_deref(), Some("remote-value"));
        assert_eq!(memory.get("k").as_deref(), Some("remote-value"));
    }

    #[tokio::test]
    async fn multi_layer_cache_set_is_write_through() {
        let kv = InMemoryKv::new();
        let memory = Arc::new(MemoryCache::new(10, 10_000));
        let cache = MultiLayerCache::new(memory, kv.clone(), Duration::from_secs(60));

        cache.set("k", "value".to_string(), None).await;
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("value"));
    }
}
