//! LRU cache layer for object backends.
//!
//! Objects are immutable, so a cached entry never goes stale: the cache
//! only has to bound its own memory.

use crate::traits::ObjectBackend;
use crate::{Object, ObjectHeader, ObjectId, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Configuration for the cache layer.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of objects to cache.
    pub max_objects: usize,
    /// Maximum total payload size in bytes.
    pub max_size_bytes: usize,
    /// Whether to cache on write (write-through).
    pub write_through: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_objects: 10_000,
            max_size_bytes: 256 * 1024 * 1024, // 256 MB
            write_through: true,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of evictions.
    pub evictions: u64,
    /// Current number of cached objects.
    pub size: usize,
    /// Current memory usage in bytes.
    pub memory_bytes: usize,
}

impl CacheStats {
    /// Returns the cache hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Wraps an object backend with an LRU read cache.
pub struct CachedObjectBackend<B> {
    inner: B,
    cache: Mutex<LruCache<ObjectId, Object>>,
    current_size: AtomicU64,
    config: CacheConfig,
    metrics: CacheMetrics,
}

impl<B> CachedObjectBackend<B> {
    /// Creates a new cached backend.
    pub fn new(inner: B, config: CacheConfig) -> Self {
        let max_objects = NonZeroUsize::new(config.max_objects).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(max_objects)),
            current_size: AtomicU64::new(0),
            config,
            metrics: CacheMetrics::default(),
        }
    }

    /// Creates a cache holding at most `capacity` objects.
    pub fn with_capacity(inner: B, capacity: usize) -> Self {
        Self::new(
            inner,
            CacheConfig {
                max_objects: capacity,
                ..CacheConfig::default()
            },
        )
    }

    /// Returns the underlying backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.lock();
        CacheStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            evictions: self.metrics.evictions.load(Ordering::Relaxed),
            size: cache.len(),
            memory_bytes: self.current_size.load(Ordering::Relaxed) as usize,
        }
    }

    /// Clears the cache.
    pub fn clear(&self) {
        let mut cache = self.cache.lock();
        cache.clear();
        self.current_size.store(0, Ordering::Relaxed);
    }

    fn cache_get(&self, id: &ObjectId) -> Option<Object> {
        self.cache.lock().get(id).cloned()
    }

    fn cache_put(&self, object: &Object) {
        let size = object.data.len() as u64;
        if size > self.config.max_size_bytes as u64 {
            return;
        }

        let mut cache = self.cache.lock();
        while self.current_size.load(Ordering::Relaxed) + size > self.config.max_size_bytes as u64 {
            match cache.pop_lru() {
                Some((_, evicted)) => {
                    self.current_size
                        .fetch_sub(evicted.data.len() as u64, Ordering::Relaxed);
                    self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        // `push` hands back either the replaced entry or the LRU entry evicted
        // for capacity.
        if let Some((_, old)) = cache.push(object.id, object.clone()) {
            self.current_size
                .fetch_sub(old.data.len() as u64, Ordering::Relaxed);
            if old.id != object.id {
                self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.current_size.fetch_add(size, Ordering::Relaxed);
    }
}

impl<B: ObjectBackend> ObjectBackend for CachedObjectBackend<B> {
    fn exists(&self, id: &ObjectId) -> Result<bool> {
        if self.cache.lock().contains(id) {
            return Ok(true);
        }
        self.inner.exists(id)
    }

    fn read(&self, id: &ObjectId) -> Result<Option<Object>> {
        if let Some(object) = self.cache_get(id) {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(object));
        }
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);

        let result = self.inner.read(id)?;
        // Only cache content that matches its key; corrupt reads must keep
        // surfacing from the backend.
        if let Some(object) = result.as_ref().filter(|object| object.id == *id) {
            self.cache_put(object);
        }
        Ok(result)
    }

    fn read_header(&self, id: &ObjectId) -> Result<Option<ObjectHeader>> {
        if let Some(object) = self.cache.lock().peek(id) {
            return Ok(Some(object.header()));
        }
        self.inner.read_header(id)
    }

    fn write(&self, object: &Object) -> Result<ObjectId> {
        let id = self.inner.write(object)?;
        if self.config.write_through {
            self.cache_put(object);
        }
        Ok(id)
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    #[test]
    fn test_cache_hit_miss() {
        let cached = CachedObjectBackend::new(
            MemoryBackend::new(),
            CacheConfig {
                write_through: false,
                ..CacheConfig::default()
            },
        );
        let obj = Object::blob(b"cached".to_vec());
        let id = cached.write(&obj).unwrap();

        cached.read(&id).unwrap();
        cached.read(&id).unwrap();

        let stats = cached.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size, 1);
        assert!((stats.hit_ratio() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_write_through() {
        let cached = CachedObjectBackend::with_capacity(MemoryBackend::new(), 10);
        let obj = Object::blob(b"write through".to_vec());
        let id = cached.write(&obj).unwrap();

        assert_eq!(cached.read(&id).unwrap().unwrap(), obj);
        assert_eq!(cached.stats().hits, 1);
        assert!(cached.inner().exists(&id).unwrap());
    }

    #[test]
    fn test_eviction_by_count() {
        let cached = CachedObjectBackend::with_capacity(MemoryBackend::new(), 2);
        for i in 0..5 {
            cached
                .write(&Object::blob(format!("blob-{i}").into_bytes()))
                .unwrap();
        }
        let stats = cached.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.evictions, 3);
        assert_eq!(cached.inner().len(), 5);
    }

    #[test]
    fn test_eviction_by_size() {
        let cached = CachedObjectBackend::new(
            MemoryBackend::new(),
            CacheConfig {
                max_objects: 100,
                max_size_bytes: 10,
                write_through: true,
            },
        );
        cached.write(&Object::blob(vec![1u8; 6])).unwrap();
        cached.write(&Object::blob(vec![2u8; 6])).unwrap();
        cached.write(&Object::blob(vec![3u8; 64])).unwrap();

        let stats = cached.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.memory_bytes, 6);
    }

    #[test]
    fn test_header_and_exists() {
        let cached = CachedObjectBackend::with_capacity(MemoryBackend::new(), 4);
        let obj = Object::blob(b"header".to_vec());
        let id = cached.write(&obj).unwrap();

        assert!(cached.exists(&id).unwrap());
        assert_eq!(cached.read_header(&id).unwrap().unwrap().size, 6);

        cached.clear();
        assert_eq!(cached.stats().size, 0);
        assert!(cached.exists(&id).unwrap());
        assert!(!cached.exists(&ObjectId::zero()).unwrap());
    }
}
