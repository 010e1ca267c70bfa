use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};

use crate::archive::ArchiveContainer;
use crate::error::Result;
use crate::providers::ProviderRegistry;
use crate::source::ByteSource;

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// In-memory cache of open containers.
///
/// Keyed by [`ByteSource::id`]. A cached container keeps its entry tree, and
/// checks it against the source's modification time on every listing, so a
/// hit never serves stale entries.
pub struct ContainerCache {
    /// LRU cache mapping source ids to open containers
    cache: Arc<RwLock<LruCache<String, Arc<ArchiveContainer>>>>,
}

impl ContainerCache {
    /// Create a new container cache with a maximum number of entries
    pub fn new(capacity: usize) -> Self {
        let cache = LruCache::new(NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY));
        ContainerCache {
            cache: Arc::new(RwLock::new(cache)),
        }
    }

    /// Get a container from the cache
    pub fn get(&self, key: &str) -> Option<Arc<ArchiveContainer>> {
        let mut cache = self.cache.write().ok()?;
        cache.get(key).cloned()
    }

    /// Put a container into the cache
    pub fn put(&self, key: String, container: Arc<ArchiveContainer>) {
        if let Ok(mut cache) = self.cache.write() {
            cache.put(key, container);
        }
    }

    /// The cached container for `source`, opening one through `registry` on a
    /// miss
    pub fn get_or_open(
        &self,
        registry: &ProviderRegistry,
        source: Arc<dyn ByteSource>,
    ) -> Result<Arc<ArchiveContainer>> {
        let key = source.id();
        if let Some(container) = self.get(&key) {
            tracing::trace!("container cache hit for {key}");
            return Ok(container);
        }
        let container = Arc::new(registry.open(source)?);
        self.put(key, Arc::clone(&container));
        Ok(container)
    }

    /// Drop the container for one source
    pub fn invalidate(&self, key: &str) {
        if let Ok(mut cache) = self.cache.write() {
            cache.pop(key);
        }
    }

    /// Clear the cache
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    /// Get cache statistics
    pub fn len(&self) -> usize {
        self.cache.read().ok().map(|c| c.len()).unwrap_or(0)
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ContainerCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY.get())
    }
}

impl Clone for ContainerCache {
    fn clone(&self) -> Self {
        ContainerCache {
            cache: Arc::clone(&self.cache),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    #[test]
    fn test_get_or_open_reuses_container() {
        let cache = ContainerCache::new(4);
        let registry = ProviderRegistry::new();
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::empty("a.zip"));

        let first = cache.get_or_open(&registry, Arc::clone(&source)).unwrap();
        let second = cache.get_or_open(&registry, Arc::clone(&source)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        cache.invalidate(&source.id());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ContainerCache::new(1);
        let registry = ProviderRegistry::new();
        let a: Arc<dyn ByteSource> = Arc::new(MemorySource::empty("a.zip"));
        let b: Arc<dyn ByteSource> = Arc::new(MemorySource::empty("b.zip"));
        cache.get_or_open(&registry, Arc::clone(&a)).unwrap();
        cache.get_or_open(&registry, Arc::clone(&b)).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&a.id()).is_none());
        assert!(cache.get(&b.id()).is_some());
    }
}
