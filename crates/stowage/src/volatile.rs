//! Bounded in-process cache of decoded values.
//!
//! Entries are weighed by their encoded size and bounded by a byte ceiling;
//! the replacement policy is moka's. Values of different types under the
//! same key are separate entries.

use std::any::{Any, TypeId};
use std::sync::Arc;

use moka::sync::Cache;

use crate::config::ByteCeiling;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VolatileKey {
    key: String,
    type_id: TypeId,
}

impl VolatileKey {
    fn of<T: 'static>(key: &str) -> Self {
        Self {
            key: key.to_string(),
            type_id: TypeId::of::<T>(),
        }
    }
}

#[derive(Clone)]
struct VolatileEntry {
    value: Arc<dyn Any + Send + Sync>,
    cost: u32,
}

/// Volatile tier of a tiered cache service. Cheap to clone; clones share
/// entries.
#[derive(Clone)]
pub struct VolatileCache {
    inner: Option<Cache<VolatileKey, VolatileEntry>>,
    ceiling: ByteCeiling,
}

impl VolatileCache {
    pub fn new(ceiling: ByteCeiling) -> Self {
        let mut builder = Cache::builder().weigher(|_key: &VolatileKey, entry: &VolatileEntry| entry.cost);
        if let Some(limit) = ceiling.limit() {
            builder = builder.max_capacity(limit);
        }
        Self {
            inner: Some(builder.build()),
            ceiling,
        }
    }

    /// A cache that never holds anything; every probe misses.
    pub fn disabled() -> Self {
        Self {
            inner: None,
            ceiling: ByteCeiling::UNBOUNDED,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn ceiling(&self) -> ByteCeiling {
        self.ceiling
    }

    /// Probe for a `T` under `key`.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entry = self.inner.as_ref()?.get(&VolatileKey::of::<T>(key))?;
        entry.value.downcast_ref::<T>().cloned()
    }

    /// Insert `value`, weighed at `cost` bytes.
    pub fn insert<T>(&self, key: &str, value: T, cost: u64)
    where
        T: Send + Sync + 'static,
    {
        if let Some(cache) = &self.inner {
            let entry = VolatileEntry {
                value: Arc::new(value),
                cost: u32::try_from(cost).unwrap_or(u32::MAX),
            };
            cache.insert(VolatileKey::of::<T>(key), entry);
        }
    }

    pub fn remove<T: 'static>(&self, key: &str) {
        if let Some(cache) = &self.inner {
            cache.invalidate(&VolatileKey::of::<T>(key));
        }
    }

    /// Drop every entry regardless of type.
    pub fn clear(&self) {
        if let Some(cache) = &self.inner {
            cache.invalidate_all();
        }
    }

    /// Approximate number of entries.
    pub fn entry_count(&self) -> u64 {
        self.inner.as_ref().map_or(0, |cache| cache.entry_count())
    }

    /// Approximate bytes held.
    pub fn weighted_size(&self) -> u64 {
        self.inner.as_ref().map_or(0, |cache| cache.weighted_size())
    }

    /// Apply pending evictions and bookkeeping now.
    pub fn run_pending_tasks(&self) {
        if let Some(cache) = &self.inner {
            cache.run_pending_tasks();
        }
    }
}

impl Default for VolatileCache {
    fn default() -> Self {
        Self::new(ByteCeiling::UNBOUNDED)
    }
}

impl std::fmt::Debug for VolatileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolatileCache")
            .field("enabled", &self.is_enabled())
            .field("ceiling", &self.ceiling)
            .field("entries", &self.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = VolatileCache::default();
        cache.insert("greeting", "hello".to_string(), 5);

        assert_eq!(cache.get::<String>("greeting"), Some("hello".to_string()));
        assert_eq!(cache.get::<String>("missing"), None);
    }

    #[test]
    fn test_types_are_separate_entries() {
        let cache = VolatileCache::default();
        cache.insert("k", 7u32, 4);
        cache.insert("k", "seven".to_string(), 5);

        assert_eq!(cache.get::<u32>("k"), Some(7));
        assert_eq!(cache.get::<String>("k"), Some("seven".to_string()));
        assert_eq!(cache.get::<u64>("k"), None);

        cache.remove::<u32>("k");
        assert_eq!(cache.get::<u32>("k"), None);
        assert_eq!(cache.get::<String>("k"), Some("seven".to_string()));
    }

    #[test]
    fn test_clear_drops_everything() {
        let cache = VolatileCache::default();
        cache.insert("a", 1u8, 1);
        cache.insert("b", "b".to_string(), 1);

        cache.clear();

        assert_eq!(cache.get::<u8>("a"), None);
        assert_eq!(cache.get::<String>("b"), None);
    }

    #[test]
    fn test_byte_ceiling_bounds_weight() {
        let cache = VolatileCache::new(ByteCeiling::from_bytes(1_000));
        for i in 0..50 {
            cache.insert(&format!("item-{i}"), vec![0u8; 100], 100);
        }
        cache.run_pending_tasks();

        assert!(cache.weighted_size() <= 1_000);
        assert!(cache.entry_count() <= 10);
    }

    #[test]
    fn test_disabled_never_hits() {
        let cache = VolatileCache::disabled();
        cache.insert("a", 1u8, 1);

        assert!(!cache.is_enabled());
        assert_eq!(cache.get::<u8>("a"), None);
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = VolatileCache::default();
        let clone = cache.clone();
        clone.insert("shared", 3i64, 8);
        assert_eq!(cache.get::<i64>("shared"), Some(3));
    }
}
