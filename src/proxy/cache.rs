use std::any::{Any, TypeId};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use log::debug;
use lru::LruCache;
use once_cell::sync::OnceCell;
use serde::Serialize;
use crate::core::{ContextError, Result};
use crate::proxy::ProxyType;

type ErasedProxyType = Arc<dyn Any + Send + Sync>;

/// Load-once cell shared by every caller asking for the same entity type.
type Slot = Arc<OnceCell<std::result::Result<ErasedProxyType, ContextError>>>;

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub generations: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Bounded LRU of proxy types keyed by entity `TypeId`.
///
/// Generation for a given key runs at most once while its entry is cached;
/// concurrent callers block on the entry's cell and share the result,
/// including a failed one. Evicted entries are rebuilt on the next request.
/// Bound proxies hold their own `Arc` and are unaffected by eviction.
pub struct ProxyTypeCache {
    slots: Mutex<LruCache<TypeId, Slot>>,
    capacity: NonZeroUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    generations: AtomicU64,
    evictions: AtomicU64,
}

impl ProxyTypeCache {
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            ContextError::ConfigError("proxy cache capacity must be greater than zero".to_string())
        })?;
        Ok(Self {
            slots: Mutex::new(LruCache::new(capacity)),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            generations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    fn slot_for(&self, key: TypeId) -> Result<Slot> {
        let mut slots = self.slots.lock()?;
        if let Some(slot) = slots.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(slot));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let slot: Slot = Arc::new(OnceCell::new());
        if slots.push(key, Arc::clone(&slot)).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(slot)
    }

    /// Returns the cached proxy type for `T`, running `generate` if absent.
    pub fn get_or_generate<T, F>(&self, generate: F) -> Result<Arc<ProxyType<T>>>
    where
        T: 'static,
        F: FnOnce() -> Result<ProxyType<T>>,
    {
        let slot = self.slot_for(TypeId::of::<T>())?;

        // The map lock is released; only callers of this key wait here.
        let entry = slot.get_or_init(|| {
            self.generations.fetch_add(1, Ordering::Relaxed);
            generate().map(|proxy_type| {
                debug!("Cached proxy type for '{}'", proxy_type.entity_name());
                Arc::new(proxy_type) as ErasedProxyType
            })
        });

        match entry {
            Ok(erased) => Arc::clone(erased).downcast::<ProxyType<T>>().map_err(|_| {
                ContextError::generation(
                    std::any::type_name::<T>(),
                    "cached proxy type does not match the requested entity",
                )
            }),
            Err(err) => Err(err.clone()),
        }
    }

    pub fn contains<T: 'static>(&self) -> Result<bool> {
        let slots = self.slots.lock()?;
        Ok(slots.contains(&TypeId::of::<T>()))
    }

    /// Drops the entry for `T`; the next request regenerates it.
    pub fn invalidate<T: 'static>(&self) -> Result<bool> {
        let mut slots = self.slots.lock()?;
        Ok(slots.pop(&TypeId::of::<T>()).is_some())
    }

    pub fn clear(&self) -> Result<()> {
        let mut slots = self.slots.lock()?;
        slots.clear();
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let slots = self.slots.lock()?;
        Ok(slots.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            generations: self.generations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len()?,
        })
    }
}
