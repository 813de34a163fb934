//! Reference-counted resource cache.
//!
//! [`ResourceCache`] maps a 64-bit key to a shared value. A miss runs the
//! injected loader outside the cache lock; a release that drops the last
//! reference runs the injected evictor. Both the page store and the data
//! manager build one of these with their own loader/evictor pair.
//!
//! Loads and evictions for one key are single-flight: while either is in
//! progress the key is marked pending and any other caller asking for the
//! same key parks on that key's condition variable, then re-checks the cache
//! once woken. Callers for other keys are never blocked by a slow load.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::storage::error::{StorageError, StorageResult};

/// Produces the value for a key on a cache miss.
pub type Loader<T> = Box<dyn Fn(u64) -> StorageResult<T> + Send + Sync>;

/// Called once a value leaves the cache.
pub type Evictor<T> = Box<dyn Fn(&T) -> StorageResult<()> + Send + Sync>;

struct Slot<T> {
    value: Arc<T>,
    references: usize,
}

/// Wakes the callers waiting on one in-flight load or eviction.
struct Pending {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Pending {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    fn finish(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }
}

struct CacheState<T> {
    entries: HashMap<u64, Slot<T>>,
    pending: HashMap<u64, Arc<Pending>>,
    /// Slots in use, including reservations for in-flight loads.
    reserved: usize,
}

pub struct ResourceCache<T> {
    state: Mutex<CacheState<T>>,
    /// Maximum number of slots; 0 means unbounded.
    capacity: usize,
    loader: Loader<T>,
    evictor: Evictor<T>,
}

impl<T> ResourceCache<T> {
    pub fn new(capacity: usize, loader: Loader<T>, evictor: Evictor<T>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                pending: HashMap::new(),
                reserved: 0,
            }),
            capacity,
            loader,
            evictor,
        }
    }

    /// Returns the value for `key`, loading it on a miss.
    ///
    /// Every successful call must be paired with a [`release`](Self::release).
    pub fn acquire(&self, key: u64) -> StorageResult<Arc<T>> {
        let pending = loop {
            let mut state = self.state.lock();

            if let Some(pending) = state.pending.get(&key).cloned() {
                drop(state);
                pending.wait();
                continue;
            }

            if let Some(slot) = state.entries.get_mut(&key) {
                slot.references += 1;
                return Ok(Arc::clone(&slot.value));
            }

            if self.capacity > 0 && state.reserved >= self.capacity {
                return Err(StorageError::CacheExhausted { key });
            }

            state.reserved += 1;
            let pending = Arc::new(Pending::new());
            state.pending.insert(key, Arc::clone(&pending));
            break pending;
        };

        let loaded = (self.loader)(key);

        let mut state = self.state.lock();
        state.pending.remove(&key);
        let result = match loaded {
            Ok(value) => {
                let value = Arc::new(value);
                state.entries.insert(
                    key,
                    Slot {
                        value: Arc::clone(&value),
                        references: 1,
                    },
                );
                Ok(value)
            }
            Err(e) => {
                state.reserved -= 1;
                Err(e)
            }
        };
        drop(state);
        pending.finish();

        result
    }

    /// Drops one reference to `key`, evicting the value when none remain.
    ///
    /// Releasing a key that is not cached is a caller bug; it is logged and
    /// otherwise ignored.
    pub fn release(&self, key: u64) -> StorageResult<()> {
        let (slot, pending) = {
            let mut state = self.state.lock();
            match state.entries.get_mut(&key) {
                None => {
                    warn!("release of uncached key {}", key);
                    return Ok(());
                }
                Some(slot) if slot.references > 1 => {
                    slot.references -= 1;
                    return Ok(());
                }
                Some(_) => {}
            }
            let Some(slot) = state.entries.remove(&key) else {
                return Ok(());
            };
            let pending = Arc::new(Pending::new());
            state.pending.insert(key, Arc::clone(&pending));
            (slot, pending)
        };

        let evicted = (self.evictor)(&slot.value);

        let mut state = self.state.lock();
        state.pending.remove(&key);
        state.reserved -= 1;
        drop(state);
        pending.finish();

        evicted
    }

    /// Evicts every cached value regardless of outstanding references.
    ///
    /// Returns the first evictor failure after attempting all of them.
    pub fn close(&self) -> StorageResult<()> {
        let drained: Vec<(u64, Slot<T>)> = {
            let mut state = self.state.lock();
            let drained: Vec<_> = state.entries.drain().collect();
            state.reserved -= drained.len();
            drained
        };

        let mut first_error = None;
        for (key, slot) in drained {
            if slot.references > 1 {
                debug!(
                    "closing cache entry {} with {} outstanding references",
                    key, slot.references
                );
            }
            if let Err(e) = (self.evictor)(&slot.value) {
                warn!("eviction of {} failed during close: {}", key, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Number of slots currently reserved, loaded or loading.
    pub fn reserved(&self) -> usize {
        self.state.lock().reserved
    }

    /// Reference count of a cached key, `None` if it is not cached.
    pub fn references(&self, key: u64) -> Option<usize> {
        self.state.lock().entries.get(&key).map(|slot| slot.references)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn counting_cache(capacity: usize) -> (ResourceCache<u64>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let evictions = Arc::new(AtomicUsize::new(0));
        let l = Arc::clone(&loads);
        let e = Arc::clone(&evictions);
        let cache = ResourceCache::new(
            capacity,
            Box::new(move |key: u64| -> StorageResult<u64> {
                l.fetch_add(1, Ordering::SeqCst);
                Ok(key * 10)
            }),
            Box::new(move |_: &u64| -> StorageResult<()> {
                e.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        (cache, loads, evictions)
    }

    #[test]
    fn test_hit_after_miss() {
        let (cache, loads, _) = counting_cache(0);

        assert_eq!(*cache.acquire(4).unwrap(), 40);
        assert_eq!(*cache.acquire(4).unwrap(), 40);

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.references(4), Some(2));
    }

    #[test]
    fn test_evict_on_last_release() {
        let (cache, _, evictions) = counting_cache(0);

        cache.acquire(1).unwrap();
        cache.acquire(1).unwrap();
        cache.release(1).unwrap();
        assert_eq!(evictions.load(Ordering::SeqCst), 0);
        assert_eq!(cache.references(1), Some(1));

        cache.release(1).unwrap();
        assert_eq!(evictions.load(Ordering::SeqCst), 1);
        assert_eq!(cache.references(1), None);
        assert_eq!(cache.reserved(), 0);
    }

    #[test]
    fn test_capacity_exhausted() {
        let (cache, loads, _) = counting_cache(2);

        cache.acquire(1).unwrap();
        cache.acquire(2).unwrap();
        let err = cache.acquire(3).unwrap_err();
        assert!(matches!(err, StorageError::CacheExhausted { key: 3 }));
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        // Hits do not need a free slot.
        cache.acquire(1).unwrap();

        cache.release(2).unwrap();
        assert_eq!(*cache.acquire(3).unwrap(), 30);
    }

    #[test]
    fn test_loader_failure_rolls_back() {
        let cache: ResourceCache<u64> = ResourceCache::new(
            1,
            Box::new(|key: u64| -> StorageResult<u64> {
                if key == 13 {
                    Err(StorageError::PageNotFound(13))
                } else {
                    Ok(key)
                }
            }),
            Box::new(|_: &u64| -> StorageResult<()> { Ok(()) }),
        );

        assert!(matches!(
            cache.acquire(13),
            Err(StorageError::PageNotFound(13))
        ));
        assert_eq!(cache.reserved(), 0);
        assert_eq!(*cache.acquire(5).unwrap(), 5);
    }

    #[test]
    fn test_release_unknown_key_is_ignored() {
        let (cache, _, evictions) = counting_cache(0);
        cache.release(99).unwrap();
        assert_eq!(evictions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_close_evicts_everything() {
        let (cache, _, evictions) = counting_cache(0);

        cache.acquire(1).unwrap();
        cache.acquire(2).unwrap();
        cache.acquire(2).unwrap();
        cache.close().unwrap();

        assert_eq!(evictions.load(Ordering::SeqCst), 2);
        assert_eq!(cache.reserved(), 0);
        assert_eq!(cache.references(2), None);
    }

    #[test]
    fn test_single_flight_load() {
        let loads = Arc::new(AtomicUsize::new(0));
        let l = Arc::clone(&loads);
        let cache: Arc<ResourceCache<u64>> = Arc::new(ResourceCache::new(
            0,
            Box::new(move |key: u64| -> StorageResult<u64> {
                l.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                Ok(key + 1)
            }),
            Box::new(|_: &u64| -> StorageResult<()> { Ok(()) }),
        ));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || *cache.acquire(7).unwrap())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 8);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.references(7), Some(16));

        for _ in 0..16 {
            cache.release(7).unwrap();
        }
        assert_eq!(cache.references(7), None);
        assert_eq!(cache.reserved(), 0);
    }

    #[test]
    fn test_waiter_sees_failed_load_then_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        let cache: Arc<ResourceCache<u64>> = Arc::new(ResourceCache::new(
            0,
            Box::new(move |key: u64| -> StorageResult<u64> {
                let n = a.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(30));
                if n == 0 {
                    Err(StorageError::PageNotFound(key as u32))
                } else {
                    Ok(key)
                }
            }),
            Box::new(|_: &u64| -> StorageResult<()> { Ok(()) }),
        ));

        let first = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.acquire(3).is_err())
        };
        thread::sleep(Duration::from_millis(5));
        let second = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.acquire(3).map(|v| *v).ok())
        };

        assert!(first.join().unwrap());
        assert_eq!(second.join().unwrap(), Some(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_loads_of_different_keys_do_not_block_each_other() {
        let cache: Arc<ResourceCache<u64>> = Arc::new(ResourceCache::new(
            0,
            Box::new(|key: u64| -> StorageResult<u64> {
                if key == 1 {
                    thread::sleep(Duration::from_millis(200));
                }
                Ok(key)
            }),
            Box::new(|_: &u64| -> StorageResult<()> { Ok(()) }),
        ));

        let slow = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || *cache.acquire(1).unwrap())
        };
        thread::sleep(Duration::from_millis(10));
        let started = std::time::Instant::now();
        assert_eq!(*cache.acquire(2).unwrap(), 2);
        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(slow.join().unwrap(), 1);
    }
}
