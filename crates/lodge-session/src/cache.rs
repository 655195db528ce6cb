//! Concurrent cache with per-entry expiry and removal notifications.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::error::Result;
use crate::executor::{DispatchThread, Executor};
use crate::expiry::{Deadline, Expiry};

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// Removed by an explicit invalidation.
    Explicit,
    /// Overwritten by a new value, or moved to a new key.
    Replaced,
    /// Its deadline passed.
    Expired,
    /// Evicted to keep the cache within its capacity.
    Capacity,
    /// Reclaimed by the runtime rather than by the cache itself.
    Collected,
}

impl RemovalCause {
    /// Whether the entry was removed by the cache rather than by a caller.
    pub fn was_evicted(&self) -> bool {
        matches!(
            self,
            RemovalCause::Expired | RemovalCause::Capacity | RemovalCause::Collected
        )
    }
}

impl fmt::Display for RemovalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalCause::Explicit => write!(f, "explicit"),
            RemovalCause::Replaced => write!(f, "replaced"),
            RemovalCause::Expired => write!(f, "expired"),
            RemovalCause::Capacity => write!(f, "capacity"),
            RemovalCause::Collected => write!(f, "collected"),
        }
    }
}

/// Callback invoked once per removed entry with its key, value and cause.
pub type RemovalListener<V> = Arc<dyn Fn(String, V, RemovalCause) + Send + Sync>;

/// Entry stored in the cache.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    deadline: Deadline,
}

/// A removal recorded under the lock and dispatched after it is released.
struct Removal<V> {
    key: String,
    value: V,
    cause: RemovalCause,
}

/// Builder for [`ExpiringCache`].
pub struct CacheBuilder<V> {
    expiry: Arc<dyn Expiry<V>>,
    capacity: Option<NonZeroUsize>,
    listener: Option<RemovalListener<V>>,
    executor: Option<Arc<dyn Executor>>,
}

impl<V: Clone + Send + Sync + 'static> CacheBuilder<V> {
    /// Start a builder with the given expiry policy.
    pub fn new(expiry: impl Expiry<V> + 'static) -> Self {
        Self {
            expiry: Arc::new(expiry),
            capacity: None,
            listener: None,
            executor: None,
        }
    }

    /// Evict least recently used entries beyond `capacity`.
    pub fn max_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Register the removal listener.
    pub fn removal_listener(
        mut self,
        listener: impl Fn(String, V, RemovalCause) + Send + Sync + 'static,
    ) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Run removal notifications on `executor`.
    ///
    /// Without one, a [`DispatchThread`] is started when a listener is registered.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build the cache.
    pub fn build(self) -> Result<ExpiringCache<V>> {
        let executor: Option<Arc<dyn Executor>> = match (self.executor, &self.listener) {
            (Some(executor), _) => Some(executor),
            (None, Some(_)) => Some(Arc::new(DispatchThread::spawn()?)),
            (None, None) => None,
        };

        let lru = match self.capacity {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };

        Ok(ExpiringCache {
            inner: Mutex::new(Store {
                lru,
                earliest: None,
            }),
            expiry: self.expiry,
            capacity: self.capacity,
            listener: self.listener.zip(executor),
        })
    }
}

/// Entries guarded by the cache lock.
struct Store<V> {
    lru: LruCache<String, CacheEntry<V>>,

    /// No entry expires before this instant. `None` when no entry can expire.
    /// Removals may leave it stale but never too late.
    earliest: Option<Instant>,
}

impl<V> Store<V> {
    fn track(&mut self, deadline: Deadline) {
        if let Some(at) = deadline.instant() {
            self.earliest = Some(self.earliest.map_or(at, |earliest| earliest.min(at)));
        }
    }

    fn may_hold_expired(&self, now: Instant) -> bool {
        self.earliest.is_some_and(|at| now >= at)
    }

    /// Move every expired entry into `removals` and tighten `earliest`.
    fn drain_expired(&mut self, now: Instant, removals: &mut Vec<Removal<V>>) {
        if !self.may_hold_expired(now) {
            return;
        }

        let mut expired = Vec::new();
        let mut earliest: Option<Instant> = None;
        for (key, entry) in self.lru.iter() {
            if entry.deadline.has_passed(now) {
                expired.push(key.clone());
            } else if let Some(at) = entry.deadline.instant() {
                earliest = Some(earliest.map_or(at, |e| e.min(at)));
            }
        }
        self.earliest = earliest;

        for key in expired {
            if let Some(entry) = self.lru.pop(&key) {
                removals.push(Removal {
                    key,
                    value: entry.value,
                    cause: RemovalCause::Expired,
                });
            }
        }
    }
}

/// Thread-safe cache where each entry carries its own deadline.
///
/// Deadlines are computed by an [`Expiry`] on create, update and read.
/// Expired entries are never returned; they are reclaimed lazily when touched
/// or in bulk by [`ExpiringCache::cleanup_expired`]. Every removal, whatever
/// its cause, is reported exactly once to the removal listener, outside the lock.
pub struct ExpiringCache<V> {
    inner: Mutex<Store<V>>,
    expiry: Arc<dyn Expiry<V>>,
    capacity: Option<NonZeroUsize>,
    listener: Option<(RemovalListener<V>, Arc<dyn Executor>)>,
}

impl<V: Clone + Send + Sync + 'static> ExpiringCache<V> {
    /// Start building a cache with the given expiry policy.
    pub fn builder(expiry: impl Expiry<V> + 'static) -> CacheBuilder<V> {
        CacheBuilder::new(expiry)
    }

    /// Number of entries held, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    /// Check if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().lru.is_empty()
    }

    /// Check if a live entry exists for `key`. Does not count as a read.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .lru
            .peek(key)
            .is_some_and(|entry| !entry.deadline.has_passed(now))
    }

    /// The deadline of the live entry for `key`. Does not count as a read.
    pub fn deadline(&self, key: &str) -> Option<Deadline> {
        let now = Instant::now();
        self.inner
            .lock()
            .lru
            .peek(key)
            .map(|entry| entry.deadline)
            .filter(|deadline| !deadline.has_passed(now))
    }

    /// Get a copy of the live value for `key`.
    ///
    /// Marks the entry as recently used and asks the expiry policy for its
    /// lifetime after the read. An entry found expired is reclaimed.
    pub fn get_if_present(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut removals = Vec::new();

        let value = {
            let mut store = self.inner.lock();
            let expired = store
                .lru
                .peek(key)
                .map(|entry| entry.deadline.has_passed(now));
            match expired {
                None => None,
                Some(true) => {
                    if let Some(entry) = store.lru.pop(key) {
                        removals.push(Removal {
                            key: key.to_string(),
                            value: entry.value,
                            cause: RemovalCause::Expired,
                        });
                    }
                    None
                }
                Some(false) => {
                    let mut moved = None;
                    let value = store.lru.get_mut(key).map(|entry| {
                        let current = entry.deadline.remaining(now);
                        let lifetime =
                            self.expiry.expire_after_read(key, &entry.value, now, current);
                        if lifetime != current {
                            entry.deadline = Deadline::after(now, lifetime);
                            moved = Some(entry.deadline);
                        }
                        entry.value.clone()
                    });
                    if let Some(deadline) = moved {
                        store.track(deadline);
                    }
                    value
                }
            }
        };

        trace!(key = %key, hit = value.is_some(), "Cache lookup");
        self.notify(removals);
        value
    }

    /// Insert or overwrite the value for `key`.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let now = Instant::now();
        let mut removals = Vec::new();
        {
            let mut store = self.inner.lock();
            self.write(&mut store, key, value, now, &mut removals);
        }
        self.notify(removals);
    }

    /// Overwrite the value for `key` only if a live entry exists.
    ///
    /// Returns whether the write happened.
    pub fn replace_if_present(&self, key: &str, value: V) -> bool {
        let now = Instant::now();
        let mut removals = Vec::new();

        let replaced = {
            let mut store = self.inner.lock();
            match store
                .lru
                .peek(key)
                .map(|entry| entry.deadline.has_passed(now))
            {
                Some(false) => {
                    self.write(&mut store, key.to_string(), value, now, &mut removals);
                    true
                }
                Some(true) => {
                    if let Some(entry) = store.lru.pop(key) {
                        removals.push(Removal {
                            key: key.to_string(),
                            value: entry.value,
                            cause: RemovalCause::Expired,
                        });
                    }
                    false
                }
                None => false,
            }
        };

        self.notify(removals);
        replaced
    }

    /// Move an entry to a new key, storing `value` under it.
    ///
    /// The entry at `old_key` (if any) is reported as [`RemovalCause::Replaced`]
    /// and the value under `new_key` starts a fresh lifetime. Both happen under
    /// one lock acquisition.
    pub fn rekey(&self, old_key: &str, new_key: impl Into<String>, value: V) {
        let new_key = new_key.into();
        let now = Instant::now();
        let mut removals = Vec::new();
        {
            let mut store = self.inner.lock();
            if let Some(old) = store.lru.pop(old_key) {
                let cause = if old.deadline.has_passed(now) {
                    RemovalCause::Expired
                } else {
                    RemovalCause::Replaced
                };
                removals.push(Removal {
                    key: old_key.to_string(),
                    value: old.value,
                    cause,
                });
            }
            self.write(&mut store, new_key, value, now, &mut removals);
        }
        self.notify(removals);
    }

    /// Remove the entry for `key`. A missing key is a no-op.
    ///
    /// An entry already past its deadline is reported as expired rather than
    /// explicitly removed.
    pub fn invalidate(&self, key: &str) {
        let now = Instant::now();
        let removal = self.inner.lock().lru.pop(key).map(|entry| {
            let cause = if entry.deadline.has_passed(now) {
                RemovalCause::Expired
            } else {
                RemovalCause::Explicit
            };
            Removal {
                key: key.to_string(),
                value: entry.value,
                cause,
            }
        });

        if let Some(removal) = removal {
            self.notify(vec![removal]);
        }
    }

    /// Remove the entry for `key` as [`RemovalCause::Expired`] if it is past
    /// its deadline or `is_stale` holds for the value currently stored.
    ///
    /// The check and the removal happen under one lock acquisition, so a
    /// value written after the caller last read it is judged on its own.
    /// Returns whether an entry was removed.
    pub fn expire_if(&self, key: &str, is_stale: impl FnOnce(&V) -> bool) -> bool {
        let now = Instant::now();
        let removal = {
            let mut store = self.inner.lock();
            let stale = store
                .lru
                .peek(key)
                .is_some_and(|entry| entry.deadline.has_passed(now) || is_stale(&entry.value));
            if stale {
                store.lru.pop(key).map(|entry| Removal {
                    key: key.to_string(),
                    value: entry.value,
                    cause: RemovalCause::Expired,
                })
            } else {
                None
            }
        };

        let removed = removal.is_some();
        if let Some(removal) = removal {
            self.notify(vec![removal]);
        }
        removed
    }

    /// Copies of every live entry matching `filter`.
    ///
    /// Expired entries encountered along the way are reclaimed. Does not
    /// affect recency or deadlines.
    pub fn scan<F>(&self, mut filter: F) -> Vec<(String, V)>
    where
        F: FnMut(&str, &V) -> bool,
    {
        let now = Instant::now();
        let mut removals = Vec::new();

        let matches = {
            let mut store = self.inner.lock();
            store.drain_expired(now, &mut removals);
            store
                .lru
                .iter()
                .filter(|(key, entry)| filter(key.as_str(), &entry.value))
                .map(|(key, entry)| (key.clone(), entry.value.clone()))
                .collect()
        };

        self.notify(removals);
        matches
    }

    /// Reclaim every expired entry, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removals = Vec::new();
        self.inner.lock().drain_expired(now, &mut removals);

        let count = removals.len();
        if count > 0 {
            debug!(count = count, "Cleaned up expired entries");
        }
        self.notify(removals);
        count
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            capacity: self.capacity.map(NonZeroUsize::get),
        }
    }

    /// Store `value` under `key`, recording whatever it displaces.
    fn write(
        &self,
        store: &mut Store<V>,
        key: String,
        value: V,
        now: Instant,
        removals: &mut Vec<Removal<V>>,
    ) {
        let lifetime = match store.lru.pop(&key) {
            Some(old) if old.deadline.has_passed(now) => {
                removals.push(Removal {
                    key: key.clone(),
                    value: old.value,
                    cause: RemovalCause::Expired,
                });
                self.expiry.expire_after_create(&key, &value, now)
            }
            Some(old) => {
                let current = old.deadline.remaining(now);
                removals.push(Removal {
                    key: key.clone(),
                    value: old.value,
                    cause: RemovalCause::Replaced,
                });
                self.expiry.expire_after_update(&key, &value, now, current)
            }
            None => self.expiry.expire_after_create(&key, &value, now),
        };

        // Prefer reclaiming dead entries over evicting a live one. Only scans
        // when some entry may actually have expired.
        if self.capacity.is_some_and(|cap| store.lru.len() >= cap.get()) {
            store.drain_expired(now, removals);
        }

        let deadline = Deadline::after(now, lifetime);
        store.track(deadline);
        let entry = CacheEntry { value, deadline };
        if let Some((evicted_key, evicted)) = store.lru.push(key, entry) {
            debug!(key = %evicted_key, "Evicting least recently used entry to make room");
            removals.push(Removal {
                key: evicted_key,
                value: evicted.value,
                cause: RemovalCause::Capacity,
            });
        }

        trace!(cache_size = store.lru.len(), lifetime = ?lifetime, "Entry written");
    }

    fn notify(&self, removals: Vec<Removal<V>>) {
        for removal in removals {
            debug!(key = %removal.key, cause = %removal.cause, "Entry removed");
            if let Some((listener, executor)) = &self.listener {
                let listener = Arc::clone(listener);
                executor.execute(Box::new(move || {
                    listener(removal.key, removal.value, removal.cause)
                }));
            }
        }
    }
}

/// Periodically reclaim expired entries on `handle`'s runtime.
///
/// The task holds only a weak reference and stops once the cache is dropped.
pub fn spawn_cleanup_task<V>(
    cache: &Arc<ExpiringCache<V>>,
    handle: &Handle,
    interval: Duration,
) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    let cache = Arc::downgrade(cache);
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(cache) = cache.upgrade() else {
                debug!("Cache dropped, stopping cleanup task");
                break;
            };
            cache.cleanup_expired();
        }
    })
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of entries, including expired ones not yet reclaimed.
    pub size: usize,

    /// Maximum capacity, if bounded.
    pub capacity: Option<usize>,
}
