//! TtlCache: key/value cache with per-entry expiry
//!
//! Expiry is enforced in two ways:
//! - lazily: `get` / `has` evict an expired entry they run into
//! - eagerly: `cleanup` sweeps every expired entry
//!
//! `size` counts whatever is stored, expired or not. Call `cleanup` first,
//! or use `valid_size`, for a count of live entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::stats::{CacheStats, Lookup, StatsSnapshot};

/// TTL used by [`TtlCache::set_default`] (5 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_millis(300_000);

/// A cached value with its creation time and lifetime, both in milliseconds
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    data: V,
    timestamp: u64,
    ttl: u64,
}

impl<V> CacheEntry<V> {
    fn is_valid(&self, now: u64) -> bool {
        now.saturating_sub(self.timestamp) <= self.ttl
    }
}

/// In-process cache with per-entry time-to-live
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>, RandomState>>,
    clock: Arc<dyn Clock>,
    stats: CacheStats,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache reading time from the system's monotonic clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a cache with an injected clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_hasher(RandomState::new())),
            clock,
            stats: CacheStats::new(),
        }
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            data: value,
            timestamp: self.clock.now_millis(),
            ttl: ttl.as_millis() as u64,
        };
        self.entries.lock().insert(key.into(), entry);
        self.stats.record_insert();
    }

    /// Store `value` under `key` for [`DEFAULT_TTL`]
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, DEFAULT_TTL);
    }

    /// Get a live value, evicting the entry if it has expired
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            None => {
                self.stats.record_lookup(Lookup::Miss);
                return None;
            }
            Some(entry) if entry.is_valid(now) => {
                self.stats.record_lookup(Lookup::Hit);
                return Some(entry.data.clone());
            }
            Some(_) => {}
        }

        // Expired: evict under the same lock so it is counted once
        entries.remove(key);
        self.stats.record_lookup(Lookup::Expired);
        None
    }

    /// Check for a live value; evicts an expired entry like `get`
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove an entry if present
    pub fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Remove every entry whose key starts with `prefix`
    ///
    /// # Returns
    /// * `usize` - Number of entries removed
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    /// Remove all entries and reset statistics
    pub fn clear(&self) {
        self.entries.lock().clear();
        self.stats.reset();
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    /// Number of entries that are still live. Does not evict.
    pub fn valid_size(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.is_valid(now))
            .count()
    }

    /// Evict every expired entry
    ///
    /// # Returns
    /// * `usize` - Number of entries evicted
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid(now));

        let evicted = before - entries.len();
        self.stats.record_sweep(evicted);
        evicted
    }

    /// Current hit, miss and expiry counts
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
