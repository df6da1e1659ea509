//! Lookup and expiry accounting for the TTL cache

use std::sync::atomic::{AtomicU64, Ordering};

/// How a single `get` was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Live entry returned
    Hit,
    /// Nothing stored under the key
    Miss,
    /// Entry found past its TTL and evicted; counts as a miss too
    Expired,
}

/// Running counters, updated without taking the cache lock
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    inserts: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Lookups answered from a live entry
    pub hits: u64,
    /// Lookups that found nothing usable, expired entries included
    pub misses: u64,
    /// Expired entries evicted, lazily by `get` or by `cleanup`
    pub expirations: u64,
    /// Calls to `set`
    pub inserts: u64,
}

impl StatsSnapshot {
    /// Total lookups seen
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Share of lookups that hit (0.0 when there were none)
    pub fn hit_ratio(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl CacheStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one lookup by its outcome
    pub fn record_lookup(&self, lookup: Lookup) {
        match lookup {
            Lookup::Hit => bump(&self.hits, 1),
            Lookup::Miss => bump(&self.misses, 1),
            Lookup::Expired => {
                bump(&self.expirations, 1);
                bump(&self.misses, 1);
            }
        }
    }

    /// Count entries evicted by a cleanup sweep
    pub fn record_sweep(&self, evicted: usize) {
        bump(&self.expirations, evicted as u64);
    }

    /// Count one `set`
    pub fn record_insert(&self) {
        bump(&self.inserts, 1);
    }

    /// Read all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [&self.hits, &self.misses, &self.expirations, &self.inserts] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
