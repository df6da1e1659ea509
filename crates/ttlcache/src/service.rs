//! Cache-aside wrapper for read-mostly site data

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::cache::{TtlCache, DEFAULT_TTL};

/// Cache key for a review document
pub fn review_key(review_id: &str) -> String {
    format!("review:{}", review_id)
}

/// Cache key for a course
pub fn course_key(course_code: &str) -> String {
    format!("course:{}", course_code)
}

/// Cache key for an instructor
pub fn instructor_key(instructor_name: &str) -> String {
    format!("instructor:{}", instructor_name)
}

/// Cache key for a review's vote tally
pub fn tally_key(review_id: &str) -> String {
    format!("tally:{}", review_id)
}

/// Checks the cache before calling the real fetch, and stores what it fetched
///
/// Each miss registers a fill token for its key before fetching. Invalidating
/// the key revokes the token, so a fetch that read data from before the
/// invalidation never lands in the cache.
pub struct CachedService<V> {
    cache: Arc<TtlCache<V>>,
    ttl: Duration,
    /// Key -> token of the newest fill in flight
    fills: Mutex<HashMap<String, u64, RandomState>>,
    next_token: AtomicU64,
}

impl<V: Clone> CachedService<V> {
    /// Wrap a shared cache, storing fetched values for `ttl`
    pub fn new(cache: Arc<TtlCache<V>>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            fills: Mutex::new(HashMap::with_hasher(RandomState::new())),
            next_token: AtomicU64::new(0),
        }
    }

    /// Wrap a shared cache with [`DEFAULT_TTL`]
    pub fn with_default_ttl(cache: Arc<TtlCache<V>>) -> Self {
        Self::new(cache, DEFAULT_TTL)
    }

    /// Return the cached value for `key`, or run `fetch` and cache its result
    ///
    /// Errors from `fetch` are returned as-is and nothing is cached.
    pub fn get_or_fetch<E, F>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.get_or_fetch_with_ttl(key, self.ttl, fetch)
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch) with an explicit TTL
    ///
    /// The fetched value is returned either way, but it is only cached if
    /// `key` was not invalidated while `fetch` ran.
    pub fn get_or_fetch_with_ttl<E, F>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.cache.get(key) {
            trace!("cache hit: {}", key);
            return Ok(value);
        }

        trace!("cache miss: {}", key);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.fills.lock().insert(key.to_string(), token);

        let result = fetch();

        // Held across the set so an invalidate cannot slip in between
        let mut fills = self.fills.lock();
        let current = fills.get(key) == Some(&token);
        if current {
            fills.remove(key);
        }
        let value = result?;
        if current {
            self.cache.set(key, value.clone(), ttl);
        } else {
            debug!("discarding fill for {}: invalidated during fetch", key);
        }
        Ok(value)
    }

    /// Drop one cached key and any fill in flight for it
    pub fn invalidate(&self, key: &str) {
        let mut fills = self.fills.lock();
        fills.remove(key);
        self.cache.delete(key);
    }

    /// Drop every cached key under `prefix`, and fills in flight for them
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut fills = self.fills.lock();
        fills.retain(|key, _| !key.starts_with(prefix));
        self.cache.delete_prefix(prefix)
    }

    /// The shared cache
    pub fn cache(&self) -> &Arc<TtlCache<V>> {
        &self.cache
    }

    /// TTL applied by `get_or_fetch`
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
