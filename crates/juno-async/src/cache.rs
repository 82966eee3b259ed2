//! Short-lived memo of deferred results.
//!
//! Entries are keyed by a stable string (usually a canonical JSON
//! fingerprint of the inputs) and expire [`ASYNC_CACHE_TTL`] after they were
//! inserted. Because the cached value is a [`Deferred`], two requests made
//! while the first is still in flight share the same work.

use std::fmt;
use std::time::Duration;

use ahash::AHashMap;
use tracing::trace;
use web_time::Instant;

use crate::deferred::Deferred;

/// How long a resolved (or in-flight) async result is reused.
pub const ASYNC_CACHE_TTL: Duration = Duration::from_secs(5);

struct Entry<T> {
    inserted: Instant,
    value: Deferred<T>,
}

/// TTL cache of deferred values.
pub struct TtlCache<T> {
    ttl: Duration,
    entries: AHashMap<String, Entry<T>>,
}

impl<T: Clone + 'static> TtlCache<T> {
    /// Cache with the default five second TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(ASYNC_CACHE_TTL)
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: AHashMap::new(),
        }
    }

    /// Return the live entry for `key`, or create one with `make`.
    pub fn get_or_insert_with(&mut self, key: &str, make: impl FnOnce() -> Deferred<T>) -> Deferred<T> {
        let now = Instant::now();
        self.evict_expired(now);
        if let Some(entry) = self.entries.get(key) {
            trace!(key, "async cache hit");
            return entry.value.clone();
        }
        let value = make();
        self.entries.insert(
            key.to_owned(),
            Entry {
                inserted: now,
                value: value.clone(),
            },
        );
        value
    }

    /// Live entry for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Deferred<T>> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.value.clone())
    }

    /// Number of stored entries, expired ones included until the next
    /// insert sweeps them.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &Entry<T>, now: Instant) -> bool {
        now.duration_since(entry.inserted) >= self.ttl
    }

    fn evict_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.duration_since(entry.inserted) < ttl);
    }
}

impl<T: Clone + 'static> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TtlCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_keys_share_one_deferred() {
        let mut cache = TtlCache::new();
        let first = cache.get_or_insert_with("k", || Deferred::ready(1));
        let second = cache.get_or_insert_with("k", || Deferred::ready(2));
        assert_eq!(first.id(), second.id());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_ttl_never_reuses() {
        let mut cache = TtlCache::with_ttl(Duration::ZERO);
        let first = cache.get_or_insert_with("k", || Deferred::ready(1));
        let second = cache.get_or_insert_with("k", || Deferred::ready(2));
        assert_ne!(first.id(), second.id());
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let mut cache = TtlCache::new();
        let a = cache.get_or_insert_with("a", || Deferred::ready(1));
        let b = cache.get_or_insert_with("b", || Deferred::ready(1));
        assert_ne!(a.id(), b.id());
        assert_eq!(cache.get("a").map(|d| d.id()), Some(a.id()));
    }
}
