//! Time- and size-bounded caches shared across requests.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Timed<V> {
    fetched_at: Instant,
    value: V,
}

/// Lookup outcome; stale values are kept around as a fallback for failed refreshes.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<V> {
    Fresh(V),
    Stale(V),
    Miss,
}

#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Timed<V>>,
    ttl: Duration,
    /// Stale entries older than `ttl * stale_factor` are no longer served
    stale_factor: u32,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            stale_factor: 2,
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn lookup(&self, key: &K) -> CacheLookup<V> {
        let Some(entry) = self.entries.get(key) else {
            return CacheLookup::Miss;
        };
        let age = entry.fetched_at.elapsed();
        if age <= self.ttl {
            CacheLookup::Fresh(entry.value.clone())
        } else if age <= self.ttl.saturating_mul(self.stale_factor) {
            CacheLookup::Stale(entry.value.clone())
        } else {
            CacheLookup::Miss
        }
    }

    pub fn get_fresh(&self, key: &K) -> Option<V> {
        match self.lookup(key) {
            CacheLookup::Fresh(value) => Some(value),
            _ => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    fn insert_at(&self, key: K, value: V, fetched_at: Instant) {
        self.entries.insert(key, Timed { fetched_at, value });
        if self.entries.len() > self.max_entries {
            self.prune();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop entries past their stale window, then the oldest until within `max_entries`.
    pub fn prune(&self) {
        let max_age = self.ttl.saturating_mul(self.stale_factor);
        let now = Instant::now();
        let mut entries: Vec<(K, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().fetched_at))
            .collect();

        for (key, fetched_at) in &entries {
            if now.duration_since(*fetched_at) > max_age {
                self.entries.remove(key);
            }
        }

        if self.entries.len() <= self.max_entries {
            return;
        }

        entries.sort_by_key(|(_, fetched_at)| *fetched_at);
        for (key, _) in entries {
            if self.entries.len() <= self.max_entries {
                break;
            }
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    /// Insert with a backdated fetch time.
    pub(crate) fn insert_aged(&self, key: K, value: V, age: Duration) {
        let fetched_at = Instant::now()
            .checked_sub(age)
            .unwrap_or_else(Instant::now);
        self.insert_at(key, value, fetched_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_stale_and_expired() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60), 10);
        cache.insert("fresh", 1);
        cache.insert_aged("stale", 2, Duration::from_secs(90));
        cache.insert_aged("old", 3, Duration::from_secs(500));

        assert_eq!(cache.lookup(&"fresh"), CacheLookup::Fresh(1));
        assert_eq!(cache.lookup(&"stale"), CacheLookup::Stale(2));
        assert_eq!(cache.lookup(&"old"), CacheLookup::Miss);
        assert_eq!(cache.lookup(&"absent"), CacheLookup::Miss);
        assert_eq!(cache.get_fresh(&"stale"), None);
    }

    #[test]
    fn prune_evicts_expired_then_oldest() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert_aged(1, 1, Duration::from_secs(500));
        cache.insert_aged(2, 2, Duration::from_secs(30));
        cache.insert_aged(3, 3, Duration::from_secs(20));
        cache.insert(4, 4);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(&1), CacheLookup::Miss);
        assert_eq!(cache.lookup(&2), CacheLookup::Miss);
        assert_eq!(cache.lookup(&4), CacheLookup::Fresh(4));
    }
}
