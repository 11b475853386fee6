//! Concurrent key/value cache with a fixed time-to-live per entry

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Expiring cache shared across workers
///
/// Expired entries are dropped lazily on read and by [`TtlCache::purge_expired`].
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, (V, Instant)>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns a clone of the live value for `key`
    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                let (value, expires_at) = entry.value();
                if Instant::now() < *expires_at {
                    return Some(value.clone());
                }
                true
            }
            None => false,
        };

        if expired {
            self.entries
                .remove_if(key, |_, (_, expires_at)| Instant::now() >= *expires_at);
        }
        None
    }

    /// Inserts or replaces `key`, restarting its TTL
    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (value, Instant::now() + self.ttl));
    }

    /// Inserts `value` only when no live entry exists and returns the winner
    pub fn get_or_insert(&self, key: K, value: V) -> V {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key)
            .or_insert_with(|| (value.clone(), now + self.ttl));

        if now >= entry.1 {
            *entry = (value, now + self.ttl);
        }
        entry.0.clone()
    }

    pub fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Drops every expired entry and returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| now < *expires_at);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_live_value() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("example.com".to_string(), 7u32);
        assert_eq!(cache.get(&"example.com".to_string()), Some(7));
        assert_eq!(cache.get(&"other.com".to_string()), None);
    }

    #[test]
    fn test_expired_entries_disappear() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.insert(1u8, "a".to_string());
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_or_insert_keeps_first_value() {
        let cache = TtlCache::new(Duration::from_secs(60));
        assert_eq!(cache.get_or_insert("key", 1), 1);
        assert_eq!(cache.get_or_insert("key", 2), 1);
    }

    #[test]
    fn test_purge_expired() {
        let cache = TtlCache::new(Duration::from_millis(10));
        cache.insert(1, 1);
        cache.insert(2, 2);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 0);
    }
}
