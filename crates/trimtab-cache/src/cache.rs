// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The size-bounded evicting cache.

use crate::config::{CacheConfig, EvictionPolicy};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use trimtab_core::governance::GovernedCache;

/// Monotonic operation counters. Never reset except by [`EvictingCache`]
/// being dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a live value.
    pub hits: u64,
    /// Lookups that found nothing (including expired entries).
    pub misses: u64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Entries removed because they aged out.
    pub expirations: u64,
    /// Inserts rejected because a single entry exceeded capacity.
    pub rejected_inserts: u64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    size_bytes: usize,
    created_at: Instant,
    created_seq: u64,
    last_accessed_seq: u64,
    access_count: u64,
}

#[derive(Debug)]
struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    current_size: usize,
    max_size: usize,
    next_seq: u64,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V> CacheInner<K, V> {
    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remove_entry(&mut self, key: &K) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.current_size -= entry.size_bytes;
        Some(entry)
    }

    /// The key that loses under `policy`, ties broken by insertion order.
    fn victim_key(&self, policy: EvictionPolicy) -> Option<K> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| match policy {
                EvictionPolicy::Lru => (e.last_accessed_seq, e.created_seq),
                EvictionPolicy::Lfu => (e.access_count, e.created_seq),
                EvictionPolicy::Fifo => (e.created_seq, 0),
            })
            .map(|(k, _)| k.clone())
    }

    fn evict_until_fits(&mut self, incoming: usize, policy: EvictionPolicy) {
        while self.current_size + incoming > self.max_size {
            let Some(victim) = self.victim_key(policy) else {
                break;
            };
            self.remove_entry(&victim);
            self.stats.evictions += 1;
        }
    }
}

/// A bounded key/value store with pluggable eviction and optional
/// per-entry maximum age.
///
/// Capacity is accounted in caller-supplied entry sizes; after every
/// mutating call the stored total never exceeds the configured maximum.
/// Lookups never fail: absent and expired keys are misses.
///
/// All operations take `&self`; the cache is shared via `Arc` and governed
/// through [`GovernedCache`].
pub struct EvictingCache<K, V> {
    policy: EvictionPolicy,
    max_age: Option<Duration>,
    low_priority_fraction: f64,
    inner: Mutex<CacheInner<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> EvictingCache<K, V> {
    /// Creates an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            policy: config.policy,
            max_age: config.max_age,
            low_priority_fraction: config.low_priority_fraction.clamp(0.0, 1.0),
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                current_size: 0,
                max_size: config.max_size_bytes,
                next_seq: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Stores `value` under `key`, evicting per policy until it fits.
    ///
    /// Returns `false` without storing anything when `size_bytes` alone
    /// exceeds capacity; the failed admission is counted. Replacing an
    /// existing key releases the old entry's size first.
    pub fn insert(&self, key: K, value: V, size_bytes: usize) -> bool {
        let mut inner = self.inner.lock().unwrap();

        if size_bytes > inner.max_size {
            inner.stats.rejected_inserts += 1;
            log::debug!(
                "Cache admission rejected: entry of {} bytes exceeds capacity {}",
                size_bytes,
                inner.max_size
            );
            return false;
        }

        inner.remove_entry(&key);
        inner.evict_until_fits(size_bytes, self.policy);

        let seq = inner.bump_seq();
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                size_bytes,
                created_at: Instant::now(),
                created_seq: seq,
                last_accessed_seq: seq,
                access_count: 0,
            },
        );
        inner.current_size += size_bytes;
        true
    }

    /// Looks up `key`, promoting the entry on a hit.
    ///
    /// An entry past its maximum age is removed lazily and reported as a
    /// miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();

        let expired = match inner.entries.get(key) {
            None => {
                inner.stats.misses += 1;
                return None;
            }
            Some(entry) => self.is_expired(entry),
        };

        if expired {
            inner.remove_entry(key);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            return None;
        }

        let seq = inner.bump_seq();
        let entry = inner.entries.get_mut(key).expect("entry checked above");
        entry.last_accessed_seq = seq;
        entry.access_count += 1;
        let value = entry.value.clone();
        inner.stats.hits += 1;
        Some(value)
    }

    /// Removes `key` if present, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        inner.remove_entry(key).map(|e| e.value)
    }

    /// Updates capacity, evicting immediately if over the new limit.
    pub fn resize(&self, max_size_bytes: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.max_size = max_size_bytes;
        inner.evict_until_fits(0, self.policy);
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.current_size = 0;
    }

    /// Drops entries past their maximum age. A no-op without `max_age`.
    pub fn clear_expired(&self) {
        if self.max_age.is_none() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();

        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, e)| self.is_expired(e))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            inner.remove_entry(&key);
            inner.stats.expirations += 1;
        }
    }

    /// Drops the coldest fraction of entries, by access count, ties broken
    /// by insertion order.
    pub fn clear_low_priority(&self) {
        let mut inner = self.inner.lock().unwrap();
        let len = inner.entries.len();
        if len == 0 {
            return;
        }

        let victims = ((len as f64 * self.low_priority_fraction).ceil() as usize).min(len);
        let mut ranked: Vec<(K, u64, u64)> = inner
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.access_count, e.created_seq))
            .collect();
        ranked.sort_by_key(|&(_, count, seq)| (count, seq));

        for (key, _, _) in ranked.into_iter().take(victims) {
            inner.remove_entry(&key);
        }
        log::debug!("Cleared {} low-priority cache entries", victims);
    }

    /// Number of stored entries (including any not-yet-purged expired ones).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently stored.
    pub fn current_size_bytes(&self) -> usize {
        self.inner.lock().unwrap().current_size
    }

    /// The configured capacity, in bytes.
    pub fn max_size_bytes(&self) -> usize {
        self.inner.lock().unwrap().max_size
    }

    /// A snapshot of the operation counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats
    }

    fn is_expired(&self, entry: &CacheEntry<V>) -> bool {
        self.max_age
            .is_some_and(|age| entry.created_at.elapsed() > age)
    }
}

impl<K, V> GovernedCache for EvictingCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn resize(&self, max_size_bytes: usize) {
        EvictingCache::resize(self, max_size_bytes);
    }

    fn clear(&self) {
        EvictingCache::clear(self);
    }

    fn clear_expired(&self) {
        EvictingCache::clear_expired(self);
    }

    fn clear_low_priority(&self) {
        EvictingCache::clear_low_priority(self);
    }

    fn current_size_bytes(&self) -> usize {
        EvictingCache::current_size_bytes(self)
    }

    fn max_size_bytes(&self) -> usize {
        EvictingCache::max_size_bytes(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn cache(max_size: usize, policy: EvictionPolicy) -> EvictingCache<&'static str, u32> {
        EvictingCache::new(CacheConfig {
            max_size_bytes: max_size,
            policy,
            ..Default::default()
        })
    }

    // ── Capacity Invariant ───────────────────────────────────────────

    #[test]
    fn test_size_never_exceeds_capacity() {
        let cache = cache(10, EvictionPolicy::Lru);
        for (i, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            cache.insert(key, i as u32, 4);
            assert!(cache.current_size_bytes() <= 10);
        }
    }

    #[test]
    fn test_oversized_entry_rejected_whole() {
        let cache = cache(10, EvictionPolicy::Lru);
        cache.insert("small", 1, 4);

        assert!(!cache.insert("huge", 2, 11));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"small"), Some(1));
        assert_eq!(cache.stats().rejected_inserts, 1);
    }

    #[test]
    fn test_insert_then_get_round_trip() {
        let cache = cache(100, EvictionPolicy::Lru);
        assert!(cache.insert("k", 7, 10));
        assert_eq!(cache.get(&"k"), Some(7));
    }

    #[test]
    fn test_replacing_key_releases_old_size() {
        let cache = cache(10, EvictionPolicy::Lru);
        cache.insert("k", 1, 8);
        cache.insert("k", 2, 6);

        assert_eq!(cache.current_size_bytes(), 6);
        assert_eq!(cache.get(&"k"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    // ── Eviction Policies ────────────────────────────────────────────

    #[test]
    fn test_lru_scenario_recently_read_survives() {
        // set(a), set(b), get(a), set(c) ⇒ b evicted; a and c present.
        let cache = cache(2, EvictionPolicy::Lru);
        cache.insert("a", 1, 1);
        cache.insert("b", 2, 1);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3, 1);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lfu_evicts_least_frequent() {
        let cache = cache(2, EvictionPolicy::Lfu);
        cache.insert("hot", 1, 1);
        cache.insert("cold", 2, 1);
        cache.get(&"hot");
        cache.get(&"hot");
        cache.get(&"cold");
        cache.insert("new", 3, 1);

        assert_eq!(cache.get(&"cold"), None);
        assert_eq!(cache.get(&"hot"), Some(1));
    }

    #[test]
    fn test_fifo_evicts_earliest_insert_despite_access() {
        let cache = cache(2, EvictionPolicy::Fifo);
        cache.insert("first", 1, 1);
        cache.insert("second", 2, 1);
        cache.get(&"first");
        cache.insert("third", 3, 1);

        assert_eq!(cache.get(&"first"), None);
        assert_eq!(cache.get(&"second"), Some(2));
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        // Neither entry is ever read, so access counts tie at zero;
        // the earlier insert loses.
        let cache = cache(2, EvictionPolicy::Lfu);
        cache.insert("older", 1, 1);
        cache.insert("newer", 2, 1);
        cache.insert("extra", 3, 1);

        assert_eq!(cache.get(&"older"), None);
        assert_eq!(cache.get(&"newer"), Some(2));
    }

    // ── Expiry ───────────────────────────────────────────────────────

    #[test]
    fn test_expired_entry_is_lazy_miss() {
        let cache: EvictingCache<&str, u32> = EvictingCache::new(CacheConfig {
            max_size_bytes: 100,
            max_age: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        cache.insert("k", 1, 1);
        assert_eq!(cache.get(&"k"), Some(1));

        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"k"), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_clear_expired_sweeps_only_aged_entries() {
        let cache: EvictingCache<&str, u32> = EvictingCache::new(CacheConfig {
            max_size_bytes: 100,
            max_age: Some(Duration::from_millis(30)),
            ..Default::default()
        });
        cache.insert("old", 1, 1);
        thread::sleep(Duration::from_millis(50));
        cache.insert("fresh", 2, 1);

        cache.clear_expired();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"fresh"), Some(2));
    }

    // ── Resize and Clearing ──────────────────────────────────────────

    #[test]
    fn test_resize_down_evicts_immediately() {
        let cache = cache(4, EvictionPolicy::Lru);
        cache.insert("a", 1, 1);
        cache.insert("b", 2, 1);
        cache.insert("c", 3, 1);
        cache.insert("d", 4, 1);

        cache.resize(2);
        assert_eq!(cache.current_size_bytes(), 2);
        assert_eq!(cache.max_size_bytes(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear_low_priority_removes_coldest_fraction() {
        let cache: EvictingCache<&str, u32> = EvictingCache::new(CacheConfig {
            max_size_bytes: 100,
            low_priority_fraction: 0.5,
            ..Default::default()
        });
        cache.insert("a", 1, 1);
        cache.insert("b", 2, 1);
        cache.insert("c", 3, 1);
        cache.insert("d", 4, 1);
        cache.get(&"a");
        cache.get(&"b");

        cache.clear_low_priority();
        // c and d were never read; they are the coldest half.
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"c"), None);
        assert_eq!(cache.get(&"d"), None);
        assert_eq!(cache.get(&"a"), Some(1));
    }

    #[test]
    fn test_clear_empties_cache() {
        let cache = cache(10, EvictionPolicy::Lru);
        cache.insert("a", 1, 2);
        cache.insert("b", 2, 2);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.current_size_bytes(), 0);
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = cache(10, EvictionPolicy::Lru);
        cache.insert("k", 1, 1);
        cache.get(&"k");
        cache.get(&"absent");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
