//! TTL-bounded LRU cache for resolved addresses.
//!
//! A single writer-exclusive lock protects the index, the recency order, and
//! the statistics counters. `get` takes the write lock because a hit promotes
//! the entry to most-recently-used. A background sweeper removes expired
//! entries once per cleanup interval until `close` is called.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tracing::debug;

use crate::records::canonical_name;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_entries: usize,
    pub total_capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A fresh cache hit.
#[derive(Debug, Clone, Copy)]
pub struct CachedAddress {
    pub addr: Ipv4Addr,
    /// Time left until the entry expires, at the moment of the lookup.
    pub remaining_ttl: Duration,
}

struct CacheEntry {
    addr: Ipv4Addr,
    expires_at: Instant,
    created_at: Instant,
    /// Key into the recency order; reassigned on every touch.
    seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

struct CacheInner {
    entries: FxHashMap<String, CacheEntry>,
    /// Recency order: ascending sequence = least recently used first.
    /// Holds exactly one node per index entry.
    recency: BTreeMap<u64, String>,
    next_seq: u64,
    capacity: usize,
    stats: CacheStats,
}

impl CacheInner {
    fn new(capacity: usize) -> Self {
        Self {
            entries: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            recency: BTreeMap::new(),
            next_seq: 0,
            capacity,
            stats: CacheStats {
                total_capacity: capacity,
                ..Default::default()
            },
        }
    }

    /// Move an existing entry to the most-recently-used position.
    fn promote(&mut self, key: &str) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.seq);
            self.recency.insert(seq, key.to_string());
            entry.seq = seq;
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.seq);
            self.stats.total_entries = self.entries.len();
        }
    }

    /// Drop the least-recently-used entry, expired or not.
    fn evict_lru(&mut self) {
        if let Some((_, key)) = self.recency.pop_first() {
            if self.entries.remove(&key).is_some() {
                self.stats.evictions += 1;
            }
            self.stats.total_entries = self.entries.len();
        }
    }

    fn remove_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<(String, u64)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, entry)| (key.clone(), entry.seq))
            .collect();
        for (key, seq) in &expired {
            self.entries.remove(key);
            self.recency.remove(seq);
        }
        self.stats.total_entries = self.entries.len();
        expired.len()
    }
}

#[derive(Clone)]
pub struct DnsCache {
    inner: Arc<RwLock<CacheInner>>,
    stop: Arc<watch::Sender<bool>>,
}

impl DnsCache {
    /// Create a cache and start its sweeper task.
    pub fn new(capacity: usize, cleanup_interval: Duration) -> Self {
        let inner = Arc::new(RwLock::new(CacheInner::new(capacity)));
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let sweep_target = inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            ticker.tick().await; // the first tick completes immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = sweep_target.write().await.remove_expired(Instant::now());
                        if removed > 0 {
                            debug!(removed, "cache sweep removed expired entries");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        Self {
            inner,
            stop: Arc::new(stop_tx),
        }
    }

    /// Look up a domain. A hit promotes the entry to most-recently-used; an
    /// entry found expired is removed and reported as a miss.
    pub async fn get(&self, domain: &str) -> Option<CachedAddress> {
        let key = canonical_name(domain);
        let now = Instant::now();

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let Some(entry) = inner.entries.get(&key) else {
            inner.stats.misses += 1;
            return None;
        };

        if entry.is_expired(now) {
            debug!(domain = %key, age = ?entry.created_at.elapsed(), "entry expired on read");
            inner.remove(&key);
            inner.stats.misses += 1;
            return None;
        }

        let hit = CachedAddress {
            addr: entry.addr,
            remaining_ttl: entry.expires_at.saturating_duration_since(now),
        };
        inner.promote(&key);
        inner.stats.hits += 1;
        Some(hit)
    }

    /// Insert or refresh an entry. Refreshing an existing key promotes it and
    /// never evicts; inserting at capacity evicts the least-recently-used
    /// entry first.
    pub async fn set(&self, domain: &str, addr: Ipv4Addr, ttl: Duration) {
        let key = canonical_name(domain);
        let now = Instant::now();

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.addr = addr;
            entry.expires_at = now + ttl;
            inner.promote(&key);
            return;
        }

        if inner.entries.len() >= inner.capacity {
            inner.evict_lru();
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.recency.insert(seq, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                addr,
                expires_at: now + ttl,
                created_at: now,
                seq,
            },
        );
        inner.stats.total_entries = inner.entries.len();
    }

    /// Remove expired entries immediately, returning how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        self.inner.write().await.remove_expired(Instant::now())
    }

    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        guard.entries.clear();
        guard.recency.clear();
        guard.stats.total_entries = 0;
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.read().await.stats
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop the sweeper. The cache itself stays usable until dropped.
    pub fn close(&self) {
        let _ = self.stop.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);
    const SWEEP: Duration = Duration::from_secs(60);

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    async fn assert_invariants(cache: &DnsCache) {
        let inner = cache.inner.read().await;
        assert_eq!(inner.entries.len(), inner.recency.len());
        assert!(inner.entries.len() <= inner.capacity);
        for (seq, key) in &inner.recency {
            assert_eq!(inner.entries[key].seq, *seq);
        }
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = DnsCache::new(100, SWEEP);
        cache.set("example.com", ip(1), TTL).await;

        let hit = cache.get("example.com").await.unwrap();
        assert_eq!(hit.addr, ip(1));
        assert!(hit.remaining_ttl <= TTL);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.total_entries, 1);
        assert_invariants(&cache).await;
    }

    #[tokio::test]
    async fn test_miss_on_absent_key() {
        let cache = DnsCache::new(100, SWEEP);
        assert!(cache.get("nonexistent.example").await.is_none());
        assert_eq!(cache.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn test_canonical_keys() {
        let cache = DnsCache::new(100, SWEEP);
        cache.set("Example.COM.", ip(1), TTL).await;
        assert!(cache.get("example.com").await.is_some());
    }

    #[tokio::test]
    async fn test_refresh_existing_key_does_not_evict() {
        let cache = DnsCache::new(1, SWEEP);
        cache.set("example.com", ip(1), TTL).await;
        cache.set("example.com", ip(2), TTL).await;

        assert_eq!(cache.get("example.com").await.unwrap().addr, ip(2));
        let stats = cache.stats().await;
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.total_entries, 1);
        assert_invariants(&cache).await;
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        let cache = DnsCache::new(2, SWEEP);
        cache.set("a.example", ip(1), TTL).await;
        cache.set("b.example", ip(2), TTL).await;
        // Reading "a" makes "b" the least recently used
        cache.get("a.example").await.unwrap();

        cache.set("c.example", ip(3), TTL).await;

        assert!(cache.get("a.example").await.is_some());
        assert!(cache.get("c.example").await.is_some());
        assert!(cache.get("b.example").await.is_none());
        assert_eq!(cache.stats().await.evictions, 1);
        assert_invariants(&cache).await;
    }

    #[tokio::test]
    async fn test_capacity_never_exceeded() {
        let cache = DnsCache::new(4, SWEEP);
        for i in 0..32 {
            cache.set(&format!("host{}.example", i), ip(i as u8), TTL).await;
        }
        assert_eq!(cache.len().await, 4);
        assert_eq!(cache.stats().await.evictions, 28);
        assert_invariants(&cache).await;
    }

    #[tokio::test]
    async fn test_expired_entry_removed_on_read() {
        let cache = DnsCache::new(100, SWEEP);
        cache.set("example.com", ip(1), Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("example.com").await.is_none());
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 0);
        assert_invariants(&cache).await;
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let cache = DnsCache::new(100, Duration::from_millis(20));
        cache.set("a.example", ip(1), Duration::from_millis(10)).await;
        cache.set("b.example", ip(2), TTL).await;

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(cache.len().await, 1);
        // Sweeps are not misses and not evictions
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
        assert_invariants(&cache).await;
        cache.close();
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = DnsCache::new(100, SWEEP);
        cache.set("a.example", ip(1), TTL).await;
        cache.set("b.example", ip(2), TTL).await;
        cache.clear().await;

        assert!(cache.is_empty().await);
        assert_eq!(cache.stats().await.total_entries, 0);
        assert_invariants(&cache).await;
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = DnsCache::new(100, SWEEP);
        cache.set("a.example", ip(1), Duration::from_millis(5)).await;
        cache.set("b.example", ip(2), TTL).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_hit_rate() {
        let cache = DnsCache::new(100, SWEEP);
        cache.set("example.com", ip(1), TTL).await;
        cache.get("example.com").await;
        cache.get("missing.example").await;

        let stats = cache.stats().await;
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
