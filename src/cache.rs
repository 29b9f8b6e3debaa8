//! Sharded in-memory cache with per-entry TTL and LRU eviction.
//!
//! Keys route to one of N shards (N = next power of two >= the configured
//! count) by FNV-1a over the key bytes. Each shard guards its map and
//! recency order with one `RwLock`; hit/miss/eviction/expiration counters
//! are atomics shared across shards. Expiry is handled inline on `get`; a
//! background sweep only bounds worst-case memory.
//!
//! Stores rewritten playlist bodies, raw segment bodies, and credential
//! verdicts. A [`Flight`] gate gives callers single-flight fills: at most
//! one origin fetch per key, with concurrent requests waiting on the same
//! per-key lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::jwt::Claims;

/// Minimum per-shard capacity regardless of `max_size / shards`.
const MIN_SHARD_CAPACITY: usize = 100;

/// Floor for jittered TTLs.
const MIN_JITTERED_TTL: Duration = Duration::from_millis(1);

/// A cached response body with the content type recorded at insert time.
#[derive(Debug, Clone)]
pub struct CachedBody {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Values the cache can hold.
#[derive(Debug, Clone)]
pub enum CachedValue {
    Body(CachedBody),
    Claims(Claims),
}

/// Cache performance counters plus current size.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub evictions: u64,
    pub expirations: u64,
}

struct Entry {
    value: CachedValue,
    expires_at: Option<Instant>,
    touch: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// One shard: key map plus recency order under a single lock.
///
/// The recency index maps a monotonically increasing touch sequence to the
/// key; the smallest sequence is the least recently used entry.
#[derive(Default)]
struct Shard {
    map: HashMap<String, Entry>,
    recency: BTreeMap<u64, String>,
    next_touch: u64,
}

impl Shard {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.map.remove(key)?;
        self.recency.remove(&entry.touch);
        Some(entry)
    }
}

struct Inner {
    shards: Vec<RwLock<Shard>>,
    mask: u32,
    shard_capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Concurrent sharded LRU+TTL cache. Cheap to clone, shared by reference.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl Cache {
    /// Create a cache with the given total capacity and shard count.
    ///
    /// The shard count is rounded up to the next power of two (minimum 1);
    /// per-shard capacity is `max_size / shards`, floored at 100.
    pub fn new(max_size: usize, shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        let shard_capacity = (max_size / count).max(MIN_SHARD_CAPACITY);

        let shards = (0..count).map(|_| RwLock::new(Shard::default())).collect();

        Self {
            inner: Arc::new(Inner {
                shards,
                mask: (count - 1) as u32,
                shard_capacity,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                expirations: AtomicU64::new(0),
            }),
        }
    }

    fn shard(&self, key: &str) -> &RwLock<Shard> {
        let idx = (fnv1a32(key.as_bytes()) & self.inner.mask) as usize;
        &self.inner.shards[idx]
    }

    /// Look up `key`, refreshing its recency on a hit.
    ///
    /// An entry past its TTL counts as a miss, is removed, and bumps the
    /// expiration counter.
    pub fn get(&self, key: &str) -> Option<CachedValue> {
        let shard = self.shard(key);
        let now = Instant::now();

        let expired = {
            let guard = shard.read();
            match guard.map.get(key) {
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(entry) => entry.is_expired(now),
            }
        };

        let mut guard = shard.write();
        let shard = &mut *guard;
        if expired {
            // Re-check under the write lock; another thread may have raced us.
            if shard.map.get(key).is_some_and(|e| e.is_expired(now)) {
                shard.remove(key);
                self.inner.expirations.fetch_add(1, Ordering::Relaxed);
            }
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let seq = shard.next_touch;
        shard.next_touch += 1;
        let Some(entry) = shard.map.get_mut(key) else {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        shard.recency.remove(&entry.touch);
        entry.touch = seq;
        shard.recency.insert(seq, key.to_string());
        let value = entry.value.clone();

        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Insert `value` under `key`. A zero TTL means no expiry.
    ///
    /// Evicts least-recently-used entries until the shard is back within its
    /// capacity.
    pub fn set(&self, key: &str, value: CachedValue, ttl: Duration) {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };

        let shard = self.shard(key);
        let mut guard = shard.write();
        let shard = &mut *guard;

        if let Some(old) = shard.map.get(key) {
            let old_touch = old.touch;
            shard.recency.remove(&old_touch);
        }
        let touch = shard.next_touch;
        shard.next_touch += 1;
        shard.recency.insert(touch, key.to_string());
        shard.map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                touch,
            },
        );

        while shard.map.len() > self.inner.shard_capacity {
            let Some((&seq, victim)) = shard.recency.first_key_value() else {
                break;
            };
            let victim = victim.clone();
            shard.recency.remove(&seq);
            shard.map.remove(&victim);
            self.inner.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %victim, "cache eviction");
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.shard(key).write().remove(key).is_some()
    }

    pub fn clear(&self) {
        for shard in &self.inner.shards {
            let mut guard = shard.write();
            guard.map.clear();
            guard.recency.clear();
        }
    }

    /// Total item count across shards.
    pub fn size(&self) -> usize {
        self.inner.shards.iter().map(|s| s.read().map.len()).sum()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            size: self.size(),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            expirations: self.inner.expirations.load(Ordering::Relaxed),
        }
    }

    /// Remove expired entries from the cold end of every shard.
    ///
    /// Walks each shard's recency order from the least recently used entry
    /// forward, stopping at the first live one. `get` already handles expiry
    /// inline; this pass only bounds memory held by keys nobody asks for.
    pub fn sweep(&self) {
        let now = Instant::now();
        for shard in &self.inner.shards {
            let mut guard = shard.write();
            let shard = &mut *guard;
            loop {
                let Some((&seq, key)) = shard.recency.first_key_value() else {
                    break;
                };
                let key = key.clone();
                let expired = match shard.map.get(&key) {
                    Some(entry) => entry.is_expired(now),
                    None => true,
                };
                if !expired {
                    break;
                }
                shard.recency.remove(&seq);
                shard.map.remove(&key);
                self.inner.expirations.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Spawn the periodic sweep task. The task runs for the cache lifetime.
    pub fn start_sweeper(&self, period: Duration) {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        });
    }
}

/// Multiply `ttl` by a factor drawn uniformly from `[1 - j/2, 1 + j/2]`.
///
/// Spreads out the expiry of entries filled together so they do not all
/// come due at once. Result is floored at 1 ms.
pub fn jittered_ttl(ttl: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || ttl.is_zero() {
        return ttl;
    }

    use rand::Rng;
    let factor = rand::thread_rng().gen_range(1.0 - jitter / 2.0..=1.0 + jitter / 2.0);
    ttl.mul_f64(factor.max(0.0)).max(MIN_JITTERED_TTL)
}

/// FNV-1a, 32-bit.
fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Per-key single-flight gate.
///
/// `acquire` returns a guard that holds the key's lock; concurrent callers
/// for the same key wait until the guard drops. Callers re-check the cache
/// after acquiring so only the first one actually fills.
#[derive(Clone, Default)]
pub struct Flight {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

pub struct FlightGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    lock: Arc<Mutex<()>>,
    _permit: OwnedMutexGuard<()>,
}

impl Flight {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> FlightGuard {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let permit = lock.clone().lock_owned().await;
        FlightGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            lock,
            _permit: permit,
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // Drop the registry entry once no other caller is waiting on it.
        // Map + our own clone account for two strong references.
        if Arc::strong_count(&self.lock) <= 2 {
            self.locks
                .remove_if(&self.key, |_, lock| Arc::strong_count(lock) <= 2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(text: &str) -> CachedValue {
        CachedValue::Body(CachedBody {
            bytes: Bytes::copy_from_slice(text.as_bytes()),
            content_type: Some("application/vnd.apple.mpegurl".to_string()),
        })
    }

    fn body_text(value: CachedValue) -> String {
        match value {
            CachedValue::Body(b) => String::from_utf8(b.bytes.to_vec()).unwrap(),
            other => panic!("expected body, got {other:?}"),
        }
    }

    #[test]
    fn get_within_ttl_returns_value() {
        let cache = Cache::new(1000, 4);
        cache.set("k", body("v"), Duration::from_secs(60));

        assert_eq!(body_text(cache.get("k").unwrap()), "v");
    }

    #[test]
    fn get_after_ttl_is_a_miss() {
        let cache = Cache::new(1000, 4);
        cache.set("k", body("v"), Duration::from_millis(1));

        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn zero_ttl_never_expires() {
        let cache = Cache::new(1000, 4);
        cache.set("k", body("v"), Duration::ZERO);

        std::thread::sleep(Duration::from_millis(2));

        assert!(cache.get("k").is_some());
    }

    #[test]
    fn get_after_delete_is_a_miss() {
        let cache = Cache::new(1000, 4);
        cache.set("k", body("v"), Duration::from_secs(60));

        assert!(cache.delete("k"));
        assert!(cache.get("k").is_none());
        assert!(!cache.delete("k"));
    }

    #[test]
    fn set_replaces_existing_value() {
        let cache = Cache::new(1000, 4);
        cache.set("k", body("old"), Duration::from_secs(60));
        cache.set("k", body("new"), Duration::from_secs(60));

        assert_eq!(body_text(cache.get("k").unwrap()), "new");
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn shard_count_rounds_up_to_power_of_two() {
        let cache = Cache::new(1000, 3);
        assert_eq!(cache.inner.shards.len(), 4);
        assert_eq!(cache.inner.mask, 3);

        let cache = Cache::new(1000, 0);
        assert_eq!(cache.inner.shards.len(), 1);
    }

    #[test]
    fn eviction_is_least_recently_used() {
        // Single shard so eviction order is fully deterministic. Capacity
        // floors at 100, so fill to the floor first.
        let cache = Cache::new(1, 1);
        for i in 0..100 {
            cache.set(&format!("k{i}"), body("v"), Duration::ZERO);
        }

        // Touch k0 so k1 becomes the oldest.
        assert!(cache.get("k0").is_some());

        cache.set("overflow", body("v"), Duration::ZERO);

        assert!(cache.get("k1").is_none(), "LRU entry should be evicted");
        assert!(cache.get("k0").is_some(), "recently read entry survives");
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.size(), 100);
    }

    #[test]
    fn capacity_is_bounded_after_heavy_insert() {
        let cache = Cache::new(1, 1);
        for i in 0..500 {
            cache.set(&format!("k{i}"), body("v"), Duration::ZERO);
        }
        assert_eq!(cache.size(), 100);
        assert_eq!(cache.stats().evictions, 400);
    }

    #[test]
    fn clear_empties_every_shard() {
        let cache = Cache::new(1000, 8);
        for i in 0..50 {
            cache.set(&format!("k{i}"), body("v"), Duration::from_secs(60));
        }
        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = Cache::new(1000, 4);
        cache.set("k", body("v"), Duration::from_secs(60));

        cache.get("k");
        cache.get("k");
        cache.get("absent");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn sweep_removes_expired_tail_entries() {
        let cache = Cache::new(1000, 1);
        cache.set("dead1", body("v"), Duration::from_millis(1));
        cache.set("dead2", body("v"), Duration::from_millis(1));
        cache.set("live", body("v"), Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(5));
        cache.sweep();

        assert_eq!(cache.size(), 1);
        assert_eq!(cache.stats().expirations, 2);
        assert!(cache.get("live").is_some());
    }

    #[test]
    fn jittered_ttl_stays_in_band() {
        let ttl = Duration::from_secs(10);
        for _ in 0..100 {
            let j = jittered_ttl(ttl, 0.2);
            assert!(j >= Duration::from_secs(9), "got {j:?}");
            assert!(j <= Duration::from_millis(11_000), "got {j:?}");
        }
    }

    #[test]
    fn jittered_ttl_has_a_floor() {
        let j = jittered_ttl(Duration::from_nanos(1), 0.2);
        assert!(j >= Duration::from_millis(1));
    }

    #[tokio::test]
    async fn flight_serializes_same_key() {
        use std::sync::atomic::AtomicUsize;

        let flight = Flight::new();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _guard = flight.acquire("same-key").await;
                let n = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(n, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1, "fills must not overlap");
        assert!(flight.locks.is_empty(), "registry should drain");
    }

    #[tokio::test]
    async fn flight_different_keys_run_concurrently() {
        let flight = Flight::new();
        let a = flight.acquire("a").await;
        // Must not deadlock waiting for "a".
        let b = tokio::time::timeout(Duration::from_millis(100), flight.acquire("b"))
            .await
            .expect("different key should not block");
        drop(a);
        drop(b);
    }

    #[test]
    fn concurrent_set_get_across_threads() {
        let cache = Cache::new(10_000, 8);
        let mut handles = Vec::new();

        for t in 0..4 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("t{t}-k{i}");
                    cache.set(&key, body("v"), Duration::from_secs(60));
                    assert!(cache.get(&key).is_some());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.size(), 800);
    }
}
