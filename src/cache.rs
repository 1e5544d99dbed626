//! TTL cache for successful GET responses.

use http::{Method, StatusCode};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// A cached GET response.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPayload {
    /// Parsed JSON body
    pub data: serde_json::Value,
    /// The body as received
    pub raw_body: String,
    /// Status of the original response
    pub status: StatusCode,
}

#[derive(Debug)]
struct CacheEntry {
    endpoint: String,
    payload: CachedPayload,
    created_at: Instant,
    ttl: Duration,
    hit_count: u64,
}

impl CacheEntry {
    fn is_valid(&self, now: Instant) -> bool {
        now < self.created_at + self.ttl
    }

    fn estimated_bytes(&self, key: &str) -> usize {
        key.len() + self.endpoint.len() + self.payload.raw_body.len()
    }
}

/// Cumulative cache statistics since construction or the last [`ResponseCache::clear`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    /// Entries physically stored (expired ones included until evicted)
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, `0.0` before any lookup
    pub hit_rate: f64,
    pub estimated_bytes: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Bounded TTL cache keyed by [`cache_key`].
///
/// When full, inserting evicts the entry with the fewest hits, breaking ties
/// by age. Expired entries read as misses and are dropped on access.
///
/// # Examples
///
/// ```
/// use gridgate::cache::{cache_key, CachedPayload, ResponseCache};
/// use http::{Method, StatusCode};
/// use std::time::Duration;
///
/// let cache = ResponseCache::new(10);
/// let key = cache_key(&Method::GET, "/sites", &Default::default());
/// cache.set(&key, "/sites", CachedPayload {
///     data: serde_json::json!([]),
///     raw_body: "[]".into(),
///     status: StatusCode::OK,
/// }, Duration::from_secs(60));
///
/// assert!(cache.get(&key).is_some());
/// assert_eq!(cache.stats().hits, 1);
/// ```
#[derive(Debug)]
pub struct ResponseCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    /// Creates a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Looks up a live entry, counting the hit or miss.
    pub fn get(&self, key: &str) -> Option<CachedPayload> {
        let now = Instant::now();
        let mut state = self.state.lock();

        match state.entries.get(key).map(|entry| entry.is_valid(now)) {
            Some(true) => {}
            Some(false) => {
                state.entries.remove(key);
                state.misses += 1;
                tracing::debug!(key = key, "Cache entry expired");
                return None;
            }
            None => {
                state.misses += 1;
                return None;
            }
        }

        state.hits += 1;
        let entry = state.entries.get_mut(key)?;
        entry.hit_count += 1;
        Some(entry.payload.clone())
    }

    /// Stores `payload` under `key` for `ttl`, evicting first when full.
    pub fn set(&self, key: &str, endpoint: &str, payload: CachedPayload, ttl: Duration) {
        let now = Instant::now();
        let mut state = self.state.lock();

        if !state.entries.contains_key(key) && state.entries.len() >= self.capacity {
            // Expired entries go first; otherwise the least-used, oldest entry.
            let victim = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| (entry.is_valid(now), entry.hit_count, entry.created_at))
                .map(|(key, _)| key.clone());

            if let Some(victim) = victim {
                tracing::debug!(key = %victim, "Evicting cache entry");
                state.entries.remove(&victim);
            }
        }

        state.entries.insert(
            key.to_string(),
            CacheEntry {
                endpoint: endpoint.to_string(),
                payload,
                created_at: now,
                ttl,
                hit_count: 0,
            },
        );
    }

    /// Removes one entry. Returns `true` if it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().entries.remove(key).is_some()
    }

    /// Removes every entry cached for `endpoint`, whatever its params.
    pub fn invalidate_endpoint(&self, endpoint: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.endpoint != endpoint);
        before - state.entries.len()
    }

    /// Empties the cache and resets statistics.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = CacheState::default();
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let lookups = state.hits + state.misses;

        CacheStats {
            entries: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
            estimated_bytes: state
                .entries
                .iter()
                .map(|(key, entry)| entry.estimated_bytes(key))
                .sum(),
        }
    }
}

/// Deterministic cache key over method, endpoint and query parameters.
///
/// Parameters are hashed in sorted order so insertion order never matters.
pub fn cache_key(method: &Method, endpoint: &str, params: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(endpoint.as_bytes());
    for (key, value) in params {
        hasher.update(b"\0");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(body: &str) -> CachedPayload {
        CachedPayload {
            data: json!({ "body": body }),
            raw_body: body.to_string(),
            status: StatusCode::OK,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_without_delete() {
        let cache = ResponseCache::new(10);
        cache.set("k", "/y", payload("a"), Duration::from_millis(50));

        assert!(cache.get("k").is_some());
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(cache.get("k").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_fewest_hits_then_oldest() {
        let cache = ResponseCache::new(3);
        let ttl = Duration::from_secs(60);

        cache.set("a", "/a", payload("a"), ttl);
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set("b", "/b", payload("b"), ttl);
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set("c", "/c", payload("c"), ttl);

        cache.get("a");
        cache.set("d", "/d", payload("d"), ttl);

        // "b" and "c" both have zero hits; "b" is older.
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
        assert_eq!(cache.stats().entries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_evicted_first() {
        let cache = ResponseCache::new(2);

        cache.set("short", "/s", payload("s"), Duration::from_millis(10));
        cache.set("long", "/l", payload("l"), Duration::from_secs(60));
        cache.get("short");
        tokio::time::advance(Duration::from_millis(20)).await;

        cache.set("new", "/n", payload("n"), Duration::from_secs(60));
        assert!(cache.get("long").is_some());
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = ResponseCache::new(1);
        cache.set("a", "/a", payload("1"), Duration::from_secs(60));
        cache.set("a", "/a", payload("2"), Duration::from_secs(60));

        assert_eq!(cache.get("a").unwrap().raw_body, "2");
    }

    #[test]
    fn test_clear_resets_statistics() {
        let cache = ResponseCache::new(4);
        cache.set("a", "/a", payload("abc"), Duration::from_secs(60));
        cache.get("a");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hit_rate, 0.5);
        assert!(stats.estimated_bytes >= 3);

        cache.clear();
        let stats = cache.stats();
        assert_eq!((stats.entries, stats.hits, stats.misses), (0, 0, 0));
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn test_invalidate_endpoint_drops_all_param_variants() {
        let cache = ResponseCache::new(8);
        let mut page_one = BTreeMap::new();
        page_one.insert("page".to_string(), "1".to_string());
        let mut page_two = BTreeMap::new();
        page_two.insert("page".to_string(), "2".to_string());

        let k1 = cache_key(&Method::GET, "/sites", &page_one);
        let k2 = cache_key(&Method::GET, "/sites", &page_two);
        let k3 = cache_key(&Method::GET, "/alerts", &BTreeMap::new());
        cache.set(&k1, "/sites", payload("1"), Duration::from_secs(60));
        cache.set(&k2, "/sites", payload("2"), Duration::from_secs(60));
        cache.set(&k3, "/alerts", payload("3"), Duration::from_secs(60));

        assert_eq!(cache.invalidate_endpoint("/sites"), 2);
        assert!(cache.get(&k3).is_some());
        assert!(cache.delete(&k3));
        assert!(!cache.delete(&k3));
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let mut params = BTreeMap::new();
        params.insert("b".to_string(), "2".to_string());
        params.insert("a".to_string(), "1".to_string());

        let key = cache_key(&Method::GET, "/sites", &params);
        assert_eq!(key, cache_key(&Method::GET, "/sites", &params.clone()));
        assert_ne!(key, cache_key(&Method::GET, "/sites", &BTreeMap::new()));
        assert_ne!(key, cache_key(&Method::POST, "/sites", &params));
        assert_eq!(key.len(), 64);
    }
}
