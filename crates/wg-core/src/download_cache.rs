//! Local LRU-ish download cache fronting the object store: bounded at 50
//! entries by default, 5-minute TTL, and a distinctive eviction rule —
//! once over capacity, it drops the oldest 20% in one sweep rather than
//! evicting one entry per insert.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_CAPACITY: usize = 50;
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

struct Entry {
    buffer: Vec<u8>,
    inserted_at: Instant,
}

pub struct DownloadCache {
    entries: HashMap<String, Entry>,
    capacity: usize,
    ttl: Duration,
}

impl DownloadCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { entries: HashMap::new(), capacity, ttl }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the cached buffer if present and not past TTL. An expired
    /// hit is treated as a miss and evicted immediately.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<Vec<u8>> {
        let expired = self.entries.get(key).is_some_and(|e| now.saturating_duration_since(e.inserted_at) >= self.ttl);
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.buffer.clone())
    }

    /// Inserts a downloaded buffer; if the cache is over capacity after
    /// the insert, drops the oldest 20% in one sweep.
    pub fn insert(&mut self, key: String, buffer: Vec<u8>, now: Instant) {
        self.entries.insert(key, Entry { buffer, inserted_at: now });
        if self.entries.len() > self.capacity {
            self.evict_oldest_20_percent();
        }
    }

    fn evict_oldest_20_percent(&mut self) {
        let drop_count = (self.entries.len() as f64 * 0.2).ceil() as usize;
        let mut by_age: Vec<(String, Instant)> = self.entries.iter().map(|(k, v)| (k.clone(), v.inserted_at)).collect();
        by_age.sort_by_key(|(_, inserted_at)| *inserted_at);
        for (key, _) in by_age.into_iter().take(drop_count) {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_ttl_miss_past_ttl() {
        let mut cache = DownloadCache::new(50, DEFAULT_TTL);
        let now = Instant::now();
        cache.insert("k".to_owned(), vec![1, 2, 3], now);
        assert_eq!(cache.get("k", now + Duration::from_secs(60)), Some(vec![1, 2, 3]));
        assert_eq!(cache.get("k", now + DEFAULT_TTL + Duration::from_secs(1)), None);
    }

    #[test]
    fn over_capacity_drops_oldest_20_percent() {
        let mut cache = DownloadCache::new(50, DEFAULT_TTL);
        let now = Instant::now();
        for i in 0..50 {
            cache.insert(format!("k{i}"), vec![0], now + Duration::from_secs(i));
        }
        assert_eq!(cache.len(), 50);

        cache.insert("k50".to_owned(), vec![0], now + Duration::from_secs(50));
        // 51 entries over a capacity of 50 triggers eviction of ceil(51*0.2) = 11,
        // leaving 40; the oldest keys (k0..k10) should be gone.
        assert_eq!(cache.len(), 40);
        assert!(cache.get("k0", now + Duration::from_secs(50)).is_none());
        assert!(cache.get("k49", now + Duration::from_secs(50)).is_some());
    }

    #[test]
    fn under_capacity_never_evicts() {
        let mut cache = DownloadCache::new(50, DEFAULT_TTL);
        let now = Instant::now();
        for i in 0..10 {
            cache.insert(format!("k{i}"), vec![0], now);
        }
        assert_eq!(cache.len(), 10);
    }
}
