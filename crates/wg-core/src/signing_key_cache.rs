//! TTL cache for AWS SigV4 derived signing keys (`kSigning`), keyed by
//! (date, region, service). Self-evicting: a lookup past the TTL behaves
//! as a miss and the stale entry is dropped in the same call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const SIGNING_KEY_TTL: Duration = Duration::from_secs(23 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SigningKeyCacheKey {
    pub date: String,
    pub region: String,
    pub service: String,
}

struct Entry {
    key: Vec<u8>,
    inserted_at: Instant,
}

#[derive(Default)]
pub struct SigningKeyCache {
    entries: HashMap<SigningKeyCacheKey, Entry>,
}

impl SigningKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached signing key if present and not past its 23h TTL.
    /// An expired entry is evicted as a side effect of the lookup.
    pub fn get(&mut self, key: &SigningKeyCacheKey, now: Instant) -> Option<Vec<u8>> {
        let expired = self.entries.get(key).is_some_and(|e| now.saturating_duration_since(e.inserted_at) >= SIGNING_KEY_TTL);
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.key.clone())
    }

    pub fn insert(&mut self, key: SigningKeyCacheKey, signing_key: Vec<u8>, now: Instant) {
        self.entries.insert(key, Entry { key: signing_key, inserted_at: now });
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

    fn key() -> SigningKeyCacheKey {
        SigningKeyCacheKey { date: "20260728".to_owned(), region: "auto".to_owned(), service: "s3".to_owned() }
    }

    #[test]
    fn hit_within_ttl() {
        let mut cache = SigningKeyCache::new();
        let now = Instant::now();
        cache.insert(key(), vec![1, 2, 3], now);
        assert_eq!(cache.get(&key(), now + Duration::from_secs(60)), Some(vec![1, 2, 3]));
    }

    #[test]
    fn miss_and_self_evict_past_ttl() {
        let mut cache = SigningKeyCache::new();
        let now = Instant::now();
        cache.insert(key(), vec![1, 2, 3], now);
        let past_ttl = now + SIGNING_KEY_TTL + Duration::from_secs(1);
        assert_eq!(cache.get(&key(), past_ttl), None);
        assert!(cache.is_empty(), "expired entry should have been evicted by the lookup");
    }

    #[test]
    fn miss_for_unknown_key() {
        let mut cache = SigningKeyCache::new();
        assert_eq!(cache.get(&key(), Instant::now()), None);
    }
}
