//! Generic idle-eviction sweep shared by the send queue's bucket/back-off
//! maps and the per-tenant heartbeat's last-send tracking.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const IDLE_EVICTION_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// Removes every entry whose `last_touched` is older than the idle
/// threshold. Returns the number of entries evicted.
pub fn evict_idle<K, V>(map: &mut HashMap<K, V>, last_touched: impl Fn(&V) -> Instant, now: Instant) -> usize
where
    K: std::hash::Hash + Eq + Clone,
{
    let stale: Vec<K> = map
        .iter()
        .filter(|(_, v)| now.saturating_duration_since(last_touched(v)) >= IDLE_EVICTION_THRESHOLD)
        .map(|(k, _)| k.clone())
        .collect();
    let count = stale.len();
    for k in stale {
        map.remove(&k);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_only_entries_idle_past_the_threshold() {
        let now = Instant::now();
        let mut map: HashMap<i64, Instant> = HashMap::new();
        map.insert(1, now - IDLE_EVICTION_THRESHOLD - Duration::from_secs(1));
        map.insert(2, now - Duration::from_secs(5));

        let evicted = evict_idle(&mut map, |v| *v, now);
        assert_eq!(evicted, 1);
        assert!(!map.contains_key(&1));
        assert!(map.contains_key(&2));
    }

    #[test]
    fn boundary_is_inclusive() {
        let now = Instant::now();
        let mut map: HashMap<i64, Instant> = HashMap::new();
        map.insert(1, now - IDLE_EVICTION_THRESHOLD);
        assert_eq!(evict_idle(&mut map, |v| *v, now), 1);
    }

    #[test]
    fn no_entries_evicted_when_all_fresh() {
        let now = Instant::now();
        let mut map: HashMap<i64, Instant> = HashMap::new();
        map.insert(1, now);
        assert_eq!(evict_idle(&mut map, |v| *v, now), 0);
    }
}
