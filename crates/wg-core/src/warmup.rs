//! Media warm-up job scoring and dedup-aware queue.
//!
//! Jobs are scored once on enqueue; the queue is re-sorted by score every
//! ten enqueues (not after every single one — re-sorting on every push
//! would be wasted work for a worker pool that only pops a handful at a
//! time).

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use wg_protocol::MediaKind;

pub const RESORT_INTERVAL: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WarmupKey {
    pub tenant: String,
    pub sha256: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone)]
pub struct WarmupJob {
    pub key: WarmupKey,
    pub size_bytes: u64,
    pub enqueued_at: Instant,
    score: f64,
}

/// Lower score pops first: smaller size scores lower, photos score lower
/// than videos, and more-recently-enqueued jobs score lower than older
/// ones (so the queue favors small-photo, freshly-requested jobs).
fn score(kind: MediaKind, size_bytes: u64, enqueued_at: Instant, now: Instant) -> f64 {
    let size_component = size_bytes as f64;
    let kind_component = match kind {
        MediaKind::Photo => 0.0,
        MediaKind::Video => 1.0,
        MediaKind::Audio => 1.0,
        MediaKind::Document => 1.0,
    } * 1_000_000_000.0;
    let age_component = now.saturating_duration_since(enqueued_at).as_secs_f64();
    size_component + kind_component + age_component
}

pub struct WarmupQueue {
    jobs: VecDeque<WarmupJob>,
    in_flight: HashSet<WarmupKey>,
    enqueues_since_resort: u32,
    capacity: usize,
}

impl WarmupQueue {
    pub fn new(capacity: usize) -> Self {
        Self { jobs: VecDeque::new(), in_flight: HashSet::new(), enqueues_since_resort: 0, capacity }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Enqueues a job unless an equivalent one is already queued or
    /// in-flight, or the queue is at capacity. Returns whether a job was
    /// actually enqueued.
    pub fn enqueue(&mut self, key: WarmupKey, size_bytes: u64, now: Instant) -> bool {
        if self.in_flight.contains(&key) || self.jobs.iter().any(|j| j.key == key) {
            return false;
        }
        if self.jobs.len() >= self.capacity {
            return false;
        }

        let job_score = score(key.kind, size_bytes, now, now);
        self.jobs.push_back(WarmupJob { key, size_bytes, enqueued_at: now, score: job_score });

        self.enqueues_since_resort += 1;
        if self.enqueues_since_resort >= RESORT_INTERVAL {
            self.resort(now);
            self.enqueues_since_resort = 0;
        }
        true
    }

    fn resort(&mut self, now: Instant) {
        let mut jobs: Vec<_> = self.jobs.drain(..).collect();
        for job in &mut jobs {
            job.score = score(job.key.kind, job.size_bytes, job.enqueued_at, now);
        }
        jobs.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap());
        self.jobs = jobs.into();
    }

    /// Pops the highest-priority (lowest score) job and marks it in-flight.
    pub fn pop(&mut self) -> Option<WarmupJob> {
        let (idx, _) = self.jobs.iter().enumerate().min_by(|(_, a), (_, b)| a.score.partial_cmp(&b.score).unwrap())?;
        let job = self.jobs.remove(idx)?;
        self.in_flight.insert(job.key.clone());
        Some(job)
    }

    /// Clears the in-flight marker once a job completes (success or error),
    /// allowing the same key to be enqueued again.
    pub fn complete(&mut self, key: &WarmupKey) {
        self.in_flight.remove(key);
    }

    pub fn is_in_flight(&self, key: &WarmupKey) -> bool {
        self.in_flight.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(sha: &str, kind: MediaKind) -> WarmupKey {
        WarmupKey { tenant: "t1".to_owned(), sha256: sha.to_owned(), kind }
    }

    #[test]
    fn duplicate_queued_job_is_a_no_op() {
        let mut q = WarmupQueue::new(500);
        let now = Instant::now();
        assert!(q.enqueue(key("a", MediaKind::Photo), 100, now));
        assert!(!q.enqueue(key("a", MediaKind::Photo), 100, now));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn duplicate_in_flight_job_is_a_no_op() {
        let mut q = WarmupQueue::new(500);
        let now = Instant::now();
        q.enqueue(key("a", MediaKind::Photo), 100, now);
        q.pop();
        assert!(q.is_in_flight(&key("a", MediaKind::Photo)));
        assert!(!q.enqueue(key("a", MediaKind::Photo), 100, now));
    }

    #[test]
    fn completing_a_job_allows_requeue() {
        let mut q = WarmupQueue::new(500);
        let now = Instant::now();
        q.enqueue(key("a", MediaKind::Photo), 100, now);
        q.pop();
        q.complete(&key("a", MediaKind::Photo));
        assert!(q.enqueue(key("a", MediaKind::Photo), 100, now));
    }

    #[test]
    fn capacity_limits_enqueue() {
        let mut q = WarmupQueue::new(2);
        let now = Instant::now();
        assert!(q.enqueue(key("a", MediaKind::Photo), 1, now));
        assert!(q.enqueue(key("b", MediaKind::Photo), 1, now));
        assert!(!q.enqueue(key("c", MediaKind::Photo), 1, now));
    }

    #[test]
    fn smaller_photo_pops_before_larger_video() {
        let mut q = WarmupQueue::new(500);
        let now = Instant::now();
        q.enqueue(key("big-video", MediaKind::Video), 50_000, now);
        q.enqueue(key("small-photo", MediaKind::Photo), 500, now);
        let first = q.pop().unwrap();
        assert_eq!(first.key.sha256, "small-photo");
    }

    #[test]
    fn resort_triggers_every_ten_enqueues() {
        let mut q = WarmupQueue::new(500);
        let now = Instant::now();
        for i in 0..10 {
            q.enqueue(key(&format!("k{i}"), MediaKind::Document), 1, now);
        }
        assert_eq!(q.enqueues_since_resort, 0);
    }
}
