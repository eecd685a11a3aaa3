//! The priority send queue: three strict-priority FIFOs, a global token
//! bucket, per-recipient token buckets, 429 back-off, and the fallback
//! throttle that kicks in after repeated rate-limiting.
//!
//! This module is pure — no IO, no clock of its own. Callers drive it by
//! passing `Instant::now()` in and executing the `DrainAction` it returns;
//! the async loop that performs the actual upstream call lives in the
//! gateway service.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub const GLOBAL_SUSTAINED_RATE: f64 = 30.0;
pub const PER_RECIPIENT_SUSTAINED_RATE: f64 = 5.0;
pub const BUCKET_BURST: f64 = 10.0;

pub const BACKOFF_INITIAL: Duration = Duration::from_millis(1500);
pub const BACKOFF_FACTOR: u32 = 2;
pub const BACKOFF_CAP: Duration = Duration::from_secs(15);

pub const FALLBACK_THRESHOLD: u32 = 3;
pub const FALLBACK_INITIAL_RPS: f64 = 1.0;
pub const FALLBACK_RECOVERY_INTERVAL: Duration = Duration::from_secs(60);

pub const EMPTY_BUCKET_RETRY_AFTER: Duration = Duration::from_millis(100);
pub const MAX_RATE_LIMIT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Start,
    Shot,
    Downsell,
}

impl Priority {
    const ALL: [Priority; 3] = [Priority::Start, Priority::Shot, Priority::Downsell];

    /// Smaller rank is higher priority: START=1, SHOT=2, DOWNSELL=3.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Start => 1,
            Priority::Shot => 2,
            Priority::Downsell => 3,
        }
    }
}

pub type RecipientId = i64;

/// A lazily-refilled token bucket. `refill` computes `elapsed * rate`
/// whenever the bucket is touched rather than on a background timer.
#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_per_sec: f64, capacity: f64, now: Instant) -> Self {
        Self { tokens: capacity, capacity, rate_per_sec, last_refill: now }
    }

    fn refill(&mut self, now: Instant, rate_per_sec: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(self.capacity);
        self.last_refill = now;
        self.rate_per_sec = rate_per_sec;
    }

    fn try_take(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BackoffRecord {
    until: Instant,
    current_delay: Duration,
    consecutive_429s: u32,
}

#[derive(Debug, Clone, Copy)]
struct FallbackRecord {
    started_at: Instant,
    current_rps: f64,
}

impl FallbackRecord {
    /// Effective rps after bumping +1 per elapsed 60s cycle since start,
    /// capped at the nominal per-recipient rate.
    fn effective_rps(&self, now: Instant, nominal: f64) -> f64 {
        let cycles = (now.saturating_duration_since(self.started_at).as_secs_f64()
            / FALLBACK_RECOVERY_INTERVAL.as_secs_f64())
        .floor();
        (self.current_rps + cycles).min(nominal)
    }

    fn has_recovered(&self, now: Instant, nominal: f64) -> bool {
        self.effective_rps(now, nominal) >= nominal
    }
}

#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    pub recipient: RecipientId,
    pub payload: T,
    pub enqueued_at: Instant,
    attempts: u32,
}

/// The outcome a callback reports back to `record_result`.
#[derive(Debug, Clone, Copy)]
pub enum SendOutcome {
    Success,
    RateLimited { retry_after_secs: Option<u64> },
    OtherFailure,
}

/// What the caller should do after a drain tick.
pub enum DrainAction<T> {
    /// Dispatch this item now: call the upstream, then report back via
    /// `record_result` with the handle and the eventual outcome.
    Dispatch { handle: DispatchHandle, item: QueueItem<T> },
    /// Nothing ready; try again after this delay.
    WaitFor(Duration),
    /// All FIFOs are empty.
    Idle,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchHandle {
    pub priority: Priority,
    pub recipient: RecipientId,
}

pub struct SendQueue<T> {
    fifos: HashMap<Priority, VecDeque<QueueItem<T>>>,
    global_bucket: TokenBucket,
    recipient_buckets: HashMap<RecipientId, TokenBucket>,
    backoffs: HashMap<RecipientId, BackoffRecord>,
    fallbacks: HashMap<RecipientId, FallbackRecord>,
}

impl<T> SendQueue<T> {
    pub fn new(now: Instant) -> Self {
        let mut fifos = HashMap::new();
        for p in Priority::ALL {
            fifos.insert(p, VecDeque::new());
        }
        Self {
            fifos,
            global_bucket: TokenBucket::new(GLOBAL_SUSTAINED_RATE, BUCKET_BURST, now),
            recipient_buckets: HashMap::new(),
            backoffs: HashMap::new(),
            fallbacks: HashMap::new(),
        }
    }

    pub fn enqueue(&mut self, priority: Priority, recipient: RecipientId, payload: T, now: Instant) {
        self.fifos.get_mut(&priority).expect("all priorities initialized").push_back(QueueItem {
            recipient,
            payload,
            enqueued_at: now,
            attempts: 0,
        });
    }

    pub fn len(&self, priority: Priority) -> usize {
        self.fifos[&priority].len()
    }

    pub fn is_empty(&self) -> bool {
        Priority::ALL.iter().all(|p| self.fifos[p].is_empty())
    }

    /// Effective per-recipient rate right now: nominal, unless an
    /// unexpired fallback record overrides it.
    fn effective_recipient_rate(&self, recipient: RecipientId, now: Instant) -> f64 {
        match self.fallbacks.get(&recipient) {
            Some(f) if !f.has_recovered(now, PER_RECIPIENT_SUSTAINED_RATE) => {
                f.effective_rps(now, PER_RECIPIENT_SUSTAINED_RATE)
            }
            _ => PER_RECIPIENT_SUSTAINED_RATE,
        }
    }

    fn prune_recovered_fallback(&mut self, recipient: RecipientId, now: Instant) {
        if let Some(f) = self.fallbacks.get(&recipient) {
            if f.has_recovered(now, PER_RECIPIENT_SUSTAINED_RATE) {
                self.fallbacks.remove(&recipient);
            }
        }
    }

    /// Runs one drain step. Mutates bucket/back-off state; never awaits.
    /// Peeks the global bucket without consuming it — the token is only
    /// spent once a recipient is actually found eligible to dispatch, so a
    /// step that ends up re-appending an item doesn't leak a global token.
    pub fn drain_step(&mut self, now: Instant) -> DrainAction<T> {
        self.global_bucket.refill(now, GLOBAL_SUSTAINED_RATE);
        if self.global_bucket.tokens < 1.0 {
            return DrainAction::WaitFor(EMPTY_BUCKET_RETRY_AFTER);
        }

        let Some(priority) = Priority::ALL.into_iter().find(|p| !self.fifos[p].is_empty()) else {
            return DrainAction::Idle;
        };

        let mut item = self.fifos.get_mut(&priority).unwrap().pop_front().unwrap();

        if let Some(backoff) = self.backoffs.get(&item.recipient) {
            if now < backoff.until {
                self.fifos.get_mut(&priority).unwrap().push_back(item);
                return DrainAction::WaitFor(EMPTY_BUCKET_RETRY_AFTER);
            }
        }

        self.prune_recovered_fallback(item.recipient, now);
        let recipient_rate = self.effective_recipient_rate(item.recipient, now);
        let bucket = self
            .recipient_buckets
            .entry(item.recipient)
            .or_insert_with(|| TokenBucket::new(recipient_rate, BUCKET_BURST, now));
        bucket.refill(now, recipient_rate);
        if !bucket.try_take() {
            self.fifos.get_mut(&priority).unwrap().push_back(item);
            return DrainAction::WaitFor(EMPTY_BUCKET_RETRY_AFTER);
        }

        self.global_bucket.tokens -= 1.0;
        item.attempts += 1;
        DrainAction::Dispatch { handle: DispatchHandle { priority, recipient: item.recipient }, item }
    }

    /// Evicts per-recipient buckets, back-off records, and fallback
    /// records that have gone untouched past the idle threshold, so a
    /// recipient who stops receiving sends doesn't leak state forever.
    /// Invoked periodically by the gateway's rate-limiter GC loop, never
    /// from inside `drain_step`/`record_result` themselves.
    pub fn gc_idle(&mut self, now: Instant) -> usize {
        let mut evicted = crate::rate_limiter_gc::evict_idle(&mut self.recipient_buckets, |b| b.last_refill, now);
        evicted += crate::rate_limiter_gc::evict_idle(&mut self.backoffs, |b| b.until, now);
        evicted += crate::rate_limiter_gc::evict_idle(&mut self.fallbacks, |f| f.started_at, now);
        evicted
    }

    /// Reports the outcome of a dispatched callback. On `RateLimited`,
    /// applies back-off/fallback and, if under the attempt cap, re-pushes
    /// to the *head* of the item's priority FIFO to preserve ordering.
    pub fn record_result(&mut self, handle: DispatchHandle, item: QueueItem<T>, outcome: SendOutcome, now: Instant) {
        match outcome {
            SendOutcome::Success => {
                self.backoffs.remove(&handle.recipient);
            }
            SendOutcome::OtherFailure => {}
            SendOutcome::RateLimited { retry_after_secs } => {
                self.apply_backoff(handle.recipient, retry_after_secs, now);
                if item.attempts < MAX_RATE_LIMIT_ATTEMPTS {
                    self.fifos.get_mut(&handle.priority).unwrap().push_front(item);
                }
                // else: dropped; caller logs.
            }
        }
    }

    fn apply_backoff(&mut self, recipient: RecipientId, retry_after_secs: Option<u64>, now: Instant) {
        let prior = self.backoffs.get(&recipient).copied();
        let delay = match retry_after_secs {
            Some(secs) => Duration::from_secs(secs),
            None => match prior {
                Some(p) => (p.current_delay * BACKOFF_FACTOR).min(BACKOFF_CAP),
                None => BACKOFF_INITIAL,
            },
        };
        let consecutive = prior.map_or(1, |p| p.consecutive_429s + 1);

        self.backoffs.insert(
            recipient,
            BackoffRecord { until: now + delay, current_delay: delay, consecutive_429s: consecutive },
        );

        if consecutive >= FALLBACK_THRESHOLD && !self.fallbacks.contains_key(&recipient) {
            self.fallbacks.insert(recipient, FallbackRecord { started_at: now, current_rps: FALLBACK_INITIAL_RPS });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> Instant {
        Instant::now()
    }

    #[test]
    fn strict_priority_across_levels_at_dequeue() {
        let now = t0();
        let mut q: SendQueue<&str> = SendQueue::new(now);
        q.enqueue(Priority::Downsell, 1, "d1", now);
        q.enqueue(Priority::Shot, 1, "s1", now);
        q.enqueue(Priority::Start, 1, "st1", now);

        let mut dispatched = Vec::new();
        for _ in 0..3 {
            match q.drain_step(now) {
                DrainAction::Dispatch { handle, item } => {
                    dispatched.push(item.payload);
                    q.record_result(handle, item, SendOutcome::Success, now);
                }
                _ => panic!("expected dispatch, got a wait/idle action instead"),
            }
        }
        assert_eq!(dispatched, vec!["st1", "s1", "d1"]);
    }

    #[test]
    fn fifo_order_preserved_within_a_priority_level() {
        let now = t0();
        let mut q: SendQueue<&str> = SendQueue::new(now);
        q.enqueue(Priority::Shot, 1, "first", now);
        q.enqueue(Priority::Shot, 2, "second", now);

        let DrainAction::Dispatch { item, .. } = q.drain_step(now) else { panic!("expected dispatch") };
        assert_eq!(item.payload, "first");
    }

    #[test]
    fn global_bucket_exhaustion_yields_wait() {
        let now = t0();
        let mut q: SendQueue<&str> = SendQueue::new(now);
        for i in 0..(BUCKET_BURST as i64 + 1) {
            q.enqueue(Priority::Shot, i, "x", now);
        }
        for _ in 0..BUCKET_BURST as i64 {
            match q.drain_step(now) {
                DrainAction::Dispatch { handle, item } => q.record_result(handle, item, SendOutcome::Success, now),
                _ => panic!("expected the burst capacity to be dispatchable immediately"),
            }
        }
        match q.drain_step(now) {
            DrainAction::WaitFor(d) => assert_eq!(d, EMPTY_BUCKET_RETRY_AFTER),
            _ => panic!("expected a wait once the global bucket is drained"),
        }
    }

    #[test]
    fn recipient_in_backoff_is_reappended_to_tail_of_same_priority() {
        let now = t0();
        let mut q: SendQueue<&str> = SendQueue::new(now);
        q.enqueue(Priority::Shot, 1, "blocked", now);
        q.enqueue(Priority::Shot, 2, "other", now);

        let DrainAction::Dispatch { handle, item } = q.drain_step(now) else { panic!() };
        assert_eq!(item.payload, "blocked");
        q.record_result(handle, item, SendOutcome::RateLimited { retry_after_secs: Some(30) }, now);

        // "other" should now come first; "blocked" is behind until and at the tail.
        let DrainAction::Dispatch { item, .. } = q.drain_step(now) else { panic!() };
        assert_eq!(item.payload, "other");
    }

    #[test]
    fn rate_limited_item_jumps_to_head_not_tail() {
        let now = t0();
        let mut q: SendQueue<&str> = SendQueue::new(now);
        q.enqueue(Priority::Shot, 1, "a", now);
        q.enqueue(Priority::Shot, 2, "b", now);

        let DrainAction::Dispatch { handle, item } = q.drain_step(now) else { panic!() };
        assert_eq!(item.payload, "a");
        // "a" gets rate-limited with no retry-after hint: uses the initial backoff,
        // and because that backoff is in the future it won't be redispatched yet.
        q.record_result(handle, item, SendOutcome::RateLimited { retry_after_secs: None }, now);

        let DrainAction::Dispatch { item, .. } = q.drain_step(now) else { panic!() };
        assert_eq!(item.payload, "b");

        // After the backoff window elapses, "a" dequeues ahead of anything
        // enqueued after it because it was re-pushed to the priority head.
        let later = now + BACKOFF_INITIAL + Duration::from_millis(1);
        q.enqueue(Priority::Shot, 3, "c", later);
        let DrainAction::Dispatch { item, .. } = q.drain_step(later) else { panic!() };
        assert_eq!(item.payload, "a");
    }

    #[test]
    fn backoff_doubles_and_caps_at_15s_without_retry_after_hint() {
        let now = t0();
        let mut q: SendQueue<&str> = SendQueue::new(now);
        q.apply_backoff(1, None, now);
        assert_eq!(q.backoffs[&1].current_delay, BACKOFF_INITIAL);
        q.apply_backoff(1, None, now);
        assert_eq!(q.backoffs[&1].current_delay, BACKOFF_INITIAL * 2);
        for _ in 0..10 {
            q.apply_backoff(1, None, now);
        }
        assert_eq!(q.backoffs[&1].current_delay, BACKOFF_CAP);
    }

    #[test]
    fn third_consecutive_429_triggers_fallback_at_1rps() {
        let now = t0();
        let mut q: SendQueue<&str> = SendQueue::new(now);
        q.apply_backoff(7, Some(1), now);
        q.apply_backoff(7, Some(1), now);
        assert!(!q.fallbacks.contains_key(&7));
        q.apply_backoff(7, Some(1), now);
        let fallback = q.fallbacks.get(&7).expect("fallback should exist after 3rd consecutive 429");
        assert_eq!(fallback.current_rps, FALLBACK_INITIAL_RPS);
    }

    #[test]
    fn fallback_recovers_by_one_rps_per_60s_cycle_until_nominal() {
        let now = t0();
        let record = FallbackRecord { started_at: now, current_rps: 1.0 };
        assert_eq!(record.effective_rps(now, PER_RECIPIENT_SUSTAINED_RATE), 1.0);
        let after_one_cycle = now + FALLBACK_RECOVERY_INTERVAL;
        assert_eq!(record.effective_rps(after_one_cycle, PER_RECIPIENT_SUSTAINED_RATE), 2.0);
        let after_many_cycles = now + FALLBACK_RECOVERY_INTERVAL * 10;
        assert_eq!(record.effective_rps(after_many_cycles, PER_RECIPIENT_SUSTAINED_RATE), PER_RECIPIENT_SUSTAINED_RATE);
        assert!(record.has_recovered(after_many_cycles, PER_RECIPIENT_SUSTAINED_RATE));
    }

    #[test]
    fn success_clears_backoff_record() {
        let now = t0();
        let mut q: SendQueue<&str> = SendQueue::new(now);
        q.apply_backoff(1, Some(0), now);
        assert!(q.backoffs.contains_key(&1));
        q.enqueue(Priority::Shot, 1, "x", now);
        let DrainAction::Dispatch { handle, item } = q.drain_step(now) else { panic!() };
        q.record_result(handle, item, SendOutcome::Success, now);
        assert!(!q.backoffs.contains_key(&1));
    }

    #[test]
    fn gc_idle_evicts_only_recipients_untouched_past_the_threshold() {
        let now = t0();
        let mut q: SendQueue<&str> = SendQueue::new(now);
        q.enqueue(Priority::Shot, 1, "idle", now);
        let DrainAction::Dispatch { handle, item } = q.drain_step(now) else { panic!() };
        q.record_result(handle, item, SendOutcome::Success, now);
        assert!(q.recipient_buckets.contains_key(&1));

        let much_later = now + crate::rate_limiter_gc::IDLE_EVICTION_THRESHOLD + Duration::from_secs(1);
        q.enqueue(Priority::Shot, 2, "fresh", much_later);
        let DrainAction::Dispatch { handle, item } = q.drain_step(much_later) else { panic!() };
        q.record_result(handle, item, SendOutcome::Success, much_later);

        let evicted = q.gc_idle(much_later);
        assert_eq!(evicted, 1);
        assert!(!q.recipient_buckets.contains_key(&1));
        assert!(q.recipient_buckets.contains_key(&2));
    }

    #[test]
    fn dropped_after_max_attempts_is_not_requeued() {
        let now = t0();
        let mut q: SendQueue<&str> = SendQueue::new(now);
        q.enqueue(Priority::Shot, 1, "x", now);
        for attempt in 0..MAX_RATE_LIMIT_ATTEMPTS {
            let DrainAction::Dispatch { handle, item } = q.drain_step(now) else {
                panic!("expected a dispatch on attempt {attempt}")
            };
            q.record_result(handle, item, SendOutcome::RateLimited { retry_after_secs: Some(0) }, now);
        }
        assert!(q.is_empty(), "item should have been dropped after the attempt cap");
    }
}
