//! Exercises the priority send queue end to end as a consumer outside
//! `wg_core` would: strict priority ordering across recipients, and the
//! 429 back-off window delaying a recipient's next dispatch.

use std::time::{Duration, Instant};
use wg_core::send_queue::{DrainAction, Priority, SendOutcome, SendQueue};

#[test]
fn strict_priority_drains_start_before_shot_before_downsell_across_distinct_recipients() {
    let now = Instant::now();
    let mut q: SendQueue<&str> = SendQueue::new(now);

    // Four jobs, four distinct recipients, enqueued out of priority order.
    q.enqueue(Priority::Downsell, 1, "a", now);
    q.enqueue(Priority::Shot, 2, "b", now);
    q.enqueue(Priority::Start, 3, "c", now);
    q.enqueue(Priority::Downsell, 4, "d", now);

    let mut order = Vec::new();
    for _ in 0..4 {
        match q.drain_step(now) {
            DrainAction::Dispatch { handle, item } => {
                order.push(item.payload);
                q.record_result(handle, item, SendOutcome::Success, now);
            }
            _ => panic!("expected a dispatch with plenty of burst capacity left"),
        }
    }

    assert_eq!(order, vec!["c", "b", "a", "d"]);
}

#[test]
fn a_429_with_a_retry_after_hint_blocks_that_recipient_until_the_window_elapses() {
    let now = Instant::now();
    let mut q: SendQueue<&str> = SendQueue::new(now);

    q.enqueue(Priority::Shot, 100, "rate-limited-recipient", now);

    let DrainAction::Dispatch { handle, item } = q.drain_step(now) else { panic!("expected an immediate dispatch") };
    q.record_result(handle, item, SendOutcome::RateLimited { retry_after_secs: Some(2) }, now);

    // Re-enqueuing the same recipient immediately after the 429 must not
    // redispatch before the retry-after window elapses.
    q.enqueue(Priority::Shot, 100, "retry", now);
    match q.drain_step(now) {
        DrainAction::WaitFor(_) => {}
        _ => panic!("expected the back-off to block this recipient"),
    }

    let still_too_early = now + Duration::from_millis(1999);
    match q.drain_step(still_too_early) {
        DrainAction::WaitFor(_) => {}
        _ => panic!("1ms before the window elapses this recipient must still be blocked"),
    }

    let after_window = now + Duration::from_millis(2001);
    let DrainAction::Dispatch { item, .. } = q.drain_step(after_window) else {
        panic!("recipient should be dispatchable again once the retry-after window has elapsed")
    };
    // The rate-limited item was re-pushed to the head of its priority FIFO
    // on the 429, so it dequeues ahead of the one enqueued after it.
    assert_eq!(item.payload, "rate-limited-recipient");
}

#[test]
fn repeated_429s_without_a_hint_double_the_delay_each_time() {
    let now = Instant::now();
    let mut q: SendQueue<&str> = SendQueue::new(now);
    q.enqueue(Priority::Shot, 5, "x", now);

    let DrainAction::Dispatch { handle, item } = q.drain_step(now) else { panic!("expected an immediate dispatch") };
    q.record_result(handle, item, SendOutcome::RateLimited { retry_after_secs: None }, now);

    // 1.5s initial backoff: not yet elapsed at +1s.
    match q.drain_step(now + Duration::from_secs(1)) {
        DrainAction::Dispatch { .. } => panic!("expected the initial 1.5s backoff to still be in effect"),
        _ => {}
    }

    let after_first_backoff = now + Duration::from_millis(1600);
    let DrainAction::Dispatch { handle, item } = q.drain_step(after_first_backoff) else {
        panic!("expected a dispatch once the initial backoff elapsed")
    };
    q.record_result(handle, item, SendOutcome::RateLimited { retry_after_secs: None }, after_first_backoff);

    // Second consecutive 429 without a hint doubles the delay to ~3s: not
    // yet elapsed 2s after the second 429.
    let too_early_for_doubled_backoff = after_first_backoff + Duration::from_millis(2000);
    match q.drain_step(too_early_for_doubled_backoff) {
        DrainAction::Dispatch { .. } => panic!("expected the doubled ~3s backoff to still be in effect"),
        _ => {}
    }

    let after_doubled_backoff = after_first_backoff + Duration::from_millis(3100);
    match q.drain_step(after_doubled_backoff) {
        DrainAction::Dispatch { item, .. } => assert_eq!(item.payload, "x"),
        _ => panic!("expected a dispatch once the doubled backoff elapsed"),
    }
}
