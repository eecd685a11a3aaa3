//! Pure domain logic for the outbound messaging gateway.
//!
//! Every module here is free of IO and of its own clock — callers pass
//! `Instant`/`DateTime` values in explicitly, which makes the hardest
//! algorithms (the send queue's token buckets and back-off, the warm-up
//! scorer, the broadcast state machine) exhaustively unit-testable
//! without a runtime.

pub mod broadcast_fsm;
pub mod download_cache;
pub mod eligibility;
pub mod rate_limiter_gc;
pub mod send_queue;
pub mod signing_key_cache;
pub mod token_crypto;
pub mod warmup;
