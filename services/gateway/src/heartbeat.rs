//! Idle-connection upkeep (spec §4.10): a per-tenant upstream heartbeat
//! that keeps each bot's TLS session warm, and a cheap DB heartbeat that
//! surfaces a dead pool before it shows up as a send failure.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};
use wg_protocol::upstream::UpstreamSendOutcome;

use crate::config::limits;
use crate::repo;
use crate::state::AppState;

/// Runs forever, spawned once from `main.rs`. Every interval, pings every
/// active tenant's upstream identity endpoint with a credential configured.
pub async fn run_upstream_heartbeat_loop(state: Arc<AppState>) {
    loop {
        tokio::time::sleep(jittered_interval()).await;
        if let Err(err) = heartbeat_once(&state).await {
            warn!(error = %err, "upstream heartbeat iteration failed");
        }
    }
}

fn jittered_interval() -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=limits::UPSTREAM_HEARTBEAT_JITTER_MAX.as_millis() as u64);
    limits::UPSTREAM_HEARTBEAT_INTERVAL + Duration::from_millis(jitter_ms)
}

async fn heartbeat_once(state: &AppState) -> Result<(), sqlx::Error> {
    for slug in repo::tenants::list_active_slugs(&state.db).await? {
        let Ok(Some(token)) = state.vault.get(&slug).await else { continue };
        match state.upstream_send.get_me(&token).await {
            UpstreamSendOutcome::Error(kind) => {
                warn!(tenant = %slug, ?kind, "upstream heartbeat failed");
            }
            _ => debug!(tenant = %slug, "upstream heartbeat ok"),
        }
    }
    Ok(())
}

/// Runs forever, spawned once from `main.rs`. A `SELECT 1` is enough to
/// confirm the pool can still reach Postgres; failures are logged, not
/// fatal, since the next send attempt will surface the same error loudly.
pub async fn run_db_heartbeat_loop(state: Arc<AppState>) {
    loop {
        tokio::time::sleep(limits::DB_HEARTBEAT_INTERVAL).await;
        if let Err(err) = sqlx::query("SELECT 1").execute(&state.db).await {
            warn!(error = %err, "database heartbeat failed");
        } else {
            debug!("database heartbeat ok");
        }
    }
}

/// Runs forever, spawned once from `main.rs`. Periodically evicts idle
/// per-recipient rate-limiter state from the send queue so a one-shot
/// recipient's bucket/back-off entry doesn't live forever (spec §9).
pub async fn run_rate_limiter_gc_loop(state: Arc<AppState>) {
    loop {
        tokio::time::sleep(limits::RATE_LIMITER_GC_INTERVAL).await;
        let evicted = state.send_queue.gc_idle();
        if evicted > 0 {
            debug!(evicted, "rate limiter gc swept idle recipients");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_interval_stays_within_bounds() {
        for _ in 0..50 {
            let interval = jittered_interval();
            assert!(interval >= limits::UPSTREAM_HEARTBEAT_INTERVAL);
            assert!(interval <= limits::UPSTREAM_HEARTBEAT_INTERVAL + limits::UPSTREAM_HEARTBEAT_JITTER_MAX);
        }
    }
}
