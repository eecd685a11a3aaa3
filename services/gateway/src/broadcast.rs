//! Broadcast ("shot") lifecycle control: admin-facing state transitions
//! plus the background batch drain that feeds the Send Queue at priority
//! SHOT (spec §4.7).

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;
use wg_core::broadcast_fsm::{apply_transition, BroadcastState, BroadcastTransition, InvalidTransition};

use crate::config::limits;
use crate::errors::GatewayError;
use crate::repo;
use crate::send_queue::{SendJob, SendPurpose};
use crate::state::AppState;

fn parse_state(state: &str) -> BroadcastState {
    match state {
        "draft" => BroadcastState::Draft,
        "queued" => BroadcastState::Queued,
        "sending" => BroadcastState::Sending,
        "paused" => BroadcastState::Paused,
        "completed" => BroadcastState::Completed,
        _ => BroadcastState::Canceled,
    }
}

async fn transition(pool: &PgPool, broadcast_id: Uuid, transition: BroadcastTransition) -> Result<BroadcastState, GatewayError> {
    let row = repo::broadcasts::find(pool, broadcast_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("broadcast {broadcast_id} not found")))?;
    let from = parse_state(&row.state);
    let to = apply_transition(from, transition).map_err(|InvalidTransition { from, transition }| {
        GatewayError::Conflict(format!("cannot apply {transition:?} while broadcast is {from}"))
    })?;
    repo::broadcasts::set_state(pool, broadcast_id, &to.to_string()).await?;
    Ok(to)
}

/// Materialises the audience into `broadcast_queue` and moves the
/// broadcast from `draft` to `queued`.
pub async fn populate(pool: &PgPool, broadcast_id: Uuid) -> Result<i64, GatewayError> {
    let row = repo::broadcasts::find(pool, broadcast_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("broadcast {broadcast_id} not found")))?;
    transition(pool, broadcast_id, BroadcastTransition::Populate).await?;
    let total = repo::broadcasts::populate_audience(pool, broadcast_id, row.tenant_id, &row.audience_selector).await?;
    repo::broadcasts::set_total(pool, broadcast_id, total as i32).await?;
    Ok(total)
}

pub async fn start(pool: &PgPool, broadcast_id: Uuid) -> Result<(), GatewayError> {
    transition(pool, broadcast_id, BroadcastTransition::Start).await?;
    Ok(())
}

pub async fn pause(pool: &PgPool, broadcast_id: Uuid) -> Result<(), GatewayError> {
    transition(pool, broadcast_id, BroadcastTransition::Pause).await?;
    Ok(())
}

pub async fn resume(pool: &PgPool, broadcast_id: Uuid) -> Result<(), GatewayError> {
    transition(pool, broadcast_id, BroadcastTransition::Start).await?;
    Ok(())
}

/// Cancels the broadcast and bulk-skips every row still `pending`.
pub async fn cancel(pool: &PgPool, broadcast_id: Uuid) -> Result<u64, GatewayError> {
    transition(pool, broadcast_id, BroadcastTransition::Cancel).await?;
    Ok(repo::broadcasts::bulk_skip_pending(pool, broadcast_id).await?)
}

/// The batch drain loop; spawned once from `main.rs`. Every tick, walks
/// every `sending` broadcast and enqueues one pending batch each.
pub async fn run_drain_loop(state: Arc<AppState>) {
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if let Err(err) = drain_once(&state).await {
            warn!(error = %err, "broadcast drain iteration failed");
        }
    }
}

async fn drain_once(state: &AppState) -> Result<(), GatewayError> {
    let sending = repo::broadcasts::sending_broadcasts(&state.db).await?;
    for broadcast in sending {
        if let Err(err) = drain_one_broadcast(state, &broadcast).await {
            warn!(broadcast_id = %broadcast.id, error = %err, "failed to drain broadcast batch");
        }
    }
    Ok(())
}

async fn drain_one_broadcast(state: &AppState, broadcast: &repo::broadcasts::BroadcastRow) -> Result<(), GatewayError> {
    let batch = repo::broadcasts::next_pending_batch(&state.db, broadcast.id, limits::BROADCAST_BATCH_SIZE).await?;
    if batch.is_empty() {
        if !repo::broadcasts::has_pending(&state.db, broadcast.id).await? {
            repo::broadcasts::set_state(&state.db, broadcast.id, &BroadcastState::Completed.to_string()).await?;
            info!(broadcast_id = %broadcast.id, "broadcast auto-completed");
        }
        return Ok(());
    }

    let tenant = repo::tenants::find_by_id(&state.db, broadcast.tenant_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("tenant not found".to_owned()))?;
    let content: wg_protocol::MessageContent = serde_json::from_value(broadcast.content.clone())
        .map_err(|e| GatewayError::BadRequest(format!("malformed broadcast content: {e}")))?;

    for row in batch {
        state.send_queue.enqueue(
            row.recipient,
            SendJob {
                tenant_id: tenant.id,
                tenant_slug: tenant.slug.clone(),
                content: content.clone(),
                purpose: SendPurpose::Shot { broadcast_id: broadcast.id, row_id: row.id },
            },
        );
    }
    Ok(())
}
