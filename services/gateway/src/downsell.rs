//! Downsell scheduler: trigger-time row creation plus the 10-second due
//! scan that applies the eligibility gate and hands eligible rows to the
//! Send Queue at priority DOWNSELL.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;
use wg_core::eligibility::{check_eligibility, DownsellTrigger as GateTrigger};
use wg_protocol::event_id::{downsell_event_id, DownsellTrigger};

use crate::config::limits;
use crate::errors::GatewayError;
use crate::repo;
use crate::repo::tenants::TenantRow;
use crate::send_queue::{SendJob, SendPurpose};
use crate::state::AppState;

/// `wg_core::eligibility` and `wg_protocol::event_id` each own their own
/// trigger enum (the former is pure decision logic, the latter is a wire
/// identifier format) -- this bridges the two at the one seam that needs
/// both.
fn gate_trigger(trigger: DownsellTrigger) -> GateTrigger {
    match trigger {
        DownsellTrigger::Start => GateTrigger::Start,
        DownsellTrigger::Pix => GateTrigger::Pix,
    }
}

/// Called by the webhook processor on the "start" intent: schedules one
/// row per active `after_start` template for the tenant.
pub async fn schedule_for_start(pool: &PgPool, tenant: &TenantRow, recipient: i64, now: DateTime<Utc>) -> Result<u32, GatewayError> {
    schedule_for_trigger(pool, tenant, recipient, DownsellTrigger::Start, None, now).await
}

/// Called on `pix_created`: schedules one row per active `after_pix`
/// template, bound to the transaction.
pub async fn schedule_for_pix(pool: &PgPool, tenant: &TenantRow, recipient: i64, transaction_id: &str, now: DateTime<Utc>) -> Result<u32, GatewayError> {
    schedule_for_trigger(pool, tenant, recipient, DownsellTrigger::Pix, Some(transaction_id), now).await
}

async fn schedule_for_trigger(
    pool: &PgPool,
    tenant: &TenantRow,
    recipient: i64,
    trigger: DownsellTrigger,
    transaction_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<u32, GatewayError> {
    let templates = repo::schedules::active_templates_for_gate(pool, tenant.id, trigger).await?;
    let mut inserted = 0u32;
    for template in templates {
        let scheduled_at = now + chrono::Duration::minutes(template.delay_minutes as i64);
        let event_id = downsell_event_id(&tenant.slug, recipient, template.id, trigger, transaction_id, scheduled_at);
        let created = repo::schedules::insert_if_absent(pool, &event_id, tenant.id, recipient, template.id, transaction_id, trigger, scheduled_at).await?;
        if created {
            inserted += 1;
        }
    }
    Ok(inserted)
}

/// Fans out cancellation on `payment_approved`: every pending row for
/// (tenant, recipient, transaction) OR (tenant, recipient, trigger=start).
pub async fn cancel_on_payment_approved(pool: &PgPool, tenant_id: Uuid, recipient: i64, transaction_id: &str) -> Result<u64, GatewayError> {
    Ok(repo::schedules::cancel_on_payment_approved(pool, tenant_id, recipient, transaction_id).await?)
}

/// Fans out cancellation on `pix_expired`: every pending row bound to the
/// transaction.
pub async fn cancel_on_pix_expired(pool: &PgPool, tenant_id: Uuid, transaction_id: &str) -> Result<u64, GatewayError> {
    Ok(repo::schedules::cancel_on_pix_expired(pool, tenant_id, transaction_id).await?)
}

/// The 10-second scan loop; spawned once from `main.rs`.
pub async fn run_scan_loop(state: Arc<AppState>) {
    loop {
        tokio::time::sleep(limits::DOWNSELL_SCAN_INTERVAL).await;
        if let Err(err) = scan_once(&state).await {
            warn!(error = %err, "downsell scan iteration failed");
        }
    }
}

async fn scan_once(state: &AppState) -> Result<(), GatewayError> {
    let due = repo::schedules::due_pending(&state.db, limits::DOWNSELL_FETCH_LIMIT).await?;
    for row in due {
        if let Err(err) = process_due_row(state, &row).await {
            warn!(schedule_id = %row.id, error = %err, "failed to process due downsell row");
        }
        tokio::time::sleep(limits::DOWNSELL_SEND_PACING).await;
    }
    Ok(())
}

async fn process_due_row(state: &AppState, row: &repo::schedules::ScheduleRow) -> Result<(), GatewayError> {
    let trigger = match row.trigger.as_str() {
        "start" => DownsellTrigger::Start,
        _ => DownsellTrigger::Pix,
    };

    let facts = match trigger {
        DownsellTrigger::Pix => {
            let transaction_id = row.transaction_id.as_deref().unwrap_or_default();
            repo::funnel_events::pix_trigger_facts(&state.db, row.tenant_id, transaction_id).await?
        }
        DownsellTrigger::Start => repo::funnel_events::start_trigger_facts(&state.db, row.tenant_id, row.recipient).await?,
    };

    if check_eligibility(gate_trigger(trigger), facts).is_err() {
        repo::schedules::mark_skipped(&state.db, row.id, "no_unpaid_pix").await?;
        info!(schedule_id = %row.id, "downsell row skipped: no unpaid pix");
        return Ok(());
    }

    let template = repo::schedules::template_by_id(&state.db, row.template_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("downsell template {} not found", row.template_id)))?;
    let tenant = repo::tenants::find_by_id(&state.db, row.tenant_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("tenant not found".to_owned()))?;

    let content: wg_protocol::MessageContent = serde_json::from_value(template.content)
        .map_err(|e| GatewayError::BadRequest(format!("malformed template content: {e}")))?;

    state.send_queue.enqueue(
        row.recipient,
        SendJob { tenant_id: tenant.id, tenant_slug: tenant.slug, content, purpose: SendPurpose::Downsell { schedule_id: row.id } },
    );
    Ok(())
}
