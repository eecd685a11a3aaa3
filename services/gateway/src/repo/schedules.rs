//! Downsell template and schedule-row persistence.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;
use wg_protocol::event_id::DownsellTrigger;

pub struct TemplateRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub content: serde_json::Value,
    pub delay_minutes: i32,
    pub active: bool,
    pub after_start: bool,
    pub after_pix: bool,
}

pub struct ScheduleRow {
    pub id: Uuid,
    pub event_id: String,
    pub tenant_id: Uuid,
    pub recipient: i64,
    pub template_id: Uuid,
    pub transaction_id: Option<String>,
    pub trigger: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: String,
    pub attempts: i32,
    pub meta: serde_json::Value,
}

fn trigger_str(trigger: DownsellTrigger) -> &'static str {
    trigger.as_str()
}

pub async fn active_templates_for_gate(pool: &PgPool, tenant_id: Uuid, trigger: DownsellTrigger) -> Result<Vec<TemplateRow>, sqlx::Error> {
    let gate_column = match trigger {
        DownsellTrigger::Start => "after_start",
        DownsellTrigger::Pix => "after_pix",
    };
    let sql = format!(
        "SELECT id, tenant_id, name, content, delay_minutes, active, after_start, after_pix
         FROM downsell_templates WHERE tenant_id = $1 AND active AND {gate_column}"
    );
    let rows = sqlx::query(&sql).bind(tenant_id).fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|r| TemplateRow {
            id: r.get("id"),
            tenant_id: r.get("tenant_id"),
            name: r.get("name"),
            content: r.get("content"),
            delay_minutes: r.get("delay_minutes"),
            active: r.get("active"),
            after_start: r.get("after_start"),
            after_pix: r.get("after_pix"),
        })
        .collect())
}

/// Inserts a schedule row unless `event_id` already exists, or a pending
/// row already exists for this (tenant, recipient, template) triple.
/// Both are idempotency guards (spec §3); a duplicate of either is a
/// no-op, not an error. Returns `true` if a new row was inserted.
#[allow(clippy::too_many_arguments)]
pub async fn insert_if_absent(
    pool: &PgPool,
    event_id: &str,
    tenant_id: Uuid,
    recipient: i64,
    template_id: Uuid,
    transaction_id: Option<&str>,
    trigger: DownsellTrigger,
    scheduled_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO downsell_schedules (event_id, tenant_id, recipient, template_id, transaction_id, trigger, scheduled_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           ON CONFLICT (event_id) DO NOTHING"#,
    )
    .bind(event_id)
    .bind(tenant_id)
    .bind(recipient)
    .bind(template_id)
    .bind(transaction_id)
    .bind(trigger_str(trigger))
    .bind(scheduled_at)
    .execute(pool)
    .await;

    match result {
        Ok(r) => Ok(r.rows_affected() > 0),
        // A fresh event_id (e.g. a different `now`) can still collide with
        // the partial unique index on (tenant, recipient, template) while a
        // prior row is still pending — that's the same idempotency
        // guarantee expressed through a second constraint, so treat it the
        // same way: no-op, not a propagated error.
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(false),
        Err(other) => Err(other),
    }
}

/// Atomically claims up to `limit` due `pending` rows whose template is
/// still active, flipping them to `queued` in the same statement that
/// selects them. A row the scanner has claimed but not yet finished
/// sending is never re-selected by the next scan, so a send backed up
/// past `DOWNSELL_SCAN_INTERVAL` (e.g. a recipient under fallback
/// throttling) does not get the downsell enqueued a second time.
pub async fn due_pending(pool: &PgPool, limit: i64) -> Result<Vec<ScheduleRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"WITH claimed AS (
               SELECT s.id
               FROM downsell_schedules s
               JOIN downsell_templates t ON t.id = s.template_id
               WHERE s.status = 'pending' AND s.scheduled_at <= now() AND t.active
               ORDER BY s.scheduled_at
               LIMIT $1
           )
           UPDATE downsell_schedules s
           SET status = 'queued', updated_at = now()
           FROM claimed
           WHERE s.id = claimed.id
           RETURNING s.id, s.event_id, s.tenant_id, s.recipient, s.template_id, s.transaction_id, s.trigger,
                     s.scheduled_at, s.status, s.attempts, s.meta"#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| ScheduleRow {
            id: r.get("id"),
            event_id: r.get("event_id"),
            tenant_id: r.get("tenant_id"),
            recipient: r.get("recipient"),
            template_id: r.get("template_id"),
            transaction_id: r.get("transaction_id"),
            trigger: r.get("trigger"),
            scheduled_at: r.get("scheduled_at"),
            status: r.get("status"),
            attempts: r.get("attempts"),
            meta: r.get("meta"),
        })
        .collect())
}

pub async fn template_by_id(pool: &PgPool, template_id: Uuid) -> Result<Option<TemplateRow>, sqlx::Error> {
    let row = sqlx::query("SELECT id, tenant_id, name, content, delay_minutes, active, after_start, after_pix FROM downsell_templates WHERE id = $1")
        .bind(template_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| TemplateRow {
        id: r.get("id"),
        tenant_id: r.get("tenant_id"),
        name: r.get("name"),
        content: r.get("content"),
        delay_minutes: r.get("delay_minutes"),
        active: r.get("active"),
        after_start: r.get("after_start"),
        after_pix: r.get("after_pix"),
    }))
}

/// Finalizers guard on `status = 'queued'` (the state `due_pending` leaves
/// a claimed row in), so a row can only leave pending/queued exactly once.
pub async fn mark_skipped(pool: &PgPool, id: Uuid, reason: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE downsell_schedules SET status = 'skipped', cancel_reason = $2, last_attempt_at = now(), attempts = attempts + 1, updated_at = now() WHERE id = $1 AND status = 'queued'",
    )
    .bind(id)
    .bind(reason)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_sent(pool: &PgPool, id: Uuid, message_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE downsell_schedules
           SET status = 'sent', last_attempt_at = now(), attempts = attempts + 1, updated_at = now(),
               meta = meta || jsonb_build_object('message_id', $2::bigint)
           WHERE id = $1 AND status = 'queued'"#,
    )
    .bind(id)
    .bind(message_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, id: Uuid, error_text: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE downsell_schedules SET status = 'failed', cancel_reason = $2, last_attempt_at = now(), attempts = attempts + 1, updated_at = now() WHERE id = $1 AND status = 'queued'",
    )
    .bind(id)
    .bind(error_text)
    .execute(pool)
    .await?;
    Ok(())
}

/// Cancels every `pending` row for (tenant, recipient, transaction) OR
/// (tenant, recipient, trigger=start), on payment approval. Returns the
/// number of rows canceled.
pub async fn cancel_on_payment_approved(pool: &PgPool, tenant_id: Uuid, recipient: i64, transaction_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE downsell_schedules
           SET status = 'canceled', cancel_reason = 'paid', updated_at = now()
           WHERE tenant_id = $1 AND recipient = $2 AND status = 'pending'
             AND (transaction_id = $3 OR trigger = 'start')"#,
    )
    .bind(tenant_id)
    .bind(recipient)
    .bind(transaction_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Cancels every `pending` row bound to a transaction, on PIX expiration.
pub async fn cancel_on_pix_expired(pool: &PgPool, tenant_id: Uuid, transaction_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE downsell_schedules
           SET status = 'expired', cancel_reason = 'expired', updated_at = now()
           WHERE tenant_id = $1 AND transaction_id = $2 AND status = 'pending'"#,
    )
    .bind(tenant_id)
    .bind(transaction_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
