//! Broadcast (shot) and broadcast-queue-row persistence.

use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct BroadcastRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub content: serde_json::Value,
    pub audience_selector: String,
    pub state: String,
    pub total: i32,
    pub sent: i32,
    pub failed: i32,
}

pub struct BroadcastQueueRow {
    pub id: i64,
    pub broadcast_id: Uuid,
    pub tenant_id: Uuid,
    pub recipient: i64,
    pub attempts: i32,
}

fn row_to_broadcast(r: sqlx::postgres::PgRow) -> BroadcastRow {
    BroadcastRow {
        id: r.get("id"),
        tenant_id: r.get("tenant_id"),
        title: r.get("title"),
        content: r.get("content"),
        audience_selector: r.get("audience_selector"),
        state: r.get("state"),
        total: r.get("total"),
        sent: r.get("sent"),
        failed: r.get("failed"),
    }
}

pub async fn create(pool: &PgPool, tenant_id: Uuid, title: &str, content: &serde_json::Value, audience_selector: &str) -> Result<BroadcastRow, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO broadcasts (tenant_id, title, content, audience_selector)
           VALUES ($1, $2, $3, $4)
           RETURNING id, tenant_id, title, content, audience_selector, state, total, sent, failed"#,
    )
    .bind(tenant_id)
    .bind(title)
    .bind(content)
    .bind(audience_selector)
    .fetch_one(pool)
    .await?;
    Ok(row_to_broadcast(row))
}

pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<BroadcastRow>, sqlx::Error> {
    let row = sqlx::query("SELECT id, tenant_id, title, content, audience_selector, state, total, sent, failed FROM broadcasts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(row_to_broadcast))
}

pub async fn list_for_tenant(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<BroadcastRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, tenant_id, title, content, audience_selector, state, total, sent, failed FROM broadcasts WHERE tenant_id = $1 ORDER BY created_at DESC",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_broadcast).collect())
}

pub async fn set_state(pool: &PgPool, id: Uuid, state: &str) -> Result<(), sqlx::Error> {
    let timestamp_col = match state {
        "sending" => Some("started_at"),
        "completed" | "canceled" => Some("completed_at"),
        _ => None,
    };
    match timestamp_col {
        Some(col) => {
            let sql = format!("UPDATE broadcasts SET state = $2, {col} = now() WHERE id = $1");
            sqlx::query(&sql).bind(id).bind(state).execute(pool).await?;
        }
        None => {
            sqlx::query("UPDATE broadcasts SET state = $2 WHERE id = $1").bind(id).bind(state).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn set_total(pool: &PgPool, id: Uuid, total: i32) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE broadcasts SET total = $2 WHERE id = $1").bind(id).bind(total).execute(pool).await?;
    Ok(())
}

/// Materialises the audience for `all_started` or `after_pix` into the
/// queue table, from the funnel-event log, deduplicated by recipient.
/// Returns the number of rows inserted (== the new `total`).
pub async fn populate_audience(pool: &PgPool, broadcast_id: Uuid, tenant_id: Uuid, audience_selector: &str) -> Result<i64, sqlx::Error> {
    let kind_filter = match audience_selector {
        "after_pix" => "pix_created",
        _ => "start",
    };
    let sql = format!(
        r#"INSERT INTO broadcast_queue (broadcast_id, tenant_id, recipient)
           SELECT $1, $2, recipient
           FROM (SELECT DISTINCT recipient FROM funnel_events WHERE tenant_id = $2 AND kind = '{kind_filter}') audience"#
    );
    let result = sqlx::query(&sql).bind(broadcast_id).bind(tenant_id).execute(pool).await?;
    Ok(result.rows_affected() as i64)
}

/// Atomically claims up to `limit` `pending` rows by flipping them to
/// `queued` in the same statement that selects them, and returns the
/// claimed rows. A row the drain loop has claimed but not yet finished
/// sending is never re-selected by a later call, so a slow batch that
/// spans multiple 1s drain ticks is not re-enqueued and re-delivered.
pub async fn next_pending_batch(pool: &PgPool, broadcast_id: Uuid, limit: i64) -> Result<Vec<BroadcastQueueRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"WITH claimed AS (
               SELECT id FROM broadcast_queue
               WHERE broadcast_id = $1 AND status = 'pending'
               ORDER BY id
               LIMIT $2
           )
           UPDATE broadcast_queue
           SET status = 'queued', updated_at = now()
           FROM claimed
           WHERE broadcast_queue.id = claimed.id
           RETURNING broadcast_queue.id, broadcast_queue.broadcast_id, broadcast_queue.tenant_id,
                     broadcast_queue.recipient, broadcast_queue.attempts"#,
    )
    .bind(broadcast_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| BroadcastQueueRow {
            id: r.get("id"),
            broadcast_id: r.get("broadcast_id"),
            tenant_id: r.get("tenant_id"),
            recipient: r.get("recipient"),
            attempts: r.get("attempts"),
        })
        .collect())
}

/// Finalizers guard on `status = 'queued'` (the state `next_pending_batch`
/// leaves a claimed row in) so a row can only be finalized once, even if
/// its dispatch task somehow reported twice.
pub async fn mark_row_sent(pool: &PgPool, id: i64, broadcast_id: Uuid) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE broadcast_queue SET status = 'sent', updated_at = now() WHERE id = $1 AND status = 'queued'")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE broadcasts SET sent = sent + 1 WHERE id = $1").bind(broadcast_id).execute(&mut *tx).await?;
    tx.commit().await
}

/// Skipped rows (blocked recipients, skip-worthy upstream errors) leave
/// the broadcast's `sent`/`failed` counters untouched; only the row
/// status changes, which is enough for auto-complete's "no unfinished
/// rows remain" check.
pub async fn mark_row_skipped(pool: &PgPool, id: i64, _broadcast_id: Uuid, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE broadcast_queue SET status = 'skipped', error = $2, updated_at = now() WHERE id = $1 AND status = 'queued'")
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_row_failed(pool: &PgPool, id: i64, broadcast_id: Uuid, error: &str) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE broadcast_queue SET status = 'failed', error = $2, attempts = attempts + 1, updated_at = now() WHERE id = $1 AND status = 'queued'",
    )
    .bind(id)
    .bind(error)
    .execute(&mut *tx)
    .await?;
    sqlx::query("UPDATE broadcasts SET failed = failed + 1 WHERE id = $1").bind(broadcast_id).execute(&mut *tx).await?;
    tx.commit().await
}

pub async fn bulk_skip_pending(pool: &PgPool, broadcast_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE broadcast_queue SET status = 'skipped', updated_at = now() WHERE broadcast_id = $1 AND status = 'pending'")
        .bind(broadcast_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// True if any row is still `pending` or `queued` (claimed but not yet
/// finalized) -- a broadcast must not auto-complete while a claimed batch
/// is still in flight in the send queue.
pub async fn has_pending(pool: &PgPool, broadcast_id: Uuid) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        "SELECT EXISTS(SELECT 1 FROM broadcast_queue WHERE broadcast_id = $1 AND status IN ('pending', 'queued')) AS pending",
    )
    .bind(broadcast_id)
    .fetch_one(pool)
    .await?;
    Ok(row.get("pending"))
}

pub async fn sending_broadcasts(pool: &PgPool) -> Result<Vec<BroadcastRow>, sqlx::Error> {
    let rows = sqlx::query("SELECT id, tenant_id, title, content, audience_selector, state, total, sent, failed FROM broadcasts WHERE state = 'sending'")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(row_to_broadcast).collect())
}
