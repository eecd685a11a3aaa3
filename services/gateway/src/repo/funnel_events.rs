//! Append-only funnel event log. Answers the two eligibility queries the
//! downsell scheduler needs: "is this transaction still unpaid?" and
//! "does this recipient have any unpaid pix in the last 7 days?".

use sqlx::{PgPool, Row};
use uuid::Uuid;
use wg_core::eligibility::FunnelFacts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    PixCreated,
    PaymentApproved,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::PixCreated => "pix_created",
            EventKind::PaymentApproved => "payment_approved",
        }
    }
}

/// Inserts the event if `event_id` (when given) doesn't already exist.
/// Returns whether a new row was actually inserted.
pub async fn record(
    pool: &PgPool,
    tenant_id: Uuid,
    event_id: Option<&str>,
    recipient: i64,
    kind: EventKind,
    transaction_id: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO funnel_events (event_id, tenant_id, recipient, kind, transaction_id)
           VALUES ($1, $2, $3, $4, $5)
           ON CONFLICT (event_id) WHERE event_id IS NOT NULL DO NOTHING"#,
    )
    .bind(event_id)
    .bind(tenant_id)
    .bind(recipient)
    .bind(kind.as_str())
    .bind(transaction_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Eligibility facts for a `pix` trigger: does at least one `pix_created`
/// event exist for the transaction, and has it since been paid? (At-least-
/// one-and-unpaid is the correct unpaid-pix semantics; the transaction is
/// not expected to carry more than one `pix_created` event in practice.)
pub async fn pix_trigger_facts(pool: &PgPool, tenant_id: Uuid, transaction_id: &str) -> Result<FunnelFacts, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT
             EXISTS(SELECT 1 FROM funnel_events WHERE tenant_id = $1 AND transaction_id = $2 AND kind = 'pix_created') AS has_pix,
             EXISTS(SELECT 1 FROM funnel_events WHERE tenant_id = $1 AND transaction_id = $2 AND kind = 'payment_approved') AS has_paid"#,
    )
    .bind(tenant_id)
    .bind(transaction_id)
    .fetch_one(pool)
    .await?;

    Ok(FunnelFacts {
        pix_created_for_transaction: row.get("has_pix"),
        payment_approved_for_transaction: row.get("has_paid"),
        ..Default::default()
    })
}

/// Eligibility facts for a `start` trigger: does the recipient have at
/// least one `pix_created` transaction in the last 7 days that has no
/// matching `payment_approved`?
pub async fn start_trigger_facts(pool: &PgPool, tenant_id: Uuid, recipient: i64) -> Result<FunnelFacts, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT EXISTS(
             SELECT 1 FROM funnel_events pix
             WHERE pix.tenant_id = $1 AND pix.recipient = $2 AND pix.kind = 'pix_created'
               AND pix.occurred_at >= now() - interval '7 days'
               AND NOT EXISTS (
                 SELECT 1 FROM funnel_events paid
                 WHERE paid.tenant_id = $1 AND paid.kind = 'payment_approved'
                   AND paid.transaction_id = pix.transaction_id
               )
           ) AS has_unpaid_pix"#,
    )
    .bind(tenant_id)
    .bind(recipient)
    .fetch_one(pool)
    .await?;

    let has_unpaid_pix: bool = row.get("has_unpaid_pix");
    Ok(FunnelFacts {
        pix_created_within_7_days: has_unpaid_pix,
        payment_approved_matching: false,
        ..Default::default()
    })
}
