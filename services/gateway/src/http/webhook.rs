//! Ack-phase HTTP handlers for the inbound webhook surface (spec §4.9,
//! §6). Every handler validates just enough to return quickly, then
//! spawns the background phase so the HTTP response isn't held up by a
//! DB write or an upstream send.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use tracing::warn;
use wg_protocol::is_valid_slug;
use wg_protocol::webhook::{InboundUpdate, PaymentApprovedWebhook, PixCreatedWebhook, PixExpiredWebhook};

use crate::http::response::{bad_request, HttpResult};
use crate::repo;
use crate::state::AppState;
use crate::webhook;

const SECRET_HEADER: &str = "x-webhook-secret";

/// Constant-time byte comparison, independent of the compared strings'
/// content (only their lengths short-circuit). Avoids pulling in a crate
/// for what is a dozen lines of bitwise OR.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn verify_secret(state: &AppState, headers: &HeaderMap) -> Result<(), axum::response::Response> {
    let Some(expected) = &state.webhook_secret else {
        // Only reachable in development: `GatewayConfig::from_env` hard-requires
        // the secret in production (spec §4.9).
        return Ok(());
    };
    let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok()).unwrap_or_default();
    if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(bad_request("invalid webhook secret"))
    }
}

/// `POST /tg/{slug}/webhook`. Acks in ~constant time; the start-intent
/// side effects run in a spawned task after the response is written.
pub async fn tg_webhook(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(update): Json<InboundUpdate>,
) -> HttpResult<StatusCode> {
    if !is_valid_slug(&slug) {
        return Err(bad_request(format!("invalid tenant slug: {slug}")));
    }
    verify_secret(&state, &headers)?;

    tokio::spawn(async move {
        let tenant = match repo::tenants::find_by_slug(&state.db, &slug).await {
            Ok(Some(t)) => t,
            Ok(None) => return,
            Err(err) => {
                warn!(tenant = %slug, error = %err, "failed to load tenant for webhook");
                return;
            }
        };
        if let Err(err) = webhook::handle_update(&state, &tenant, update).await {
            warn!(tenant = %slug, error = %err, "webhook background phase failed");
        }
    });

    Ok(StatusCode::OK)
}

pub async fn pix_created(State(state): State<Arc<AppState>>, Json(payload): Json<PixCreatedWebhook>) -> HttpResult<StatusCode> {
    tokio::spawn(async move {
        let tenant = match repo::tenants::find_by_slug(&state.db, &payload.tenant).await {
            Ok(Some(t)) => t,
            _ => return,
        };
        if let Err(err) = webhook::handle_pix_created(&state, tenant.id, &tenant.slug, payload.recipient, &payload.transaction_id).await {
            warn!(tenant = %payload.tenant, error = %err, "pix_created background phase failed");
        }
    });
    Ok(StatusCode::OK)
}

pub async fn payment_approved(State(state): State<Arc<AppState>>, Json(payload): Json<PaymentApprovedWebhook>) -> HttpResult<StatusCode> {
    tokio::spawn(async move {
        let tenant = match repo::tenants::find_by_slug(&state.db, &payload.tenant).await {
            Ok(Some(t)) => t,
            _ => return,
        };
        if let Err(err) = webhook::handle_payment_approved(&state, tenant.id, payload.recipient, &payload.transaction_id).await {
            warn!(tenant = %payload.tenant, error = %err, "payment_approved background phase failed");
        }
    });
    Ok(StatusCode::OK)
}

pub async fn pix_expired(State(state): State<Arc<AppState>>, Json(payload): Json<PixExpiredWebhook>) -> HttpResult<StatusCode> {
    tokio::spawn(async move {
        let tenant = match repo::tenants::find_by_slug(&state.db, &payload.tenant).await {
            Ok(Some(t)) => t,
            _ => return,
        };
        if let Err(err) = webhook::handle_pix_expired(&state, tenant.id, &payload.transaction_id).await {
            warn!(tenant = %payload.tenant, error = %err, "pix_expired background phase failed");
        }
    });
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_compare_matches_equal_secrets() {
        assert!(constant_time_eq(b"same-secret", b"same-secret"));
    }

    #[test]
    fn constant_time_compare_rejects_different_secrets_or_lengths() {
        assert!(!constant_time_eq(b"same-secret", b"other-secre!"));
        assert!(!constant_time_eq(b"short", b"much-longer-value"));
    }
}
