//! Webhook background phase (spec §4.9): start-intent delivery, funnel
//! event recording, and downsell fan-out. The ack phase itself lives in
//! `http::webhook` and returns before any of this runs.

use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;
use wg_protocol::event_id::start_funnel_event_id;
use wg_protocol::webhook::InboundUpdate;
use wg_protocol::MessageContent;

use crate::config::limits;
use crate::downsell;
use crate::errors::GatewayError;
use crate::repo;
use crate::repo::funnel_events::EventKind;
use crate::repo::tenants::TenantRow;
use crate::send_queue::{SendJob, SendPurpose};
use crate::state::AppState;

struct WelcomeCacheEntry {
    content: MessageContent,
    cached_at: Instant,
}

/// 60-second TTL cache of each tenant's welcome-message document, keyed by
/// slug -- avoids a DB round trip on every `/start`.
pub struct WelcomeMessageCache {
    entries: Mutex<std::collections::HashMap<String, WelcomeCacheEntry>>,
}

impl Default for WelcomeMessageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl WelcomeMessageCache {
    pub fn new() -> Self {
        Self { entries: Mutex::new(std::collections::HashMap::new()) }
    }

    fn cached(&self, slug: &str) -> Option<MessageContent> {
        let mut entries = self.entries.lock().expect("welcome cache mutex poisoned");
        let entry = entries.get(slug)?;
        if entry.cached_at.elapsed() >= limits::WELCOME_CONFIG_CACHE_TTL {
            entries.remove(slug);
            return None;
        }
        Some(entry.content.clone())
    }

    fn store(&self, slug: &str, content: MessageContent) {
        self.entries.lock().expect("welcome cache mutex poisoned").insert(slug.to_owned(), WelcomeCacheEntry { content, cached_at: Instant::now() });
    }
}

async fn welcome_message_for(state: &AppState, tenant: &TenantRow) -> Result<MessageContent, GatewayError> {
    if let Some(cached) = state.welcome_cache.cached(&tenant.slug) {
        return Ok(cached);
    }
    let content: MessageContent = serde_json::from_value(tenant.welcome_message.clone())
        .map_err(|e| GatewayError::BadRequest(format!("malformed welcome message for tenant {}: {e}", tenant.slug)))?;
    state.welcome_cache.store(&tenant.slug, content.clone());
    Ok(content)
}

/// Handles one inbound update for `tenant`, dispatching the start-intent
/// side effects if applicable. No-op for any other update shape.
pub async fn handle_update(state: &AppState, tenant: &TenantRow, update: InboundUpdate) -> Result<(), GatewayError> {
    if !update.is_start_intent() {
        return Ok(());
    }
    let Some(recipient) = update.chat_id() else {
        return Ok(());
    };

    let content = welcome_message_for(state, tenant).await?;
    state.send_queue.enqueue(
        recipient,
        SendJob { tenant_id: tenant.id, tenant_slug: tenant.slug.clone(), content, purpose: SendPurpose::Start },
    );

    let now = Utc::now();
    let event_id = start_funnel_event_id(&tenant.slug, recipient, now.date_naive());
    let inserted = repo::funnel_events::record(&state.db, tenant.id, Some(&event_id), recipient, EventKind::Start, None).await?;

    if inserted {
        if let Err(err) = downsell::schedule_for_start(&state.db, tenant, recipient, now).await {
            warn!(tenant = %tenant.slug, recipient, error = %err, "failed to fan out start downsell schedules");
        }
    }
    Ok(())
}

/// Handles a `pix_created` payment webhook: records the funnel event and
/// fans out `after_pix` downsell schedules.
pub async fn handle_pix_created(state: &AppState, tenant_id: Uuid, tenant_slug: &str, recipient: i64, transaction_id: &str) -> Result<(), GatewayError> {
    repo::funnel_events::record(&state.db, tenant_id, None, recipient, EventKind::PixCreated, Some(transaction_id)).await?;
    let tenant = repo::tenants::find_by_id(&state.db, tenant_id).await?.ok_or_else(|| GatewayError::NotFound(tenant_slug.to_owned()))?;
    downsell::schedule_for_pix(&state.db, &tenant, recipient, transaction_id, Utc::now()).await?;
    Ok(())
}

/// Handles a `payment_approved` payment webhook: records the funnel event
/// and cancels any pending downsell rows it preempts.
pub async fn handle_payment_approved(state: &AppState, tenant_id: Uuid, recipient: i64, transaction_id: &str) -> Result<(), GatewayError> {
    repo::funnel_events::record(&state.db, tenant_id, None, recipient, EventKind::PaymentApproved, Some(transaction_id)).await?;
    downsell::cancel_on_payment_approved(&state.db, tenant_id, recipient, transaction_id).await?;
    Ok(())
}

/// Handles a `pix_expired` payment webhook: cancels any pending downsell
/// rows bound to the transaction.
pub async fn handle_pix_expired(state: &AppState, tenant_id: Uuid, transaction_id: &str) -> Result<(), GatewayError> {
    downsell::cancel_on_pix_expired(&state.db, tenant_id, transaction_id).await?;
    Ok(())
}
