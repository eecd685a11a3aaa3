pub mod broadcast;
pub mod config;
pub mod db;
pub mod downsell;
pub mod errors;
pub mod heartbeat;
pub mod http;
pub mod media;
pub mod metrics;
pub mod object_store;
pub mod repo;
pub mod send_queue;
pub mod state;
pub mod upstream_client;
pub mod vault;
pub mod webhook;

pub use state::AppState;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

/// Wires every route onto the shared [`AppState`]. Background loops are
/// spawned separately from `main.rs`, not here.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/tg/{slug}/webhook", post(http::webhook::tg_webhook))
        .route("/api/payment/webhook/pix-created", post(http::webhook::pix_created))
        .route("/api/payment/webhook/payment-approved", post(http::webhook::payment_approved))
        .route("/api/payment/webhook/pix-expired", post(http::webhook::pix_expired))
        .route("/api/admin/tenants", get(http::admin::list_tenants).post(http::admin::create_tenant))
        .route("/api/admin/tenants/{slug}", axum::routing::delete(http::admin::delete_tenant))
        .route("/api/admin/tenants/{slug}/credential", get(http::admin::get_credential).put(http::admin::set_credential))
        .route("/api/admin/tenants/{slug}/staging-chat", post(http::admin::set_staging_chat))
        .route("/api/admin/tenants/{slug}/welcome-message", post(http::admin::set_welcome_message))
        .route("/api/admin/tenants/{slug}/webhook-url", get(http::admin::webhook_url))
        .route("/api/admin/broadcasts", post(http::admin::create_broadcast))
        .route("/api/admin/broadcasts/{id}/populate", post(http::admin::populate_broadcast))
        .route("/api/admin/broadcasts/{id}/start", post(http::admin::start_broadcast))
        .route("/api/admin/broadcasts/{id}/pause", post(http::admin::pause_broadcast))
        .route("/api/admin/broadcasts/{id}/resume", post(http::admin::resume_broadcast))
        .route("/api/admin/broadcasts/{id}/cancel", post(http::admin::cancel_broadcast))
        .route("/api/admin/media", post(http::admin::upload_media))
        .route("/api/admin/metrics", get(http::admin::metrics_snapshot))
        .with_state(state)
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
}
