//! Admin REST surface (spec §1, §6: "specified only at interface
//! granularity"). CRUD over tenants/credentials/templates/broadcasts/
//! media, plus metrics reads and webhook-url binding helpers. Bearer-token
//! authenticated; business logic itself lives in the sibling modules this
//! just calls into.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broadcast;
use crate::errors::GatewayError;
use crate::http::response::{bad_request, not_found, HttpResult};
use crate::media::MediaService;
use crate::repo;
use crate::repo::admin_tokens;
use crate::state::AppState;

const AUTH_HEADER: &str = "authorization";

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), axum::response::Response> {
    let raw = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok()).unwrap_or_default();
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw);
    match admin_tokens::is_valid(&state.db, token).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(bad_request("invalid or missing admin bearer token")),
        Err(err) => Err(crate::http::response::internal_error(err)),
    }
}

fn map_err(err: GatewayError) -> axum::response::Response {
    err.into_http()
}

#[derive(Debug, Serialize)]
pub struct TenantView {
    pub id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub provider: String,
    pub has_credential: bool,
    pub staging_chat_id: Option<i64>,
}

impl From<repo::tenants::TenantRow> for TenantView {
    fn from(t: repo::tenants::TenantRow) -> Self {
        Self {
            id: t.id,
            slug: t.slug,
            display_name: t.display_name,
            provider: t.provider,
            has_credential: t.cred_ciphertext.is_some(),
            staging_chat_id: t.staging_chat_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub slug: String,
    pub display_name: String,
    #[serde(default = "default_provider")]
    pub provider: String,
}

fn default_provider() -> String {
    "telegram".to_owned()
}

pub async fn list_tenants(State(state): State<Arc<AppState>>, headers: HeaderMap) -> HttpResult<Json<Vec<TenantView>>> {
    require_admin(&state, &headers).await?;
    let rows = repo::tenants::list(&state.db).await.map_err(|e| crate::http::response::internal_error(e))?;
    Ok(Json(rows.into_iter().map(TenantView::from).collect()))
}

pub async fn create_tenant(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<CreateTenantRequest>) -> HttpResult<Json<TenantView>> {
    require_admin(&state, &headers).await?;
    if !wg_protocol::is_valid_slug(&req.slug) {
        return Err(bad_request(format!("invalid tenant slug: {}", req.slug)));
    }
    let row = repo::tenants::create(&state.db, &req.slug, &req.display_name, &req.provider)
        .await
        .map_err(|e| crate::http::response::internal_error(e))?;
    Ok(Json(row.into()))
}

#[derive(Debug, Deserialize)]
pub struct SetCredentialRequest {
    pub token: String,
}

pub async fn set_credential(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(req): Json<SetCredentialRequest>,
) -> HttpResult<StatusCode> {
    require_admin(&state, &headers).await?;
    state.vault.set(&slug, &req.token).await.map_err(GatewayError::from).map_err(map_err)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct MaskedCredentialView {
    pub configured: bool,
    pub masked: Option<String>,
}

pub async fn get_credential(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(slug): Path<String>) -> HttpResult<Json<MaskedCredentialView>> {
    require_admin(&state, &headers).await?;
    let plaintext = state.vault.get(&slug).await.map_err(GatewayError::from).map_err(map_err)?;
    Ok(Json(match plaintext {
        Some(token) => MaskedCredentialView { configured: true, masked: Some(wg_core::token_crypto::mask_token(&token)) },
        None => MaskedCredentialView { configured: false, masked: None },
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetStagingChatRequest {
    pub staging_chat_id: i64,
}

pub async fn set_staging_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(req): Json<SetStagingChatRequest>,
) -> HttpResult<StatusCode> {
    require_admin(&state, &headers).await?;
    let updated = repo::tenants::set_staging_chat(&state.db, &slug, req.staging_chat_id)
        .await
        .map_err(|e| crate::http::response::internal_error(e))?;
    if !updated {
        return Err(not_found(format!("tenant {slug} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SetWelcomeMessageRequest {
    pub welcome_message: serde_json::Value,
}

pub async fn set_welcome_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(req): Json<SetWelcomeMessageRequest>,
) -> HttpResult<StatusCode> {
    require_admin(&state, &headers).await?;
    let content: wg_protocol::MessageContent =
        serde_json::from_value(req.welcome_message.clone()).map_err(|e| bad_request(format!("malformed welcome message: {e}")))?;
    if content.media.len() > crate::config::limits::WELCOME_MEDIA_MAX_REFS {
        return Err(bad_request(format!("welcome message carries more than {} media refs", crate::config::limits::WELCOME_MEDIA_MAX_REFS)));
    }
    let updated = repo::tenants::set_welcome_message(&state.db, &slug, &req.welcome_message)
        .await
        .map_err(|e| crate::http::response::internal_error(e))?;
    if !updated {
        return Err(not_found(format!("tenant {slug} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_tenant(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(slug): Path<String>) -> HttpResult<StatusCode> {
    require_admin(&state, &headers).await?;
    let soft = repo::tenants::soft_delete(&state.db, &slug).await.map_err(|e| crate::http::response::internal_error(e))?;
    if !soft {
        return Err(not_found(format!("tenant {slug} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Helper consumed by the admin UI to render the URL the operator binds
/// on the upstream side -- no state changes, pure string formatting.
pub async fn webhook_url(Path(slug): Path<String>) -> HttpResult<Json<serde_json::Value>> {
    if !wg_protocol::is_valid_slug(&slug) {
        return Err(bad_request(format!("invalid tenant slug: {slug}")));
    }
    Ok(Json(serde_json::json!({ "path": format!("/tg/{slug}/webhook") })))
}

#[derive(Debug, Deserialize)]
pub struct CreateBroadcastRequest {
    pub tenant_slug: String,
    pub title: String,
    pub content: serde_json::Value,
    pub audience_selector: String,
}

pub async fn create_broadcast(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<CreateBroadcastRequest>) -> HttpResult<Json<serde_json::Value>> {
    require_admin(&state, &headers).await?;
    let tenant = repo::tenants::find_by_slug(&state.db, &req.tenant_slug)
        .await
        .map_err(|e| crate::http::response::internal_error(e))?
        .ok_or_else(|| not_found(format!("tenant {} not found", req.tenant_slug)))?;
    let row = repo::broadcasts::create(&state.db, tenant.id, &req.title, &req.content, &req.audience_selector)
        .await
        .map_err(|e| crate::http::response::internal_error(e))?;
    Ok(Json(serde_json::json!({ "id": row.id })))
}

pub async fn populate_broadcast(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>) -> HttpResult<Json<serde_json::Value>> {
    require_admin(&state, &headers).await?;
    let total = broadcast::populate(&state.db, id).await.map_err(map_err)?;
    Ok(Json(serde_json::json!({ "total": total })))
}

pub async fn start_broadcast(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>) -> HttpResult<StatusCode> {
    require_admin(&state, &headers).await?;
    broadcast::start(&state.db, id).await.map_err(map_err)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pause_broadcast(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>) -> HttpResult<StatusCode> {
    require_admin(&state, &headers).await?;
    broadcast::pause(&state.db, id).await.map_err(map_err)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resume_broadcast(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>) -> HttpResult<StatusCode> {
    require_admin(&state, &headers).await?;
    broadcast::resume(&state.db, id).await.map_err(map_err)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel_broadcast(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>) -> HttpResult<Json<serde_json::Value>> {
    require_admin(&state, &headers).await?;
    let skipped = broadcast::cancel(&state.db, id).await.map_err(map_err)?;
    Ok(Json(serde_json::json!({ "skipped": skipped })))
}

#[derive(Debug, Deserialize)]
pub struct UploadMediaQuery {
    pub tenant_slug: String,
    pub kind: String,
    pub mime: String,
    #[serde(default)]
    pub extension: Option<String>,
}

/// Raw-body upload: the admin UI posts the blob bytes directly with the
/// addressing metadata in headers/query, not multipart -- multipart is
/// reserved for the upstream-facing warm-up path (spec §4.8).
pub async fn upload_media(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    axum::extract::Query(query): axum::extract::Query<UploadMediaQuery>,
    body: axum::body::Bytes,
) -> HttpResult<Json<serde_json::Value>> {
    require_admin(&state, &headers).await?;
    let kind: wg_protocol::MediaKind = query.kind.parse().map_err(|_| bad_request(format!("unknown media kind: {}", query.kind)))?;
    let tenant = repo::tenants::find_by_slug(&state.db, &query.tenant_slug)
        .await
        .map_err(|e| crate::http::response::internal_error(e))?
        .ok_or_else(|| not_found(format!("tenant {} not found", query.tenant_slug)))?;

    let media: &MediaService = &state.media;
    let row = media
        .save(tenant.id, &tenant.slug, kind, body.to_vec(), &query.mime, query.extension.as_deref())
        .await
        .map_err(map_err)?;
    Ok(Json(serde_json::json!({ "sha256": row.sha256, "object_key": row.object_key })))
}

pub async fn metrics_snapshot(State(state): State<Arc<AppState>>, headers: HeaderMap) -> HttpResult<Json<serde_json::Value>> {
    require_admin(&state, &headers).await?;
    Ok(Json(serde_json::to_value(state.metrics.snapshot()).unwrap_or_default()))
}
