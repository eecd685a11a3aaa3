//! Per-subsystem error enums, converted to the `HttpErrorEnvelope`
//! contract at the HTTP boundary only — internal callers match on the
//! enum variant.

use axum::http::StatusCode;
use thiserror::Error;

use crate::http::response::{HttpResponse, json_error};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error(transparent)]
    Crypto(#[from] wg_core::token_crypto::TokenCryptoError),
    #[error("credential not found for tenant {0}")]
    NotFound(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream returned an error: {0:?}")]
    Upstream(wg_protocol::UpstreamErrorKind),
    #[error("upstream call timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("object store returned status {0}")]
    UnexpectedStatus(u16),
    #[error("object store credentials are not configured")]
    MissingCredentials,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error("invalid tenant slug: {0}")]
    InvalidSlug(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl GatewayError {
    pub fn into_http(self) -> HttpResponse {
        match self {
            GatewayError::InvalidSlug(msg) => json_error(StatusCode::BAD_REQUEST, "INVALID_SLUG", msg),
            GatewayError::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            GatewayError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            GatewayError::Conflict(msg) => json_error(StatusCode::CONFLICT, "CONFLICT", msg),
            GatewayError::Vault(VaultError::NotFound(tenant)) => {
                json_error(StatusCode::NOT_FOUND, "NOT_FOUND", format!("no credential for tenant {tenant}"))
            }
            other => json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", other.to_string()),
        }
    }
}
