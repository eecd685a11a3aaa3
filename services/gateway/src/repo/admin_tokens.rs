//! Admin bearer-token persistence. Tokens are never stored in plaintext
//! -- only a SHA-256 digest is persisted, looked up on each request.

use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub fn hash_token(raw: &str) -> Vec<u8> {
    Sha256::digest(raw.as_bytes()).to_vec()
}

pub struct AdminTokenRow {
    pub id: Uuid,
    pub label: String,
}

pub async fn create(pool: &PgPool, label: &str, raw_token: &str) -> Result<AdminTokenRow, sqlx::Error> {
    let row = sqlx::query("INSERT INTO admin_tokens (label, token_hash) VALUES ($1, $2) RETURNING id, label")
        .bind(label)
        .bind(hash_token(raw_token))
        .fetch_one(pool)
        .await?;
    Ok(AdminTokenRow { id: row.get("id"), label: row.get("label") })
}

pub async fn is_valid(pool: &PgPool, raw_token: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM admin_tokens WHERE token_hash = $1 AND revoked_at IS NULL) AS valid")
        .bind(hash_token(raw_token))
        .fetch_one(pool)
        .await?;
    Ok(row.get("valid"))
}

pub async fn list(pool: &PgPool) -> Result<Vec<AdminTokenRow>, sqlx::Error> {
    let rows = sqlx::query("SELECT id, label FROM admin_tokens WHERE revoked_at IS NULL ORDER BY created_at DESC").fetch_all(pool).await?;
    Ok(rows.into_iter().map(|r| AdminTokenRow { id: r.get("id"), label: r.get("label") }).collect())
}

pub async fn revoke(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE admin_tokens SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL").bind(id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}
