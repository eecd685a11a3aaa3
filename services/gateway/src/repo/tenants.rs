//! Tenant (bot) persistence: identity, credential ciphertext, staging
//! chat, and the welcome-message document.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct TenantRow {
    pub id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub provider: String,
    pub cred_ciphertext: Option<String>,
    pub cred_iv: Option<String>,
    pub cred_updated_at: Option<DateTime<Utc>>,
    pub staging_chat_id: Option<i64>,
    pub welcome_message: serde_json::Value,
    pub deleted_at: Option<DateTime<Utc>>,
}

pub async fn find_by_slug(pool: &PgPool, slug: &str) -> Result<Option<TenantRow>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, slug, display_name, provider, cred_ciphertext, cred_iv, cred_updated_at,
                  staging_chat_id, welcome_message, deleted_at
           FROM tenants WHERE slug = $1 AND deleted_at IS NULL"#,
    )
    .bind(slug)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| TenantRow {
        id: r.get("id"),
        slug: r.get("slug"),
        display_name: r.get("display_name"),
        provider: r.get("provider"),
        cred_ciphertext: r.get("cred_ciphertext"),
        cred_iv: r.get("cred_iv"),
        cred_updated_at: r.get("cred_updated_at"),
        staging_chat_id: r.get("staging_chat_id"),
        welcome_message: r.get("welcome_message"),
        deleted_at: r.get("deleted_at"),
    }))
}

pub async fn find_by_id(pool: &PgPool, tenant_id: Uuid) -> Result<Option<TenantRow>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, slug, display_name, provider, cred_ciphertext, cred_iv, cred_updated_at,
                  staging_chat_id, welcome_message, deleted_at
           FROM tenants WHERE id = $1 AND deleted_at IS NULL"#,
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| TenantRow {
        id: r.get("id"),
        slug: r.get("slug"),
        display_name: r.get("display_name"),
        provider: r.get("provider"),
        cred_ciphertext: r.get("cred_ciphertext"),
        cred_iv: r.get("cred_iv"),
        cred_updated_at: r.get("cred_updated_at"),
        staging_chat_id: r.get("staging_chat_id"),
        welcome_message: r.get("welcome_message"),
        deleted_at: r.get("deleted_at"),
    }))
}

pub async fn list(pool: &PgPool) -> Result<Vec<TenantRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, slug, display_name, provider, cred_ciphertext, cred_iv, cred_updated_at,
                  staging_chat_id, welcome_message, deleted_at
           FROM tenants WHERE deleted_at IS NULL ORDER BY created_at DESC"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| TenantRow {
            id: r.get("id"),
            slug: r.get("slug"),
            display_name: r.get("display_name"),
            provider: r.get("provider"),
            cred_ciphertext: r.get("cred_ciphertext"),
            cred_iv: r.get("cred_iv"),
            cred_updated_at: r.get("cred_updated_at"),
            staging_chat_id: r.get("staging_chat_id"),
            welcome_message: r.get("welcome_message"),
            deleted_at: r.get("deleted_at"),
        })
        .collect())
}

pub async fn create(pool: &PgPool, slug: &str, display_name: &str, provider: &str) -> Result<TenantRow, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO tenants (slug, display_name, provider)
           VALUES ($1, $2, $3)
           RETURNING id, slug, display_name, provider, cred_ciphertext, cred_iv, cred_updated_at,
                     staging_chat_id, welcome_message, deleted_at"#,
    )
    .bind(slug)
    .bind(display_name)
    .bind(provider)
    .fetch_one(pool)
    .await?;

    Ok(TenantRow {
        id: row.get("id"),
        slug: row.get("slug"),
        display_name: row.get("display_name"),
        provider: row.get("provider"),
        cred_ciphertext: row.get("cred_ciphertext"),
        cred_iv: row.get("cred_iv"),
        cred_updated_at: row.get("cred_updated_at"),
        staging_chat_id: row.get("staging_chat_id"),
        welcome_message: row.get("welcome_message"),
        deleted_at: row.get("deleted_at"),
    })
}

/// Sets the credential blob + IV together, per the invariant that they
/// are either both present or both null.
pub async fn set_credential(pool: &PgPool, slug: &str, ciphertext_b64: &str, iv_b64: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE tenants SET cred_ciphertext = $2, cred_iv = $3, cred_updated_at = now(), updated_at = now()
           WHERE slug = $1 AND deleted_at IS NULL"#,
    )
    .bind(slug)
    .bind(ciphertext_b64)
    .bind(iv_b64)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_staging_chat(pool: &PgPool, slug: &str, staging_chat_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE tenants SET staging_chat_id = $2, updated_at = now() WHERE slug = $1 AND deleted_at IS NULL")
        .bind(slug)
        .bind(staging_chat_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_welcome_message(pool: &PgPool, slug: &str, welcome_message: &serde_json::Value) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE tenants SET welcome_message = $2, updated_at = now() WHERE slug = $1 AND deleted_at IS NULL")
        .bind(slug)
        .bind(welcome_message)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn soft_delete(pool: &PgPool, slug: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE tenants SET deleted_at = now() WHERE slug = $1 AND deleted_at IS NULL")
        .bind(slug)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Cascades to every tenant-scoped row via `ON DELETE CASCADE` foreign keys.
pub async fn hard_delete(pool: &PgPool, slug: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM tenants WHERE slug = $1").bind(slug).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_active_slugs(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query("SELECT slug FROM tenants WHERE deleted_at IS NULL").fetch_all(pool).await?;
    Ok(rows.into_iter().map(|r| r.get("slug")).collect())
}
