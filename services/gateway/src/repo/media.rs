//! Content-addressed media blob and warm-up cache persistence.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct MediaStoreRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub sha256: String,
    pub kind: String,
    pub object_key: String,
    pub etag: String,
    pub byte_length: i64,
    pub mime: String,
    pub extension: Option<String>,
}

pub struct MediaCacheRow {
    pub tenant_id: Uuid,
    pub sha256: String,
    pub kind: String,
    pub status: String,
    pub remote_file_handle: Option<String>,
    pub staging_chat_id: Option<i64>,
    pub staging_message_id: Option<i64>,
    pub last_error: Option<String>,
    pub last_warmup_at: Option<DateTime<Utc>>,
}

#[allow(clippy::too_many_arguments)]
pub async fn upsert_store_row(
    pool: &PgPool,
    tenant_id: Uuid,
    sha256: &str,
    kind: &str,
    object_key: &str,
    etag: &str,
    byte_length: i64,
    mime: &str,
    extension: Option<&str>,
) -> Result<MediaStoreRow, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO media_store (tenant_id, sha256, kind, object_key, etag, byte_length, mime, extension)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
           ON CONFLICT (object_key) DO UPDATE SET etag = EXCLUDED.etag, byte_length = EXCLUDED.byte_length
           RETURNING id, tenant_id, sha256, kind, object_key, etag, byte_length, mime, extension"#,
    )
    .bind(tenant_id)
    .bind(sha256)
    .bind(kind)
    .bind(object_key)
    .bind(etag)
    .bind(byte_length)
    .bind(mime)
    .bind(extension)
    .fetch_one(pool)
    .await?;

    Ok(MediaStoreRow {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        sha256: row.get("sha256"),
        kind: row.get("kind"),
        object_key: row.get("object_key"),
        etag: row.get("etag"),
        byte_length: row.get("byte_length"),
        mime: row.get("mime"),
        extension: row.get("extension"),
    })
}

/// Creates the cache row in `warming` status if absent; a no-op if a row
/// for this (tenant, sha256, kind) already exists (any status).
pub async fn ensure_cache_row_warming(pool: &PgPool, tenant_id: Uuid, sha256: &str, kind: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO media_cache (tenant_id, sha256, kind, status)
           VALUES ($1, $2, $3, 'warming')
           ON CONFLICT (tenant_id, sha256, kind) DO NOTHING"#,
    )
    .bind(tenant_id)
    .bind(sha256)
    .bind(kind)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_cache_row(pool: &PgPool, tenant_id: Uuid, sha256: &str, kind: &str) -> Result<Option<MediaCacheRow>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT tenant_id, sha256, kind, status, remote_file_handle, staging_chat_id, staging_message_id, last_error, last_warmup_at
           FROM media_cache WHERE tenant_id = $1 AND sha256 = $2 AND kind = $3"#,
    )
    .bind(tenant_id)
    .bind(sha256)
    .bind(kind)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| MediaCacheRow {
        tenant_id: r.get("tenant_id"),
        sha256: r.get("sha256"),
        kind: r.get("kind"),
        status: r.get("status"),
        remote_file_handle: r.get("remote_file_handle"),
        staging_chat_id: r.get("staging_chat_id"),
        staging_message_id: r.get("staging_message_id"),
        last_error: r.get("last_error"),
        last_warmup_at: r.get("last_warmup_at"),
    }))
}

pub async fn mark_ready(
    pool: &PgPool,
    tenant_id: Uuid,
    sha256: &str,
    kind: &str,
    remote_file_handle: &str,
    staging_chat_id: i64,
    staging_message_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE media_cache
           SET status = 'ready', remote_file_handle = $4, staging_chat_id = $5, staging_message_id = $6,
               last_warmup_at = now(), last_error = NULL, updated_at = now()
           WHERE tenant_id = $1 AND sha256 = $2 AND kind = $3"#,
    )
    .bind(tenant_id)
    .bind(sha256)
    .bind(kind)
    .bind(remote_file_handle)
    .bind(staging_chat_id)
    .bind(staging_message_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_error(pool: &PgPool, tenant_id: Uuid, sha256: &str, kind: &str, error_text: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE media_cache SET status = 'error', last_error = $4, updated_at = now() WHERE tenant_id = $1 AND sha256 = $2 AND kind = $3",
    )
    .bind(tenant_id)
    .bind(sha256)
    .bind(kind)
    .bind(error_text)
    .execute(pool)
    .await?;
    Ok(())
}

/// Looks up a single store row by its content address, needed by the
/// warm-up dispatcher to learn the blob's size before scoring the job.
pub async fn find_store_row(pool: &PgPool, tenant_id: Uuid, sha256: &str, kind: &str) -> Result<Option<MediaStoreRow>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, tenant_id, sha256, kind, object_key, etag, byte_length, mime, extension
           FROM media_store WHERE tenant_id = $1 AND sha256 = $2 AND kind = $3"#,
    )
    .bind(tenant_id)
    .bind(sha256)
    .bind(kind)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| MediaStoreRow {
        id: r.get("id"),
        tenant_id: r.get("tenant_id"),
        sha256: r.get("sha256"),
        kind: r.get("kind"),
        object_key: r.get("object_key"),
        etag: r.get("etag"),
        byte_length: r.get("byte_length"),
        mime: r.get("mime"),
        extension: r.get("extension"),
    }))
}

pub async fn list_for_tenant(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<MediaStoreRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, tenant_id, sha256, kind, object_key, etag, byte_length, mime, extension FROM media_store WHERE tenant_id = $1 ORDER BY created_at DESC",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| MediaStoreRow {
            id: r.get("id"),
            tenant_id: r.get("tenant_id"),
            sha256: r.get("sha256"),
            kind: r.get("kind"),
            object_key: r.get("object_key"),
            etag: r.get("etag"),
            byte_length: r.get("byte_length"),
            mime: r.get("mime"),
            extension: r.get("extension"),
        })
        .collect())
}

pub async fn delete(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query("DELETE FROM media_store WHERE id = $1 AND tenant_id = $2 RETURNING object_key")
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get("object_key")))
}
