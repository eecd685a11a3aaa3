//! Content-addressed media store + warm-up dispatcher (spec §4.8).
//!
//! `save()` uploads a blob to the object store and records it; warm-up is
//! driven by a background dispatch loop that pops scored jobs off
//! `wg_core::warmup::WarmupQueue` at bounded concurrency and uploads each
//! once to the tenant's staging chat to obtain a reusable remote handle.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tokio::sync::{Notify, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;
use wg_core::download_cache::DownloadCache;
use wg_core::warmup::{WarmupKey, WarmupQueue};
use wg_protocol::event_id::object_store_key;
use wg_protocol::MediaKind;

use crate::config::limits;
use crate::errors::GatewayError;
use crate::object_store::ObjectStoreClient;
use crate::repo;
use crate::repo::media::MediaStoreRow;
use crate::upstream_client::{UpstreamClient, UpstreamUploadOutcome};
use crate::vault::TokenVault;

pub struct MediaService {
    pool: PgPool,
    vault: Arc<TokenVault>,
    object_store: Arc<ObjectStoreClient>,
    upstream_blob: UpstreamClient,
    queue: Mutex<WarmupQueue>,
    download_cache: Mutex<DownloadCache>,
    notify: Notify,
    concurrency: Arc<Semaphore>,
}

impl MediaService {
    pub fn new(pool: PgPool, vault: Arc<TokenVault>, object_store: Arc<ObjectStoreClient>, upstream_blob: UpstreamClient) -> Self {
        Self {
            pool,
            vault,
            object_store,
            upstream_blob,
            queue: Mutex::new(WarmupQueue::new(limits::WARMUP_QUEUE_CAPACITY)),
            download_cache: Mutex::new(DownloadCache::with_defaults()),
            notify: Notify::new(),
            concurrency: Arc::new(Semaphore::new(limits::WARMUP_CONCURRENCY)),
        }
    }

    /// Uploads `bytes` under its content address and records the store +
    /// cache rows, then kicks off a warm-up for it.
    pub async fn save(
        &self,
        tenant_id: Uuid,
        tenant_slug: &str,
        kind: MediaKind,
        bytes: Vec<u8>,
        mime: &str,
        extension: Option<&str>,
    ) -> Result<MediaStoreRow, GatewayError> {
        let sha256 = hex::encode(Sha256::digest(&bytes));
        let object_key = object_store_key(tenant_slug, kind.as_str(), &sha256, extension);

        let upload = self.object_store.upload(&object_key, bytes, mime).await?;
        let store_row = repo::media::upsert_store_row(
            &self.pool,
            tenant_id,
            &sha256,
            kind.as_str(),
            &object_key,
            &upload.etag,
            upload.bytes as i64,
            mime,
            extension,
        )
        .await?;
        repo::media::ensure_cache_row_warming(&self.pool, tenant_id, &sha256, kind.as_str()).await?;
        self.request_warmup(tenant_id, tenant_slug, &sha256, kind).await;
        Ok(store_row)
    }

    /// Enqueues a warm-up job unless one is already queued or in-flight
    /// for this (tenant, sha256, kind) -- the dedup lives in `WarmupQueue`
    /// itself (spec §4.8, §9).
    pub async fn request_warmup(&self, tenant_id: Uuid, tenant_slug: &str, sha256: &str, kind: MediaKind) {
        let size_bytes = repo::media::find_store_row(&self.pool, tenant_id, sha256, kind.as_str())
            .await
            .ok()
            .flatten()
            .map(|r| r.byte_length as u64)
            .unwrap_or(0);

        let key = WarmupKey { tenant: tenant_slug.to_owned(), sha256: sha256.to_owned(), kind };
        let enqueued = {
            let mut q = self.queue.lock().expect("warmup queue mutex poisoned");
            q.enqueue(key, size_bytes, Instant::now())
        };
        if enqueued {
            let _ = repo::media::ensure_cache_row_warming(&self.pool, tenant_id, sha256, kind.as_str()).await;
            self.notify.notify_one();
        }
    }

    /// The bounded-concurrency dispatch loop; spawned once from `main.rs`.
    pub async fn run_dispatch_loop(self: Arc<Self>) {
        loop {
            let job = {
                let mut q = self.queue.lock().expect("warmup queue mutex poisoned");
                q.pop()
            };
            let Some(job) = job else {
                self.notify.notified().await;
                continue;
            };

            let permit = self.concurrency.clone().acquire_owned().await.expect("semaphore is never closed");
            let this = self.clone();
            tokio::spawn(async move {
                this.process_job(&job.key).await;
                this.queue.lock().expect("warmup queue mutex poisoned").complete(&job.key);
                drop(permit);
            });
        }
    }

    async fn process_job(&self, key: &WarmupKey) {
        match self.warm_up(key).await {
            Ok((handle, staging_chat_id, staging_message_id)) => {
                let tenant = match repo::tenants::find_by_slug(&self.pool, &key.tenant).await {
                    Ok(Some(t)) => t,
                    _ => return,
                };
                if let Err(err) =
                    repo::media::mark_ready(&self.pool, tenant.id, &key.sha256, key.kind.as_str(), &handle.0, staging_chat_id, staging_message_id)
                        .await
                {
                    warn!(tenant = %key.tenant, sha256 = %key.sha256, error = %err, "failed to persist warm-up success");
                }
                info!(tenant = %key.tenant, sha256 = %key.sha256, kind = ?key.kind, "media warm-up ready");
            }
            Err(err) => {
                if let Ok(Some(tenant)) = repo::tenants::find_by_slug(&self.pool, &key.tenant).await {
                    let _ = repo::media::mark_error(&self.pool, tenant.id, &key.sha256, key.kind.as_str(), &err.to_string()).await;
                }
                warn!(tenant = %key.tenant, sha256 = %key.sha256, error = %err, "media warm-up failed");
            }
        }
    }

    async fn warm_up(&self, key: &WarmupKey) -> Result<(wg_protocol::upstream::RemoteFileHandle, i64, i64), GatewayError> {
        let tenant = repo::tenants::find_by_slug(&self.pool, &key.tenant)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("tenant {} not found", key.tenant)))?;
        let staging_chat_id = tenant
            .staging_chat_id
            .ok_or_else(|| GatewayError::BadRequest(format!("tenant {} has no staging chat configured", key.tenant)))?;

        let store_row = repo::media::find_store_row(&self.pool, tenant.id, &key.sha256, key.kind.as_str())
            .await?
            .ok_or_else(|| GatewayError::NotFound("media blob not found in store".to_owned()))?;

        let bytes = self.fetch_with_cache(&store_row.object_key).await?;

        let token = self.vault.get(&key.tenant).await?.ok_or_else(|| GatewayError::NotFound(format!("no credential for tenant {}", key.tenant)))?;

        let filename = match &store_row.extension {
            Some(ext) if !ext.is_empty() => format!("{}.{ext}", store_row.sha256),
            _ => store_row.sha256.clone(),
        };

        match self.upstream_blob.upload_media(&token, staging_chat_id, key.kind.as_str(), &filename, bytes).await {
            UpstreamUploadOutcome::Sent { message_id, handle } => Ok((handle, staging_chat_id, message_id)),
            UpstreamUploadOutcome::RateLimited { retry_after_secs } => {
                Err(GatewayError::BadRequest(format!("rate limited during warm-up, retry after {retry_after_secs}s")))
            }
            UpstreamUploadOutcome::Error(kind) => Err(GatewayError::BadRequest(format!("upstream upload error: {kind:?}"))),
        }
    }

    /// Downloads `key`'s bytes, consulting the local cache first.
    async fn fetch_with_cache(&self, object_key: &str) -> Result<Vec<u8>, GatewayError> {
        let now = Instant::now();
        if let Some(cached) = self.download_cache.lock().expect("download cache mutex poisoned").get(object_key, now) {
            return Ok(cached);
        }
        let bytes = self.object_store.download(object_key).await?;
        self.download_cache.lock().expect("download cache mutex poisoned").insert(object_key.to_owned(), bytes.clone(), now);
        Ok(bytes)
    }

    /// Looks up a ready remote handle for (tenant, sha256, kind), returning
    /// `None` on a cache miss or non-`ready` status -- callers are expected
    /// to fall back to `request_warmup` and skip the media this delivery.
    pub async fn ready_handle(&self, tenant_id: Uuid, sha256: &str, kind: MediaKind) -> Option<String> {
        let row = repo::media::find_cache_row(&self.pool, tenant_id, sha256, kind.as_str()).await.ok()??;
        if row.status == "ready" {
            row.remote_file_handle
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_key_roundtrips_through_media_kind() {
        let key = WarmupKey { tenant: "bot1".to_owned(), sha256: "abc".to_owned(), kind: MediaKind::Photo };
        assert_eq!(key.kind.as_str(), "photo");
    }
}
