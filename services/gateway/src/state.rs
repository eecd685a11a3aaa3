//! Shared application state: one instance per process, wrapped in an
//! `Arc` and handed to every HTTP handler and background loop.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::{GatewayConfig, ObjectStoreConfig};
use crate::media::MediaService;
use crate::metrics::MetricsSink;
use crate::object_store::ObjectStoreClient;
use crate::send_queue::SendQueueHandle;
use crate::upstream_client::UpstreamClient;
use crate::vault::TokenVault;
use crate::webhook::WelcomeMessageCache;

pub struct AppState {
    pub db: PgPool,
    pub vault: Arc<TokenVault>,
    pub object_store: Arc<ObjectStoreClient>,
    pub upstream_send: UpstreamClient,
    pub media: Arc<MediaService>,
    pub send_queue: SendQueueHandle,
    pub metrics: MetricsSink,
    pub welcome_cache: WelcomeMessageCache,
    pub webhook_secret: Option<String>,
}

impl AppState {
    /// Wires up every subsystem from a loaded configuration and an
    /// already-migrated pool. `upstream_base_url` is split into two
    /// distinct [`UpstreamClient`]s (send path / blob path) so a slow
    /// media upload can never starve the text send path's connections.
    pub fn new(pool: PgPool, config: &GatewayConfig, upstream_base_url: impl Into<String>) -> Self {
        let upstream_base_url = upstream_base_url.into();
        let vault = Arc::new(TokenVault::new(pool.clone(), config.vault_key.clone()));
        let object_store = Arc::new(ObjectStoreClient::new(clone_object_store_config(&config.object_store)));
        let upstream_send = UpstreamClient::for_send_path(upstream_base_url.clone());
        let upstream_blob = UpstreamClient::for_blob_path(upstream_base_url);
        let media = Arc::new(MediaService::new(pool.clone(), vault.clone(), object_store.clone(), upstream_blob));

        Self {
            db: pool,
            vault,
            object_store,
            upstream_send,
            media,
            send_queue: SendQueueHandle::new(),
            metrics: MetricsSink::new(),
            welcome_cache: WelcomeMessageCache::new(),
            webhook_secret: config.webhook_secret.clone(),
        }
    }
}

fn clone_object_store_config(config: &ObjectStoreConfig) -> ObjectStoreConfig {
    ObjectStoreConfig {
        account_id: config.account_id.clone(),
        access_key_id: config.access_key_id.clone(),
        secret_access_key: config.secret_access_key.clone(),
        bucket: config.bucket.clone(),
        region: config.region.clone(),
    }
}
