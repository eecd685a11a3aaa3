//! Gateway configuration: environment-provided operational settings plus
//! compiled-in limits that are never env-overridable.
//!
//! Required env vars: `DATABASE_URL`, `TOKEN_VAULT_KEY` (64 hex chars,
//! decoding to 32 bytes), `WEBHOOK_SECRET` in production. Everything else
//! has a sane default.

use std::env;

/// Operational settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub log_level: String,
    /// 32-byte AES-256-GCM key for the token vault, decoded from hex.
    pub vault_key: Vec<u8>,
    /// Required in production; optional in dev/test so local runs don't
    /// need a real secret to exercise the webhook ack path.
    pub webhook_secret: Option<String>,
    pub environment: Environment,
    pub object_store: ObjectStoreConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: String,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingEnv(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingEnv(var) => write!(f, "missing required environment variable: {var}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = require_env("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        let environment = match env::var("ENVIRONMENT").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        };

        let vault_key_hex = require_env("TOKEN_VAULT_KEY")?;
        let vault_key = hex::decode(&vault_key_hex).map_err(|e| ConfigError::InvalidValue(format!("TOKEN_VAULT_KEY is not valid hex: {e}")))?;
        if vault_key.len() != wg_core::token_crypto::KEY_LEN {
            return Err(ConfigError::InvalidValue(format!(
                "TOKEN_VAULT_KEY must decode to {} bytes, got {}",
                wg_core::token_crypto::KEY_LEN,
                vault_key.len()
            )));
        }

        let webhook_secret = env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty());
        if environment == Environment::Production && webhook_secret.is_none() {
            return Err(ConfigError::MissingEnv("WEBHOOK_SECRET".to_owned()));
        }

        let object_store = ObjectStoreConfig {
            account_id: env::var("R2_ACCOUNT_ID").unwrap_or_default(),
            access_key_id: env::var("R2_ACCESS_KEY_ID").unwrap_or_default(),
            secret_access_key: env::var("R2_SECRET_ACCESS_KEY").unwrap_or_default(),
            bucket: env::var("R2_BUCKET").unwrap_or_default(),
            region: env::var("R2_REGION").unwrap_or_else(|_| "auto".to_owned()),
        };

        Ok(Self { database_url, bind_addr, log_level, vault_key, webhook_secret, environment, object_store })
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingEnv(name.to_owned()))
}

/// Compiled-in, non-env-overridable operational limits. Every constant
/// here is named in the specification's fixed-configuration sections.
pub mod limits {
    use std::time::Duration;

    pub const DOWNSELL_SCAN_INTERVAL: Duration = Duration::from_secs(10);
    pub const DOWNSELL_FETCH_LIMIT: i64 = 50;
    pub const DOWNSELL_SEND_PACING: Duration = Duration::from_millis(200);

    pub const BROADCAST_BATCH_SIZE: i64 = 50;

    pub const WARMUP_QUEUE_CAPACITY: usize = 500;
    pub const WARMUP_CONCURRENCY: usize = 5;

    pub const WELCOME_CONFIG_CACHE_TTL: Duration = Duration::from_secs(60);
    pub const WELCOME_MEDIA_MAX_REFS: usize = 3;

    pub const UPSTREAM_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
    pub const UPSTREAM_HEARTBEAT_JITTER_MAX: Duration = Duration::from_secs(5);
    pub const DB_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
    pub const RATE_LIMITER_GC_INTERVAL: Duration = Duration::from_secs(5 * 60);

    pub const UPSTREAM_TIMEOUT_TEXT: Duration = Duration::from_secs(10);
    pub const UPSTREAM_TIMEOUT_PHOTO: Duration = Duration::from_secs(30);
    pub const UPSTREAM_TIMEOUT_VIDEO_OR_DOC: Duration = Duration::from_secs(60);
    pub const UPSTREAM_MAX_TRANSIENT_RETRIES: u32 = 3;

    pub const DB_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

    pub const WEBHOOK_ACK_TARGET: Duration = Duration::from_millis(5);
}
