//! Token vault: AES-256-GCM encryption at rest plus a coherent
//! in-process LRU cache of decrypted credentials, keyed by tenant slug.
//!
//! Coherence is staleness-checked, not invalidated on write: every
//! lookup re-fetches `cred_updated_at` and discards the cached plaintext
//! if the DB row is newer, so an admin credential rotation is picked up
//! within one lookup rather than waiting out the full TTL.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lru::LruCache;
use sqlx::PgPool;
use std::num::NonZeroUsize;

use wg_core::token_crypto::{self, EncryptedToken, TokenCryptoError};

use crate::errors::VaultError;
use crate::repo::tenants;

const CACHE_TTL: Duration = Duration::from_secs(10 * 60);
const CACHE_CAPACITY: usize = 100;

struct CacheEntry {
    plaintext: String,
    cached_at: Instant,
    db_updated_at: Option<DateTime<Utc>>,
}

pub struct TokenVault {
    pool: PgPool,
    key: Vec<u8>,
    cache: Mutex<LruCache<String, CacheEntry>>,
}

impl TokenVault {
    pub fn new(pool: PgPool, key: Vec<u8>) -> Self {
        Self {
            pool,
            key,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is nonzero"))),
        }
    }

    /// Encrypts and persists `plaintext` for `slug`, then warms the cache
    /// with the plaintext it just wrote.
    pub async fn set(&self, slug: &str, plaintext: &str) -> Result<(), VaultError> {
        let encrypted = token_crypto::encrypt_token(plaintext, &self.key)?;
        let updated = tenants::set_credential(&self.pool, slug, &encrypted.ciphertext_b64, &encrypted.iv_b64).await?;
        if !updated {
            return Err(VaultError::NotFound(slug.to_owned()));
        }

        let tenant = tenants::find_by_slug(&self.pool, slug).await?;
        let db_updated_at = tenant.and_then(|t| t.cred_updated_at);
        self.cache.lock().expect("vault cache mutex poisoned").put(
            slug.to_owned(),
            CacheEntry { plaintext: plaintext.to_owned(), cached_at: Instant::now(), db_updated_at },
        );
        Ok(())
    }

    /// Returns the decrypted plaintext, or `None` if the tenant has no
    /// credential configured. `Malformed`/`MissingKey` are fatal for this
    /// request but never panic.
    pub async fn get(&self, slug: &str) -> Result<Option<String>, VaultError> {
        let tenant = tenants::find_by_slug(&self.pool, slug).await?.ok_or_else(|| VaultError::NotFound(slug.to_owned()))?;

        if let Some(cached) = self.cached_plaintext_if_fresh(slug, tenant.cred_updated_at) {
            return Ok(Some(cached));
        }

        let (Some(ciphertext_b64), Some(iv_b64)) = (tenant.cred_ciphertext, tenant.cred_iv) else {
            return Ok(None);
        };

        let encrypted = EncryptedToken { ciphertext_b64, iv_b64 };
        let plaintext = token_crypto::decrypt_token(&encrypted, &self.key)?;

        self.cache.lock().expect("vault cache mutex poisoned").put(
            slug.to_owned(),
            CacheEntry { plaintext: plaintext.clone(), cached_at: Instant::now(), db_updated_at: tenant.cred_updated_at },
        );
        Ok(Some(plaintext))
    }

    pub async fn has(&self, slug: &str) -> Result<bool, VaultError> {
        Ok(self.get(slug).await?.is_some())
    }

    /// Returns the cached plaintext if present, not past its 10-minute
    /// TTL, and not stale relative to the DB's `cred_updated_at`.
    fn cached_plaintext_if_fresh(&self, slug: &str, db_updated_at: Option<DateTime<Utc>>) -> Option<String> {
        let mut cache = self.cache.lock().expect("vault cache mutex poisoned");
        let entry = cache.get(slug)?;

        let expired = entry.cached_at.elapsed() >= CACHE_TTL;
        let stale = match (db_updated_at, entry.db_updated_at) {
            (Some(db), Some(cached)) => db > cached,
            (Some(_), None) => true,
            _ => false,
        };
        if expired || stale {
            cache.pop(slug);
            return None;
        }
        Some(entry.plaintext.clone())
    }
}

impl From<TokenCryptoError> for VaultError {
    fn from(e: TokenCryptoError) -> Self {
        VaultError::Crypto(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_entry_treats_newer_db_timestamp_as_stale() {
        let older = Utc::now() - chrono::Duration::minutes(5);
        let newer = Utc::now();
        let entry = CacheEntry { plaintext: "secret".to_owned(), cached_at: Instant::now(), db_updated_at: Some(older) };
        // Mirrors the staleness comparison in `cached_plaintext_if_fresh`.
        assert!(matches!((Some(newer), entry.db_updated_at), (Some(db), Some(cached)) if db > cached));
    }
}
