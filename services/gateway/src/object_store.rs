//! S3-compatible object store client, hand-rolled AWS Signature V4 over
//! `reqwest`, targeting an R2-shaped endpoint
//! (`https://{account}.r2.cloudflarestorage.com`).

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::{Digest, Sha256};
use wg_core::signing_key_cache::{SigningKeyCache, SigningKeyCacheKey};

use crate::config::ObjectStoreConfig;
use crate::errors::ObjectStoreError;

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";
const EMPTY_PAYLOAD_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

pub struct ObjectStoreClient {
    http: Client,
    config: ObjectStoreConfig,
    signing_keys: std::sync::Mutex<SigningKeyCache>,
}

pub struct UploadResult {
    pub key: String,
    pub etag: String,
    pub bytes: u64,
    pub sha256: String,
}

impl ObjectStoreClient {
    pub fn new(config: ObjectStoreConfig) -> Self {
        Self { http: Client::new(), config, signing_keys: std::sync::Mutex::new(SigningKeyCache::new()) }
    }

    fn endpoint(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.config.account_id)
    }

    pub async fn upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<UploadResult, ObjectStoreError> {
        self.require_credentials()?;
        let sha256_hex = hex::encode(Sha256::digest(&body));
        let url = format!("{}/{}/{}", self.endpoint(), self.config.bucket, key);

        let request = self.signed_request("PUT", &url, &sha256_hex, &[("content-type", content_type)])?;
        let response = request.body(body.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ObjectStoreError::UnexpectedStatus(status.as_u16()));
        }
        let etag = response.headers().get("etag").and_then(|v| v.to_str().ok()).unwrap_or_default().trim_matches('"').to_owned();

        Ok(UploadResult { key: key.to_owned(), etag, bytes: body.len() as u64, sha256: sha256_hex })
    }

    pub async fn download(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.require_credentials()?;
        let url = format!("{}/{}/{}", self.endpoint(), self.config.bucket, key);
        let request = self.signed_request("GET", &url, EMPTY_PAYLOAD_SHA256, &[])?;
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ObjectStoreError::UnexpectedStatus(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Deletes the object at `key`. A 404 response is treated as success
    /// (the caller's desired end state -- "object absent" -- already holds).
    pub async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.require_credentials()?;
        let url = format!("{}/{}/{}", self.endpoint(), self.config.bucket, key);
        let request = self.signed_request("DELETE", &url, EMPTY_PAYLOAD_SHA256, &[])?;
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        Err(ObjectStoreError::UnexpectedStatus(status.as_u16()))
    }

    pub fn public_url(&self, key: &str) -> Option<String> {
        if self.config.bucket.is_empty() {
            return None;
        }
        Some(format!("{}/{}/{}", self.endpoint(), self.config.bucket, key))
    }

    fn require_credentials(&self) -> Result<(), ObjectStoreError> {
        if self.config.account_id.is_empty() || self.config.access_key_id.is_empty() || self.config.secret_access_key.is_empty() {
            return Err(ObjectStoreError::MissingCredentials);
        }
        Ok(())
    }

    fn signed_request(&self, method: &str, url: &str, payload_sha256: &str, extra_headers: &[(&str, &str)]) -> Result<reqwest::RequestBuilder, ObjectStoreError> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let parsed = url::Url::parse(url).map_err(|_| ObjectStoreError::UnexpectedStatus(0))?;
        let host = parsed.host_str().unwrap_or_default().to_owned();
        let canonical_uri = parsed.path().to_owned();

        let mut headers: Vec<(String, String)> =
            vec![("host".to_owned(), host.clone()), ("x-amz-content-sha256".to_owned(), payload_sha256.to_owned()), ("x-amz-date".to_owned(), amz_date.clone())];
        for (name, value) in extra_headers {
            headers.push((name.to_lowercase(), (*value).to_owned()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical_headers: String = headers.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();
        let signed_headers = headers.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(";");

        let canonical_request =
            format!("{method}\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_sha256}");

        let credential_scope = format!("{date_stamp}/{}/{SERVICE}/aws4_request", self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key = self.signing_key(&date_stamp, now.timestamp());
        let signature = hex::encode(hmac(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.config.access_key_id
        );

        let mut builder = self.http.request(method.parse().expect("valid http method"), url);
        for (name, value) in &headers {
            if name == "host" {
                continue; // reqwest sets this from the URL itself
            }
            builder = builder.header(name, value);
        }
        builder = builder.header("authorization", authorization);
        Ok(builder)
    }

    /// Derives (or fetches from cache) the `kSigning` key via the
    /// standard SigV4 HMAC chain, cached by (date, region, service) with
    /// a 23-hour TTL (spec §4.3).
    fn signing_key(&self, date_stamp: &str, now_unix: i64) -> Vec<u8> {
        let cache_key =
            SigningKeyCacheKey { date: date_stamp.to_owned(), region: self.config.region.clone(), service: SERVICE.to_owned() };
        let now_instant = unix_to_instant_approx(now_unix);

        let mut cache = self.signing_keys.lock().expect("signing key cache mutex poisoned");
        if let Some(key) = cache.get(&cache_key, now_instant) {
            return key;
        }

        let k_date = hmac(format!("AWS4{}", self.config.secret_access_key).as_bytes(), date_stamp.as_bytes());
        let k_region = hmac(&k_date, self.config.region.as_bytes());
        let k_service = hmac(&k_region, SERVICE.as_bytes());
        let k_signing = hmac(&k_service, b"aws4_request");

        cache.insert(cache_key, k_signing.clone(), now_instant);
        k_signing
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// The signing-key cache is keyed by (date, region, service), not by
/// wall-clock time, so the exact `Instant` origin doesn't matter as long
/// as it advances monotonically with `now_unix` -- which it does, since
/// this is called with `Utc::now().timestamp()` on every request.
fn unix_to_instant_approx(now_unix: i64) -> std::time::Instant {
    use std::sync::OnceLock;
    static ORIGIN: OnceLock<(std::time::Instant, i64)> = OnceLock::new();
    let (origin_instant, origin_unix) = *ORIGIN.get_or_init(|| (std::time::Instant::now(), now_unix));
    let delta = now_unix - origin_unix;
    if delta >= 0 {
        origin_instant + std::time::Duration::from_secs(delta as u64)
    } else {
        origin_instant - std::time::Duration::from_secs((-delta) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_chain_is_deterministic() {
        let k1 = hmac(b"key", b"data");
        let k2 = hmac(b"key", b"data");
        assert_eq!(k1, k2);
    }

    #[test]
    fn empty_payload_sha256_constant_matches_known_digest() {
        let digest = hex::encode(Sha256::digest(b""));
        // The well-known SHA-256 of the empty string, used for GET/DELETE
        // signing; trimmed to the same length here as a sanity check.
        assert_eq!(digest.len(), EMPTY_PAYLOAD_SHA256.len());
    }
}
