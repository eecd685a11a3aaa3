//! Upstream chat-API HTTP client: keep-alive connection pool, bounded
//! retries on transient failures, 429 extraction, and the identity-query
//! warm-up primitive used at boot and by the heartbeat.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::{debug, warn};
use wg_protocol::upstream::{RemoteFileHandle, UpstreamEnvelope, UpstreamErrorKind, UpstreamSendOutcome};

use crate::config::limits;

/// Outcome of a blob upload, distinct from [`UpstreamSendOutcome`] because a
/// successful upload also yields a reusable [`RemoteFileHandle`] the warm-up
/// dispatcher persists for later cheap re-sends.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamUploadOutcome {
    Sent { message_id: i64, handle: RemoteFileHandle },
    RateLimited { retry_after_secs: u64 },
    Error(UpstreamErrorKind),
}

/// A pool sized for the send path (spec §4.2: >=100 concurrent sockets).
pub const SEND_POOL_SIZE: usize = 100;
/// A separate, smaller pool for blob (media) traffic.
pub const BLOB_POOL_SIZE: usize = 50;

#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    base_url: String,
}

impl UpstreamClient {
    /// Builds a client for text/JSON sends, pooled at `SEND_POOL_SIZE`.
    pub fn for_send_path(base_url: impl Into<String>) -> Self {
        Self::with_pool(base_url, SEND_POOL_SIZE, limits::UPSTREAM_TIMEOUT_TEXT)
    }

    /// Builds a client for multipart blob uploads, pooled separately so
    /// large uploads never starve the send path's connections.
    pub fn for_blob_path(base_url: impl Into<String>) -> Self {
        Self::with_pool(base_url, BLOB_POOL_SIZE, Duration::from_secs(60))
    }

    fn with_pool(base_url: impl Into<String>, pool_size: usize, timeout: Duration) -> Self {
        let http = Client::builder()
            .pool_max_idle_per_host(pool_size)
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .expect("reqwest client must build with static TLS config");
        Self { http, base_url: base_url.into() }
    }

    /// `POST {base}/bot{token}/sendMessage`.
    pub async fn send_message(&self, token: &str, chat_id: i64, text: &str, parse_mode: &str) -> UpstreamSendOutcome {
        let url = format!("{}/bot{token}/sendMessage", self.base_url);
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": parse_mode,
            "disable_web_page_preview": true,
        });
        self.call_with_retries(|| self.http.post(&url).json(&body)).await
    }

    /// A low-cost identity query (`getMe`), used at boot after a
    /// credential is set and by the heartbeat to keep TLS sessions warm.
    pub async fn get_me(&self, token: &str) -> UpstreamSendOutcome {
        let url = format!("{}/bot{token}/getMe", self.base_url);
        self.call_with_retries(|| self.http.get(&url)).await
    }

    /// Uploads `kind` (photo/video/document/audio) to `chat_id` via
    /// multipart, returning a reusable remote file handle on success.
    /// Builds a fresh `Form` from the owned bytes on every attempt, since
    /// `reqwest::multipart::Form` isn't `Clone` and the retry loop needs
    /// to resubmit the full body on a transient failure. Runs its own
    /// retry loop (rather than `call_with_retries`) because it must parse
    /// the kind-specific remote file handle out of a successful envelope.
    pub async fn upload_media(&self, token: &str, chat_id: i64, kind: &str, filename: &str, bytes: Vec<u8>) -> UpstreamUploadOutcome {
        let url = format!("{}/bot{token}/send{}", self.base_url, capitalize(kind));
        let mut attempt = 0u32;
        loop {
            let part = reqwest::multipart::Part::bytes(bytes.clone()).file_name(filename.to_owned());
            let form = reqwest::multipart::Form::new().text("chat_id", chat_id.to_string()).part(kind.to_owned(), part);
            let response = self.http.post(&url).multipart(form).send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = extract_retry_after(resp).await.unwrap_or(0);
                        return UpstreamUploadOutcome::RateLimited { retry_after_secs: retry_after };
                    }

                    match resp.json::<UpstreamEnvelope<serde_json::Value>>().await {
                        Ok(envelope) if envelope.ok => {
                            let result = envelope.result.unwrap_or(serde_json::Value::Null);
                            let message_id = result.get("message_id").and_then(|v| v.as_i64()).unwrap_or(0);
                            let Some(handle) = extract_remote_handle(kind, &result) else {
                                return UpstreamUploadOutcome::Error(UpstreamErrorKind::Other);
                            };
                            return UpstreamUploadOutcome::Sent { message_id, handle };
                        }
                        Ok(envelope) => {
                            let kind = UpstreamErrorKind::from_description(status.as_u16(), &envelope.description.unwrap_or_default());
                            if kind.is_transient() && attempt < limits::UPSTREAM_MAX_TRANSIENT_RETRIES {
                                attempt += 1;
                                tokio::time::sleep(backoff_delay(attempt)).await;
                                continue;
                            }
                            return UpstreamUploadOutcome::Error(kind);
                        }
                        Err(e) => {
                            debug!(error = %e, "failed to decode upload response body");
                            return UpstreamUploadOutcome::Error(UpstreamErrorKind::Other);
                        }
                    }
                }
                Err(err) => {
                    let kind = if err.is_timeout() { UpstreamErrorKind::Timeout } else { UpstreamErrorKind::Network };
                    if attempt < limits::UPSTREAM_MAX_TRANSIENT_RETRIES {
                        attempt += 1;
                        warn!(attempt, error = %err, "transient upload error, retrying");
                        tokio::time::sleep(backoff_delay(attempt)).await;
                        continue;
                    }
                    return UpstreamUploadOutcome::Error(kind);
                }
            }
        }
    }

    /// Re-sends `kind` using a previously-obtained remote handle (cheap,
    /// no bytes transferred).
    pub async fn send_media_by_handle(&self, token: &str, chat_id: i64, kind: &str, handle: &RemoteFileHandle) -> UpstreamSendOutcome {
        let url = format!("{}/bot{token}/send{}", self.base_url, capitalize(kind));
        let body = json!({ "chat_id": chat_id, kind: handle.0 });
        self.call_with_retries(|| self.http.post(&url).json(&body)).await
    }

    /// Runs `build_request` up to `UPSTREAM_MAX_TRANSIENT_RETRIES + 1`
    /// times with exponential back-off + jitter on transient failures.
    /// A 429 is never retried here -- it's surfaced immediately so the
    /// Send Queue can drive its own back-off.
    async fn call_with_retries(&self, build_request: impl Fn() -> reqwest::RequestBuilder) -> UpstreamSendOutcome {
        let mut attempt = 0u32;
        loop {
            let response = build_request().send().await;
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = extract_retry_after(resp).await.unwrap_or(0);
                        return UpstreamSendOutcome::RateLimited { retry_after_secs: retry_after };
                    }

                    let outcome = parse_envelope(status, resp).await;
                    let should_retry = matches!(
                        &outcome,
                        UpstreamSendOutcome::Error(kind) if kind.is_transient()
                    );
                    if should_retry && attempt < limits::UPSTREAM_MAX_TRANSIENT_RETRIES {
                        attempt += 1;
                        tokio::time::sleep(backoff_delay(attempt)).await;
                        continue;
                    }
                    return outcome;
                }
                Err(err) => {
                    let kind = if err.is_timeout() { UpstreamErrorKind::Timeout } else { UpstreamErrorKind::Network };
                    if attempt < limits::UPSTREAM_MAX_TRANSIENT_RETRIES {
                        attempt += 1;
                        warn!(attempt, error = %err, "transient upstream error, retrying");
                        tokio::time::sleep(backoff_delay(attempt)).await;
                        continue;
                    }
                    return UpstreamSendOutcome::Error(kind);
                }
            }
        }
    }
}

async fn parse_envelope(status: StatusCode, resp: reqwest::Response) -> UpstreamSendOutcome {
    let status_code = status.as_u16();
    match resp.json::<UpstreamEnvelope<serde_json::Value>>().await {
        Ok(envelope) if envelope.ok => {
            let message_id = envelope.result.as_ref().and_then(|r| r.get("message_id")).and_then(|v| v.as_i64()).unwrap_or(0);
            UpstreamSendOutcome::Sent { message_id }
        }
        Ok(envelope) => {
            let description = envelope.description.unwrap_or_default();
            UpstreamSendOutcome::Error(UpstreamErrorKind::from_description(status_code, &description))
        }
        Err(e) => {
            debug!(error = %e, "failed to decode upstream response body");
            UpstreamSendOutcome::Error(UpstreamErrorKind::from_description(status_code, ""))
        }
    }
}

/// Pulls the kind-specific remote file handle out of a successful upload's
/// `result` document. Telegram-Bot-API-shaped responses nest `photo` as an
/// array of ascending-resolution sizes (take the last/largest); the other
/// kinds nest a single object.
fn extract_remote_handle(kind: &str, result: &serde_json::Value) -> Option<RemoteFileHandle> {
    let file_id = if kind == "photo" {
        result.get("photo")?.as_array()?.last()?.get("file_id")?.as_str()?
    } else {
        result.get(kind)?.get("file_id")?.as_str()?
    };
    Some(RemoteFileHandle(file_id.to_owned()))
}

async fn extract_retry_after(resp: reqwest::Response) -> Option<u64> {
    resp.json::<UpstreamEnvelope<serde_json::Value>>()
        .await
        .ok()
        .and_then(|e| e.parameters)
        .and_then(|p| p.retry_after)
}

/// Exponential back-off with small jitter, used only for the client's own
/// transient-error retries (distinct from the Send Queue's 429 back-off).
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 200u64 * 2u64.pow(attempt.saturating_sub(1));
    let jitter_ms = (base_ms / 4).max(1);
    Duration::from_millis(base_ms + fastrand_jitter(jitter_ms))
}

fn fastrand_jitter(max_ms: u64) -> u64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0..=max_ms)
}

fn capitalize(kind: &str) -> String {
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalize_handles_lowercase_kind() {
        assert_eq!(capitalize("photo"), "Photo");
        assert_eq!(capitalize("video"), "Video");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn backoff_delay_grows_with_attempt() {
        assert!(backoff_delay(2).as_millis() >= backoff_delay(1).as_millis());
        assert!(backoff_delay(3).as_millis() >= backoff_delay(2).as_millis());
    }

    #[test]
    fn extract_remote_handle_takes_largest_photo_size() {
        let result = json!({"photo": [{"file_id": "small"}, {"file_id": "large"}]});
        assert_eq!(extract_remote_handle("photo", &result), Some(RemoteFileHandle("large".to_owned())));
    }

    #[test]
    fn extract_remote_handle_reads_single_object_kinds() {
        let result = json!({"document": {"file_id": "doc-1"}});
        assert_eq!(extract_remote_handle("document", &result), Some(RemoteFileHandle("doc-1".to_owned())));
    }

    #[test]
    fn extract_remote_handle_is_none_when_field_missing() {
        let result = json!({"video": {}});
        assert_eq!(extract_remote_handle("video", &result), None);
    }
}
