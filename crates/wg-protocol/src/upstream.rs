//! Wire format for the upstream chat API (Telegram-Bot-API-shaped).

use serde::{Deserialize, Serialize};

/// Text send payload. `POST {base}/sendMessage`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    pub chat_id: i64,
    pub text: &'a str,
    pub parse_mode: &'a str,
    pub disable_web_page_preview: bool,
}

/// A remote file handle obtained after the first (multipart) upload of a
/// blob, reusable across recipients without re-uploading bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileHandle(pub String);

/// Upstream's generic success envelope: `{"ok": true, "result": {...}}` or
/// `{"ok": false, "description": "...", "error_code": 429, "parameters": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamEnvelope<T> {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i32>,
    #[serde(default)]
    pub parameters: Option<UpstreamErrorParameters>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamErrorParameters {
    pub retry_after: Option<u64>,
}

/// Canonical outcome of a single message sent via the upstream client,
/// after the client has already absorbed transient-error retries.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamSendOutcome {
    Sent { message_id: i64 },
    RateLimited { retry_after_secs: u64 },
    Error(UpstreamErrorKind),
}

/// Canonical error kinds derived from the upstream's textual description
/// (spec §4.2). `Timeout`/`Network`/`Other5xx` are retried internally by
/// the Upstream Client up to 3 times before surfacing; the rest are
/// terminal from the client's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    ChatNotFound,
    BotBlocked,
    UserDeactivated,
    InvalidChatId,
    Forbidden,
    BadRequest,
    RateLimited,
    Timeout,
    Network,
    Other5xx,
    Other,
}

impl UpstreamErrorKind {
    /// `BotBlocked`, `UserDeactivated`, `ChatNotFound`, `InvalidChatId`:
    /// never retried, the business layer marks the row/recipient `skipped`.
    pub fn is_skip_worthy(&self) -> bool {
        matches!(
            self,
            UpstreamErrorKind::BotBlocked
                | UpstreamErrorKind::UserDeactivated
                | UpstreamErrorKind::ChatNotFound
                | UpstreamErrorKind::InvalidChatId
        )
    }

    /// Transient errors the Upstream Client itself retries (up to 3 times).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamErrorKind::Timeout | UpstreamErrorKind::Network | UpstreamErrorKind::Other5xx
        )
    }

    /// Derive a canonical kind from the upstream's free-text `description`
    /// and HTTP status. Matching is intentionally case-insensitive and
    /// substring-based: upstream wording drifts across providers/versions,
    /// and a closed enum on our side must degrade to `Other` rather than
    /// panic on an unrecognized phrase.
    pub fn from_description(status: u16, description: &str) -> Self {
        let d = description.to_ascii_lowercase();
        if status == 429 {
            return UpstreamErrorKind::RateLimited;
        }
        if status == 403 || d.contains("forbidden") {
            if d.contains("blocked") {
                return UpstreamErrorKind::BotBlocked;
            }
            if d.contains("deactivated") {
                return UpstreamErrorKind::UserDeactivated;
            }
            return UpstreamErrorKind::Forbidden;
        }
        if d.contains("chat not found") {
            return UpstreamErrorKind::ChatNotFound;
        }
        if d.contains("chat_id is empty") || d.contains("invalid chat_id") || d.contains("chat id is invalid") {
            return UpstreamErrorKind::InvalidChatId;
        }
        if status == 400 {
            return UpstreamErrorKind::BadRequest;
        }
        if status >= 500 {
            return UpstreamErrorKind::Other5xx;
        }
        UpstreamErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_429_as_rate_limited_regardless_of_description() {
        assert_eq!(
            UpstreamErrorKind::from_description(429, "Too Many Requests"),
            UpstreamErrorKind::RateLimited
        );
    }

    #[test]
    fn classifies_blocked_bot_from_403_description() {
        assert_eq!(
            UpstreamErrorKind::from_description(403, "Forbidden: bot was blocked by the user"),
            UpstreamErrorKind::BotBlocked
        );
    }

    #[test]
    fn classifies_deactivated_user_from_403_description() {
        assert_eq!(
            UpstreamErrorKind::from_description(403, "Forbidden: user is deactivated"),
            UpstreamErrorKind::UserDeactivated
        );
    }

    #[test]
    fn classifies_chat_not_found() {
        assert_eq!(
            UpstreamErrorKind::from_description(400, "Bad Request: chat not found"),
            UpstreamErrorKind::ChatNotFound
        );
    }

    #[test]
    fn falls_back_to_bad_request_then_other5xx_then_other() {
        assert_eq!(
            UpstreamErrorKind::from_description(400, "Bad Request: message text is empty"),
            UpstreamErrorKind::BadRequest
        );
        assert_eq!(UpstreamErrorKind::from_description(502, "Bad Gateway"), UpstreamErrorKind::Other5xx);
        assert_eq!(UpstreamErrorKind::from_description(418, "I'm a teapot"), UpstreamErrorKind::Other);
    }

    #[test]
    fn skip_worthy_and_transient_partitions_are_disjoint() {
        let all = [
            UpstreamErrorKind::ChatNotFound,
            UpstreamErrorKind::BotBlocked,
            UpstreamErrorKind::UserDeactivated,
            UpstreamErrorKind::InvalidChatId,
            UpstreamErrorKind::Forbidden,
            UpstreamErrorKind::BadRequest,
            UpstreamErrorKind::RateLimited,
            UpstreamErrorKind::Timeout,
            UpstreamErrorKind::Network,
            UpstreamErrorKind::Other5xx,
            UpstreamErrorKind::Other,
        ];
        for kind in all {
            assert!(!(kind.is_skip_worthy() && kind.is_transient()));
        }
    }
}
