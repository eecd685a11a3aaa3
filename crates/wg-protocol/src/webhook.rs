//! Inbound webhook payload shapes: chat-platform updates and the three
//! payment lifecycle webhooks consumed by the downsell scheduler.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct InboundUpdate {
    pub message: Option<InboundMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub text: Option<String>,
    pub chat: InboundChat,
    pub from: Option<InboundUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundUser {
    pub id: i64,
}

impl InboundUpdate {
    /// "start" intent: text equal to `/start`, `start`, or starting with
    /// `/start ` (deep-link payload). Matching is exact on the bare forms.
    pub fn is_start_intent(&self) -> bool {
        let Some(text) = self.message.as_ref().and_then(|m| m.text.as_deref()) else {
            return false;
        };
        text == "/start" || text == "start" || text.starts_with("/start ")
    }

    /// The chat id the update is addressed to, if it carries a message.
    pub fn chat_id(&self) -> Option<i64> {
        self.message.as_ref().map(|m| m.chat.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PixCreatedWebhook {
    pub tenant: String,
    pub recipient: i64,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentApprovedWebhook {
    pub tenant: String,
    pub recipient: i64,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PixExpiredWebhook {
    pub tenant: String,
    pub transaction_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update_with_text(text: &str) -> InboundUpdate {
        InboundUpdate {
            message: Some(InboundMessage {
                text: Some(text.to_owned()),
                chat: InboundChat { id: 42 },
                from: Some(InboundUser { id: 99 }),
            }),
        }
    }

    #[test]
    fn detects_all_documented_start_forms() {
        assert!(update_with_text("/start").is_start_intent());
        assert!(update_with_text("start").is_start_intent());
        assert!(update_with_text("/start promo123").is_start_intent());
    }

    #[test]
    fn rejects_non_start_text() {
        assert!(!update_with_text("hello").is_start_intent());
        assert!(!update_with_text("/started").is_start_intent());
        assert!(!update_with_text("starting now").is_start_intent());
    }

    #[test]
    fn update_with_no_message_is_not_start_intent() {
        let update = InboundUpdate { message: None };
        assert!(!update.is_start_intent());
        assert_eq!(update.chat_id(), None);
    }
}
