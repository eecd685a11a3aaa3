//! Message content shapes shared between welcome messages, downsell
//! templates, and broadcasts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Audio,
}

impl MediaKind {
    /// Multi-media sends order attachments audio > video > photo (§4.8).
    /// Documents sort last; ties break by insertion order (stable sort).
    pub fn send_order_rank(self) -> u8 {
        match self {
            MediaKind::Audio => 0,
            MediaKind::Video => 1,
            MediaKind::Photo => 2,
            MediaKind::Document => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
            MediaKind::Audio => "audio",
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(MediaKind::Photo),
            "video" => Ok(MediaKind::Video),
            "document" => Ok(MediaKind::Document),
            "audio" => Ok(MediaKind::Audio),
            _ => Err(()),
        }
    }
}

/// A reference to a media blob by content address, embedded in welcome
/// messages, downsell templates, and broadcast content documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub sha256: String,
    pub kind: MediaKind,
}

/// Text + parse-mode + up to a handful of media references. Welcome
/// messages cap media refs at 3 (spec §3); templates/broadcasts are
/// unbounded here, capping is a repository-layer concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub text: String,
    #[serde(default = "default_parse_mode")]
    pub parse_mode: String,
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

fn default_parse_mode() -> String {
    "HTML".to_owned()
}

impl MessageContent {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: default_parse_mode(),
            media: Vec::new(),
        }
    }

    /// Media ordered audio > video > photo > document for send-time iteration.
    pub fn media_in_send_order(&self) -> Vec<&MediaRef> {
        let mut refs: Vec<&MediaRef> = self.media.iter().collect();
        refs.sort_by_key(|m| m.kind.send_order_rank());
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_in_send_order_places_audio_before_video_before_photo() {
        let content = MessageContent {
            text: "hi".to_owned(),
            parse_mode: "HTML".to_owned(),
            media: vec![
                MediaRef { sha256: "p".into(), kind: MediaKind::Photo },
                MediaRef { sha256: "a".into(), kind: MediaKind::Audio },
                MediaRef { sha256: "v".into(), kind: MediaKind::Video },
            ],
        };
        let order: Vec<_> = content.media_in_send_order().into_iter().map(|m| m.sha256.as_str()).collect();
        assert_eq!(order, vec!["a", "v", "p"]);
    }
}
