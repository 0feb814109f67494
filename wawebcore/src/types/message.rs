use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator for application messages, mirroring the `"type"` field of
/// the decrypted JSON payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Contact,
    Unknown,
}

impl MessageType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "text" => MessageType::Text,
            "image" => MessageType::Image,
            "video" => MessageType::Video,
            "audio" => MessageType::Audio,
            "document" => MessageType::Document,
            "sticker" => MessageType::Sticker,
            "location" => MessageType::Location,
            "contact" => MessageType::Contact,
            _ => MessageType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::Audio => "audio",
            MessageType::Document => "document",
            MessageType::Sticker => "sticker",
            MessageType::Location => "location",
            MessageType::Contact => "contact",
            MessageType::Unknown => "unknown",
        }
    }
}

/// Payload of a received message. Unrecognized type tags land in
/// [`MessageContent::Unknown`] with the original tag and raw JSON bytes,
/// so new server-side types never abort frame processing.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text {
        body: String,
    },
    Media {
        kind: MessageType,
        url: String,
        caption: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
    },
    Contact {
        display_name: String,
        vcard: String,
    },
    Unknown {
        tag: String,
        raw: Vec<u8>,
    },
}

impl MessageContent {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageContent::Text { .. } => MessageType::Text,
            MessageContent::Media { kind, .. } => *kind,
            MessageContent::Location { .. } => MessageType::Location,
            MessageContent::Contact { .. } => MessageType::Contact,
            MessageContent::Unknown { .. } => MessageType::Unknown,
        }
    }
}

/// A single decrypted application message, immutable once constructed.
/// Produced only by the message processor.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub message_id: String,
    pub jid: String,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    pub from_me: bool,
    /// Sender within a group chat, absent for direct chats.
    pub participant: Option<String>,
}

impl MessageEvent {
    pub fn message_type(&self) -> MessageType {
        self.content.message_type()
    }
}

/// Outbound message envelope, serialized to JSON before encryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl OutgoingMessage {
    pub fn text(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Text,
            to: to.into(),
            body: Some(body.into()),
            url: None,
            caption: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn media(
        to: impl Into<String>,
        kind: MessageType,
        url: impl Into<String>,
        caption: Option<String>,
    ) -> Self {
        Self {
            kind,
            to: to.into(),
            body: None,
            url: Some(url.into()),
            caption,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}
