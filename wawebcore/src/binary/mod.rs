//! Wire frame codec.
//!
//! Every transport unit is classified as text or binary before anything
//! cryptographic happens to it. Text frames carry control-plane JSON with a
//! correlation tag (`<tag>,<json>`); binary frames carry a one-byte
//! message-type tag followed by an opaque payload.
//!
//! The binary tag table below is the representative subset exercised by
//! this client; it is validated by conformance tests against captured
//! traffic rather than derived from documentation.

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame is empty")]
    EmptyFrame,
    #[error("text frame has no tag separator")]
    MissingTagSeparator,
    #[error("text frame body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, CodecError>;

/// Message-type tag carried in the first byte of a binary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryTag {
    Message,
    Receipt,
    Presence,
    Notification,
    Unknown(u8),
}

impl BinaryTag {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => BinaryTag::Message,
            0x02 => BinaryTag::Receipt,
            0x03 => BinaryTag::Presence,
            0x04 => BinaryTag::Notification,
            other => BinaryTag::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            BinaryTag::Message => 0x01,
            BinaryTag::Receipt => 0x02,
            BinaryTag::Presence => 0x03,
            BinaryTag::Notification => 0x04,
            BinaryTag::Unknown(other) => other,
        }
    }
}

/// One decoded unit of transport payload.
#[derive(Debug, Clone)]
pub enum WireFrame {
    Text { tag: String, body: Value },
    Binary { tag: BinaryTag, payload: Bytes },
}

/// Control-plane message carried by a text frame body.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// Response to the init request: server status plus the QR reference.
    InitResponse { status: u16, server_ref: Option<String> },
    /// `["Conn", {..}]` — carries the base64 shared-secret blob.
    Conn(Value),
    /// Server challenge during session restore.
    Challenge(String),
    /// Generic success/status object (e.g. restore confirmation).
    Status(u16),
    Other(Value),
}

/// Parses the textual form `<tag>,<json>` of a control frame.
pub fn parse_text_frame(text: &str) -> Result<(String, Value)> {
    let (tag, body) = text
        .split_once(',')
        .ok_or(CodecError::MissingTagSeparator)?;
    let value: Value = serde_json::from_str(body)?;
    Ok((tag.to_string(), value))
}

/// Encodes a control message into its textual wire form.
pub fn encode_text(tag: &str, body: &Value) -> String {
    format!("{tag},{body}")
}

/// Classifies and decodes a raw transport unit.
///
/// Classification happens first: anything that parses as a `<tag>,<json>`
/// UTF-8 string is a text frame; everything else is a binary frame whose
/// first byte is the message-type tag.
pub fn decode_frame(raw: &[u8]) -> Result<WireFrame> {
    if raw.is_empty() {
        return Err(CodecError::EmptyFrame);
    }

    if let Ok(text) = std::str::from_utf8(raw)
        && let Ok((tag, body)) = parse_text_frame(text)
    {
        return Ok(WireFrame::Text { tag, body });
    }

    Ok(WireFrame::Binary {
        tag: BinaryTag::from_byte(raw[0]),
        payload: Bytes::copy_from_slice(&raw[1..]),
    })
}

/// Encodes a binary frame: tag byte followed by the payload.
pub fn encode_binary(tag: BinaryTag, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(tag.to_byte());
    out.extend_from_slice(payload);
    out
}

/// Classifies the JSON body of a text frame into a control message.
pub fn classify_control(body: &Value) -> ControlMessage {
    if let Some(items) = body.as_array()
        && items.first().and_then(Value::as_str) == Some("Conn")
    {
        return ControlMessage::Conn(items.get(1).cloned().unwrap_or(Value::Null));
    }

    if let Some(obj) = body.as_object() {
        if let Some(challenge) = obj.get("challenge").and_then(Value::as_str) {
            return ControlMessage::Challenge(challenge.to_string());
        }
        if let Some(status) = obj.get("status").and_then(Value::as_u64) {
            if let Some(server_ref) = obj.get("ref").and_then(Value::as_str) {
                return ControlMessage::InitResponse {
                    status: status as u16,
                    server_ref: Some(server_ref.to_string()),
                };
            }
            return ControlMessage::Status(status as u16);
        }
    }

    ControlMessage::Other(body.clone())
}
