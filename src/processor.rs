//! Encrypt/decrypt pipeline for application messages.
//!
//! Inbound binary payloads carry `hmac[0:32] ‖ iv ‖ ciphertext`; the HMAC
//! is verified over `iv ‖ ciphertext` with the session MAC key before any
//! decryption happens. Outbound messages are serialized to JSON, CBC
//! encrypted under a fresh IV and authenticated the same way.

use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use wawebcore::binary::{self, BinaryTag};
use wawebcore::crypto::cbc::{self, CbcError};
use wawebcore::crypto::mac;
use wawebcore::session::SessionState;
use wawebcore::types::message::{MessageContent, MessageEvent, MessageType, OutgoingMessage};

const MAC_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("session is not authenticated")]
    NotAuthenticated,
    #[error("message failed HMAC verification")]
    Integrity,
    #[error(transparent)]
    Cipher(#[from] CbcError),
    #[error("payload too short: {0} bytes")]
    PayloadTooShort(usize),
    #[error("decrypted payload is not valid message JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("message payload is missing field {0}")]
    MissingField(&'static str),
}

type Result<T> = std::result::Result<T, ProcessError>;

pub struct MessageProcessor {
    session: Arc<RwLock<SessionState>>,
}

impl MessageProcessor {
    pub fn new(session: Arc<RwLock<SessionState>>) -> Self {
        Self { session }
    }

    async fn keys(&self) -> Result<([u8; 32], [u8; 32])> {
        self.session
            .read()
            .await
            .keys()
            .ok_or(ProcessError::NotAuthenticated)
    }

    /// Decrypts one inbound binary frame into its message events. A frame
    /// can carry a single message object or a JSON array batching several.
    /// Non-message tags produce no events; a tampered or undecipherable
    /// payload is an error the caller logs and drops without tearing down
    /// the connection.
    pub async fn process_binary(
        &self,
        tag: BinaryTag,
        payload: &[u8],
    ) -> Result<Vec<MessageEvent>> {
        match tag {
            BinaryTag::Message => {}
            other => {
                debug!("Ignoring non-message binary frame: {other:?}");
                return Ok(Vec::new());
            }
        }

        if payload.len() < MAC_LEN + cbc::IV_LEN {
            return Err(ProcessError::PayloadTooShort(payload.len()));
        }
        let (received_mac, encrypted) = payload.split_at(MAC_LEN);

        let (enc_key, mac_key) = self.keys().await?;
        if !mac::verify_sha256(&mac_key, &[encrypted], received_mac) {
            warn!("Dropping message frame that failed HMAC verification");
            return Err(ProcessError::Integrity);
        }

        let plaintext = cbc::decrypt(&enc_key, encrypted)?;
        parse_message_payload(&plaintext)
    }

    /// Serializes, encrypts and authenticates an outbound message into a
    /// complete binary frame ready for the transport.
    pub async fn encrypt_message(&self, message: &OutgoingMessage) -> Result<Vec<u8>> {
        let (enc_key, mac_key) = self.keys().await?;

        let plaintext = serde_json::to_vec(message)?;
        let encrypted = cbc::encrypt(&enc_key, &plaintext, None)?;
        let tag = mac::sha256(&mac_key, &[&encrypted]);

        let mut payload = Vec::with_capacity(MAC_LEN + encrypted.len());
        payload.extend_from_slice(&tag);
        payload.extend_from_slice(&encrypted);
        Ok(binary::encode_binary(BinaryTag::Message, &payload))
    }
}

fn require_str<'a>(obj: &'a Value, field: &'static str) -> Result<&'a str> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or(ProcessError::MissingField(field))
}

/// Maps a decrypted JSON payload onto message events. A top-level array
/// is a batch; each element is one message. Unrecognized type tags are
/// preserved as [`MessageContent::Unknown`] rather than rejected.
fn parse_message_payload(plaintext: &[u8]) -> Result<Vec<MessageEvent>> {
    let value: Value = serde_json::from_slice(plaintext)?;
    match value {
        Value::Array(items) => items.iter().map(parse_message_value).collect(),
        other => Ok(vec![parse_message_value(&other)?]),
    }
}

fn parse_message_value(value: &Value) -> Result<MessageEvent> {
    let message_id = require_str(value, "id")?.to_string();
    let jid = require_str(value, "jid")?.to_string();
    let type_tag = require_str(value, "type")?;
    let seconds = value
        .get("t")
        .and_then(Value::as_i64)
        .ok_or(ProcessError::MissingField("t"))?;
    let timestamp = chrono::DateTime::from_timestamp(seconds, 0)
        .ok_or(ProcessError::MissingField("t"))?;
    let from_me = value
        .get("fromMe")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let participant = value
        .get("participant")
        .and_then(Value::as_str)
        .map(str::to_string);

    let content = match MessageType::from_tag(type_tag) {
        MessageType::Text => MessageContent::Text {
            body: require_str(value, "body")?.to_string(),
        },
        kind @ (MessageType::Image
        | MessageType::Video
        | MessageType::Audio
        | MessageType::Document
        | MessageType::Sticker) => MessageContent::Media {
            kind,
            url: require_str(value, "url")?.to_string(),
            caption: value
                .get("caption")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        MessageType::Location => MessageContent::Location {
            latitude: value
                .get("lat")
                .and_then(Value::as_f64)
                .ok_or(ProcessError::MissingField("lat"))?,
            longitude: value
                .get("lng")
                .and_then(Value::as_f64)
                .ok_or(ProcessError::MissingField("lng"))?,
            name: value
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        MessageType::Contact => MessageContent::Contact {
            display_name: require_str(value, "displayName")?.to_string(),
            vcard: require_str(value, "vcard")?.to_string(),
        },
        MessageType::Unknown => MessageContent::Unknown {
            tag: type_tag.to_string(),
            raw: serde_json::to_vec(value)?,
        },
    };

    Ok(MessageEvent {
        message_id,
        jid,
        content,
        timestamp,
        from_me,
        participant,
    })
}
