use crate::auth::AuthResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session key is not valid hex: {0}")]
    InvalidKeyEncoding(#[from] hex::FromHexError),
    #[error("session key has wrong length: {0} bytes (expected 32)")]
    InvalidKeyLength(usize),
    #[error("persisted session is missing required fields")]
    Incomplete,
}

/// Mutable session state shared between the authentication orchestrator
/// (sole writer of the keys) and the message processor (reader).
///
/// The key fields are private so the only way to set them is
/// [`SessionState::apply_auth`] / [`SessionState::restore`], which update
/// both keys and the authenticated flag in one step. A state with exactly
/// one key set is unrepresentable.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub client_id: Option<String>,
    enc_key: Option<[u8; 32]>,
    mac_key: Option<[u8; 32]>,
    pub server_token: Option<String>,
    pub client_token: Option<String>,
    authenticated: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Installs the keys from a completed key exchange. This is the single
    /// atomic write the orchestrator performs at authentication.
    pub fn apply_auth(&mut self, auth: &AuthResult) {
        self.client_id = Some(auth.client_id.clone());
        self.enc_key = Some(auth.enc_key);
        self.mac_key = Some(auth.mac_key);
        self.authenticated = true;
        self.timestamp = Some(auth.timestamp);
    }

    /// Rebuilds an authenticated state from a persisted session record.
    pub fn restore(record: SerializableSession) -> Result<Self, SessionError> {
        let enc_key = decode_key(&record.enc_key)?;
        let mac_key = decode_key(&record.mac_key)?;
        Ok(Self {
            client_id: Some(record.client_id),
            enc_key: Some(enc_key),
            mac_key: Some(mac_key),
            server_token: record.server_token,
            client_token: record.client_token,
            authenticated: true,
            timestamp: Some(Utc::now()),
        })
    }

    /// Returns `(enc_key, mac_key)` when the session is authenticated.
    pub fn keys(&self) -> Option<([u8; 32], [u8; 32])> {
        Some((self.enc_key?, self.mac_key?))
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Drops all identity and key material.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn decode_key(hex_str: &str) -> Result<[u8; 32], SessionError> {
    let bytes = hex::decode(hex_str)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| SessionError::InvalidKeyLength(len))
}

/// On-disk schema of a persisted session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializableSession {
    pub client_id: String,
    pub enc_key: String,
    pub mac_key: String,
    pub server_token: Option<String>,
    pub client_token: Option<String>,
}

impl SerializableSession {
    /// Snapshots an authenticated session for persistence. Returns `None`
    /// for unauthenticated state, which is never written to disk.
    pub fn from_state(state: &SessionState) -> Option<Self> {
        let (enc_key, mac_key) = state.keys()?;
        Some(Self {
            client_id: state.client_id.clone()?,
            enc_key: hex::encode(enc_key),
            mac_key: hex::encode(mac_key),
            server_token: state.server_token.clone(),
            client_token: state.client_token.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_result() -> AuthResult {
        AuthResult {
            client_id: "cid".into(),
            enc_key: [1u8; 32],
            mac_key: [2u8; 32],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_apply_auth_sets_both_keys_atomically() {
        let mut state = SessionState::default();
        assert!(!state.is_authenticated());
        assert!(state.keys().is_none());

        state.apply_auth(&auth_result());
        assert!(state.is_authenticated());
        let (enc, mac) = state.keys().unwrap();
        assert_eq!(enc, [1u8; 32]);
        assert_eq!(mac, [2u8; 32]);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let mut state = SessionState::default();
        state.apply_auth(&auth_result());
        state.server_token = Some("stok".into());

        let record = SerializableSession::from_state(&state).unwrap();
        assert_eq!(record.enc_key.len(), 64);

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"clientId\""));
        assert!(json.contains("\"encKey\""));

        let restored = SessionState::restore(serde_json::from_str(&json).unwrap()).unwrap();
        assert!(restored.is_authenticated());
        assert_eq!(restored.keys(), state.keys());
        assert_eq!(restored.server_token.as_deref(), Some("stok"));
    }

    #[test]
    fn test_restore_rejects_bad_key_material() {
        let record = SerializableSession {
            client_id: "cid".into(),
            enc_key: "zz".into(),
            mac_key: hex::encode([0u8; 32]),
            server_token: None,
            client_token: None,
        };
        assert!(SessionState::restore(record).is_err());

        let record = SerializableSession {
            client_id: "cid".into(),
            enc_key: hex::encode([0u8; 16]),
            mac_key: hex::encode([0u8; 32]),
            server_token: None,
            client_token: None,
        };
        assert!(matches!(
            SessionState::restore(record),
            Err(SessionError::InvalidKeyLength(16))
        ));
    }

    #[test]
    fn test_unauthenticated_state_is_never_persisted() {
        assert!(SerializableSession::from_state(&SessionState::default()).is_none());
    }
}
