use std::sync::{Arc, Mutex};
use wawebcore::crypto::key_pair::KeyPair;
use wawebcore::crypto::{cbc, hkdf, mac};
use wawebcore::types::events::{Event, EventHandler};

/// Plays the server side of a QR scan against the given client public key:
/// ephemeral ECDH, expand-only HKDF to 80 bytes, CBC-encrypt the session
/// keys under the derived IV, HMAC over `ephemeral_public ‖ encrypted`.
#[allow(dead_code)]
pub fn build_secret_blob(client_public: &[u8; 32], session_keys: &[u8; 64]) -> Vec<u8> {
    let ephemeral = KeyPair::generate();
    let ecdh = ephemeral.shared_secret(client_public).unwrap();
    let expanded = hkdf::expand(&ecdh, &[], 80).unwrap();

    let aes_key = &expanded[..32];
    let hmac_key = &expanded[32..64];
    let iv = &expanded[64..80];

    let with_iv = cbc::encrypt(aes_key, session_keys, Some(iv)).unwrap();
    let encrypted_keys = &with_iv[16..];

    let tag = mac::sha256(hmac_key, &[&ephemeral.public_key, encrypted_keys]);

    let mut blob = Vec::with_capacity(64 + encrypted_keys.len());
    blob.extend_from_slice(&ephemeral.public_key);
    blob.extend_from_slice(&tag);
    blob.extend_from_slice(encrypted_keys);
    blob
}

/// Event handler that records every dispatched event.
pub struct Recorder {
    log: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, Arc<Mutex<Vec<Event>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (Arc::new(Self { log: log.clone() }), log)
    }
}

impl EventHandler for Recorder {
    fn handle_event(&self, event: &Event) {
        self.log.lock().unwrap().push(event.clone());
    }
}

/// Splits a rendered QR payload into `(server_ref, public_key, client_id)`.
#[allow(dead_code)]
pub fn parse_qr(code: &str) -> (String, [u8; 32], String) {
    use base64::Engine;
    let mut parts = code.splitn(3, ',');
    let server_ref = parts.next().unwrap().to_string();
    let key_b64 = parts.next().unwrap();
    let client_id = parts.next().unwrap().to_string();
    let key: [u8; 32] = base64::engine::general_purpose::STANDARD
        .decode(key_b64)
        .unwrap()
        .try_into()
        .unwrap();
    (server_ref, key, client_id)
}
