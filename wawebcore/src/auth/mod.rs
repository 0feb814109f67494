//! Pure key-exchange logic for the QR authentication flow.
//!
//! The async orchestrator in the root crate feeds the decoded shared-secret
//! blob into [`process_shared_secret`]; everything here is deterministic and
//! side-effect free so it can be tested byte-for-byte.

pub mod qr;

use crate::crypto::key_pair::KeyPair;
use crate::crypto::{cbc, hkdf, mac};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Minimum length of the shared-secret blob:
/// 32-byte ephemeral public key, 32-byte HMAC tag, >=32 bytes of keys.
pub const MIN_SECRET_LEN: usize = 96;

/// Length of the expanded keying material: AES key, HMAC key, IV.
const EXPANDED_LEN: usize = 80;

#[derive(Debug, Error)]
pub enum KeyExchangeError {
    #[error("shared secret too short: {0} bytes (need at least {MIN_SECRET_LEN})")]
    SecretTooShort(usize),
    #[error("HMAC validation of the shared secret failed")]
    IntegrityCheckFailed,
    #[error("decrypted session keys too short: {0} bytes (need at least 64)")]
    DecryptedKeysTooShort(usize),
    #[error(transparent)]
    Key(#[from] crate::crypto::key_pair::KeyError),
    #[error(transparent)]
    Hkdf(#[from] crate::crypto::hkdf::HkdfError),
    #[error(transparent)]
    Cipher(#[from] cbc::CbcError),
}

type Result<T> = std::result::Result<T, KeyExchangeError>;

/// Outcome of a successful key exchange.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub client_id: String,
    pub enc_key: [u8; 32],
    pub mac_key: [u8; 32],
    pub timestamp: DateTime<Utc>,
}

/// Runs the deterministic key-exchange algorithm over a scanned
/// shared-secret blob.
///
/// Layout: `ephemeral_public_key[0..32] ‖ hmac_tag[32..64] ‖
/// encrypted_keys[64..]`. The raw ECDH output is HKDF-expanded (expand
/// only, no salt or info) to 80 bytes: AES key, HMAC key, IV. The HMAC is
/// verified in constant time over `ephemeral_public_key ‖ encrypted_keys`
/// before anything is decrypted; a mismatch is a hard authentication
/// failure and the same blob is never retried.
pub fn process_shared_secret(
    secret: &[u8],
    key_pair: &KeyPair,
    client_id: &str,
) -> Result<AuthResult> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(KeyExchangeError::SecretTooShort(secret.len()));
    }

    let ephemeral_public = &secret[..32];
    let hmac_tag = &secret[32..64];
    let encrypted_keys = &secret[64..];

    let ecdh_secret = key_pair.shared_secret(ephemeral_public)?;
    let expanded = hkdf::expand(&ecdh_secret, &[], EXPANDED_LEN)?;

    let aes_key = &expanded[..32];
    let hmac_key = &expanded[32..64];
    let iv = &expanded[64..EXPANDED_LEN];

    if !mac::verify_sha256(hmac_key, &[ephemeral_public, encrypted_keys], hmac_tag) {
        return Err(KeyExchangeError::IntegrityCheckFailed);
    }

    let mut ciphertext = Vec::with_capacity(iv.len() + encrypted_keys.len());
    ciphertext.extend_from_slice(iv);
    ciphertext.extend_from_slice(encrypted_keys);

    let decrypted = cbc::decrypt(aes_key, &ciphertext)?;
    if decrypted.len() < 64 {
        return Err(KeyExchangeError::DecryptedKeysTooShort(decrypted.len()));
    }

    let mut enc_key = [0u8; 32];
    let mut mac_key = [0u8; 32];
    enc_key.copy_from_slice(&decrypted[..32]);
    mac_key.copy_from_slice(&decrypted[32..64]);

    Ok(AuthResult {
        client_id: client_id.to_string(),
        enc_key,
        mac_key,
        timestamp: Utc::now(),
    })
}
