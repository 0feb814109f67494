//! # Cryptography Utilities
//!
//! AES primitives (CBC, GCM, CTR), HKDF, HMAC-SHA256 and X25519 key pair
//! management as used by the QR key exchange and the message layer.

pub mod cbc;
pub mod ctr;
pub mod gcm;
pub mod hkdf;
pub mod key_pair;
pub mod mac;

/// Accepted AES key sizes in bytes.
pub const VALID_KEY_LENGTHS: [usize; 3] = [16, 24, 32];

/// Returns true if `key` has a valid AES key length (16, 24 or 32 bytes).
pub fn validate_key(key: &[u8]) -> bool {
    VALID_KEY_LENGTHS.contains(&key.len())
}
