use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

pub const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key length: {0} bytes (expected 32)")]
    InvalidLength(usize),
}

type Result<T> = std::result::Result<T, KeyError>;

/// An X25519 key pair used for the QR key exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: [u8; KEY_LEN],
    pub private_key: [u8; KEY_LEN],
}

impl KeyPair {
    /// Generates a new random X25519 key pair.
    pub fn generate() -> Self {
        let mut p_bytes = [0u8; KEY_LEN];
        OsRng.try_fill_bytes(&mut p_bytes).expect("RNG failure");
        let private = StaticSecret::from(p_bytes);
        let public = PublicKey::from(&private);
        Self {
            public_key: *public.as_bytes(),
            private_key: private.to_bytes(),
        }
    }

    /// Creates a key pair from an existing 32-byte private key.
    pub fn from_private_key(private_key: [u8; KEY_LEN]) -> Self {
        let private = StaticSecret::from(private_key);
        let public = PublicKey::from(&private);
        Self {
            public_key: *public.as_bytes(),
            private_key: private.to_bytes(),
        }
    }

    /// Computes the X25519 shared secret with a remote public key.
    ///
    /// The public key length is validated before any curve computation.
    pub fn shared_secret(&self, their_public: &[u8]) -> Result<[u8; KEY_LEN]> {
        validate_public_key(their_public)?;
        let mut pub_bytes = [0u8; KEY_LEN];
        pub_bytes.copy_from_slice(their_public);

        let private = StaticSecret::from(self.private_key);
        let shared = private.diffie_hellman(&PublicKey::from(pub_bytes));
        Ok(shared.to_bytes())
    }
}

impl Default for KeyPair {
    fn default() -> Self {
        Self::generate()
    }
}

/// Validates an X25519 public key (must be exactly 32 bytes).
pub fn validate_public_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_LEN {
        return Err(KeyError::InvalidLength(key.len()));
    }
    Ok(())
}

/// Validates an X25519 private key (must be exactly 32 bytes).
pub fn validate_private_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_LEN {
        return Err(KeyError::InvalidLength(key.len()));
    }
    Ok(())
}

/// Clamps a private key per the Curve25519 specification: clears the low
/// three bits of byte 0, clears the top bit and sets the second-highest bit
/// of byte 31.
pub fn clamp_private_key(key: &[u8]) -> Result<[u8; KEY_LEN]> {
    validate_private_key(key)?;
    let mut clamped = [0u8; KEY_LEN];
    clamped.copy_from_slice(key);
    clamped[0] &= 248;
    clamped[31] &= 127;
    clamped[31] |= 64;
    Ok(clamped)
}

/// Generates a random client identifier: 16 random bytes, base64-encoded.
pub fn generate_client_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.try_fill_bytes(&mut bytes).expect("RNG failure");
    BASE64.encode(bytes)
}
