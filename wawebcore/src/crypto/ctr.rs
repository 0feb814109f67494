use aes::{Aes128, Aes192, Aes256};
use cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use rand::TryRngCore;
use rand::rngs::OsRng;
use thiserror::Error;

type Aes128Ctr = Ctr128BE<Aes128>;
type Aes192Ctr = Ctr128BE<Aes192>;
type Aes256Ctr = Ctr128BE<Aes256>;

pub const NONCE_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CtrError {
    #[error("invalid AES key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),
    #[error("ciphertext too short: {0} bytes (need at least the 16-byte nonce)")]
    CiphertextTooShort(usize),
    #[error("invalid nonce length: {0} bytes (expected 16)")]
    InvalidNonceLength(usize),
}

type Result<T> = std::result::Result<T, CtrError>;

fn apply(key: &[u8], nonce: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = data.to_vec();
    match key.len() {
        16 => Aes128Ctr::new_from_slices(key, nonce)
            .map_err(|_| CtrError::InvalidKeyLength(key.len()))?
            .apply_keystream(&mut buffer),
        24 => Aes192Ctr::new_from_slices(key, nonce)
            .map_err(|_| CtrError::InvalidKeyLength(key.len()))?
            .apply_keystream(&mut buffer),
        32 => Aes256Ctr::new_from_slices(key, nonce)
            .map_err(|_| CtrError::InvalidKeyLength(key.len()))?
            .apply_keystream(&mut buffer),
        n => return Err(CtrError::InvalidKeyLength(n)),
    }
    Ok(buffer)
}

/// Encrypts plaintext using AES-CTR. Returns `nonce ‖ ciphertext`.
///
/// CTR provides no integrity protection; callers that need it compute a
/// separate MAC over the ciphertext, as the message layer does.
pub fn encrypt(key: &[u8], plaintext: &[u8], nonce: Option<&[u8]>) -> Result<Vec<u8>> {
    let nonce = match nonce {
        Some(n) if n.len() == NONCE_LEN => n.to_vec(),
        Some(n) => return Err(CtrError::InvalidNonceLength(n.len())),
        None => {
            let mut buf = [0u8; NONCE_LEN];
            OsRng.try_fill_bytes(&mut buf).expect("RNG failure");
            buf.to_vec()
        }
    };

    let ciphertext = apply(key, &nonce, plaintext)?;
    let mut out = nonce;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a `nonce ‖ ciphertext` buffer produced by [`encrypt`].
pub fn decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(CtrError::CiphertextTooShort(data.len()));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    apply(key, nonce, ciphertext)
}
