use aes::Aes192;
use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce, Tag};
use rand::TryRngCore;
use rand::rngs::OsRng;
use thiserror::Error;

type Aes192Gcm = AesGcm<Aes192, U12>;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum GcmError {
    #[error("invalid AES key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),
    #[error("ciphertext too short: {0} bytes (need at least the 12-byte IV)")]
    CiphertextTooShort(usize),
    #[error("invalid IV length: {0} bytes (expected 12)")]
    InvalidIvLength(usize),
    #[error("invalid authentication tag length: {0} bytes (expected 16)")]
    InvalidTagLength(usize),
    #[error("authentication tag verification failed")]
    TagMismatch,
    #[error("AES-GCM cipher operation failed")]
    CipherError,
}

type Result<T> = std::result::Result<T, GcmError>;

fn seal<C>(key: &[u8], iv: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<(Vec<u8>, Vec<u8>)>
where
    C: KeyInit + AeadInPlace + AeadCore<NonceSize = U12, TagSize = U16>,
{
    let cipher = C::new_from_slice(key).map_err(|_| GcmError::InvalidKeyLength(key.len()))?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(iv), aad, &mut buffer)
        .map_err(|_| GcmError::CipherError)?;

    let mut out = Vec::with_capacity(IV_LEN + buffer.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&buffer);
    Ok((out, tag.to_vec()))
}

fn open<C>(key: &[u8], iv: &[u8], ciphertext: &[u8], tag: &[u8], aad: &[u8]) -> Result<Vec<u8>>
where
    C: KeyInit + AeadInPlace + AeadCore<NonceSize = U12, TagSize = U16>,
{
    let cipher = C::new_from_slice(key).map_err(|_| GcmError::InvalidKeyLength(key.len()))?;
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(iv),
            aad,
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| GcmError::TagMismatch)?;
    Ok(buffer)
}

/// Encrypts plaintext using AES-GCM with a detached authentication tag.
///
/// A random 12-byte IV is generated when none is supplied. Returns
/// `(IV ‖ ciphertext, tag)`.
pub fn encrypt(
    key: &[u8],
    plaintext: &[u8],
    iv: Option<&[u8]>,
    aad: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let iv = match iv {
        Some(iv) if iv.len() == IV_LEN => iv.to_vec(),
        Some(iv) => return Err(GcmError::InvalidIvLength(iv.len())),
        None => {
            let mut buf = [0u8; IV_LEN];
            OsRng.try_fill_bytes(&mut buf).expect("RNG failure");
            buf.to_vec()
        }
    };

    match key.len() {
        16 => seal::<Aes128Gcm>(key, &iv, plaintext, aad),
        24 => seal::<Aes192Gcm>(key, &iv, plaintext, aad),
        32 => seal::<Aes256Gcm>(key, &iv, plaintext, aad),
        n => Err(GcmError::InvalidKeyLength(n)),
    }
}

/// Decrypts an `IV ‖ ciphertext` buffer using AES-GCM, verifying the
/// caller-supplied tag. A tag mismatch surfaces as [`GcmError::TagMismatch`];
/// no plaintext is ever returned for tampered input.
pub fn decrypt(key: &[u8], data: &[u8], tag: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if data.len() < IV_LEN {
        return Err(GcmError::CiphertextTooShort(data.len()));
    }
    if tag.len() != TAG_LEN {
        return Err(GcmError::InvalidTagLength(tag.len()));
    }
    let (iv, ciphertext) = data.split_at(IV_LEN);

    match key.len() {
        16 => open::<Aes128Gcm>(key, iv, ciphertext, tag, aad),
        24 => open::<Aes192Gcm>(key, iv, ciphertext, tag, aad),
        32 => open::<Aes256Gcm>(key, iv, ciphertext, tag, aad),
        n => Err(GcmError::InvalidKeyLength(n)),
    }
}
