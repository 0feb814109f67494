use aes::{Aes128, Aes192, Aes256};
use cbc::{Decryptor, Encryptor};
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use rand::TryRngCore;
use rand::rngs::OsRng;
use thiserror::Error;

pub const IV_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CbcError {
    #[error("invalid AES key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),
    #[error("ciphertext too short: {0} bytes (need at least the 16-byte IV)")]
    CiphertextTooShort(usize),
    #[error("invalid IV length: {0} bytes (expected 16)")]
    InvalidIvLength(usize),
    #[error("padding validation failed")]
    Padding,
}

type Result<T> = std::result::Result<T, CbcError>;

/// Encrypts plaintext using AES-CBC with PKCS#7 padding.
///
/// A random 16-byte IV is generated when none is supplied. The returned
/// buffer is `IV ‖ ciphertext`.
pub fn encrypt(key: &[u8], plaintext: &[u8], iv: Option<&[u8]>) -> Result<Vec<u8>> {
    let iv = match iv {
        Some(iv) if iv.len() == IV_LEN => {
            let mut buf = [0u8; IV_LEN];
            buf.copy_from_slice(iv);
            buf
        }
        Some(iv) => return Err(CbcError::InvalidIvLength(iv.len())),
        None => {
            let mut buf = [0u8; IV_LEN];
            OsRng.try_fill_bytes(&mut buf).expect("RNG failure");
            buf
        }
    };

    let ciphertext = match key.len() {
        16 => Encryptor::<Aes128>::new_from_slices(key, &iv)
            .map_err(|_| CbcError::InvalidKeyLength(key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => Encryptor::<Aes192>::new_from_slices(key, &iv)
            .map_err(|_| CbcError::InvalidKeyLength(key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => Encryptor::<Aes256>::new_from_slices(key, &iv)
            .map_err(|_| CbcError::InvalidKeyLength(key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        n => return Err(CbcError::InvalidKeyLength(n)),
    };

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts an `IV ‖ ciphertext` buffer using AES-CBC with PKCS#7 padding.
pub fn decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < IV_LEN {
        return Err(CbcError::CiphertextTooShort(data.len()));
    }
    let (iv, ciphertext) = data.split_at(IV_LEN);

    match key.len() {
        16 => Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| CbcError::InvalidKeyLength(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CbcError::Padding),
        24 => Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| CbcError::InvalidKeyLength(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CbcError::Padding),
        32 => Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| CbcError::InvalidKeyLength(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CbcError::Padding),
        n => Err(CbcError::InvalidKeyLength(n)),
    }
}
