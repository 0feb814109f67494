use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

/// Digest length of the underlying hash (SHA-256).
pub const HASH_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("invalid output length for HKDF expand: {0}")]
    InvalidLength(usize),
    #[error("invalid pseudo-random key length for HKDF expand")]
    InvalidPrk,
}

type Result<T> = std::result::Result<T, HkdfError>;

fn check_length(length: usize) -> Result<()> {
    if length == 0 || length > 255 * HASH_LEN {
        return Err(HkdfError::InvalidLength(length));
    }
    Ok(())
}

/// RFC 5869 extract step: `PRK = HMAC-SHA256(salt, ikm)`.
///
/// When `salt` is absent a zero-filled buffer of the digest length is used,
/// as the RFC specifies.
pub fn extract(salt: Option<&[u8]>, ikm: &[u8]) -> [u8; HASH_LEN] {
    let (prk, _) = Hkdf::<Sha256>::extract(salt, ikm);
    prk.into()
}

/// RFC 5869 expand step over a caller-supplied PRK.
///
/// The key exchange uses this expand-only form with the raw ECDH output as
/// the PRK and no info, matching the wire protocol byte-for-byte.
pub fn expand(prk: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>> {
    check_length(length)?;
    let hk = Hkdf::<Sha256>::from_prk(prk).map_err(|_| HkdfError::InvalidPrk)?;
    let mut okm = vec![0u8; length];
    hk.expand(info, &mut okm)
        .map_err(|_| HkdfError::InvalidLength(length))?;
    Ok(okm)
}

/// Full HKDF-SHA256 derivation (extract then expand).
pub fn sha256(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], length: usize) -> Result<Vec<u8>> {
    check_length(length)?;
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = vec![0u8; length];
    hk.expand(info, &mut okm)
        .map_err(|_| HkdfError::InvalidLength(length))?;
    Ok(okm)
}
