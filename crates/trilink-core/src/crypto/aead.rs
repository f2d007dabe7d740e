//! Authenticated encryption.
//!
//! Two AEAD constructions are used on the wire:
//!
//! - XSalsa20-Poly1305 (24-byte nonce) for everything NaCl-box shaped:
//!   message bodies, reflection envelopes, blobs, mediator challenges.
//! - ChaCha20-Poly1305 (12-byte nonce) for the rendezvous path cipher,
//!   whose nonce is a counter that fits 12 bytes exactly.
//!
//! The "prefixed" helpers implement the nonce-ahead wire format
//! `nonce || ciphertext || tag` used wherever the nonce is random rather
//! than sequenced.

use crate::crypto::SymmetricKey;
use crate::error::{Error, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use crypto_secretbox::XSalsa20Poly1305;
use zeroize::Zeroizing;

/// XSalsa20-Poly1305 nonce length.
pub const XSALSA_NONCE_LEN: usize = 24;

/// ChaCha20-Poly1305 nonce length.
pub const CHACHA_NONCE_LEN: usize = 12;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// Encrypt with XSalsa20-Poly1305. Output is `ciphertext || tag`.
pub fn xsalsa_seal(key: &SymmetricKey, nonce: &[u8; XSALSA_NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XSalsa20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| Error::InvalidKey("bad XSalsa20 key length".into()))?;

    cipher
        .encrypt(crypto_secretbox::Nonce::from_slice(nonce), plaintext)
        .map_err(|_| Error::Crypto("encryption failed".into()))
}

/// Decrypt XSalsa20-Poly1305 `ciphertext || tag`.
///
/// Returns a generic error on authentication failure; callers decide
/// whether that is frame-fatal or session-fatal.
pub fn xsalsa_open(
    key: &SymmetricKey,
    nonce: &[u8; XSALSA_NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = XSalsa20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| Error::InvalidKey("bad XSalsa20 key length".into()))?;

    let plaintext = cipher
        .decrypt(crypto_secretbox::Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Crypto("authentication failed".into()))?;

    Ok(Zeroizing::new(plaintext))
}

/// Encrypt with ChaCha20-Poly1305. Output is `ciphertext || tag`.
pub fn chacha_seal(key: &SymmetricKey, nonce: &[u8; CHACHA_NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| Error::InvalidKey("bad ChaCha20 key length".into()))?;

    cipher
        .encrypt(chacha20poly1305::Nonce::from_slice(nonce), plaintext)
        .map_err(|_| Error::Crypto("encryption failed".into()))
}

/// Decrypt ChaCha20-Poly1305 `ciphertext || tag`.
pub fn chacha_open(
    key: &SymmetricKey,
    nonce: &[u8; CHACHA_NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| Error::InvalidKey("bad ChaCha20 key length".into()))?;

    let plaintext = cipher
        .decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Crypto("authentication failed".into()))?;

    Ok(Zeroizing::new(plaintext))
}

/// Encrypt with a fresh random nonce in the nonce-ahead wire format:
/// `nonce (24) || ciphertext || tag`.
pub fn seal_prefixed(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce: [u8; XSALSA_NONCE_LEN] = super::random_bytes();
    let ciphertext = xsalsa_seal(key, &nonce, plaintext)?;

    let mut out = Vec::with_capacity(XSALSA_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt nonce-ahead data: `nonce (24) || ciphertext || tag`.
pub fn open_prefixed(key: &SymmetricKey, data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() < XSALSA_NONCE_LEN + TAG_LEN {
        return Err(Error::Crypto("ciphertext too short".into()));
    }

    let mut nonce = [0u8; XSALSA_NONCE_LEN];
    nonce.copy_from_slice(&data[..XSALSA_NONCE_LEN]);
    xsalsa_open(key, &nonce, &data[XSALSA_NONCE_LEN..])
}
