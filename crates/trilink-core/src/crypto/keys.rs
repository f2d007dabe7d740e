//! X25519 key types and the NaCl-box precomputation.
//!
//! All secret key material is zeroized on drop and redacted in debug
//! output.

use crate::error::{Error, Result};
use salsa20::cipher::consts::{U10, U16};
use salsa20::cipher::generic_array::GenericArray;
use salsa20::hsalsa;
use std::fmt;
use x25519_dalek::{PublicKey as DalekPublic, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of all keys in this module (256 bits).
pub const KEY_LEN: usize = 32;

/// An X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse from a byte slice, rejecting wrong lengths.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("public key must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", hex::encode(&self.0[..8]))
    }
}

impl From<[u8; KEY_LEN]> for PublicKey {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

/// An X25519 secret key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Generate a fresh random secret key.
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(rand::rngs::OsRng).to_bytes())
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    ///
    /// # Security
    /// Handle with care; this exposes secret key material.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Derive the matching public key.
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(*DalekPublic::from(&secret).as_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// A 32-byte symmetric key, either derived or precomputed. Zeroized on
/// drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self(super::random_bytes())
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse from a byte slice, rejecting wrong lengths.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("key must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// NaCl-box precomputation: X25519 scalar multiplication followed by the
/// HSalsa20 key-extraction step over the shared point, with an all-zero
/// 16-byte input and the standard `expand 32-byte k` constants.
///
/// The result is the symmetric key NaCl `box` would use for this pair.
pub fn precompute(secret: &SecretKey, peer: &PublicKey) -> SymmetricKey {
    let ours = StaticSecret::from(*secret.as_bytes());
    let shared = ours.diffie_hellman(&DalekPublic::from(*peer.as_bytes()));

    let key = hsalsa::<U10>(
        GenericArray::from_slice(shared.as_bytes()),
        &GenericArray::<u8, U16>::default(),
    );

    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&key);
    SymmetricKey(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_from_secret_is_stable() {
        let secret = SecretKey::generate();
        assert_eq!(secret.public_key(), secret.public_key());
    }

    #[test]
    fn test_precompute_agreement() {
        let a = SecretKey::generate();
        let b = SecretKey::generate();

        let k_ab = precompute(&a, &b.public_key());
        let k_ba = precompute(&b, &a.public_key());

        assert_eq!(k_ab.as_bytes(), k_ba.as_bytes());
    }

    #[test]
    fn test_precompute_differs_from_raw_dh() {
        // The HSalsa20 extraction must change the raw shared point.
        let a = SecretKey::generate();
        let b = SecretKey::generate();

        let ours = StaticSecret::from(*a.as_bytes());
        let raw = ours.diffie_hellman(&DalekPublic::from(*b.public_key().as_bytes()));

        let boxed = precompute(&a, &b.public_key());
        assert_ne!(boxed.as_bytes(), raw.as_bytes());
    }

    #[test]
    fn test_public_key_from_slice_rejects_bad_length() {
        assert!(PublicKey::from_slice(&[0u8; 31]).is_err());
        assert!(PublicKey::from_slice(&[0u8; 33]).is_err());
        assert!(PublicKey::from_slice(&[0u8; 32]).is_ok());
    }
}
