//! Cryptographic primitives.
//!
//! Thin, strongly-typed wrappers over the RustCrypto implementations:
//! X25519 key agreement with the NaCl-box key extraction step,
//! XSalsa20-Poly1305 and ChaCha20-Poly1305 AEAD, and the keyed BLAKE2b
//! derivation used by every key schedule in the protocol.

mod aead;
mod kdf;
mod keys;

pub use aead::{
    chacha_open, chacha_seal, open_prefixed, seal_prefixed, xsalsa_open, xsalsa_seal,
    CHACHA_NONCE_LEN, TAG_LEN, XSALSA_NONCE_LEN,
};
pub use kdf::derive_key;
pub use keys::{precompute, PublicKey, SecretKey, SymmetricKey, KEY_LEN};

use rand::RngCore;

/// Fill a fixed-size array with CSPRNG output.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

/// A CSPRNG-filled vector of the given length.
pub fn random_vec(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}
