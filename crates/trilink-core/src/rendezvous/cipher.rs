//! The rendezvous path cipher.
//!
//! Each direction encrypts with ChaCha20-Poly1305 under its own key and
//! a counter nonce `pathId:u32LE || sequence:u32LE || 0x00000000`. The
//! two sequences advance independently, and a decrypt failure still
//! consumes its sequence number. When the handshake upgrades from
//! authentication keys to transport keys, the sequences carry over.

use crate::crypto::{chacha_open, chacha_seal, SymmetricKey, CHACHA_NONCE_LEN};
use crate::error::Result;
use zeroize::Zeroizing;

/// Stateful AEAD for one rendezvous path.
pub struct PathCipher {
    path_id: u32,
    encrypt_key: SymmetricKey,
    decrypt_key: SymmetricKey,
    encrypt_seq: u32,
    decrypt_seq: u32,
}

impl PathCipher {
    /// Create a cipher with both directions at sequence 0.
    pub fn new(path_id: u32, encrypt_key: SymmetricKey, decrypt_key: SymmetricKey) -> Self {
        Self {
            path_id,
            encrypt_key,
            decrypt_key,
            encrypt_seq: 0,
            decrypt_seq: 0,
        }
    }

    fn nonce(path_id: u32, seq: u32) -> [u8; CHACHA_NONCE_LEN] {
        let mut nonce = [0u8; CHACHA_NONCE_LEN];
        nonce[..4].copy_from_slice(&path_id.to_le_bytes());
        nonce[4..8].copy_from_slice(&seq.to_le_bytes());
        nonce
    }

    /// Encrypt one frame, consuming the next send sequence number.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Self::nonce(self.path_id, self.encrypt_seq);
        self.encrypt_seq = self.encrypt_seq.wrapping_add(1);
        chacha_seal(&self.encrypt_key, &nonce, plaintext)
    }

    /// Decrypt one frame, consuming the next receive sequence number
    /// whether or not authentication succeeds.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let nonce = Self::nonce(self.path_id, self.decrypt_seq);
        self.decrypt_seq = self.decrypt_seq.wrapping_add(1);
        chacha_open(&self.decrypt_key, &nonce, ciphertext)
    }

    /// Swap both keys in place, preserving the sequence numbers.
    ///
    /// Used at the authentication→transport upgrade point.
    pub fn swap_keys(&mut self, encrypt_key: SymmetricKey, decrypt_key: SymmetricKey) {
        self.encrypt_key = encrypt_key;
        self.decrypt_key = decrypt_key;
    }
}
