//! BLAKE2b key derivation.
//!
//! Every key schedule in the protocol is a keyed BLAKE2b with a salt and
//! a personalization string, both zero-padded to 16 bytes, producing 32
//! bytes. A single derivation (`rph`) runs unkeyed with the input hashed
//! instead.

use crate::crypto::{SymmetricKey, KEY_LEN};
use crate::error::{Error, Result};
use blake2::digest::consts::U32;
use blake2::digest::core_api::{Buffer, UpdateCore, VariableOutputCore};
use blake2::digest::{FixedOutput, Output, Update};
use blake2::{Blake2bMac, Blake2bVarCore};

/// Salt and personalization parameter length after padding.
pub const PARAM_LEN: usize = 16;

/// Maximum BLAKE2b key length.
const MAX_KEY_LEN: usize = 64;

fn pad_param(name: &'static str, value: &[u8]) -> Result<[u8; PARAM_LEN]> {
    if value.len() > PARAM_LEN {
        return Err(Error::InvalidKey(format!(
            "{} must be at most {} bytes, got {}",
            name,
            PARAM_LEN,
            value.len()
        )));
    }
    let mut padded = [0u8; PARAM_LEN];
    padded[..value.len()].copy_from_slice(value);
    Ok(padded)
}

/// Derive 32 bytes with BLAKE2b.
///
/// `key` may be empty, in which case the hash runs unkeyed over `input`
/// with the same salt and personalization parameters. `salt` and
/// `personal` are zero-padded to 16 bytes.
pub fn derive_key(key: &[u8], salt: &[u8], personal: &[u8], input: &[u8]) -> Result<SymmetricKey> {
    let salt = pad_param("salt", salt)?;
    let personal = pad_param("personalization", personal)?;

    if key.is_empty() {
        return Ok(SymmetricKey::from_bytes(hash_with_params(&salt, &personal, input)));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::InvalidKey(format!(
            "KDF key must be at most {} bytes, got {}",
            MAX_KEY_LEN,
            key.len()
        )));
    }

    let mut mac = Blake2bMac::<U32>::new_with_salt_and_personal(key, &salt, &personal)
        .map_err(|_| Error::InvalidKey("bad KDF parameter length".into()))?;
    Update::update(&mut mac, input);

    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&mac.finalize_fixed());
    Ok(SymmetricKey::from_bytes(out))
}

/// Unkeyed BLAKE2b-256 with salt and personalization, via the low-level
/// variable-output core (the high-level MAC type rejects empty keys).
fn hash_with_params(salt: &[u8; PARAM_LEN], personal: &[u8; PARAM_LEN], input: &[u8]) -> [u8; KEY_LEN] {
    let mut core = Blake2bVarCore::new_with_params(salt, personal, 0, KEY_LEN);
    let mut buffer = Buffer::<Blake2bVarCore>::default();
    buffer.digest_blocks(input, |blocks| core.update_blocks(blocks));

    let mut full = Output::<Blake2bVarCore>::default();
    core.finalize_variable_core(&mut buffer, &mut full);

    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&full[..KEY_LEN]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_key(b"root key material", b"p", b"3ma-mdev", &[]).expect("derive");
        let b = derive_key(b"root key material", b"p", b"3ma-mdev", &[]).expect("derive");
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_salt_separates_keys() {
        let key = [11u8; 32];
        let p = derive_key(&key, b"p", b"3ma-mdev", &[]).expect("derive");
        let r = derive_key(&key, b"r", b"3ma-mdev", &[]).expect("derive");
        assert_ne!(p.as_bytes(), r.as_bytes());
    }

    #[test]
    fn test_personalization_separates_keys() {
        let key = [11u8; 32];
        let a = derive_key(&key, b"x", b"3ma-csp", &[]).expect("derive");
        let b = derive_key(&key, b"x", b"3ma-rendezvous", &[]).expect("derive");
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_input_contributes() {
        let key = [11u8; 32];
        let a = derive_key(&key, b"v2", b"3ma-csp", b"cookie-and-key").expect("derive");
        let b = derive_key(&key, b"v2", b"3ma-csp", b"cookie-and-kez").expect("derive");
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_unkeyed_hash_accepts_empty_key() {
        let a = derive_key(&[], b"ph", b"3ma-rendezvous", b"transport-key").expect("derive");
        let b = derive_key(&[], b"ph", b"3ma-rendezvous", b"transport-key").expect("derive");
        assert_eq!(a.as_bytes(), b.as_bytes());

        let c = derive_key(&[], b"ph", b"3ma-rendezvous", b"transport-kez").expect("derive");
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_keyed_and_unkeyed_differ() {
        let keyed = derive_key(b"k", b"s", b"p", b"input").expect("derive");
        let unkeyed = derive_key(&[], b"s", b"p", b"input").expect("derive");
        assert_ne!(keyed.as_bytes(), unkeyed.as_bytes());
    }

    #[test]
    fn test_oversized_parameters_rejected() {
        assert!(derive_key(&[0u8; 65], b"s", b"p", &[]).is_err());
        assert!(derive_key(b"k", &[0u8; 17], b"p", &[]).is_err());
        assert!(derive_key(b"k", b"s", &[0u8; 17], &[]).is_err());
    }
}
