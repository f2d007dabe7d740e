//! Device-group key schedule.
//!
//! Every multi-device key is a keyed BLAKE2b derivation from the
//! device-group key (DGK) with personalization `3ma-mdev`. Derived once
//! per process; a pure function of the DGK.

use crate::crypto::{derive_key, SecretKey, SymmetricKey, PublicKey};
use crate::error::Result;
use std::fmt;

/// Personalization for all device-group derivations.
pub const DEVICE_GROUP_PERSONAL: &[u8] = b"3ma-mdev";

/// The derived device-group keys.
pub struct DeviceGroupKeys {
    /// Authentication secret towards the mediator (`salt = "p"`).
    pub dgpk_secret: SecretKey,
    /// Public half of `dgpk_secret`; also names the mediator URL.
    pub dgpk_public: PublicKey,
    /// Reflection envelope key (`salt = "r"`).
    pub dgrk: SymmetricKey,
    /// Device-info encryption key (`salt = "di"`).
    pub dgdik: SymmetricKey,
    /// Shared-device-data key (`salt = "sdd"`).
    pub dgsddk: SymmetricKey,
    /// Transaction-scope key (`salt = "ts"`).
    pub dgtsk: SymmetricKey,
}

impl DeviceGroupKeys {
    /// Derive the full schedule from the DGK.
    pub fn derive(dgk: &SymmetricKey) -> Result<Self> {
        let derive = |salt: &[u8]| derive_key(dgk.as_bytes(), salt, DEVICE_GROUP_PERSONAL, &[]);

        let dgpk_secret = SecretKey::from_bytes(*derive(b"p")?.as_bytes());
        let dgpk_public = dgpk_secret.public_key();

        Ok(Self {
            dgpk_secret,
            dgpk_public,
            dgrk: derive(b"r")?,
            dgdik: derive(b"di")?,
            dgsddk: derive(b"sdd")?,
            dgtsk: derive(b"ts")?,
        })
    }
}

impl fmt::Debug for DeviceGroupKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceGroupKeys")
            .field("dgpk_public", &self.dgpk_public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_deterministic() {
        let dgk = SymmetricKey::from_bytes([9u8; 32]);
        let a = DeviceGroupKeys::derive(&dgk).expect("derive");
        let b = DeviceGroupKeys::derive(&dgk).expect("derive");

        assert_eq!(a.dgpk_public, b.dgpk_public);
        assert_eq!(a.dgrk.as_bytes(), b.dgrk.as_bytes());
        assert_eq!(a.dgtsk.as_bytes(), b.dgtsk.as_bytes());
    }

    #[test]
    fn test_derived_keys_are_pairwise_distinct() {
        let dgk = SymmetricKey::from_bytes([9u8; 32]);
        let keys = DeviceGroupKeys::derive(&dgk).expect("derive");

        let all = [
            keys.dgrk.as_bytes(),
            keys.dgdik.as_bytes(),
            keys.dgsddk.as_bytes(),
            keys.dgtsk.as_bytes(),
        ];
        for (i, a) in all.iter().enumerate() {
            for b in all.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert_ne!(keys.dgpk_secret.as_bytes(), keys.dgrk.as_bytes());
    }

    #[test]
    fn test_different_dgk_different_schedule() {
        let a = DeviceGroupKeys::derive(&SymmetricKey::from_bytes([1u8; 32])).expect("derive");
        let b = DeviceGroupKeys::derive(&SymmetricKey::from_bytes([2u8; 32])).expect("derive");
        assert_ne!(a.dgpk_public, b.dgpk_public);
    }
}
