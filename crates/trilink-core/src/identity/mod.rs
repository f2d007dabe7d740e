//! Account identity.
//!
//! The identity record is written once during linking and is read-only
//! afterwards, with one exception: the 64-bit device id is allocated
//! lazily on first mediator connect and persisted from then on.

mod keyschedule;

pub use keyschedule::DeviceGroupKeys;

use crate::crypto::{SecretKey, SymmetricKey};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Length of an identity code.
pub const IDENTITY_LEN: usize = 8;

/// Length of the device cookie.
pub const DEVICE_COOKIE_LEN: usize = 16;

/// An 8-character account identity: uppercase ASCII `[*0-9A-Z]{8}`.
///
/// The leading `*` form is reserved for gateway identities.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityCode([u8; IDENTITY_LEN]);

impl IdentityCode {
    /// Parse and validate an identity code.
    pub fn parse(value: &str) -> Result<Self> {
        let bytes = value.as_bytes();
        if bytes.len() != IDENTITY_LEN {
            return Err(Error::Caller(format!(
                "identity must be {} characters, got {}",
                IDENTITY_LEN,
                bytes.len()
            )));
        }
        let valid = bytes
            .iter()
            .all(|b| *b == b'*' || b.is_ascii_digit() || b.is_ascii_uppercase());
        if !valid {
            return Err(Error::Caller(format!("invalid identity format: {value:?}")));
        }

        let mut arr = [0u8; IDENTITY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Parse from exactly eight raw wire bytes.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::Protocol("identity is not ASCII".into()))?;
        Self::parse(text).map_err(|_| Error::Protocol(format!("invalid identity on wire: {text:?}")))
    }

    /// The eight raw bytes.
    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        // Validated ASCII on construction.
        std::str::from_utf8(&self.0).unwrap_or("????????")
    }

    /// Whether this is a star-prefixed (gateway) identity.
    pub fn is_gateway(&self) -> bool {
        self.0[0] == b'*'
    }
}

impl fmt::Display for IdentityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for IdentityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IdentityCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for IdentityCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IdentityCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        IdentityCode::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// The long-lived account identity of this linked device.
pub struct AccountIdentity {
    /// The 8-character account identity.
    pub identity: IdentityCode,
    /// The account's long-term X25519 client key.
    pub client_key: SecretKey,
    /// Opaque routing tag assigned by the directory server.
    pub server_group: String,
    /// Root of the device-group key schedule. Never leaves the process.
    pub device_group_key: SymmetricKey,
    /// The device cookie presented during chat-server login.
    pub device_cookie: [u8; DEVICE_COOKIE_LEN],
    /// 64-bit device id, allocated on first mediator connect.
    pub device_id: Option<u64>,
    /// Number of contacts transferred during linking.
    pub contact_count: u32,
    /// Number of groups transferred during linking.
    pub group_count: u32,
    /// When this device was linked.
    pub linked_at: DateTime<Utc>,
}

/// On-disk form of [`AccountIdentity`] (`identity.json`).
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    identity: IdentityCode,
    client_key: String,
    server_group: String,
    device_group_key: String,
    device_cookie: String,
    contact_count: u32,
    group_count: u32,
    linked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
}

fn decode_hex_array<const N: usize>(field: &str, value: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(value).map_err(|e| Error::Storage(format!("{field}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::Storage(format!("{field}: expected {N} bytes")))
}

impl AccountIdentity {
    /// Load the identity file, failing if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|_| {
            Error::Resource(format!("identity file missing: {}", path.display()))
        })?;
        let stored: StoredIdentity = serde_json::from_slice(&data)?;

        let device_id = match &stored.device_id {
            Some(hex16) => Some(u64::from_le_bytes(decode_hex_array::<8>("deviceId", hex16)?)),
            None => None,
        };

        Ok(Self {
            identity: stored.identity,
            client_key: SecretKey::from_bytes(decode_hex_array::<32>("clientKey", &stored.client_key)?),
            server_group: stored.server_group,
            device_group_key: SymmetricKey::from_bytes(decode_hex_array::<32>(
                "deviceGroupKey",
                &stored.device_group_key,
            )?),
            device_cookie: decode_hex_array::<16>("deviceCookie", &stored.device_cookie)?,
            device_id,
            contact_count: stored.contact_count,
            group_count: stored.group_count,
            linked_at: stored.linked_at,
        })
    }

    /// Persist the identity file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let stored = StoredIdentity {
            identity: self.identity,
            client_key: hex::encode(self.client_key.as_bytes()),
            server_group: self.server_group.clone(),
            device_group_key: hex::encode(self.device_group_key.as_bytes()),
            device_cookie: hex::encode(self.device_cookie),
            contact_count: self.contact_count,
            group_count: self.group_count,
            linked_at: self.linked_at,
            device_id: self.device_id.map(|id| hex::encode(id.to_le_bytes())),
        };
        crate::storage::atomic_write_json(path, &stored)
    }

    /// Return the device id, allocating a random one on first use.
    ///
    /// The caller is responsible for persisting the record afterwards.
    pub fn ensure_device_id(&mut self) -> u64 {
        match self.device_id {
            Some(id) => id,
            None => {
                let id = u64::from_le_bytes(crate::crypto::random_bytes());
                self.device_id = Some(id);
                id
            }
        }
    }

    /// Derive the device-group key schedule.
    pub fn device_group_keys(&self) -> Result<DeviceGroupKeys> {
        DeviceGroupKeys::derive(&self.device_group_key)
    }
}

impl fmt::Debug for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountIdentity")
            .field("identity", &self.identity)
            .field("server_group", &self.server_group)
            .field("device_id", &self.device_id)
            .field("contact_count", &self.contact_count)
            .field("group_count", &self.group_count)
            .finish_non_exhaustive()
    }
}
