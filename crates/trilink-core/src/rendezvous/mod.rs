//! Rendezvous: the single-use relay session used for linking.
//!
//! A new device generates an authentication key and a relay path, renders
//! both into a QR payload, and waits for the existing device to connect
//! through the relay. The handshake authenticates both sides against the
//! QR secret, upgrades to ephemeral transport keys, and yields a short
//! hash both users compare out-of-band.

mod cipher;
mod connection;
pub mod join;

pub use cipher::PathCipher;
pub use connection::RendezvousConnection;

use crate::crypto::SymmetricKey;
use crate::error::Result;
use crate::protocol::join::{
    device_group_join_request_or_offer::Variant, DeviceGroupJoinRequestOrOffer, JoinVersion,
    RendezvousInit, Unit,
};
use crate::protocol::D2D_PROTOCOL_VERSION;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use prost::Message as _;

/// The only relay path this client uses.
pub const PATH_ID: u32 = 1;

/// URI scheme prefix of the QR payload.
pub const JOIN_URI_PREFIX: &str = "threema://device-group/join#";

/// Everything needed to open (or print) a rendezvous path.
pub struct RendezvousSetup {
    /// The 32-byte authentication key shared via the QR code.
    pub ak: SymmetricKey,
    /// The 64-hex-character relay path identifier.
    pub path_hex: String,
    /// The relay WebSocket URL for this path.
    pub relay_url: String,
}

impl RendezvousSetup {
    /// Generate a fresh authentication key and relay path.
    pub fn generate(relay_host: &str) -> Self {
        let ak = SymmetricKey::generate();
        let path_hex = hex::encode(crate::crypto::random_bytes::<32>());
        let relay_url = relay_url(relay_host, &path_hex);
        Self { ak, path_hex, relay_url }
    }

    /// Encode the QR payload URI requesting to join a device group.
    pub fn join_request_uri(&self) -> Result<String> {
        let offer = DeviceGroupJoinRequestOrOffer {
            version: JoinVersion::V1_0 as i32,
            rendezvous_init: Some(RendezvousInit {
                d2d_protocol_version: D2D_PROTOCOL_VERSION,
                ak: self.ak.as_bytes().to_vec(),
                path_id: PATH_ID,
                relay_url: self.relay_url.clone(),
            }),
            variant: Some(Variant::RequestToJoin(Unit {})),
        };
        Ok(format!(
            "{}{}",
            JOIN_URI_PREFIX,
            URL_SAFE_NO_PAD.encode(offer.encode_to_vec())
        ))
    }
}

/// Build the relay URL: `wss://rendezvous-<nibble>.<host>/<byte>/<path>`,
/// sharded by the first nibble and first byte of the path id.
pub fn relay_url(host: &str, path_hex: &str) -> String {
    let nibble = &path_hex[..1];
    let byte = &path_hex[..2];
    format!("wss://rendezvous-{nibble}.{host}/{byte}/{path_hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_url_sharding() {
        let url = relay_url("example.org", "ab12cd");
        assert_eq!(url, "wss://rendezvous-a.example.org/ab/ab12cd");
    }

    #[test]
    fn test_setup_path_is_64_hex_chars() {
        let setup = RendezvousSetup::generate("example.org");
        assert_eq!(setup.path_hex.len(), 64);
        assert!(setup.path_hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(setup.relay_url.contains(&setup.path_hex));
    }

    #[test]
    fn test_join_uri_decodes_back() {
        let setup = RendezvousSetup::generate("example.org");
        let uri = setup.join_request_uri().expect("uri");
        assert!(uri.starts_with(JOIN_URI_PREFIX));

        let payload = URL_SAFE_NO_PAD
            .decode(&uri[JOIN_URI_PREFIX.len()..])
            .expect("base64");
        let offer = DeviceGroupJoinRequestOrOffer::decode(payload.as_slice()).expect("decode");

        let init = offer.rendezvous_init.expect("init");
        assert_eq!(init.path_id, PATH_ID);
        assert_eq!(init.d2d_protocol_version, D2D_PROTOCOL_VERSION);
        assert_eq!(init.ak, setup.ak.as_bytes());
        assert!(matches!(offer.variant, Some(Variant::RequestToJoin(_))));
    }
}
