//! Linking wire records: QR payload, rendezvous handshake frames, and
//! the device-join message stream.

/// Version tag of the join offer format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum JoinVersion {
    V1_0 = 0,
}

/// An empty variant marker.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Unit {}

/// Rendezvous bootstrap data carried in the QR payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RendezvousInit {
    /// Device-to-device protocol version.
    #[prost(uint32, tag = "1")]
    pub d2d_protocol_version: u32,
    /// The 32-byte rendezvous authentication key.
    #[prost(bytes = "vec", tag = "2")]
    pub ak: Vec<u8>,
    /// Relay path id; a single path uses 1.
    #[prost(uint32, tag = "3")]
    pub path_id: u32,
    /// The relay WebSocket URL.
    #[prost(string, tag = "4")]
    pub relay_url: String,
}

/// The QR payload: either a request to join a device group or an offer.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceGroupJoinRequestOrOffer {
    /// Format version.
    #[prost(enumeration = "JoinVersion", tag = "1")]
    pub version: i32,
    /// Rendezvous bootstrap data.
    #[prost(message, optional, tag = "2")]
    pub rendezvous_init: Option<RendezvousInit>,
    /// Request or offer.
    #[prost(oneof = "device_group_join_request_or_offer::Variant", tags = "3, 4")]
    pub variant: Option<device_group_join_request_or_offer::Variant>,
}

/// Variants of the QR payload.
pub mod device_group_join_request_or_offer {
    /// Request or offer to join.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        /// A new device asks to join an existing group.
        #[prost(message, tag = "3")]
        RequestToJoin(super::Unit),
        /// An existing device offers group membership.
        #[prost(message, tag = "4")]
        OfferToJoin(super::Unit),
    }
}

// ── Rendezvous handshake frames ──────────────────────────────────────────

/// Remote hello: opens the authentication exchange.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RendezvousHello {
    /// The peer's 16-byte challenge.
    #[prost(bytes = "vec", tag = "1")]
    pub challenge: Vec<u8>,
    /// The peer's ephemeral transport public key.
    #[prost(bytes = "vec", tag = "2")]
    pub etk: Vec<u8>,
}

/// Our reply: echoes the peer challenge and presents our own.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RendezvousAuthHello {
    /// Echo of the peer's challenge.
    #[prost(bytes = "vec", tag = "1")]
    pub response: Vec<u8>,
    /// Our 16-byte challenge.
    #[prost(bytes = "vec", tag = "2")]
    pub challenge: Vec<u8>,
    /// Our ephemeral transport public key.
    #[prost(bytes = "vec", tag = "3")]
    pub etk: Vec<u8>,
}

/// The peer's final authentication step: echoes our challenge.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RendezvousAuth {
    /// Echo of our challenge.
    #[prost(bytes = "vec", tag = "1")]
    pub response: Vec<u8>,
}

/// Path nomination; its successful decryption with the transport key
/// promotes the path to the data phase.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RendezvousNominate {}

// ── Device-join message stream ───────────────────────────────────────────

/// Protocol start marker; must arrive exactly once and first.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Begin {}

/// A blob transferred during linking, referenced from the essential data.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlobData {
    /// Blob id.
    #[prost(bytes = "vec", tag = "1")]
    pub id: Vec<u8>,
    /// Raw blob bytes.
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

/// The account identity material.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IdentityData {
    /// The 8-character identity.
    #[prost(string, tag = "1")]
    pub identity: String,
    /// The long-term client secret key.
    #[prost(bytes = "vec", tag = "2")]
    pub client_key: Vec<u8>,
    /// Directory-assigned server group tag.
    #[prost(string, tag = "3")]
    pub server_group: String,
}

/// The device-group secrets.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceGroupData {
    /// The device-group key, root of the reflection key schedule.
    #[prost(bytes = "vec", tag = "1")]
    pub dgk: Vec<u8>,
    /// The device cookie for chat-server logins.
    #[prost(bytes = "vec", tag = "2")]
    pub device_cookie: Vec<u8>,
}

/// A contact transferred during linking.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JoinContact {
    /// The contact's identity.
    #[prost(string, tag = "1")]
    pub identity: String,
    /// The contact's long-term public key.
    #[prost(bytes = "vec", tag = "2")]
    pub public_key: Vec<u8>,
    /// First name, if known.
    #[prost(string, optional, tag = "3")]
    pub first_name: Option<String>,
    /// Last name, if known.
    #[prost(string, optional, tag = "4")]
    pub last_name: Option<String>,
    /// Nickname, if known.
    #[prost(string, optional, tag = "5")]
    pub nickname: Option<String>,
    /// Advertised feature mask.
    #[prost(uint64, optional, tag = "6")]
    pub feature_mask: Option<u64>,
}

/// A group transferred during linking.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JoinGroup {
    /// The creator's identity.
    #[prost(string, tag = "1")]
    pub creator_identity: String,
    /// Creator-scoped group id.
    #[prost(fixed64, tag = "2")]
    pub group_id: u64,
    /// Member identities.
    #[prost(string, repeated, tag = "3")]
    pub member_identities: Vec<String>,
    /// Display name.
    #[prost(string, optional, tag = "4")]
    pub name: Option<String>,
}

/// Everything a new device needs to act for the account.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EssentialData {
    /// Identity material.
    #[prost(message, optional, tag = "1")]
    pub identity_data: Option<IdentityData>,
    /// Device-group secrets.
    #[prost(message, optional, tag = "2")]
    pub device_group_data: Option<DeviceGroupData>,
    /// The contact directory.
    #[prost(message, repeated, tag = "3")]
    pub contacts: Vec<JoinContact>,
    /// Group memberships.
    #[prost(message, repeated, tag = "4")]
    pub groups: Vec<JoinGroup>,
}

/// A message from the existing device to the newly joining device.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JoinMessage {
    /// The payload.
    #[prost(oneof = "join_message::Content", tags = "1, 2, 3")]
    pub content: Option<join_message::Content>,
}

/// Join message variants.
pub mod join_message {
    /// Begin, blob data, or essential data.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Content {
        /// Protocol start marker.
        #[prost(message, tag = "1")]
        Begin(super::Begin),
        /// A transferred blob.
        #[prost(message, tag = "2")]
        BlobData(super::BlobData),
        /// The essential identity material.
        #[prost(message, tag = "3")]
        EssentialData(super::EssentialData),
    }
}

/// Acknowledgement from the new device: registration is complete.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Registered {}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    #[test]
    fn test_join_offer_roundtrip() {
        let offer = DeviceGroupJoinRequestOrOffer {
            version: JoinVersion::V1_0 as i32,
            rendezvous_init: Some(RendezvousInit {
                d2d_protocol_version: 2,
                ak: vec![0xAA; 32],
                path_id: 1,
                relay_url: "wss://rendezvous-a.example.org/ab/abcd".into(),
            }),
            variant: Some(device_group_join_request_or_offer::Variant::RequestToJoin(Unit {})),
        };

        let decoded =
            DeviceGroupJoinRequestOrOffer::decode(offer.encode_to_vec().as_slice()).expect("decode");
        assert_eq!(decoded, offer);
    }

    #[test]
    fn test_join_message_variants() {
        let begin = JoinMessage {
            content: Some(join_message::Content::Begin(Begin {})),
        };
        let blob = JoinMessage {
            content: Some(join_message::Content::BlobData(BlobData {
                id: vec![1; 16],
                data: vec![2; 128],
            })),
        };
        assert_ne!(begin.encode_to_vec(), blob.encode_to_vec());

        let decoded = JoinMessage::decode(blob.encode_to_vec().as_slice()).expect("decode");
        match decoded.content {
            Some(join_message::Content::BlobData(data)) => assert_eq!(data.data.len(), 128),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_essential_data_roundtrip() {
        let essential = EssentialData {
            identity_data: Some(IdentityData {
                identity: "ECHOECHO".into(),
                client_key: vec![7; 32],
                server_group: "07".into(),
            }),
            device_group_data: Some(DeviceGroupData {
                dgk: vec![8; 32],
                device_cookie: vec![9; 16],
            }),
            contacts: vec![JoinContact {
                identity: "AAAAAAAA".into(),
                public_key: vec![1; 32],
                first_name: Some("Alice".into()),
                last_name: None,
                nickname: None,
                feature_mask: Some(0x7FF),
            }],
            groups: vec![JoinGroup {
                creator_identity: "AAAAAAAA".into(),
                group_id: 99,
                member_identities: vec!["AAAAAAAA".into(), "ECHOECHO".into()],
                name: Some("pals".into()),
            }],
        };

        let decoded = EssentialData::decode(essential.encode_to_vec().as_slice()).expect("decode");
        assert_eq!(decoded, essential);
    }
}
