//! Tagged wire records for the device-to-device plane.
//!
//! Reflection envelopes, per-message metadata, reactions and edits, the
//! encrypted device-info structure, and the mediator handshake payloads.
//! All of these are protobuf wire format, declared with prost derives.

/// A reflection envelope, exchanged between device-group peers through
/// the mediator, encrypted with the reflection key.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    /// Random padding, 0–15 bytes, hiding the envelope length.
    #[prost(bytes = "vec", tag = "1")]
    pub padding: Vec<u8>,

    /// Device id of the originating device.
    #[prost(fixed64, tag = "13")]
    pub sender_device_id: u64,

    /// Envelope schema version.
    #[prost(uint32, tag = "14")]
    pub protocol_version: u32,

    /// The envelope content.
    #[prost(oneof = "envelope::Content", tags = "2, 3, 4, 5, 6, 7, 8, 9")]
    pub content: Option<envelope::Content>,
}

/// Envelope content variants.
pub mod envelope {
    /// Tagged union over the envelope payloads.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Content {
        /// A message this device group sent.
        #[prost(message, tag = "2")]
        OutgoingMessage(super::OutgoingMessage),
        /// Status updates for sent messages.
        #[prost(message, tag = "3")]
        OutgoingMessageUpdate(super::OutgoingMessageUpdate),
        /// A message the account received.
        #[prost(message, tag = "4")]
        IncomingMessage(super::IncomingMessage),
        /// Status updates for received messages.
        #[prost(message, tag = "5")]
        IncomingMessageUpdate(super::IncomingMessageUpdate),
        /// User profile changes.
        #[prost(message, tag = "6")]
        UserProfileSync(super::UserProfileSync),
        /// Contact directory changes.
        #[prost(message, tag = "7")]
        ContactSync(super::ContactSync),
        /// Group membership changes.
        #[prost(message, tag = "8")]
        GroupSync(super::GroupSync),
        /// Settings changes.
        #[prost(message, tag = "9")]
        SettingsSync(super::SettingsSync),
    }
}

/// A group, identified by its creator and a creator-scoped id.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupIdentity {
    /// Creator-scoped group id.
    #[prost(fixed64, tag = "1")]
    pub group_id: u64,
    /// The creator's identity.
    #[prost(string, tag = "2")]
    pub creator_identity: String,
}

/// A conversation reference: a contact or a group.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConversationId {
    /// The conversation target.
    #[prost(oneof = "conversation_id::Target", tags = "1, 2")]
    pub target: Option<conversation_id::Target>,
}

/// Conversation target variants.
pub mod conversation_id {
    /// Contact or group.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Target {
        /// A 1:1 conversation with the given identity.
        #[prost(string, tag = "1")]
        Contact(String),
        /// A group conversation.
        #[prost(message, tag = "2")]
        Group(super::GroupIdentity),
    }
}

/// An outgoing message, reflected to peers once per logical send.
///
/// `nonces` carries the per-recipient nonces in exactly the order of the
/// chat-server fan-out; peers need them to correlate ciphertexts.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OutgoingMessage {
    /// The conversation this message belongs to.
    #[prost(message, optional, tag = "1")]
    pub conversation: Option<ConversationId>,
    /// The logical message id, shared by all per-recipient sends.
    #[prost(fixed64, tag = "2")]
    pub message_id: u64,
    /// Creation time, milliseconds since the epoch.
    #[prost(uint64, tag = "3")]
    pub created_at: u64,
    /// End-to-end message type.
    #[prost(uint32, tag = "4")]
    pub message_type: u32,
    /// The canonical inner body (before per-recipient encryption).
    #[prost(bytes = "vec", tag = "5")]
    pub body: Vec<u8>,
    /// Per-recipient nonces in fan-out order; empty for self-only sends.
    #[prost(bytes = "vec", repeated, tag = "6")]
    pub nonces: Vec<Vec<u8>>,
}

/// An incoming message, reflected by the leader after receipt.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IncomingMessage {
    /// The sender's identity.
    #[prost(string, tag = "1")]
    pub sender_identity: String,
    /// The sender-chosen message id.
    #[prost(fixed64, tag = "2")]
    pub message_id: u64,
    /// Creation time, milliseconds since the epoch.
    #[prost(uint64, tag = "3")]
    pub created_at: u64,
    /// End-to-end message type.
    #[prost(uint32, tag = "4")]
    pub message_type: u32,
    /// The decrypted inner body.
    #[prost(bytes = "vec", tag = "5")]
    pub body: Vec<u8>,
    /// The nonce the sender used.
    #[prost(bytes = "vec", tag = "6")]
    pub nonce: Vec<u8>,
}

/// A single message state change.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageUpdate {
    /// The affected conversation.
    #[prost(message, optional, tag = "1")]
    pub conversation: Option<ConversationId>,
    /// The affected message.
    #[prost(fixed64, tag = "2")]
    pub message_id: u64,
    /// The state reached (sent/delivered/read as the plane defines it).
    #[prost(uint32, tag = "3")]
    pub update: u32,
}

/// State changes for messages this device group sent.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OutgoingMessageUpdate {
    /// The individual updates.
    #[prost(message, repeated, tag = "1")]
    pub updates: Vec<MessageUpdate>,
}

/// State changes for messages the account received.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IncomingMessageUpdate {
    /// The individual updates.
    #[prost(message, repeated, tag = "1")]
    pub updates: Vec<MessageUpdate>,
}

/// User profile changes propagated across the device group.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserProfileSync {
    /// The public nickname, if changed.
    #[prost(string, optional, tag = "1")]
    pub nickname: Option<String>,
}

/// A contact record carried in a contact sync.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncContact {
    /// The contact's identity.
    #[prost(string, tag = "1")]
    pub identity: String,
    /// The contact's long-term public key.
    #[prost(bytes = "vec", tag = "2")]
    pub public_key: Vec<u8>,
    /// Display nickname.
    #[prost(string, optional, tag = "3")]
    pub nickname: Option<String>,
    /// Advertised feature mask.
    #[prost(uint64, optional, tag = "4")]
    pub feature_mask: Option<u64>,
}

/// Contact directory changes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContactSync {
    /// Created or updated contacts.
    #[prost(message, repeated, tag = "1")]
    pub contacts: Vec<SyncContact>,
}

/// A group record carried in a group sync.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncGroup {
    /// The group identity.
    #[prost(message, optional, tag = "1")]
    pub group: Option<GroupIdentity>,
    /// Member identities, creator included.
    #[prost(string, repeated, tag = "2")]
    pub member_identities: Vec<String>,
    /// Display name.
    #[prost(string, optional, tag = "3")]
    pub name: Option<String>,
}

/// Group membership changes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupSync {
    /// Created or updated groups.
    #[prost(message, repeated, tag = "1")]
    pub groups: Vec<SyncGroup>,
}

/// Settings changes; carried opaquely by this client.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SettingsSync {
    /// Encoded settings blob.
    #[prost(bytes = "vec", tag = "1")]
    pub settings: Vec<u8>,
}

/// The per-message metadata record, encrypted under the metadata key
/// with the same nonce as the body box.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageMetadata {
    /// Random padding hiding the metadata length.
    #[prost(bytes = "vec", tag = "1")]
    pub padding: Vec<u8>,
    /// Sender nickname, if published.
    #[prost(string, optional, tag = "2")]
    pub nickname: Option<String>,
    /// The message id; must match the frame header.
    #[prost(fixed64, tag = "3")]
    pub message_id: u64,
    /// Creation time, milliseconds since the epoch.
    #[prost(uint64, tag = "4")]
    pub created_at: u64,
}

/// An emoji reaction: apply or withdraw, targeting an earlier message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Reaction {
    /// The reacted-to message.
    #[prost(fixed64, tag = "1")]
    pub message_id: u64,
    /// Apply or withdraw, with the emoji bytes.
    #[prost(oneof = "reaction::Action", tags = "2, 3")]
    pub action: Option<reaction::Action>,
}

/// Reaction action variants.
pub mod reaction {
    /// Apply or withdraw.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Action {
        /// Apply the given emoji (1–64 UTF-8 bytes).
        #[prost(bytes, tag = "2")]
        Apply(Vec<u8>),
        /// Withdraw the given emoji.
        #[prost(bytes, tag = "3")]
        Withdraw(Vec<u8>),
    }
}

/// An in-place edit of an earlier message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EditMessage {
    /// The edited message.
    #[prost(fixed64, tag = "1")]
    pub message_id: u64,
    /// The replacement text.
    #[prost(string, tag = "2")]
    pub text: String,
}

/// Device platform, reported in the encrypted device info.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum Platform {
    Unspecified = 0,
    Android = 1,
    Ios = 2,
    Desktop = 3,
    Web = 4,
}

/// Device metadata, encrypted with the device-info key before it is
/// handed to the mediator.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceInfo {
    /// Random padding.
    #[prost(bytes = "vec", tag = "1")]
    pub padding: Vec<u8>,
    /// Device platform.
    #[prost(enumeration = "Platform", tag = "2")]
    pub platform: i32,
    /// Free-form platform details.
    #[prost(string, tag = "3")]
    pub platform_details: String,
    /// Application version.
    #[prost(string, tag = "4")]
    pub app_version: String,
    /// User-visible device label.
    #[prost(string, tag = "5")]
    pub label: String,
}

// ── Mediator handshake payloads ──────────────────────────────────────────

/// First frame from the mediator after the socket opens.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerHello {
    /// Highest protocol version the server speaks.
    #[prost(uint32, tag = "1")]
    pub version: u32,
    /// The server's ephemeral session public key.
    #[prost(bytes = "vec", tag = "2")]
    pub esk: Vec<u8>,
    /// Challenge to be boxed with the device-group auth key.
    #[prost(bytes = "vec", tag = "3")]
    pub challenge: Vec<u8>,
}

/// Policy when all device slots are taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum DeviceSlotsExhaustedPolicy {
    Reject = 0,
    DropLeastRecent = 1,
}

/// Slot lifetime policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum DeviceSlotExpirationPolicy {
    Volatile = 0,
    Persistent = 1,
}

/// Whether the device expects a fresh or an existing slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum DeviceSlotState {
    New = 0,
    Existing = 1,
}

/// Authentication response to the mediator.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientHello {
    /// Protocol version the client speaks.
    #[prost(uint32, tag = "1")]
    pub version: u32,
    /// `nonce || box(challenge)` under the device-group auth key.
    #[prost(bytes = "vec", tag = "2")]
    pub response: Vec<u8>,
    /// This device's id within the group.
    #[prost(fixed64, tag = "3")]
    pub device_id: u64,
    /// Policy when slots are exhausted.
    #[prost(enumeration = "DeviceSlotsExhaustedPolicy", tag = "4")]
    pub device_slots_exhausted_policy: i32,
    /// Slot lifetime policy.
    #[prost(enumeration = "DeviceSlotExpirationPolicy", tag = "5")]
    pub device_slot_expiration_policy: i32,
    /// Expected slot state: `New` on first connect, `Existing` after.
    #[prost(enumeration = "DeviceSlotState", tag = "6")]
    pub expected_device_slot_state: i32,
    /// Device info encrypted with the device-info key.
    #[prost(bytes = "vec", tag = "7")]
    pub encrypted_device_info: Vec<u8>,
}

/// Mediator session acceptance.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerInfo {
    /// Server wall-clock time, milliseconds since the epoch.
    #[prost(uint64, tag = "1")]
    pub current_time: u64,
    /// Slot capacity of this device group.
    #[prost(uint32, tag = "2")]
    pub max_device_slots: u32,
    /// The slot state the server assigned.
    #[prost(enumeration = "DeviceSlotState", tag = "3")]
    pub device_slot_state: i32,
    /// Shared device data encrypted with the shared-device-data key.
    #[prost(bytes = "vec", tag = "4")]
    pub encrypted_shared_device_data: Vec<u8>,
}

/// Begin a device-group transaction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BeginTransaction {
    /// Scope encrypted with the transaction-scope key.
    #[prost(bytes = "vec", tag = "1")]
    pub encrypted_scope: Vec<u8>,
    /// Time-to-live in seconds.
    #[prost(uint32, tag = "2")]
    pub ttl: u32,
}

/// A transaction was rejected because another device holds the lock.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionRejected {
    /// The device currently holding the lock.
    #[prost(fixed64, tag = "1")]
    pub device_id: u64,
    /// The scope of the conflicting transaction.
    #[prost(bytes = "vec", tag = "2")]
    pub encrypted_scope: Vec<u8>,
}

/// A transaction ended elsewhere in the device group.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionEnded {
    /// The device whose transaction ended.
    #[prost(fixed64, tag = "1")]
    pub device_id: u64,
    /// The ended transaction's scope.
    #[prost(bytes = "vec", tag = "2")]
    pub encrypted_scope: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = Envelope {
            padding: vec![0; 7],
            sender_device_id: 0x1122_3344_5566_7788,
            protocol_version: 1,
            content: Some(envelope::Content::IncomingMessage(IncomingMessage {
                sender_identity: "UNITTEST".into(),
                message_id: 42,
                created_at: 1_700_000_000_000,
                message_type: 0x01,
                body: b"hello".to_vec(),
                nonce: vec![9u8; 24],
            })),
        };

        let encoded = envelope.encode_to_vec();
        let decoded = Envelope::decode(encoded.as_slice()).expect("decode");
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_outgoing_message_nonce_order_is_preserved() {
        let message = OutgoingMessage {
            conversation: Some(ConversationId {
                target: Some(conversation_id::Target::Group(GroupIdentity {
                    group_id: 7,
                    creator_identity: "CREATOR1".into(),
                })),
            }),
            message_id: 99,
            created_at: 5,
            message_type: 0x41,
            body: b"body".to_vec(),
            nonces: vec![vec![1u8; 24], vec![2u8; 24], vec![3u8; 24]],
        };

        let decoded =
            OutgoingMessage::decode(message.encode_to_vec().as_slice()).expect("decode");
        assert_eq!(decoded.nonces, message.nonces);
    }

    #[test]
    fn test_reaction_apply_and_withdraw_are_distinct_tags() {
        let apply = Reaction {
            message_id: 1,
            action: Some(reaction::Action::Apply("👍".as_bytes().to_vec())),
        };
        let withdraw = Reaction {
            message_id: 1,
            action: Some(reaction::Action::Withdraw("👍".as_bytes().to_vec())),
        };
        assert_ne!(apply.encode_to_vec(), withdraw.encode_to_vec());

        let decoded = Reaction::decode(apply.encode_to_vec().as_slice()).expect("decode");
        assert!(matches!(decoded.action, Some(reaction::Action::Apply(_))));
    }

    #[test]
    fn test_metadata_roundtrip() {
        let metadata = MessageMetadata {
            padding: vec![0; 3],
            nickname: Some("desk".into()),
            message_id: 0xFFEE_DDCC_BBAA_0099,
            created_at: 1_700_000_000_123,
        };
        let decoded =
            MessageMetadata::decode(metadata.encode_to_vec().as_slice()).expect("decode");
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        // An envelope from a newer peer with extra fields must still decode.
        let mut encoded = Envelope {
            padding: vec![],
            sender_device_id: 1,
            protocol_version: 1,
            content: None,
        }
        .encode_to_vec();
        // Append an unknown field (tag 1000, varint 1).
        encoded.extend_from_slice(&[0xC0, 0x3E, 0x01]);
        assert!(Envelope::decode(encoded.as_slice()).is_ok());
    }
}
