//! Message body codecs.
//!
//! Each end-to-end message type has a small body format: UTF-8 for text,
//! JSON for files, protobuf-wire records for reactions and edits, and
//! fixed binary layouts for receipts, typing indicators, and the group
//! management messages. Group conversation messages wrap their inner
//! body in a group-member container.

use super::{msgtype, MAX_EDIT_LEN, MAX_EMOJI_LEN};
use crate::error::{Error, Result};
use crate::identity::IdentityCode;
use crate::protocol::d2d::{reaction, EditMessage, Reaction};
use crate::protocol::file_message::FileMessageBody;
use crate::protocol::message::{
    decode_group_creator_container, encode_group_creator_container, GroupMemberContainer,
};
use prost::Message as _;

/// A group conversation reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupRef {
    /// The group creator's identity.
    pub creator: IdentityCode,
    /// Creator-scoped group id.
    pub group_id: u64,
}

/// Validate and encode a text body.
pub fn encode_text(text: &str) -> Result<Vec<u8>> {
    if text.is_empty() {
        return Err(Error::Caller("empty message text".into()));
    }
    Ok(text.as_bytes().to_vec())
}

/// Decode a text body.
pub fn decode_text(body: &[u8]) -> Result<String> {
    String::from_utf8(body.to_vec()).map_err(|_| Error::Protocol("text body is not UTF-8".into()))
}

/// Encode a delivery receipt: `status:u8 || messageId:u64LE × N`, N ≥ 1.
pub fn encode_delivery_receipt(status: u8, message_ids: &[u64]) -> Result<Vec<u8>> {
    if message_ids.is_empty() {
        return Err(Error::Caller("delivery receipt needs at least one message id".into()));
    }
    let mut out = Vec::with_capacity(1 + 8 * message_ids.len());
    out.push(status);
    for id in message_ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
    Ok(out)
}

/// Decode a delivery receipt into `(status, message_ids)`.
pub fn decode_delivery_receipt(body: &[u8]) -> Result<(u8, Vec<u64>)> {
    if body.len() < 9 || (body.len() - 1) % 8 != 0 {
        return Err(Error::Protocol(format!("bad delivery receipt length: {}", body.len())));
    }
    let ids = body[1..]
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap_or([0u8; 8])))
        .collect();
    Ok((body[0], ids))
}

/// Encode a typing indicator: one byte, `1` typing / `0` stopped.
pub fn encode_typing(started: bool) -> Vec<u8> {
    vec![u8::from(started)]
}

/// Decode a typing indicator.
pub fn decode_typing(body: &[u8]) -> Result<bool> {
    match body {
        [0] => Ok(false),
        [1] => Ok(true),
        _ => Err(Error::Protocol("bad typing indicator body".into())),
    }
}

/// Validate an emoji for reactions: 1–64 UTF-8 bytes.
pub fn validate_emoji(emoji: &str) -> Result<()> {
    if emoji.is_empty() || emoji.len() > MAX_EMOJI_LEN {
        return Err(Error::Caller(format!(
            "reaction emoji must be 1–{} UTF-8 bytes, got {}",
            MAX_EMOJI_LEN,
            emoji.len()
        )));
    }
    Ok(())
}

/// Encode a reaction body.
pub fn encode_reaction(target_message_id: u64, emoji: &str, apply: bool) -> Result<Vec<u8>> {
    validate_emoji(emoji)?;
    let action = if apply {
        reaction::Action::Apply(emoji.as_bytes().to_vec())
    } else {
        reaction::Action::Withdraw(emoji.as_bytes().to_vec())
    };
    Ok(Reaction {
        message_id: target_message_id,
        action: Some(action),
    }
    .encode_to_vec())
}

/// A decoded reaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedReaction {
    /// The reacted-to message.
    pub message_id: u64,
    /// The emoji.
    pub emoji: String,
    /// Apply (`true`) or withdraw (`false`).
    pub apply: bool,
}

/// Decode a reaction body.
pub fn decode_reaction(body: &[u8]) -> Result<DecodedReaction> {
    let decoded = Reaction::decode(body).map_err(|e| Error::Protocol(format!("bad reaction: {e}")))?;
    let (bytes, apply) = match decoded.action {
        Some(reaction::Action::Apply(bytes)) => (bytes, true),
        Some(reaction::Action::Withdraw(bytes)) => (bytes, false),
        None => return Err(Error::Protocol("reaction without action".into())),
    };
    let emoji = String::from_utf8(bytes).map_err(|_| Error::Protocol("reaction emoji not UTF-8".into()))?;
    validate_emoji(&emoji).map_err(|_| Error::Protocol("reaction emoji length out of range".into()))?;
    Ok(DecodedReaction {
        message_id: decoded.message_id,
        emoji,
        apply,
    })
}

/// Encode an edit body targeting an earlier message.
pub fn encode_edit(target_message_id: u64, text: &str) -> Result<Vec<u8>> {
    if text.is_empty() {
        return Err(Error::Caller("empty edit text".into()));
    }
    if text.len() > MAX_EDIT_LEN {
        return Err(Error::Caller(format!(
            "edit text exceeds {} bytes: {}",
            MAX_EDIT_LEN,
            text.len()
        )));
    }
    Ok(EditMessage {
        message_id: target_message_id,
        text: text.to_string(),
    }
    .encode_to_vec())
}

/// Decode an edit body into `(target message id, text)`.
pub fn decode_edit(body: &[u8]) -> Result<(u64, String)> {
    let decoded = EditMessage::decode(body).map_err(|e| Error::Protocol(format!("bad edit: {e}")))?;
    Ok((decoded.message_id, decoded.text))
}

/// Encode a group-setup body: `groupId(8) || (8-byte identity)*`, with
/// the creator excluded from the member list.
pub fn encode_group_setup(group_id: u64, creator: &IdentityCode, members: &[IdentityCode]) -> Vec<u8> {
    let inner: Vec<u8> = members
        .iter()
        .filter(|member| *member != creator)
        .flat_map(|member| member.as_bytes().iter().copied())
        .collect();
    encode_group_creator_container(group_id, &inner)
}

/// Decode a group-setup body into `(group_id, members)`.
pub fn decode_group_setup(body: &[u8]) -> Result<(u64, Vec<IdentityCode>)> {
    let (group_id, inner) = decode_group_creator_container(body)?;
    if inner.len() % 8 != 0 {
        return Err(Error::Protocol("group setup member list misaligned".into()));
    }
    let members = inner
        .chunks_exact(8)
        .map(IdentityCode::from_wire)
        .collect::<Result<Vec<_>>>()?;
    Ok((group_id, members))
}

/// Encode a group-name body: `groupId(8) || name (UTF-8)`.
pub fn encode_group_name(group_id: u64, name: &str) -> Vec<u8> {
    encode_group_creator_container(group_id, name.as_bytes())
}

/// Decode a group-name body.
pub fn decode_group_name(body: &[u8]) -> Result<(u64, String)> {
    let (group_id, inner) = decode_group_creator_container(body)?;
    let name =
        String::from_utf8(inner.to_vec()).map_err(|_| Error::Protocol("group name not UTF-8".into()))?;
    Ok((group_id, name))
}

/// Wrap an inner body in a group-member container.
pub fn wrap_group(group: &GroupRef, inner: Vec<u8>) -> Vec<u8> {
    GroupMemberContainer {
        creator: group.creator,
        group_id: group.group_id,
        inner,
    }
    .encode()
}

/// A fully decoded inbound message body.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundContent {
    /// Direct text.
    Text(String),
    /// Direct file.
    File(FileMessageBody),
    /// Group text.
    GroupText {
        /// The conversation.
        group: GroupRef,
        /// The text.
        text: String,
    },
    /// Group file.
    GroupFile {
        /// The conversation.
        group: GroupRef,
        /// The file body.
        file: FileMessageBody,
    },
    /// Direct edit.
    Edit {
        /// The edited message.
        message_id: u64,
        /// Replacement text.
        text: String,
    },
    /// Group edit.
    GroupEdit {
        /// The conversation.
        group: GroupRef,
        /// The edited message.
        message_id: u64,
        /// Replacement text.
        text: String,
    },
    /// Direct reaction.
    Reaction(DecodedReaction),
    /// Group reaction.
    GroupReaction {
        /// The conversation.
        group: GroupRef,
        /// The reaction.
        reaction: DecodedReaction,
    },
    /// Delivery receipt.
    DeliveryReceipt {
        /// Receipt status.
        status: u8,
        /// Covered message ids.
        message_ids: Vec<u64>,
    },
    /// Group delivery receipt.
    GroupDeliveryReceipt {
        /// The conversation.
        group: GroupRef,
        /// Receipt status.
        status: u8,
        /// Covered message ids.
        message_ids: Vec<u64>,
    },
    /// Typing indicator.
    TypingIndicator {
        /// Typing (`true`) or stopped (`false`).
        started: bool,
    },
    /// Group setup from the creator.
    GroupSetup {
        /// The conversation (creator taken from the sender).
        group: GroupRef,
        /// Member identities, creator excluded.
        members: Vec<IdentityCode>,
    },
    /// Group rename from the creator.
    GroupName {
        /// The conversation.
        group: GroupRef,
        /// The new name.
        name: String,
    },
    /// A member left the group.
    GroupLeave {
        /// The conversation.
        group: GroupRef,
    },
    /// A type this client does not interpret.
    Other {
        /// The raw message type.
        message_type: u8,
        /// The raw body.
        body: Vec<u8>,
    },
}

/// Decode an inbound body by message type. `sender` supplies the group
/// creator for creator-addressed management messages.
pub fn decode_inbound(message_type: u8, body: &[u8], sender: &IdentityCode) -> Result<InboundContent> {
    let content = match message_type {
        msgtype::TEXT => InboundContent::Text(decode_text(body)?),
        msgtype::FILE => InboundContent::File(FileMessageBody::decode(body)?),
        msgtype::GROUP_TEXT => {
            let container = GroupMemberContainer::decode(body)?;
            InboundContent::GroupText {
                group: GroupRef {
                    creator: container.creator,
                    group_id: container.group_id,
                },
                text: decode_text(&container.inner)?,
            }
        }
        msgtype::GROUP_FILE => {
            let container = GroupMemberContainer::decode(body)?;
            InboundContent::GroupFile {
                group: GroupRef {
                    creator: container.creator,
                    group_id: container.group_id,
                },
                file: FileMessageBody::decode(&container.inner)?,
            }
        }
        msgtype::EDIT => {
            let (message_id, text) = decode_edit(body)?;
            InboundContent::Edit { message_id, text }
        }
        msgtype::GROUP_EDIT => {
            let container = GroupMemberContainer::decode(body)?;
            let (message_id, text) = decode_edit(&container.inner)?;
            InboundContent::GroupEdit {
                group: GroupRef {
                    creator: container.creator,
                    group_id: container.group_id,
                },
                message_id,
                text,
            }
        }
        msgtype::REACTION => InboundContent::Reaction(decode_reaction(body)?),
        msgtype::GROUP_REACTION => {
            let container = GroupMemberContainer::decode(body)?;
            InboundContent::GroupReaction {
                group: GroupRef {
                    creator: container.creator,
                    group_id: container.group_id,
                },
                reaction: decode_reaction(&container.inner)?,
            }
        }
        msgtype::DELIVERY_RECEIPT => {
            let (status, message_ids) = decode_delivery_receipt(body)?;
            InboundContent::DeliveryReceipt { status, message_ids }
        }
        msgtype::GROUP_DELIVERY_RECEIPT => {
            let container = GroupMemberContainer::decode(body)?;
            let (status, message_ids) = decode_delivery_receipt(&container.inner)?;
            InboundContent::GroupDeliveryReceipt {
                group: GroupRef {
                    creator: container.creator,
                    group_id: container.group_id,
                },
                status,
                message_ids,
            }
        }
        msgtype::TYPING_INDICATOR => InboundContent::TypingIndicator {
            started: decode_typing(body)?,
        },
        msgtype::GROUP_SETUP => {
            let (group_id, members) = decode_group_setup(body)?;
            InboundContent::GroupSetup {
                group: GroupRef {
                    creator: *sender,
                    group_id,
                },
                members,
            }
        }
        msgtype::GROUP_NAME => {
            let (group_id, name) = decode_group_name(body)?;
            InboundContent::GroupName {
                group: GroupRef {
                    creator: *sender,
                    group_id,
                },
                name,
            }
        }
        msgtype::GROUP_LEAVE => {
            let container = GroupMemberContainer::decode(body)?;
            InboundContent::GroupLeave {
                group: GroupRef {
                    creator: container.creator,
                    group_id: container.group_id,
                },
            }
        }
        other => InboundContent::Other {
            message_type: other,
            body: body.to_vec(),
        },
    };
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(s: &str) -> IdentityCode {
        IdentityCode::parse(s).expect("valid identity")
    }

    #[test]
    fn test_text_rejects_empty() {
        assert!(encode_text("").is_err());
        assert_eq!(encode_text("hello").expect("encode"), b"hello");
    }

    #[test]
    fn test_delivery_receipt_roundtrip() {
        let body = encode_delivery_receipt(super::super::receipt::READ, &[1, 2, 3]).expect("encode");
        assert_eq!(body.len(), 25);

        let (status, ids) = decode_delivery_receipt(&body).expect("decode");
        assert_eq!(status, super::super::receipt::READ);
        assert_eq!(ids, vec![1, 2, 3]);

        assert!(encode_delivery_receipt(1, &[]).is_err());
        assert!(decode_delivery_receipt(&[1]).is_err());
        assert!(decode_delivery_receipt(&body[..12]).is_err());
    }

    #[test]
    fn test_typing_roundtrip() {
        assert_eq!(encode_typing(true), vec![1]);
        assert_eq!(encode_typing(false), vec![0]);
        assert!(decode_typing(&encode_typing(true)).expect("decode"));
        assert!(!decode_typing(&encode_typing(false)).expect("decode"));
        assert!(decode_typing(&[2]).is_err());
        assert!(decode_typing(&[]).is_err());
    }

    #[test]
    fn test_reaction_roundtrip_various_emoji_lengths() {
        // 1, 4, and 64 UTF-8 bytes.
        let one = "x";
        let four = "👍";
        let sixty_four = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        assert_eq!(four.len(), 4);
        assert_eq!(sixty_four.len(), 64);

        for emoji in [one, four, sixty_four] {
            for apply in [true, false] {
                let body = encode_reaction(42, emoji, apply).expect("encode");
                let decoded = decode_reaction(&body).expect("decode");
                assert_eq!(decoded.message_id, 42);
                assert_eq!(decoded.emoji, emoji);
                assert_eq!(decoded.apply, apply);
            }
        }
    }

    #[test]
    fn test_reaction_rejects_bad_emoji() {
        assert!(encode_reaction(1, "", true).is_err());
        let sixty_five = "x".repeat(65);
        assert!(encode_reaction(1, &sixty_five, true).is_err());
    }

    #[test]
    fn test_edit_limits() {
        assert!(encode_edit(1, "").is_err());
        assert!(encode_edit(1, &"x".repeat(MAX_EDIT_LEN + 1)).is_err());

        let body = encode_edit(9, "fixed").expect("encode");
        assert_eq!(decode_edit(&body).expect("decode"), (9, "fixed".into()));
    }

    #[test]
    fn test_group_setup_excludes_creator() {
        let creator = ident("CREATOR1");
        let members = [creator, ident("AAAAAAAA"), ident("BBBBBBBB")];

        let body = encode_group_setup(7, &creator, &members);
        let (group_id, decoded) = decode_group_setup(&body).expect("decode");
        assert_eq!(group_id, 7);
        assert_eq!(decoded, vec![ident("AAAAAAAA"), ident("BBBBBBBB")]);
    }

    #[test]
    fn test_group_setup_tolerates_creator_on_decode() {
        // A peer that includes the creator still decodes cleanly.
        let creator = ident("CREATOR1");
        let mut inner = Vec::new();
        inner.extend_from_slice(creator.as_bytes());
        inner.extend_from_slice(ident("AAAAAAAA").as_bytes());
        let body = encode_group_creator_container(7, &inner);

        let (_, decoded) = decode_group_setup(&body).expect("decode");
        assert_eq!(decoded, vec![creator, ident("AAAAAAAA")]);
    }

    #[test]
    fn test_group_name_roundtrip() {
        let body = encode_group_name(9, "weekend plans");
        assert_eq!(decode_group_name(&body).expect("decode"), (9, "weekend plans".into()));
    }

    #[test]
    fn test_inbound_group_text() {
        let group = GroupRef {
            creator: ident("CREATOR1"),
            group_id: 11,
        };
        let body = wrap_group(&group, b"hi all".to_vec());

        let content =
            decode_inbound(msgtype::GROUP_TEXT, &body, &ident("PEER0000")).expect("decode");
        match content {
            InboundContent::GroupText { group: decoded, text } => {
                assert_eq!(decoded, group);
                assert_eq!(text, "hi all");
            }
            other => panic!("wrong content: {other:?}"),
        }
    }

    #[test]
    fn test_inbound_group_setup_uses_sender_as_creator() {
        let creator = ident("CREATOR1");
        let body = encode_group_setup(5, &creator, &[ident("AAAAAAAA")]);

        let content = decode_inbound(msgtype::GROUP_SETUP, &body, &creator).expect("decode");
        match content {
            InboundContent::GroupSetup { group, members } => {
                assert_eq!(group.creator, creator);
                assert_eq!(group.group_id, 5);
                assert_eq!(members, vec![ident("AAAAAAAA")]);
            }
            other => panic!("wrong content: {other:?}"),
        }
    }

    #[test]
    fn test_inbound_unknown_type_is_preserved() {
        let content = decode_inbound(0x7E, b"opaque", &ident("PEER0000")).expect("decode");
        match content {
            InboundContent::Other { message_type, body } => {
                assert_eq!(message_type, 0x7E);
                assert_eq!(body, b"opaque");
            }
            other => panic!("wrong content: {other:?}"),
        }
    }
}
