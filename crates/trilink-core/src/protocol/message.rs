//! End-to-end message layouts.
//!
//! The message-with-metadata frame, body padding, and the two group
//! addressing containers. Byte layout from offset 0:
//!
//! ```text
//! sender(8) | receiver(8) | messageId(8) | createdAtSec(4:u32LE) |
//! flags(1)  | reserved(1) | metadataLen(2:u16LE) | legacyNickname(32) |
//! encryptedMetadata(metadataLen) | messageNonce(24) | encryptedBody(..)
//! ```

use crate::crypto::XSALSA_NONCE_LEN;
use crate::error::{Error, Result};
use crate::identity::IdentityCode;

/// Fixed part of the message-with-metadata frame.
pub const MESSAGE_HEADER_LEN: usize = 64;

/// Minimum padded body length.
pub const MIN_PADDED_LEN: usize = 32;

/// Message flag: trigger a push notification.
pub const FLAG_SEND_PUSH: u8 = 0x01;

/// Message flag: do not queue on the server.
pub const FLAG_NO_SERVER_QUEUING: u8 = 0x02;

/// Message flag: the server must not expect an acknowledgement.
pub const FLAG_NO_SERVER_ACK: u8 = 0x04;

/// Message flag: group message.
pub const FLAG_GROUP: u8 = 0x10;

/// Pad a plaintext body.
///
/// Chooses a random pad length `p ∈ [1, 255]`, raised so the padded body
/// is at least 32 bytes, and appends `p` copies of the byte `p`.
pub fn pad_body(body: &[u8]) -> Vec<u8> {
    let mut p = (crate::crypto::random_bytes::<1>()[0] % 255) + 1;
    if body.len() + (p as usize) < MIN_PADDED_LEN {
        p = (MIN_PADDED_LEN - body.len()) as u8;
    }

    let mut padded = Vec::with_capacity(body.len() + p as usize);
    padded.extend_from_slice(body);
    padded.extend(std::iter::repeat(p).take(p as usize));
    padded
}

/// Strip padding produced by [`pad_body`].
pub fn unpad_body(padded: &[u8]) -> Result<&[u8]> {
    let p = *padded
        .last()
        .ok_or_else(|| Error::Protocol("empty padded body".into()))? as usize;
    if p == 0 || padded.len() < p {
        return Err(Error::Protocol("invalid padding length".into()));
    }
    if !padded[padded.len() - p..].iter().all(|b| *b as usize == p) {
        return Err(Error::Protocol("inconsistent padding bytes".into()));
    }
    Ok(&padded[..padded.len() - p])
}

/// Build a message container plaintext: `type || padded body`.
pub fn encode_container(message_type: u8, body: &[u8]) -> Vec<u8> {
    let padded = pad_body(body);
    let mut container = Vec::with_capacity(1 + padded.len());
    container.push(message_type);
    container.extend_from_slice(&padded);
    container
}

/// Split a decrypted container into `(type, body)`.
pub fn decode_container(plaintext: &[u8]) -> Result<(u8, Vec<u8>)> {
    if plaintext.len() < 2 {
        return Err(Error::Protocol("container too short".into()));
    }
    let body = unpad_body(&plaintext[1..])?;
    Ok((plaintext[0], body.to_vec()))
}

/// A message-with-metadata frame as carried in chat-server containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    /// Sender identity.
    pub sender: IdentityCode,
    /// Receiver identity.
    pub receiver: IdentityCode,
    /// 64-bit message id, shared across a fan-out.
    pub message_id: u64,
    /// Creation time, seconds since the epoch.
    pub created_at: u32,
    /// Message flags (`FLAG_*`).
    pub flags: u8,
    /// Legacy nickname field; all-zero unless the sender is a gateway
    /// identity.
    pub legacy_nickname: [u8; 32],
    /// Separately keyed metadata box.
    pub encrypted_metadata: Vec<u8>,
    /// The nonce shared by the body box and the metadata box.
    pub nonce: [u8; XSALSA_NONCE_LEN],
    /// The body box (`ciphertext || tag`).
    pub encrypted_body: Vec<u8>,
}

impl MessageFrame {
    /// Encode to the wire layout.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let metadata_len: u16 = self
            .encrypted_metadata
            .len()
            .try_into()
            .map_err(|_| Error::Protocol("metadata too large".into()))?;

        let mut out = Vec::with_capacity(
            MESSAGE_HEADER_LEN + self.encrypted_metadata.len() + XSALSA_NONCE_LEN + self.encrypted_body.len(),
        );
        out.extend_from_slice(self.sender.as_bytes());
        out.extend_from_slice(self.receiver.as_bytes());
        out.extend_from_slice(&self.message_id.to_le_bytes());
        out.extend_from_slice(&self.created_at.to_le_bytes());
        out.push(self.flags);
        out.push(0); // reserved
        out.extend_from_slice(&metadata_len.to_le_bytes());
        out.extend_from_slice(&self.legacy_nickname);
        out.extend_from_slice(&self.encrypted_metadata);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.encrypted_body);
        Ok(out)
    }

    /// Decode from the wire layout.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MESSAGE_HEADER_LEN {
            return Err(Error::Protocol(format!("message frame too short: {}", data.len())));
        }

        let sender = IdentityCode::from_wire(&data[0..8])?;
        let receiver = IdentityCode::from_wire(&data[8..16])?;
        let message_id = u64::from_le_bytes(
            data[16..24].try_into().map_err(|_| Error::Protocol("bad message id".into()))?,
        );
        let created_at = u32::from_le_bytes(
            data[24..28].try_into().map_err(|_| Error::Protocol("bad timestamp".into()))?,
        );
        let flags = data[28];
        let metadata_len =
            u16::from_le_bytes([data[30], data[31]]) as usize;
        let mut legacy_nickname = [0u8; 32];
        legacy_nickname.copy_from_slice(&data[32..64]);

        let metadata_end = MESSAGE_HEADER_LEN + metadata_len;
        let nonce_end = metadata_end + XSALSA_NONCE_LEN;
        if data.len() < nonce_end {
            return Err(Error::Protocol("message frame truncated".into()));
        }

        let mut nonce = [0u8; XSALSA_NONCE_LEN];
        nonce.copy_from_slice(&data[metadata_end..nonce_end]);

        Ok(Self {
            sender,
            receiver,
            message_id,
            created_at,
            flags,
            legacy_nickname,
            encrypted_metadata: data[MESSAGE_HEADER_LEN..metadata_end].to_vec(),
            nonce,
            encrypted_body: data[nonce_end..].to_vec(),
        })
    }
}

/// Encode a group-creator container: `creatorsGroupId(8:u64LE) || inner`.
///
/// Used only by the group creator, who addresses members by group id
/// alone.
pub fn encode_group_creator_container(group_id: u64, inner: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + inner.len());
    out.extend_from_slice(&group_id.to_le_bytes());
    out.extend_from_slice(inner);
    out
}

/// Decode a group-creator container into `(group_id, inner)`.
pub fn decode_group_creator_container(data: &[u8]) -> Result<(u64, &[u8])> {
    if data.len() < 8 {
        return Err(Error::Protocol("creator container too short".into()));
    }
    let group_id = u64::from_le_bytes(
        data[..8].try_into().map_err(|_| Error::Protocol("bad group id".into()))?,
    );
    Ok((group_id, &data[8..]))
}

/// A group-member container: `creatorIdentity(8 ASCII) || groupId(8) || inner`.
///
/// Used by any member when addressing others; carries the full group
/// identity so every peer learns the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMemberContainer {
    /// The group creator's identity.
    pub creator: IdentityCode,
    /// The creator-scoped group id.
    pub group_id: u64,
    /// The wrapped inner message data.
    pub inner: Vec<u8>,
}

impl GroupMemberContainer {
    /// Encode to the wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.inner.len());
        out.extend_from_slice(self.creator.as_bytes());
        out.extend_from_slice(&self.group_id.to_le_bytes());
        out.extend_from_slice(&self.inner);
        out
    }

    /// Decode from the wire layout.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Err(Error::Protocol("member container too short".into()));
        }
        Ok(Self {
            creator: IdentityCode::from_wire(&data[0..8])?,
            group_id: u64::from_le_bytes(
                data[8..16].try_into().map_err(|_| Error::Protocol("bad group id".into()))?,
            ),
            inner: data[16..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(s: &str) -> IdentityCode {
        IdentityCode::parse(s).expect("valid identity")
    }

    #[test]
    fn test_padding_invariants() {
        for body_len in [0usize, 1, 2, 31, 32, 33, 500] {
            let body = vec![0xAAu8; body_len];
            let padded = pad_body(&body);

            let p = *padded.last().expect("non-empty") as usize;
            assert!((1..=255).contains(&p));
            assert!(padded.len() >= MIN_PADDED_LEN);
            assert!(padded[padded.len() - p..].iter().all(|b| *b as usize == p));

            assert_eq!(unpad_body(&padded).expect("unpad"), &body[..]);
        }
    }

    #[test]
    fn test_pad_length_boundary() {
        // A 2-byte body must pad up to exactly 32 bytes when the random
        // pad would undershoot.
        for _ in 0..64 {
            let padded = pad_body(b"hi");
            assert!(padded.len() >= 32);
            if padded.len() == 32 {
                assert_eq!(padded[31], 30);
                assert!(padded[2..32].iter().all(|b| *b == 30));
            }
        }
    }

    #[test]
    fn test_unpad_rejects_bad_padding() {
        assert!(unpad_body(&[]).is_err());
        assert!(unpad_body(&[0u8; 32]).is_err());

        let mut padded = pad_body(b"payload");
        let p = *padded.last().expect("non-empty");
        let len = padded.len();
        if p > 1 {
            padded[len - 2] ^= 0xFF;
            assert!(unpad_body(&padded).is_err());
        }
    }

    #[test]
    fn test_container_roundtrip() {
        let container = encode_container(0x01, b"hello there");
        let (message_type, body) = decode_container(&container).expect("decode");
        assert_eq!(message_type, 0x01);
        assert_eq!(body, b"hello there");
    }

    #[test]
    fn test_message_frame_roundtrip() {
        let frame = MessageFrame {
            sender: ident("AAAAAAAA"),
            receiver: ident("BBBBBBBB"),
            message_id: 0x0123_4567_89AB_CDEF,
            created_at: 1_700_000_000,
            flags: FLAG_SEND_PUSH,
            legacy_nickname: [0u8; 32],
            encrypted_metadata: vec![0xEE; 48],
            nonce: [0x0D; XSALSA_NONCE_LEN],
            encrypted_body: vec![0xBB; 64],
        };

        let encoded = frame.encode().expect("encode");
        assert_eq!(&encoded[0..8], b"AAAAAAAA");
        assert_eq!(&encoded[8..16], b"BBBBBBBB");
        assert_eq!(u16::from_le_bytes([encoded[30], encoded[31]]), 48);

        let decoded = MessageFrame::decode(&encoded).expect("decode");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_message_frame_truncation_rejected() {
        let frame = MessageFrame {
            sender: ident("AAAAAAAA"),
            receiver: ident("BBBBBBBB"),
            message_id: 1,
            created_at: 2,
            flags: 0,
            legacy_nickname: [0u8; 32],
            encrypted_metadata: vec![0xEE; 16],
            nonce: [0u8; XSALSA_NONCE_LEN],
            encrypted_body: vec![],
        };
        let encoded = frame.encode().expect("encode");
        assert!(MessageFrame::decode(&encoded[..encoded.len() - 25]).is_err());
    }

    #[test]
    fn test_group_member_container_roundtrip() {
        let container = GroupMemberContainer {
            creator: ident("CREATOR1"),
            group_id: 0xDEAD_BEEF_CAFE_F00D,
            inner: b"group text body".to_vec(),
        };
        let decoded = GroupMemberContainer::decode(&container.encode()).expect("decode");
        assert_eq!(decoded, container);
    }

    #[test]
    fn test_group_creator_container_roundtrip() {
        let encoded = encode_group_creator_container(42, b"setup payload");
        let (group_id, inner) = decode_group_creator_container(&encoded).expect("decode");
        assert_eq!(group_id, 42);
        assert_eq!(inner, b"setup payload");
    }
}
