//! Reflection frame layouts and the reflect-id allocator.
//!
//! Reflect (device → mediator):
//! `headerLen(=8):u8 | reserved:u8 | flags:u16LE | reflectId:u32LE | encryptedEnvelope`
//!
//! Reflected (mediator → device):
//! `headerLen(=16):u8 | reserved:u8 | flags:u16LE | reflectedId:u32LE | timestamp:u64LE | encryptedEnvelope`

use crate::error::{Error, Result};
use crate::protocol::d2d::{envelope, Envelope};
use crate::protocol::ENVELOPE_PROTOCOL_VERSION;
use std::collections::HashMap;

/// Header length of a reflect frame we send.
pub const REFLECT_HEADER_LEN: u8 = 8;

/// Minimum header length of a reflected frame we receive.
pub const REFLECTED_HEADER_LEN: u8 = 16;

/// Reflected-envelope flag: ephemeral, do not acknowledge.
pub const REFLECTED_FLAG_EPHEMERAL: u16 = 0x0001;

/// A reflect frame on its way to the mediator.
#[derive(Debug, Clone)]
pub struct ReflectFrame {
    /// Frame flags.
    pub flags: u16,
    /// The allocated reflect id.
    pub reflect_id: u32,
    /// The envelope, encrypted with the reflection key.
    pub encrypted_envelope: Vec<u8>,
}

impl ReflectFrame {
    /// Encode to the wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(REFLECT_HEADER_LEN as usize + self.encrypted_envelope.len());
        out.push(REFLECT_HEADER_LEN);
        out.push(0);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.reflect_id.to_le_bytes());
        out.extend_from_slice(&self.encrypted_envelope);
        out
    }
}

/// Acknowledgement of one of our reflect frames.
#[derive(Debug, Clone, Copy)]
pub struct ReflectAckFrame {
    /// The acknowledged reflect id.
    pub reflect_id: u32,
    /// Mediator storage timestamp, milliseconds.
    pub timestamp: u64,
}

impl ReflectAckFrame {
    /// Decode from `reserved(4) || reflectId:u32LE || timestamp:u64LE`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Err(Error::Protocol(format!("reflect-ack too short: {}", data.len())));
        }
        Ok(Self {
            reflect_id: u32::from_le_bytes(
                data[4..8].try_into().map_err(|_| Error::Protocol("bad reflect id".into()))?,
            ),
            timestamp: u64::from_le_bytes(
                data[8..16].try_into().map_err(|_| Error::Protocol("bad timestamp".into()))?,
            ),
        })
    }
}

/// An envelope reflected to us from a device-group peer.
#[derive(Debug, Clone)]
pub struct ReflectedFrame {
    /// Frame flags; bit 0x0001 marks the envelope ephemeral.
    pub flags: u16,
    /// Id to acknowledge with.
    pub reflected_id: u32,
    /// Mediator storage timestamp, milliseconds.
    pub timestamp: u64,
    /// The envelope, encrypted with the reflection key.
    pub encrypted_envelope: Vec<u8>,
}

impl ReflectedFrame {
    /// Decode from the wire layout. The header length field allows the
    /// header to grow; anything shorter than 16 bytes is malformed.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < REFLECTED_HEADER_LEN as usize {
            return Err(Error::Protocol(format!("reflected frame too short: {}", data.len())));
        }
        let header_len = data[0] as usize;
        if header_len < REFLECTED_HEADER_LEN as usize || header_len > data.len() {
            return Err(Error::Protocol(format!("bad reflected header length: {header_len}")));
        }

        Ok(Self {
            flags: u16::from_le_bytes([data[2], data[3]]),
            reflected_id: u32::from_le_bytes(
                data[4..8].try_into().map_err(|_| Error::Protocol("bad reflected id".into()))?,
            ),
            timestamp: u64::from_le_bytes(
                data[8..16].try_into().map_err(|_| Error::Protocol("bad timestamp".into()))?,
            ),
            encrypted_envelope: data[header_len..].to_vec(),
        })
    }

    /// Whether the ephemeral flag is set.
    pub fn is_ephemeral(&self) -> bool {
        self.flags & REFLECTED_FLAG_EPHEMERAL != 0
    }
}

/// Encode a reflected-ack payload: `reserved(4) || reflectedId:u32LE`.
pub fn encode_reflected_ack(reflected_id: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&reflected_id.to_le_bytes());
    out
}

/// Build a reflection envelope around the given content, with random
/// length-hiding padding (0–15 bytes).
pub fn make_envelope(content: envelope::Content, device_id: u64) -> Envelope {
    let pad_len = (crate::crypto::random_bytes::<1>()[0] % 16) as usize;
    Envelope {
        padding: vec![0u8; pad_len],
        sender_device_id: device_id,
        protocol_version: ENVELOPE_PROTOCOL_VERSION,
        content: Some(content),
    }
}

/// Allocates 32-bit reflect ids: monotonic with wraparound, skipping ids
/// that still have an outstanding acknowledgement.
pub struct ReflectIdAllocator {
    next: u32,
}

impl ReflectIdAllocator {
    /// Start at a random offset.
    pub fn new() -> Self {
        Self {
            next: u32::from_le_bytes(crate::crypto::random_bytes()),
        }
    }

    /// Allocate the next id not present in `outstanding`.
    pub fn allocate<V>(&mut self, outstanding: &HashMap<u32, V>) -> u32 {
        loop {
            let id = self.next;
            self.next = self.next.wrapping_add(1);
            if !outstanding.contains_key(&id) {
                return id;
            }
        }
    }
}

impl Default for ReflectIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
