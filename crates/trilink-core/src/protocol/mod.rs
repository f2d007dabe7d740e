//! Wire-protocol constants and codecs.
//!
//! Everything in this module is bit-exact against the external servers:
//! the framing layers, the message-with-metadata layout, the group
//! containers, and the tagged (protobuf-wire) records exchanged inside
//! reflection envelopes and during linking.

pub mod d2d;
pub mod file_message;
pub mod frames;
pub mod join;
pub mod message;

/// The chat server's long-term public key.
pub const CHAT_SERVER_PUBLIC_KEY: [u8; 32] = [
    0x45, 0x0b, 0x97, 0x57, 0x35, 0x27, 0x9f, 0xde, 0xcb, 0x33, 0x13, 0x64, 0x8f, 0x5f, 0xc6,
    0xee, 0x9f, 0xf4, 0x36, 0x0e, 0xa9, 0x2a, 0x8c, 0x17, 0x51, 0xc6, 0x61, 0xe4, 0xc0, 0xd8,
    0xc9, 0x09,
];

/// Magic marker in the chat-server login data announcing extension
/// support. Exactly 30 ASCII bytes.
pub const CSP_EXTENSION_MAGIC: &[u8; 30] = b"threema-clever-extension-field";

/// Personalization for chat-server key derivations.
pub const CSP_PERSONAL: &[u8] = b"3ma-csp";

/// Personalization for rendezvous key derivations.
pub const RENDEZVOUS_PERSONAL: &[u8] = b"3ma-rendezvous";

/// Mediator (device-to-mediator) protocol version.
pub const D2M_PROTOCOL_VERSION: u32 = 0;

/// Device-to-device protocol version carried in the QR payload.
pub const D2D_PROTOCOL_VERSION: u32 = 2;

/// Protocol version stamped into reflection envelopes.
pub const ENVELOPE_PROTOCOL_VERSION: u32 = 1;
