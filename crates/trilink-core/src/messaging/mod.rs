//! The message engine: composing, encrypting, and parsing end-to-end
//! messages, with group fan-out, reactions, evolving replies, and the
//! incoming-message dedupe set.

pub mod dedupe;
pub mod engine;
pub mod evolving;
pub mod reactions;
pub mod types;

pub use engine::{InboundMessage, MessageEngine};
pub use types::{GroupRef, InboundContent};

/// End-to-end message type ids.
#[allow(missing_docs)]
pub mod msgtype {
    pub const TEXT: u8 = 0x01;
    pub const FILE: u8 = 0x17;
    pub const GROUP_TEXT: u8 = 0x41;
    pub const GROUP_FILE: u8 = 0x46;
    pub const GROUP_SETUP: u8 = 0x4a;
    pub const GROUP_NAME: u8 = 0x4b;
    pub const GROUP_LEAVE: u8 = 0x4c;
    pub const DELIVERY_RECEIPT: u8 = 0x80;
    pub const GROUP_DELIVERY_RECEIPT: u8 = 0x81;
    pub const REACTION: u8 = 0x82;
    pub const GROUP_REACTION: u8 = 0x83;
    pub const TYPING_INDICATOR: u8 = 0x90;
    pub const EDIT: u8 = 0x91;
    pub const GROUP_EDIT: u8 = 0x93;
}

/// Delivery-receipt statuses.
#[allow(missing_docs)]
pub mod receipt {
    pub const RECEIVED: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const ACKNOWLEDGED: u8 = 0x03;
    pub const DECLINED: u8 = 0x04;
}

/// Maximum accepted edit text, in bytes.
pub const MAX_EDIT_LEN: usize = 6_000;

/// Maximum accepted reaction emoji, in UTF-8 bytes.
pub const MAX_EMOJI_LEN: usize = 64;

/// Generate a random 64-bit message id.
pub fn generate_message_id() -> u64 {
    u64::from_le_bytes(crate::crypto::random_bytes())
}
