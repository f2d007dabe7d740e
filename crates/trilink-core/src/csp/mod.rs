//! Chat-server protocol (CSP), nested inside the mediator proxy channel.
//!
//! While this device is leader, it speaks CSP on behalf of the account:
//! a NaCl-box handshake, then length-framed AEAD envelopes carrying
//! typed containers.

mod handshake;
mod session;

pub use handshake::{
    build_extensions, build_login_data, derive_vouch, parse_login_ack, process_server_hello,
    seal_login, ClientHandshake, LoginAck, ServerHelloOutcome, CLIENT_HELLO_LEN, SERVER_HELLO_LEN,
};
pub use session::{CspEvent, CspHandle, CspSession, CspSessionParams};

use crate::error::{Error, Result};

/// How long an outgoing message waits for its server acknowledgement.
pub const OUTGOING_ACK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(20);

/// Echo request container (server answers with the same payload).
pub const CONTAINER_ECHO_REQUEST: u8 = 0x00;

/// An outgoing end-to-end message.
pub const CONTAINER_OUTGOING_MESSAGE: u8 = 0x01;

/// An incoming end-to-end message delivered by the server.
pub const CONTAINER_INCOMING_MESSAGE: u8 = 0x02;

/// Start delivery of queued incoming messages; sent once post-handshake.
pub const CONTAINER_UNBLOCK_INCOMING: u8 = 0x03;

/// Echo response container.
pub const CONTAINER_ECHO_REPLY: u8 = 0x80;

/// Server acknowledgement of an outgoing message.
pub const CONTAINER_OUTGOING_MESSAGE_ACK: u8 = 0x81;

/// Our acknowledgement of an incoming message.
pub const CONTAINER_INCOMING_MESSAGE_ACK: u8 = 0x82;

/// Session phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing sent yet.
    Idle,
    /// Client hello sent; waiting for the 80-byte server hello.
    AwaitingServerHello,
    /// Login sent; waiting for the 32-byte login acknowledgement.
    AwaitingLoginAck,
    /// Steady state.
    Ready,
    /// Torn down.
    Closed,
}

/// A typed CSP container: `type:u8 || reserved(3) || data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// The container type byte.
    pub container_type: u8,
    /// Container data.
    pub data: Vec<u8>,
}

impl Container {
    /// Build a container.
    pub fn new(container_type: u8, data: Vec<u8>) -> Self {
        Self { container_type, data }
    }

    /// Encode to plaintext bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.data.len());
        out.push(self.container_type);
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&self.data);
        out
    }

    /// Decode from decrypted envelope plaintext.
    pub fn decode(plaintext: &[u8]) -> Result<Self> {
        if plaintext.len() < 4 {
            return Err(Error::Protocol(format!("container too short: {}", plaintext.len())));
        }
        Ok(Self {
            container_type: plaintext[0],
            data: plaintext[4..].to_vec(),
        })
    }
}

/// One direction's nonce source: `cookie(16) || sequence:u64LE`.
///
/// The sequence starts at 1 and increments after every use, including
/// uses whose decryption later fails. A repeat would be catastrophic, so
/// exhaustion (wrap) closes the session instead.
#[derive(Debug)]
pub struct NonceSequence {
    cookie: [u8; 16],
    sequence: u64,
}

impl NonceSequence {
    /// Start a direction at sequence 1.
    pub fn new(cookie: [u8; 16]) -> Self {
        Self { cookie, sequence: 1 }
    }

    /// The sequence number the next nonce will use.
    pub fn peek(&self) -> u64 {
        self.sequence
    }

    /// Produce the next nonce, consuming the sequence number.
    pub fn next(&mut self) -> Result<[u8; 24]> {
        if self.sequence == u64::MAX {
            return Err(Error::Protocol("nonce sequence exhausted".into()));
        }
        let mut nonce = [0u8; 24];
        nonce[..16].copy_from_slice(&self.cookie);
        nonce[16..].copy_from_slice(&self.sequence.to_le_bytes());
        self.sequence += 1;
        Ok(nonce)
    }
}
