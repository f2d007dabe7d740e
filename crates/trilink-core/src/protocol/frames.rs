//! Framing codecs for the three transport layers.
//!
//! - Relay (rendezvous) frames: `u32-LE length || payload`, accumulated
//!   across socket reads.
//! - Mediator frames: one frame per socket message,
//!   `type:u8 || reserved(3) || payload`.
//! - Chat-server envelopes on the proxy channel:
//!   `u16-LE length || authenticated payload`.

use crate::error::{Error, Result};

/// Upper bound for a single relay frame (linking transfers can carry
/// whole blob stores).
pub const MAX_RELAY_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Upper bound for a chat-server envelope, dictated by the u16 length.
pub const MAX_CSP_FRAME_LEN: usize = u16::MAX as usize;

/// Encode a relay frame: `u32-LE length || payload`.
pub fn encode_relay_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_RELAY_FRAME_LEN {
        return Err(Error::Protocol(format!("relay frame too large: {}", payload.len())));
    }
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Streaming decoder for `u32-LE length || payload` frames.
///
/// Accumulates bytes across socket reads and yields frames in order;
/// partial tail bytes remain buffered.
#[derive(Default)]
pub struct RelayFrameReader {
    buffer: Vec<u8>,
}

impl RelayFrameReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes into the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to extract the next complete frame.
    ///
    /// Returns `Ok(None)` when more data is needed.
    pub fn try_read(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }

        let len_bytes: [u8; 4] = self.buffer[..4]
            .try_into()
            .map_err(|_| Error::Protocol("invalid length field".into()))?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_RELAY_FRAME_LEN {
            self.buffer.clear();
            return Err(Error::Protocol(format!("relay frame too large: {len}")));
        }

        if self.buffer.len() < 4 + len {
            return Ok(None);
        }

        let frame = self.buffer[4..4 + len].to_vec();
        self.buffer.drain(..4 + len);
        Ok(Some(frame))
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Mediator frame types. One byte on the wire, followed by three
/// reserved bytes that are zero on send and ignored on receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum D2mFrameType {
    Proxy,
    ServerHello,
    ClientHello,
    ServerInfo,
    ReflectionQueueDry,
    RolePromotedToLeader,
    GetDevicesInfo,
    DevicesInfo,
    DropDevice,
    DropDeviceAck,
    SetSharedDeviceData,
    BeginTransaction,
    BeginTransactionAck,
    CommitTransaction,
    CommitTransactionAck,
    TransactionRejected,
    TransactionEnded,
    Reflect,
    ReflectAck,
    Reflected,
    ReflectedAck,
}

impl D2mFrameType {
    /// Encode to the wire byte.
    pub fn to_byte(self) -> u8 {
        match self {
            D2mFrameType::Proxy => 0x00,
            D2mFrameType::ServerHello => 0x10,
            D2mFrameType::ClientHello => 0x11,
            D2mFrameType::ServerInfo => 0x12,
            D2mFrameType::ReflectionQueueDry => 0x20,
            D2mFrameType::RolePromotedToLeader => 0x21,
            D2mFrameType::GetDevicesInfo => 0x30,
            D2mFrameType::DevicesInfo => 0x31,
            D2mFrameType::DropDevice => 0x32,
            D2mFrameType::DropDeviceAck => 0x33,
            D2mFrameType::SetSharedDeviceData => 0x34,
            D2mFrameType::BeginTransaction => 0x40,
            D2mFrameType::BeginTransactionAck => 0x41,
            D2mFrameType::CommitTransaction => 0x42,
            D2mFrameType::CommitTransactionAck => 0x43,
            D2mFrameType::TransactionRejected => 0x44,
            D2mFrameType::TransactionEnded => 0x45,
            D2mFrameType::Reflect => 0x80,
            D2mFrameType::ReflectAck => 0x81,
            D2mFrameType::Reflected => 0x82,
            D2mFrameType::ReflectedAck => 0x83,
        }
    }

    /// Decode from the wire byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            0x00 => D2mFrameType::Proxy,
            0x10 => D2mFrameType::ServerHello,
            0x11 => D2mFrameType::ClientHello,
            0x12 => D2mFrameType::ServerInfo,
            0x20 => D2mFrameType::ReflectionQueueDry,
            0x21 => D2mFrameType::RolePromotedToLeader,
            0x30 => D2mFrameType::GetDevicesInfo,
            0x31 => D2mFrameType::DevicesInfo,
            0x32 => D2mFrameType::DropDevice,
            0x33 => D2mFrameType::DropDeviceAck,
            0x34 => D2mFrameType::SetSharedDeviceData,
            0x40 => D2mFrameType::BeginTransaction,
            0x41 => D2mFrameType::BeginTransactionAck,
            0x42 => D2mFrameType::CommitTransaction,
            0x43 => D2mFrameType::CommitTransactionAck,
            0x44 => D2mFrameType::TransactionRejected,
            0x45 => D2mFrameType::TransactionEnded,
            0x80 => D2mFrameType::Reflect,
            0x81 => D2mFrameType::ReflectAck,
            0x82 => D2mFrameType::Reflected,
            0x83 => D2mFrameType::ReflectedAck,
            other => return Err(Error::Protocol(format!("unknown mediator frame type 0x{other:02x}"))),
        })
    }
}

/// A decoded mediator frame.
#[derive(Debug, Clone)]
pub struct D2mFrame {
    /// The frame type byte.
    pub frame_type: D2mFrameType,
    /// Payload after the 4-byte header.
    pub payload: Vec<u8>,
}

impl D2mFrame {
    /// Build a frame.
    pub fn new(frame_type: D2mFrameType, payload: Vec<u8>) -> Self {
        Self { frame_type, payload }
    }

    /// Encode as `type || 00 00 00 || payload`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.payload.len());
        out.push(self.frame_type.to_byte());
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode one socket message. Reserved bytes are ignored.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::Protocol(format!("mediator frame too short: {}", data.len())));
        }
        Ok(Self {
            frame_type: D2mFrameType::from_byte(data[0])?,
            payload: data[4..].to_vec(),
        })
    }
}

/// Encode a chat-server envelope: `u16-LE length || payload`.
pub fn encode_csp_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_CSP_FRAME_LEN {
        return Err(Error::Protocol(format!("chat-server frame too large: {}", payload.len())));
    }
    let mut out = Vec::with_capacity(2 + payload.len());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Streaming decoder for `u16-LE length || payload` envelopes on the
/// proxy channel.
#[derive(Default)]
pub struct CspFrameReader {
    buffer: Vec<u8>,
}

impl CspFrameReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed proxied bytes into the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to extract the next complete envelope.
    pub fn try_read(&mut self) -> Option<Vec<u8>> {
        if self.buffer.len() < 2 {
            return None;
        }
        let len = u16::from_le_bytes([self.buffer[0], self.buffer[1]]) as usize;
        if self.buffer.len() < 2 + len {
            return None;
        }

        let frame = self.buffer[2..2 + len].to_vec();
        self.buffer.drain(..2 + len);
        Some(frame)
    }

    /// Take exactly `n` raw (unframed) bytes, used during the handshake.
    pub fn take_raw(&mut self, n: usize) -> Option<Vec<u8>> {
        if self.buffer.len() < n {
            return None;
        }
        let bytes = self.buffer[..n].to_vec();
        self.buffer.drain(..n);
        Some(bytes)
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_frame_roundtrip() {
        let encoded = encode_relay_frame(b"hello relay").expect("encode");
        assert_eq!(&encoded[..4], &11u32.to_le_bytes());

        let mut reader = RelayFrameReader::new();
        reader.push(&encoded);
        let frame = reader.try_read().expect("no error").expect("frame");
        assert_eq!(frame, b"hello relay");
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_relay_frame_reader_streaming() {
        let encoded = encode_relay_frame(b"streamed").expect("encode");

        let mut reader = RelayFrameReader::new();
        for (i, byte) in encoded.iter().enumerate() {
            reader.push(&[*byte]);
            if i < encoded.len() - 1 {
                assert!(reader.try_read().expect("no error").is_none());
            }
        }
        let frame = reader.try_read().expect("no error").expect("frame");
        assert_eq!(frame, b"streamed");
    }

    #[test]
    fn test_relay_frame_reader_keeps_tail() {
        let a = encode_relay_frame(b"first").expect("encode");
        let b = encode_relay_frame(b"second").expect("encode");

        let mut joined = a.clone();
        joined.extend_from_slice(&b);

        let mut reader = RelayFrameReader::new();
        reader.push(&joined[..a.len() + 3]);
        assert_eq!(reader.try_read().expect("ok").expect("frame"), b"first");
        assert!(reader.try_read().expect("ok").is_none());

        reader.push(&joined[a.len() + 3..]);
        assert_eq!(reader.try_read().expect("ok").expect("frame"), b"second");
    }

    #[test]
    fn test_d2m_frame_roundtrip() {
        let frame = D2mFrame::new(D2mFrameType::Reflected, vec![1, 2, 3]);
        let encoded = frame.encode();
        assert_eq!(encoded[0], 0x82);
        assert_eq!(&encoded[1..4], &[0, 0, 0]);

        let decoded = D2mFrame::decode(&encoded).expect("decode");
        assert_eq!(decoded.frame_type, D2mFrameType::Reflected);
        assert_eq!(decoded.payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_d2m_reserved_bytes_ignored_on_receive() {
        let decoded = D2mFrame::decode(&[0x21, 0xAA, 0xBB, 0xCC]).expect("decode");
        assert_eq!(decoded.frame_type, D2mFrameType::RolePromotedToLeader);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_d2m_unknown_type_rejected() {
        assert!(D2mFrame::decode(&[0xFF, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_csp_frame_reader_mixed_raw_and_framed() {
        let mut reader = CspFrameReader::new();
        reader.push(&[0xAB; 80]);
        assert!(reader.take_raw(81).is_none());
        let hello = reader.take_raw(80).expect("raw");
        assert_eq!(hello.len(), 80);

        let framed = encode_csp_frame(&[9, 9, 9]).expect("encode");
        reader.push(&framed);
        assert_eq!(reader.try_read().expect("frame"), vec![9, 9, 9]);
        assert!(reader.try_read().is_none());
    }
}
