//! Mediator (device-to-mediator) session.
//!
//! The long-lived framed WebSocket through which this device
//! authenticates into its device group, receives reflected envelopes
//! from peers, reflects its own activity, and — while leader — proxies
//! opaque chat-server bytes.

mod reflect;
mod session;

pub use reflect::{
    encode_reflected_ack, make_envelope, ReflectAckFrame, ReflectFrame, ReflectIdAllocator,
    ReflectedFrame, REFLECTED_FLAG_EPHEMERAL,
};
pub use session::{
    MediatorConnectParams, MediatorConnection, MediatorEvent, MediatorHandle, TransactionEvent,
};

use crate::crypto::PublicKey;

/// How long a reflect call waits for its acknowledgement.
pub const REFLECT_ACK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

/// Tolerated clock drift against the mediator before a warning.
pub const MAX_CLOCK_DRIFT_MS: u64 = 20 * 60 * 1000;

/// Build the mediator URL, sharded by the first nibble and first byte of
/// the public device-group key:
/// `wss://mediator-<nibble>.<host>/<byte>/<hexDgpk>`.
pub fn mediator_url(host: &str, dgpk_public: &PublicKey) -> String {
    let hex = dgpk_public.to_hex();
    format!("wss://mediator-{}.{}/{}/{}", &hex[..1], host, &hex[..2], hex)
}
