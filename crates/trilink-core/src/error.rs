//! Error types for trilink.
//!
//! One taxonomy for the whole engine. Variant choice encodes the blast
//! radius: crypto failures kill at most the current frame, protocol
//! failures kill the session, timeouts fail only the waiting caller.

use thiserror::Error;

/// Core error type for all trilink operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Cryptographic operation failed: authentication failure, wrong
    /// length, invalid key or nonce. Fatal to the current frame; fatal to
    /// the session only on the chat-server and rendezvous planes.
    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    /// Key material validation or derivation failed.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Unexpected frame for the current state, malformed structure, or
    /// sequence regression. Fatal to the session.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Encoding or decoding of a wire or persisted structure failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// An awaited acknowledgement or readiness condition did not arrive
    /// in time. Fails the waiting caller; the session survives.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// WebSocket closure or network failure. Triggers reconnect; pending
    /// waiters fail with the close reason.
    #[error("transport error: {0}")]
    Transport(String),

    /// The session was torn down while the caller was waiting on it.
    #[error("session closed: {0}")]
    SessionClosed(String),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Resource limit exceeded (blob too large, identity file missing).
    /// Reported to the caller; no session impact.
    #[error("resource error: {0}")]
    Resource(String),

    /// Invalid caller input, rejected before any I/O: bad identity
    /// format, empty text, oversized edit, invalid emoji length.
    #[error("invalid input: {0}")]
    Caller(String),
}

/// Result type alias using trilink's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error must tear down the surrounding session.
    ///
    /// Used by the session loops to decide between dropping a frame and
    /// closing the connection.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::Transport(_) | Error::SessionClosed(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_fatal_classification() {
        assert!(Error::Protocol("bad frame".into()).is_session_fatal());
        assert!(Error::Transport("closed".into()).is_session_fatal());
        assert!(!Error::Crypto("auth".into()).is_session_fatal());
        assert!(!Error::Timeout("reflect ack").is_session_fatal());
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(Error::from(io), Error::Storage(_)));
    }
}
