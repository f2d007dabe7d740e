//! # trilink core
//!
//! Protocol engine for a linked-device client of a multi-device,
//! end-to-end-encrypted chat network. The client joins an existing mobile
//! account through a short-lived QR-code rendezvous, then keeps a
//! persistent mediator connection through which it
//!
//! - reflects its own activity to the other devices in the device group, and
//! - while elected leader, speaks the chat-server protocol on behalf of
//!   the account.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                  supervisor                   │
//! ├───────────────┬───────────────┬───────────────┤
//! │   mediator    │      csp      │   messaging   │
//! ├───────────────┴───────┬───────┴───────────────┤
//! │  rendezvous │  blob   │  directory │ storage  │
//! ├───────────────────────┴───────────────────────┤
//! │              protocol (wire formats)          │
//! ├───────────────────────────────────────────────┤
//! │           crypto          │     identity      │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Security model
//!
//! - The device-group key never leaves the process in plaintext form.
//! - Every transport direction has its own strictly monotonic nonce
//!   sequence; a repeat is fatal to the session.
//! - Blob keys are fresh per message; the fixed blob nonces are only safe
//!   under that freshness condition and the API enforces it.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod blob;
pub mod config;
pub mod crypto;
pub mod csp;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod logging;
pub mod mediator;
pub mod messaging;
pub mod protocol;
pub mod rendezvous;
pub mod storage;
pub mod supervisor;

pub use error::{Error, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Client-info string reported to the chat server during login.
pub const DEFAULT_CLIENT_INFO: &str = concat!("trilink/", env!("CARGO_PKG_VERSION"), ";desktop");
