//! Engine configuration.
//!
//! Plain structs with serde derives and sensible defaults; the CLI
//! loads an optional JSON file and applies flag overrides.

use crate::blob::BlobConfig;
use crate::messaging::evolving::EvolvingReplyConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Data directory holding identity, contacts, groups, dedupe, and
    /// media.
    pub data_dir: PathBuf,
    /// Mediator host; the full URL is derived from the device-group
    /// key.
    pub mediator_host: String,
    /// Rendezvous relay host for linking.
    pub rendezvous_host: String,
    /// User-visible label of this device.
    pub device_label: String,
    /// Platform details reported in the device info.
    pub platform_details: String,
    /// Client-info string for the chat-server login.
    pub client_info: String,
    /// Public nickname attached to outgoing message metadata.
    pub nickname: Option<String>,
    /// Reconnect delay after an unexpected close, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Blob service endpoints.
    pub blob: BlobConfig,
    /// Evolving-reply coalescing knobs.
    pub evolving: EvolvingReplyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./trilink-data"),
            mediator_host: "mediator.threema.ch".into(),
            rendezvous_host: "rendezvous.threema.ch".into(),
            device_label: "trilink".into(),
            platform_details: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            client_info: crate::DEFAULT_CLIENT_INFO.into(),
            nickname: None,
            reconnect_delay_ms: 5_000,
            blob: BlobConfig::default(),
            evolving: EvolvingReplyConfig::default(),
        }
    }
}

impl Config {
    /// Load a JSON config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> crate::Result<Self> {
        match crate::storage::read_json_opt(path)? {
            Some(config) => Ok(config),
            None => Ok(Self::default()),
        }
    }
}
