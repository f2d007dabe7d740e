//! Incoming-message dedupe.
//!
//! A bounded, insertion-ordered set of `IDENTITY#messageId` keys. Reads
//! never refresh an entry, so eviction is FIFO. Every insertion is
//! followed by a full synchronous snapshot to disk, written atomically,
//! so a fresh instance makes identical decisions after a restart.

use crate::error::Result;
use crate::identity::IdentityCode;
use crate::storage;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Maximum number of remembered message keys.
pub const DEDUPE_CAPACITY: usize = 4096;

/// Current snapshot format version.
const FILE_VERSION: u32 = 1;

/// On-disk snapshot: `{version, updatedAt, keys}` with keys oldest
/// first.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DedupeFile {
    version: u32,
    updated_at: String,
    keys: Vec<String>,
}

/// The canonical dedupe key for a message.
pub fn message_key(sender: &IdentityCode, message_id: u64) -> String {
    format!("{}#{}", sender, message_id)
}

/// Bounded dedupe set with synchronous persistence.
pub struct DedupeStore {
    entries: LruCache<String, ()>,
    path: PathBuf,
}

impl DedupeStore {
    /// Load the snapshot at `path`. Missing, empty, or legacy
    /// (bare-array) files are all tolerated.
    pub fn load(path: &Path) -> Self {
        let mut entries = LruCache::new(
            NonZeroUsize::new(DEDUPE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
        );

        let keys = match Self::load_keys(path) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable dedupe snapshot, starting empty");
                Vec::new()
            }
        };
        for key in keys {
            entries.put(key, ());
        }

        Self {
            entries,
            path: path.to_path_buf(),
        }
    }

    fn load_keys(path: &Path) -> Result<Vec<String>> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if data.is_empty() {
            return Ok(Vec::new());
        }

        if let Ok(file) = serde_json::from_slice::<DedupeFile>(&data) {
            return Ok(file.keys);
        }
        // Legacy format: a bare array of keys.
        let keys: Vec<String> = serde_json::from_slice(&data)?;
        Ok(keys)
    }

    /// Whether the key is already present. Does not refresh its age.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// Insert a key and snapshot to disk.
    ///
    /// Returns `true` if the key was fresh, `false` for a duplicate.
    pub fn check_and_insert(&mut self, key: &str) -> Result<bool> {
        if self.entries.contains(key) {
            return Ok(false);
        }
        self.entries.put(key.to_string(), ());
        self.persist()?;
        Ok(true)
    }

    /// Current number of remembered keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> Result<()> {
        // LruCache iterates newest first; the snapshot stores oldest
        // first so reloading preserves eviction order.
        let mut keys: Vec<String> = self.entries.iter().map(|(k, _)| k.clone()).collect();
        keys.reverse();

        storage::atomic_write_json(
            &self.path,
            &DedupeFile {
                version: FILE_VERSION,
                updated_at: chrono::Utc::now().to_rfc3339(),
                keys,
            },
        )
    }
}
