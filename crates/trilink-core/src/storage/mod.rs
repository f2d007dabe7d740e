//! Persisted state under the caller-chosen data directory.
//!
//! Layout:
//!
//! ```text
//! identity.json                    — account identity (written once + deviceId)
//! contacts.json                    — cached contact directory
//! groups.json                      — group memberships
//! incoming-message-dedupe.json     — dedupe LRU snapshot
//! media/inbound/<sender>/…         — stored inbound media
//! ```
//!
//! All JSON writes are atomic: serialize to a temp file in the same
//! directory, then rename over the target.

use crate::error::{Error, Result};
use crate::identity::IdentityCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A cached contact, as stored in `contacts.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    /// The contact's identity.
    pub identity: IdentityCode,
    /// Hex-encoded long-term public key.
    pub public_key: String,
    /// First name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Last name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Nickname, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Advertised feature mask; absent means unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_mask: Option<u64>,
}

/// A group membership, as stored in `groups.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    /// The creator's identity.
    pub creator_identity: IdentityCode,
    /// Creator-scoped group id as a decimal string.
    pub group_id: String,
    /// Member identities.
    pub member_identities: Vec<IdentityCode>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl GroupRecord {
    /// The group id as a number.
    pub fn group_id_u64(&self) -> Result<u64> {
        self.group_id
            .parse()
            .map_err(|_| Error::Storage(format!("bad group id: {}", self.group_id)))
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Storage(format!("no parent directory: {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let data = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and deserialize a JSON file; `None` if the file does not exist.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Replace characters that are unsafe in file names.
///
/// Keeps ASCII alphanumerics, `.`, `-`, and `_`; everything else becomes
/// `_`. The result is capped at 128 bytes and never empty.
pub fn sanitize_filename(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(128)
        .collect();
    // A dotfile or empty name would vanish in directory listings.
    if out.is_empty() || out.chars().all(|c| c == '.') {
        out = "file".into();
    }
    out
}

/// The data directory and its file layout.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Wrap a root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory skeleton.
    pub fn ensure_layout(&self) -> Result<()> {
        std::fs::create_dir_all(self.root.join("media").join("inbound"))?;
        Ok(())
    }

    /// The root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `identity.json`.
    pub fn identity_path(&self) -> PathBuf {
        self.root.join("identity.json")
    }

    /// Path of `contacts.json`.
    pub fn contacts_path(&self) -> PathBuf {
        self.root.join("contacts.json")
    }

    /// Path of `groups.json`.
    pub fn groups_path(&self) -> PathBuf {
        self.root.join("groups.json")
    }

    /// Path of the dedupe snapshot.
    pub fn dedupe_path(&self) -> PathBuf {
        self.root.join("incoming-message-dedupe.json")
    }

    /// Load `contacts.json`; an absent file is an empty directory.
    pub fn load_contacts(&self) -> Result<Vec<ContactRecord>> {
        Ok(read_json_opt(&self.contacts_path())?.unwrap_or_default())
    }

    /// Atomically replace `contacts.json`.
    pub fn save_contacts(&self, contacts: &[ContactRecord]) -> Result<()> {
        atomic_write_json(&self.contacts_path(), &contacts)
    }

    /// Load `groups.json`; an absent file is no groups.
    pub fn load_groups(&self) -> Result<Vec<GroupRecord>> {
        Ok(read_json_opt(&self.groups_path())?.unwrap_or_default())
    }

    /// Atomically replace `groups.json`.
    pub fn save_groups(&self, groups: &[GroupRecord]) -> Result<()> {
        atomic_write_json(&self.groups_path(), &groups)
    }

    /// Store inbound media under
    /// `media/inbound/<sender>/<timestamp>-<messageId>-<sanitized>`.
    pub fn save_inbound_media(
        &self,
        sender: &IdentityCode,
        message_id: u64,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let dir = self.root.join("media").join("inbound").join(sender.as_str());
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(format!(
            "{}-{}-{}",
            chrono::Utc::now().timestamp(),
            message_id,
            sanitize_filename(file_name)
        ));
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(s: &str) -> IdentityCode {
        IdentityCode::parse(s).expect("valid identity")
    }

    #[test]
    fn test_atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("value.json");

        atomic_write_json(&path, &vec![1, 2, 3]).expect("write");
        atomic_write_json(&path, &vec![4, 5]).expect("rewrite");

        let loaded: Vec<u32> = read_json_opt(&path).expect("read").expect("present");
        assert_eq!(loaded, vec![4, 5]);
        assert!(!dir.path().join("value.json.tmp").exists());
    }

    #[test]
    fn test_read_json_opt_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded: Option<Vec<u32>> =
            read_json_opt(&dir.path().join("absent.json")).expect("read");
        assert!(loaded.is_none());
    }

    #[test]
    fn test_contacts_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = DataDir::new(dir.path());

        let contacts = vec![ContactRecord {
            identity: ident("AAAAAAAA"),
            public_key: "ab".repeat(32),
            first_name: Some("Alice".into()),
            last_name: None,
            nickname: None,
            feature_mask: Some(0x3FF),
        }];
        data.save_contacts(&contacts).expect("save");
        assert_eq!(data.load_contacts().expect("load"), contacts);
    }

    #[test]
    fn test_groups_roundtrip_with_decimal_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = DataDir::new(dir.path());

        let groups = vec![GroupRecord {
            creator_identity: ident("CREATOR1"),
            group_id: "18446744073709551615".into(),
            member_identities: vec![ident("AAAAAAAA")],
            name: Some("pals".into()),
        }];
        data.save_groups(&groups).expect("save");

        let loaded = data.load_groups().expect("load");
        assert_eq!(loaded, groups);
        assert_eq!(loaded[0].group_id_u64().expect("parse"), u64::MAX);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("sp ace?.png"), "sp_ace_.png");
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename(".."), "file");
    }

    #[test]
    fn test_save_inbound_media_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = DataDir::new(dir.path());
        data.ensure_layout().expect("layout");

        let path = data
            .save_inbound_media(&ident("SENDER01"), 42, "pic:0.jpg", b"bytes")
            .expect("save");

        assert!(path.starts_with(dir.path().join("media/inbound/SENDER01")));
        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.contains("-42-pic_0.jpg"));
        assert_eq!(std::fs::read(&path).expect("read"), b"bytes");
    }
}
