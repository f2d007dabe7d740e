//! The blob channel: client-side media encryption plus upload/download.
//!
//! Every media send generates a fresh 32-byte blob key. Under that
//! freshness condition the fixed nonces (`0…01` for the file, `0…02`
//! for the thumbnail) are safe, and [`BlobKey`] refuses to seal a second
//! payload under the same nonce.

use crate::crypto::{xsalsa_open, xsalsa_seal, SymmetricKey};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Fixed nonce for the file payload.
pub const FILE_NONCE: [u8; 24] = nonce_with_tail(0x01);

/// Fixed nonce for the thumbnail payload.
pub const THUMBNAIL_NONCE: [u8; 24] = nonce_with_tail(0x02);

/// Maximum accepted blob plaintext (100 MiB).
pub const MAX_BLOB_LEN: usize = 100 * 1024 * 1024;

const fn nonce_with_tail(tail: u8) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[23] = tail;
    nonce
}

/// A 16-byte blob id, hex on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(pub [u8; 16]);

impl BlobId {
    /// Parse a 32-character hex id.
    pub fn from_hex(hex_id: &str) -> Result<Self> {
        let bytes = hex::decode(hex_id.trim())
            .map_err(|e| Error::Encoding(format!("bad blob id: {e}")))?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| Error::Encoding("blob id must be 16 bytes".into()))?;
        Ok(Self(arr))
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.to_hex())
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A single-use blob key.
///
/// Each nonce may seal exactly one payload; a second attempt is an
/// error rather than a nonce reuse.
pub struct BlobKey {
    key: SymmetricKey,
    file_sealed: bool,
    thumbnail_sealed: bool,
}

impl BlobKey {
    /// Generate a fresh key.
    pub fn generate() -> Self {
        Self {
            key: SymmetricKey::generate(),
            file_sealed: false,
            thumbnail_sealed: false,
        }
    }

    /// The key as hex, for the file-message body.
    pub fn to_hex(&self) -> String {
        hex::encode(self.key.as_bytes())
    }

    /// Seal the file payload under the fixed file nonce. One-shot.
    pub fn seal_file(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.file_sealed {
            return Err(Error::Crypto("blob key already sealed a file payload".into()));
        }
        if plaintext.len() > MAX_BLOB_LEN {
            return Err(Error::Resource(format!("blob too large: {} bytes", plaintext.len())));
        }
        self.file_sealed = true;
        xsalsa_seal(&self.key, &FILE_NONCE, plaintext)
    }

    /// Seal the thumbnail payload under the fixed thumbnail nonce.
    /// One-shot.
    pub fn seal_thumbnail(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.thumbnail_sealed {
            return Err(Error::Crypto("blob key already sealed a thumbnail payload".into()));
        }
        if plaintext.len() > MAX_BLOB_LEN {
            return Err(Error::Resource(format!("thumbnail too large: {} bytes", plaintext.len())));
        }
        self.thumbnail_sealed = true;
        xsalsa_seal(&self.key, &THUMBNAIL_NONCE, plaintext)
    }
}

/// Open a downloaded file payload with the key from a file message.
pub fn open_file(key_hex: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let key = blob_key_from_hex(key_hex)?;
    Ok(xsalsa_open(&key, &FILE_NONCE, ciphertext)?.to_vec())
}

/// Open a downloaded thumbnail payload.
pub fn open_thumbnail(key_hex: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let key = blob_key_from_hex(key_hex)?;
    Ok(xsalsa_open(&key, &THUMBNAIL_NONCE, ciphertext)?.to_vec())
}

fn blob_key_from_hex(key_hex: &str) -> Result<SymmetricKey> {
    let bytes = hex::decode(key_hex).map_err(|e| Error::Encoding(format!("bad blob key: {e}")))?;
    SymmetricKey::from_slice(&bytes)
}

/// Where a blob is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobScope {
    /// The well-known public blob service.
    Public {
        /// Ask the service to persist past first download.
        persist: bool,
    },
    /// The device-group-local mirror.
    Local,
}

/// Blob service endpoints. Templates substitute `{deviceGroupPrefix}`,
/// `{blobId}`, `{deviceId}`, and `{deviceGroupId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlobConfig {
    /// Public upload endpoint.
    pub upload_url: String,
    /// Public download template.
    pub download_url: String,
    /// Mirror upload template.
    pub mirror_upload_url: String,
    /// Mirror download template.
    pub mirror_download_url: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            upload_url: "https://blob.threema.ch/upload".into(),
            download_url: "https://blob.threema.ch/{blobId}".into(),
            mirror_upload_url:
                "https://blob-mirror-{deviceGroupPrefix}.threema.ch/blob/upload".into(),
            mirror_download_url:
                "https://blob-mirror-{deviceGroupPrefix}.threema.ch/blob/{blobId}".into(),
        }
    }
}

/// HTTP client for the blob service.
pub struct BlobClient {
    http: reqwest::Client,
    config: BlobConfig,
    device_id: u64,
    device_group_id: String,
}

impl BlobClient {
    /// Build a client. `device_group_id` is the hex public device-group
    /// key, whose first nibble also shards the mirror hosts.
    pub fn new(config: BlobConfig, device_id: u64, device_group_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            device_id,
            device_group_id,
        }
    }

    fn fill(&self, template: &str) -> String {
        template
            .replace("{deviceGroupPrefix}", &self.device_group_id[..1.min(self.device_group_id.len())])
            .replace("{deviceGroupId}", &self.device_group_id)
            .replace("{deviceId}", &format!("{:016x}", self.device_id))
    }

    fn upload_url(&self, scope: BlobScope) -> String {
        match scope {
            BlobScope::Public { persist } => {
                format!("{}?persist={}", self.config.upload_url, u8::from(persist))
            }
            BlobScope::Local => format!(
                "{}?deviceId={:016x}&deviceGroupId={}",
                self.fill(&self.config.mirror_upload_url),
                self.device_id,
                self.device_group_id
            ),
        }
    }

    /// Upload ciphertext as a multipart form (`blob` field). The
    /// response body is the 32-character hex blob id.
    pub async fn upload(&self, scope: BlobScope, ciphertext: Vec<u8>) -> Result<BlobId> {
        let url = self.upload_url(scope);
        let form = reqwest::multipart::Form::new()
            .part("blob", reqwest::multipart::Part::bytes(ciphertext));

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("blob upload failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "blob upload rejected: HTTP {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("blob upload response unreadable: {e}")))?;
        let id = BlobId::from_hex(&body)?;
        debug!(blob_id = %id, "blob uploaded");
        Ok(id)
    }

    /// Download a blob, trying the public endpoint first and falling
    /// back to the mirror. The first success wins.
    pub async fn download(&self, id: &BlobId) -> Result<Vec<u8>> {
        let candidates = [
            self.fill(&self.config.download_url).replace("{blobId}", &id.to_hex()),
            self.fill(&self.config.mirror_download_url).replace("{blobId}", &id.to_hex()),
        ];

        let mut last_error = Error::Transport("no blob download candidates".into());
        for url in candidates {
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .bytes()
                        .await
                        .map(|b| b.to_vec())
                        .map_err(|e| Error::Transport(format!("blob body unreadable: {e}")));
                }
                Ok(response) => {
                    warn!(url = %url, status = %response.status(), "blob candidate failed");
                    last_error =
                        Error::Transport(format!("blob download rejected: HTTP {}", response.status()));
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "blob candidate unreachable");
                    last_error = Error::Transport(format!("blob download failed: {e}"));
                }
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_nonces() {
        assert_eq!(&FILE_NONCE[..23], &[0u8; 23]);
        assert_eq!(FILE_NONCE[23], 0x01);
        assert_eq!(&THUMBNAIL_NONCE[..23], &[0u8; 23]);
        assert_eq!(THUMBNAIL_NONCE[23], 0x02);
    }

    #[test]
    fn test_blob_roundtrip() {
        let mut key = BlobKey::generate();
        let ciphertext = key.seal_file(b"media bytes").expect("seal");
        let plaintext = open_file(&key.to_hex(), &ciphertext).expect("open");
        assert_eq!(plaintext, b"media bytes");
    }

    #[test]
    fn test_thumbnail_uses_distinct_nonce() {
        let mut key = BlobKey::generate();
        let file_ct = key.seal_file(b"same bytes").expect("seal");
        let thumb_ct = key.seal_thumbnail(b"same bytes").expect("seal");
        assert_ne!(file_ct, thumb_ct);

        assert_eq!(open_thumbnail(&key.to_hex(), &thumb_ct).expect("open"), b"same bytes");
        assert!(open_thumbnail(&key.to_hex(), &file_ct).is_err());
    }

    #[test]
    fn test_key_refuses_second_seal() {
        let mut key = BlobKey::generate();
        key.seal_file(b"first").expect("seal");
        assert!(key.seal_file(b"second").is_err());

        key.seal_thumbnail(b"thumb").expect("seal");
        assert!(key.seal_thumbnail(b"thumb again").is_err());
    }

    #[test]
    fn test_blob_id_hex_roundtrip() {
        let id = BlobId([0xA5; 16]);
        let parsed = BlobId::from_hex(&id.to_hex()).expect("parse");
        assert_eq!(parsed, id);

        assert!(BlobId::from_hex("zz").is_err());
        assert!(BlobId::from_hex(&"ab".repeat(15)).is_err());
    }

    #[test]
    fn test_upload_url_scopes() {
        let client = BlobClient::new(BlobConfig::default(), 0xD00D, "ab12cd".into());

        assert_eq!(
            client.upload_url(BlobScope::Public { persist: true }),
            "https://blob.threema.ch/upload?persist=1"
        );
        let local = client.upload_url(BlobScope::Local);
        assert!(local.starts_with("https://blob-mirror-a.threema.ch/blob/upload?"));
        assert!(local.contains("deviceId=000000000000d00d"));
        assert!(local.contains("deviceGroupId=ab12cd"));
    }
}
