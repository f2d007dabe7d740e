//! Contact directory: cached public keys and the lookup contract.
//!
//! The core needs exactly one thing from the directory service: a
//! 32-byte public key for an 8-character identity. The resolver is an
//! external collaborator behind [`PublicKeyLookup`]; results are cached
//! in memory and written back to `contacts.json`.

use crate::crypto::PublicKey;
use crate::error::{Error, Result};
use crate::identity::IdentityCode;
use crate::storage::{ContactRecord, DataDir};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// The public-key lookup contract.
///
/// Implementations resolve an identity to its long-term public key,
/// e.g. against a directory server. Invalid results must be rejected by
/// the implementation or they will be rejected here.
pub trait PublicKeyLookup: Send + Sync {
    /// Resolve the public key for `identity`.
    fn lookup<'a>(&'a self, identity: &'a IdentityCode) -> BoxFuture<'a, Result<PublicKey>>;
}

/// Parse public-key material in any of the accepted forms: 64-char hex,
/// base64, or a JSON object with a `publicKey` field holding either.
pub fn parse_public_key_material(input: &str) -> Result<PublicKey> {
    let trimmed = input.trim();

    if trimmed.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(trimmed)
            .map_err(|e| Error::Encoding(format!("bad public-key JSON: {e}")))?;
        let embedded = value
            .get("publicKey")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Encoding("JSON without a publicKey field".into()))?;
        return parse_public_key_material(embedded);
    }

    if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes = hex::decode(trimmed).map_err(|e| Error::Encoding(format!("bad hex key: {e}")))?;
        return PublicKey::from_slice(&bytes);
    }

    let bytes = BASE64_STANDARD
        .decode(trimmed)
        .map_err(|e| Error::Encoding(format!("bad base64 key: {e}")))?;
    PublicKey::from_slice(&bytes)
}

/// The caching contact directory.
pub struct ContactDirectory {
    data_dir: DataDir,
    cache: RwLock<HashMap<IdentityCode, ContactRecord>>,
    resolver: Option<Box<dyn PublicKeyLookup>>,
}

impl ContactDirectory {
    /// Load `contacts.json` into the cache.
    pub fn open(data_dir: DataDir, resolver: Option<Box<dyn PublicKeyLookup>>) -> Result<Self> {
        let contacts = data_dir.load_contacts()?;
        let cache = contacts
            .into_iter()
            .map(|record| (record.identity, record))
            .collect();
        Ok(Self {
            data_dir,
            cache: RwLock::new(cache),
            resolver,
        })
    }

    /// The cached record for an identity, if any.
    pub async fn contact(&self, identity: &IdentityCode) -> Option<ContactRecord> {
        self.cache.read().await.get(identity).cloned()
    }

    /// The advertised feature mask for an identity, if known.
    pub async fn feature_mask(&self, identity: &IdentityCode) -> Option<u64> {
        self.cache.read().await.get(identity).and_then(|c| c.feature_mask)
    }

    /// The public key for an identity: cache first, then the resolver.
    ///
    /// Resolver hits are cached in memory and persisted.
    pub async fn public_key(&self, identity: &IdentityCode) -> Result<PublicKey> {
        if let Some(record) = self.cache.read().await.get(identity) {
            let bytes = hex::decode(&record.public_key)
                .map_err(|e| Error::Storage(format!("bad cached key for {identity}: {e}")))?;
            return PublicKey::from_slice(&bytes);
        }

        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| Error::Caller(format!("no public key known for {identity}")))?;
        let key = resolver.lookup(identity).await?;
        debug!(identity = %identity, "resolved public key");

        self.upsert(ContactRecord {
            identity: *identity,
            public_key: key.to_hex(),
            first_name: None,
            last_name: None,
            nickname: None,
            feature_mask: None,
        })
        .await?;
        Ok(key)
    }

    /// Insert or update a record and persist the directory.
    ///
    /// Entries are idempotent, so write contention between send paths is
    /// harmless.
    pub async fn upsert(&self, record: ContactRecord) -> Result<()> {
        let mut cache = self.cache.write().await;
        cache.insert(record.identity, record);

        let mut contacts: Vec<ContactRecord> = cache.values().cloned().collect();
        contacts.sort_by(|a, b| a.identity.cmp(&b.identity));
        self.data_dir.save_contacts(&contacts)
    }
}
