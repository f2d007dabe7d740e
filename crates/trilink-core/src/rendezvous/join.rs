//! Device-join: consuming the essential-data stream over a nominated
//! rendezvous path.
//!
//! Expected sequence: `Begin`, zero or more `BlobData`, exactly one
//! `EssentialData`. Everything is persisted, a single `Registered` ack
//! goes back, and the session ends. Out-of-order, duplicate, or missing
//! messages are fatal protocol errors.

use super::RendezvousConnection;
use crate::crypto::{SecretKey, SymmetricKey};
use crate::error::{Error, Result};
use crate::identity::{AccountIdentity, IdentityCode};
use crate::protocol::join::{join_message, EssentialData, JoinMessage, Registered};
use crate::storage::{ContactRecord, DataDir, GroupRecord};
use prost::Message as _;
use std::collections::HashMap;
use tracing::{info, warn};

/// Result of a completed join.
#[derive(Debug)]
pub struct JoinOutcome {
    /// The linked account identity.
    pub identity: IdentityCode,
    /// Number of contacts transferred.
    pub contact_count: u32,
    /// Number of groups transferred.
    pub group_count: u32,
    /// Blobs transferred alongside the essential data, by id.
    pub blobs: HashMap<Vec<u8>, Vec<u8>>,
}

/// Run the join protocol to completion and persist the account.
pub async fn run(conn: &mut RendezvousConnection, data_dir: &DataDir) -> Result<JoinOutcome> {
    let mut begun = false;
    let mut blobs: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();

    loop {
        let payload = conn.recv().await?;
        let message = JoinMessage::decode(&payload[..])
            .map_err(|e| Error::Protocol(format!("bad join message: {e}")))?;

        match message.content {
            Some(join_message::Content::Begin(_)) => {
                if begun {
                    return Err(Error::Protocol("duplicate Begin".into()));
                }
                begun = true;
            }
            Some(join_message::Content::BlobData(blob)) => {
                if !begun {
                    return Err(Error::Protocol("BlobData before Begin".into()));
                }
                if blobs.insert(blob.id.clone(), blob.data).is_some() {
                    warn!(id = %hex::encode(&blob.id), "duplicate join blob replaced");
                }
            }
            Some(join_message::Content::EssentialData(essential)) => {
                if !begun {
                    return Err(Error::Protocol("EssentialData before Begin".into()));
                }
                let outcome = persist_essential_data(essential, blobs, data_dir)?;
                conn.send(&Registered {}.encode_to_vec()).await?;
                info!(identity = %outcome.identity, "device registered");
                return Ok(outcome);
            }
            None => return Err(Error::Protocol("empty join message".into())),
        }
    }
}

fn persist_essential_data(
    essential: EssentialData,
    blobs: HashMap<Vec<u8>, Vec<u8>>,
    data_dir: &DataDir,
) -> Result<JoinOutcome> {
    let identity_data = essential
        .identity_data
        .ok_or_else(|| Error::Protocol("essential data without identity".into()))?;
    let group_data = essential
        .device_group_data
        .ok_or_else(|| Error::Protocol("essential data without device group".into()))?;

    let identity = IdentityCode::parse(&identity_data.identity)
        .map_err(|_| Error::Protocol(format!("bad identity: {:?}", identity_data.identity)))?;
    let client_key: [u8; 32] = identity_data
        .client_key
        .as_slice()
        .try_into()
        .map_err(|_| Error::Protocol("client key must be 32 bytes".into()))?;
    let dgk: [u8; 32] = group_data
        .dgk
        .as_slice()
        .try_into()
        .map_err(|_| Error::Protocol("device group key must be 32 bytes".into()))?;
    let device_cookie: [u8; 16] = group_data
        .device_cookie
        .as_slice()
        .try_into()
        .map_err(|_| Error::Protocol("device cookie must be 16 bytes".into()))?;

    let mut contacts = Vec::with_capacity(essential.contacts.len());
    for contact in &essential.contacts {
        let code = IdentityCode::parse(&contact.identity)
            .map_err(|_| Error::Protocol(format!("bad contact identity: {:?}", contact.identity)))?;
        if contact.public_key.len() != 32 {
            return Err(Error::Protocol(format!("bad public key for {code}")));
        }
        contacts.push(ContactRecord {
            identity: code,
            public_key: hex::encode(&contact.public_key),
            first_name: contact.first_name.clone(),
            last_name: contact.last_name.clone(),
            nickname: contact.nickname.clone(),
            feature_mask: contact.feature_mask,
        });
    }

    let mut groups = Vec::with_capacity(essential.groups.len());
    for group in &essential.groups {
        let creator = IdentityCode::parse(&group.creator_identity).map_err(|_| {
            Error::Protocol(format!("bad group creator: {:?}", group.creator_identity))
        })?;
        let members = group
            .member_identities
            .iter()
            .map(|m| IdentityCode::parse(m))
            .collect::<Result<Vec<_>>>()
            .map_err(|_| Error::Protocol("bad group member identity".into()))?;
        groups.push(GroupRecord {
            creator_identity: creator,
            group_id: group.group_id.to_string(),
            member_identities: members,
            name: group.name.clone(),
        });
    }

    data_dir.ensure_layout()?;
    let account = AccountIdentity {
        identity,
        client_key: SecretKey::from_bytes(client_key),
        server_group: identity_data.server_group,
        device_group_key: SymmetricKey::from_bytes(dgk),
        device_cookie,
        device_id: None,
        contact_count: contacts.len() as u32,
        group_count: groups.len() as u32,
        linked_at: chrono::Utc::now(),
    };
    account.save(&data_dir.identity_path())?;
    data_dir.save_contacts(&contacts)?;
    data_dir.save_groups(&groups)?;

    Ok(JoinOutcome {
        identity,
        contact_count: contacts.len() as u32,
        group_count: groups.len() as u32,
        blobs,
    })
}
