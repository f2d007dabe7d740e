//! The message engine: outgoing sends (direct and group fan-out) and
//! incoming parsing.
//!
//! Every outgoing message is reflected to the device group first, then
//! handed to the chat server; the reflection envelope carries the
//! per-recipient nonces in exactly the fan-out order. The body box and
//! the metadata box share one nonce under different keys.

use super::dedupe::{message_key, DedupeStore};
use super::evolving::{Action, EvolvingReplies, FragmentKind, ReplyKey};
use super::reactions::{legacy_fallback, supports_reactions, LegacyFallback, ReactionMode, ReactionPlan};
use super::types::{
    decode_inbound, encode_delivery_receipt, encode_edit, encode_group_name, encode_group_setup,
    encode_reaction, encode_text, encode_typing, validate_emoji, wrap_group, GroupRef,
    InboundContent,
};
use super::{generate_message_id, msgtype, receipt};
use crate::crypto::{derive_key, precompute, xsalsa_open, xsalsa_seal, PublicKey, SecretKey};
use crate::csp::{CspHandle, CONTAINER_OUTGOING_MESSAGE};
use crate::directory::ContactDirectory;
use crate::dispatch::ReplyFragment;
use crate::error::{Error, Result};
use crate::identity::IdentityCode;
use crate::mediator::{make_envelope, MediatorHandle};
use crate::protocol::d2d::{
    conversation_id, envelope, ConversationId, GroupIdentity, IncomingMessage, MessageMetadata,
    OutgoingMessage,
};
use crate::protocol::file_message::FileMessageBody;
use crate::protocol::message::{
    decode_container, encode_container, MessageFrame, FLAG_GROUP, FLAG_NO_SERVER_ACK,
    FLAG_NO_SERVER_QUEUING, FLAG_SEND_PUSH,
};
use crate::protocol::CSP_PERSONAL;
use prost::Message as _;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// A message sealed for one recipient.
pub struct SealedMessage {
    /// The nonce shared by the body and metadata boxes.
    pub nonce: [u8; 24],
    /// The complete wire frame.
    pub frame: MessageFrame,
}

/// Seal `body` for one recipient: padded body box plus metadata box,
/// both under the same fresh nonce with separated keys.
#[allow(clippy::too_many_arguments)]
pub fn seal_message(
    sender: &IdentityCode,
    client_key: &SecretKey,
    recipient: &IdentityCode,
    recipient_key: &PublicKey,
    nickname: Option<&str>,
    message_type: u8,
    flags: u8,
    message_id: u64,
    created_at_ms: u64,
    body: &[u8],
) -> Result<SealedMessage> {
    let shared = precompute(client_key, recipient_key);
    let nonce: [u8; 24] = crate::crypto::random_bytes();

    let container = encode_container(message_type, body);
    let encrypted_body = xsalsa_seal(&shared, &nonce, &container)?;

    let metadata = MessageMetadata {
        padding: vec![],
        nickname: nickname.map(str::to_string),
        message_id,
        created_at: created_at_ms,
    };
    let metadata_key = derive_key(shared.as_bytes(), b"mm", CSP_PERSONAL, &[])?;
    let encrypted_metadata = xsalsa_seal(&metadata_key, &nonce, &metadata.encode_to_vec())?;

    Ok(SealedMessage {
        nonce,
        frame: MessageFrame {
            sender: *sender,
            receiver: *recipient,
            message_id,
            created_at: (created_at_ms / 1000) as u32,
            flags,
            legacy_nickname: [0u8; 32],
            encrypted_metadata,
            nonce,
            encrypted_body,
        },
    })
}

/// Open an incoming frame: body box, container, and (if present) the
/// metadata box.
pub fn open_message(
    receiver_key: &SecretKey,
    sender_public: &PublicKey,
    frame: &MessageFrame,
) -> Result<(u8, Vec<u8>, Option<MessageMetadata>)> {
    let shared = precompute(receiver_key, sender_public);

    let container = xsalsa_open(&shared, &frame.nonce, &frame.encrypted_body)?;
    let (message_type, body) = decode_container(&container)?;

    let metadata = if frame.encrypted_metadata.is_empty() {
        None
    } else {
        let metadata_key = derive_key(shared.as_bytes(), b"mm", CSP_PERSONAL, &[])?;
        match xsalsa_open(&metadata_key, &frame.nonce, &frame.encrypted_metadata) {
            Ok(plain) => match MessageMetadata::decode(&plain[..]) {
                Ok(metadata) => {
                    if metadata.message_id != frame.message_id {
                        warn!(
                            frame_id = frame.message_id,
                            metadata_id = metadata.message_id,
                            "metadata message id mismatch"
                        );
                    }
                    Some(metadata)
                }
                Err(e) => {
                    warn!(error = %e, "malformed message metadata");
                    None
                }
            },
            Err(_) => {
                warn!("message metadata authentication failed");
                None
            }
        }
    };

    Ok((message_type, body, metadata))
}

/// A parsed, surfaced inbound message.
#[derive(Debug)]
pub struct InboundMessage {
    /// The sender.
    pub sender: IdentityCode,
    /// The sender-chosen message id.
    pub message_id: u64,
    /// Creation time, milliseconds since the epoch.
    pub created_at_ms: u64,
    /// Sender nickname from the metadata, if published.
    pub nickname: Option<String>,
    /// The decoded content.
    pub content: InboundContent,
}

/// The message engine, bound to one live mediator + chat-server pair.
#[derive(Clone)]
pub struct MessageEngine {
    identity: IdentityCode,
    client_key: SecretKey,
    nickname: Option<String>,
    device_id: u64,
    directory: Arc<ContactDirectory>,
    dedupe: Arc<Mutex<DedupeStore>>,
    mediator: MediatorHandle,
    csp: CspHandle,
}

impl MessageEngine {
    /// Bind an engine to live sessions.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: IdentityCode,
        client_key: SecretKey,
        nickname: Option<String>,
        device_id: u64,
        directory: Arc<ContactDirectory>,
        dedupe: Arc<Mutex<DedupeStore>>,
        mediator: MediatorHandle,
        csp: CspHandle,
    ) -> Self {
        Self {
            identity,
            client_key,
            nickname,
            device_id,
            directory,
            dedupe,
            mediator,
            csp,
        }
    }

    /// Our account identity.
    pub fn identity(&self) -> IdentityCode {
        self.identity
    }

    fn contact_conversation(recipient: &IdentityCode) -> ConversationId {
        ConversationId {
            target: Some(conversation_id::Target::Contact(recipient.to_string())),
        }
    }

    fn group_conversation(group: &GroupRef) -> ConversationId {
        ConversationId {
            target: Some(conversation_id::Target::Group(GroupIdentity {
                group_id: group.group_id,
                creator_identity: group.creator.to_string(),
            })),
        }
    }

    /// Send a direct text message. Returns the message id once both the
    /// reflection ack and the chat-server ack arrived.
    pub async fn send_text(&self, recipient: IdentityCode, text: &str) -> Result<u64> {
        let body = encode_text(text)?;
        self.send_direct(recipient, msgtype::TEXT, body, FLAG_SEND_PUSH).await
    }

    /// Send a direct file message (blobs already uploaded).
    pub async fn send_file(&self, recipient: IdentityCode, file: &FileMessageBody) -> Result<u64> {
        self.send_direct(recipient, msgtype::FILE, file.encode()?, FLAG_SEND_PUSH)
            .await
    }

    /// Edit a previously sent direct message.
    pub async fn send_edit(&self, recipient: IdentityCode, target: u64, text: &str) -> Result<u64> {
        let body = encode_edit(target, text)?;
        self.send_direct(recipient, msgtype::EDIT, body, 0).await
    }

    /// Send a delivery receipt covering one or more messages.
    pub async fn send_delivery_receipt(
        &self,
        recipient: IdentityCode,
        status: u8,
        message_ids: &[u64],
    ) -> Result<u64> {
        let body = encode_delivery_receipt(status, message_ids)?;
        self.send_direct(recipient, msgtype::DELIVERY_RECEIPT, body, 0).await
    }

    /// Send a typing indicator: unqueued, unacknowledged, reflected as
    /// ephemeral.
    pub async fn send_typing(&self, recipient: IdentityCode, started: bool) -> Result<()> {
        let body = encode_typing(started);
        let flags = FLAG_NO_SERVER_QUEUING | FLAG_NO_SERVER_ACK;

        let recipient_key = self.directory.public_key(&recipient).await?;
        let message_id = generate_message_id();
        let created_at = now_ms();
        let sealed = seal_message(
            &self.identity,
            &self.client_key,
            &recipient,
            &recipient_key,
            self.nickname.as_deref(),
            msgtype::TYPING_INDICATOR,
            flags,
            message_id,
            created_at,
            &body,
        )?;

        let envelope = make_envelope(
            envelope::Content::OutgoingMessage(OutgoingMessage {
                conversation: Some(Self::contact_conversation(&recipient)),
                message_id,
                created_at,
                message_type: msgtype::TYPING_INDICATOR as u32,
                body,
                nonces: vec![sealed.nonce.to_vec()],
            }),
            self.device_id,
        );
        self.mediator.reflect(envelope, true).await?;

        self.csp
            .send_container(CONTAINER_OUTGOING_MESSAGE, sealed.frame.encode()?)
            .await
    }

    /// Send a direct reaction, falling back to a legacy delivery receipt
    /// for contacts without reaction support. Returns how it went out.
    pub async fn send_reaction(
        &self,
        recipient: IdentityCode,
        target: u64,
        emoji: &str,
        apply: bool,
    ) -> Result<ReactionMode> {
        validate_emoji(emoji)?;

        if supports_reactions(self.directory.feature_mask(&recipient).await) {
            let body = encode_reaction(target, emoji, apply)?;
            self.send_direct(recipient, msgtype::REACTION, body, 0).await?;
            return Ok(ReactionMode::Modern);
        }

        match legacy_fallback(emoji, apply) {
            LegacyFallback::Omit => {
                debug!(recipient = %recipient, "reaction has no legacy form, omitted");
                Ok(ReactionMode::Omitted)
            }
            fallback => {
                let status = fallback.receipt_status().unwrap_or(receipt::ACKNOWLEDGED);
                self.send_delivery_receipt(recipient, status, &[target]).await?;
                Ok(ReactionMode::Legacy)
            }
        }
    }

    async fn send_direct(
        &self,
        recipient: IdentityCode,
        message_type: u8,
        body: Vec<u8>,
        flags: u8,
    ) -> Result<u64> {
        if recipient == self.identity {
            return Err(Error::Caller("cannot address ourselves directly".into()));
        }
        let recipient_key = self.directory.public_key(&recipient).await?;
        let message_id = generate_message_id();
        let created_at = now_ms();

        let sealed = seal_message(
            &self.identity,
            &self.client_key,
            &recipient,
            &recipient_key,
            self.nickname.as_deref(),
            message_type,
            flags,
            message_id,
            created_at,
            &body,
        )?;

        // Reflect first so peer devices observe the send, carrying the
        // exact nonce the chat-server copy will use.
        let envelope = make_envelope(
            envelope::Content::OutgoingMessage(OutgoingMessage {
                conversation: Some(Self::contact_conversation(&recipient)),
                message_id,
                created_at,
                message_type: message_type as u32,
                body,
                nonces: vec![sealed.nonce.to_vec()],
            }),
            self.device_id,
        );
        self.mediator.reflect(envelope, false).await?;

        self.csp
            .send_message(recipient, message_id, sealed.frame.encode()?)
            .await?;
        Ok(message_id)
    }

    /// Send a group text message.
    pub async fn send_group_text(
        &self,
        group: &GroupRef,
        members: &[IdentityCode],
        text: &str,
    ) -> Result<u64> {
        let inner = encode_text(text)?;
        self.send_group(group, members, msgtype::GROUP_TEXT, inner, FLAG_GROUP | FLAG_SEND_PUSH)
            .await
    }

    /// Send a group file message (blobs already uploaded).
    pub async fn send_group_file(
        &self,
        group: &GroupRef,
        members: &[IdentityCode],
        file: &FileMessageBody,
    ) -> Result<u64> {
        self.send_group(group, members, msgtype::GROUP_FILE, file.encode()?, FLAG_GROUP | FLAG_SEND_PUSH)
            .await
    }

    /// Edit a previously sent group message.
    pub async fn send_group_edit(
        &self,
        group: &GroupRef,
        members: &[IdentityCode],
        target: u64,
        text: &str,
    ) -> Result<u64> {
        let inner = encode_edit(target, text)?;
        self.send_group(group, members, msgtype::GROUP_EDIT, inner, FLAG_GROUP).await
    }

    /// Send a group setup (membership) message; creator only.
    pub async fn send_group_setup(
        &self,
        group_id: u64,
        members: &[IdentityCode],
    ) -> Result<u64> {
        let body = encode_group_setup(group_id, &self.identity, members);
        self.fan_out_plain(members, msgtype::GROUP_SETUP, body, FLAG_GROUP).await
    }

    /// Send a group rename message; creator only.
    pub async fn send_group_name(
        &self,
        group_id: u64,
        members: &[IdentityCode],
        name: &str,
    ) -> Result<u64> {
        let body = encode_group_name(group_id, name);
        self.fan_out_plain(members, msgtype::GROUP_NAME, body, FLAG_GROUP).await
    }

    /// Group message: one reflection carrying the canonical inner body
    /// and the ordered nonce list, then one chat-server send per member.
    async fn send_group(
        &self,
        group: &GroupRef,
        members: &[IdentityCode],
        message_type: u8,
        inner: Vec<u8>,
        flags: u8,
    ) -> Result<u64> {
        let wrapped = wrap_group(group, inner);
        let recipients: Vec<IdentityCode> = members
            .iter()
            .copied()
            .filter(|member| *member != self.identity)
            .collect();

        let message_id = generate_message_id();
        let created_at = now_ms();

        // Seal in fan-out order; the reflection nonce list must match.
        let mut sealed = Vec::with_capacity(recipients.len());
        let mut nonces = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            let recipient_key = self.directory.public_key(recipient).await?;
            let message = seal_message(
                &self.identity,
                &self.client_key,
                recipient,
                &recipient_key,
                self.nickname.as_deref(),
                message_type,
                flags,
                message_id,
                created_at,
                &wrapped,
            )?;
            nonces.push(message.nonce.to_vec());
            sealed.push((*recipient, message));
        }

        let envelope = make_envelope(
            envelope::Content::OutgoingMessage(OutgoingMessage {
                conversation: Some(Self::group_conversation(group)),
                message_id,
                created_at,
                message_type: message_type as u32,
                body: wrapped,
                nonces,
            }),
            self.device_id,
        );
        self.mediator.reflect(envelope, false).await?;

        let sends = sealed.into_iter().map(|(recipient, message)| {
            let csp = self.csp.clone();
            async move {
                csp.send_message(recipient, message_id, message.frame.encode()?)
                    .await
            }
        });
        futures_util::future::try_join_all(sends).await?;
        Ok(message_id)
    }

    /// Fan out an unwrapped (creator-container) body to members.
    async fn fan_out_plain(
        &self,
        members: &[IdentityCode],
        message_type: u8,
        body: Vec<u8>,
        flags: u8,
    ) -> Result<u64> {
        let recipients: Vec<IdentityCode> = members
            .iter()
            .copied()
            .filter(|member| *member != self.identity)
            .collect();

        let message_id = generate_message_id();
        let created_at = now_ms();

        let mut sealed = Vec::with_capacity(recipients.len());
        let mut nonces = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            let recipient_key = self.directory.public_key(recipient).await?;
            let message = seal_message(
                &self.identity,
                &self.client_key,
                recipient,
                &recipient_key,
                self.nickname.as_deref(),
                message_type,
                flags,
                message_id,
                created_at,
                &body,
            )?;
            nonces.push(message.nonce.to_vec());
            sealed.push((*recipient, message));
        }

        let envelope = make_envelope(
            envelope::Content::OutgoingMessage(OutgoingMessage {
                conversation: None,
                message_id,
                created_at,
                message_type: message_type as u32,
                body,
                nonces,
            }),
            self.device_id,
        );
        self.mediator.reflect(envelope, false).await?;

        let sends = sealed.into_iter().map(|(recipient, message)| {
            let csp = self.csp.clone();
            async move {
                csp.send_message(recipient, message_id, message.frame.encode()?)
                    .await
            }
        });
        futures_util::future::try_join_all(sends).await?;
        Ok(message_id)
    }

    /// Send a group reaction, partitioning members between the modern
    /// reaction body and the legacy group delivery receipt.
    pub async fn send_group_reaction(
        &self,
        group: &GroupRef,
        members: &[IdentityCode],
        target: u64,
        emoji: &str,
        apply: bool,
    ) -> Result<ReactionPlan> {
        validate_emoji(emoji)?;

        let mut recipients = Vec::new();
        for member in members {
            if *member == self.identity {
                continue;
            }
            recipients.push((*member, self.directory.feature_mask(member).await));
        }
        let plan = ReactionPlan::build(recipients, emoji, apply);
        if plan.modern.is_empty() && plan.legacy.is_empty() {
            return Ok(plan);
        }

        let reaction_inner = encode_reaction(target, emoji, apply)?;
        let wrapped_reaction = wrap_group(group, reaction_inner);
        let wrapped_receipt = match plan.legacy_status {
            Some(status) if !plan.legacy.is_empty() => {
                Some(wrap_group(group, encode_delivery_receipt(status, &[target])?))
            }
            _ => None,
        };

        let message_id = generate_message_id();
        let created_at = now_ms();

        // One logical send: modern recipients first, then legacy, with
        // the reflection nonce list in exactly that order.
        let mut sealed = Vec::new();
        let mut nonces = Vec::new();
        for (recipient, message_type, body) in plan
            .modern
            .iter()
            .map(|r| (*r, msgtype::GROUP_REACTION, &wrapped_reaction))
            .chain(plan.legacy.iter().filter_map(|r| {
                wrapped_receipt
                    .as_ref()
                    .map(|receipt_body| (*r, msgtype::GROUP_DELIVERY_RECEIPT, receipt_body))
            }))
        {
            let recipient_key = self.directory.public_key(&recipient).await?;
            let message = seal_message(
                &self.identity,
                &self.client_key,
                &recipient,
                &recipient_key,
                self.nickname.as_deref(),
                message_type,
                FLAG_GROUP,
                message_id,
                created_at,
                body,
            )?;
            nonces.push(message.nonce.to_vec());
            sealed.push((recipient, message));
        }

        let envelope = make_envelope(
            envelope::Content::OutgoingMessage(OutgoingMessage {
                conversation: Some(Self::group_conversation(group)),
                message_id,
                created_at,
                message_type: msgtype::GROUP_REACTION as u32,
                body: wrapped_reaction,
                nonces,
            }),
            self.device_id,
        );
        self.mediator.reflect(envelope, false).await?;

        let sends = sealed.into_iter().map(|(recipient, message)| {
            let csp = self.csp.clone();
            async move {
                csp.send_message(recipient, message_id, message.frame.encode()?)
                    .await
            }
        });
        futures_util::future::try_join_all(sends).await?;
        Ok(plan)
    }

    /// Handle a chat-server delivery: dedupe, decrypt, reflect to the
    /// device group, optionally answer with a received receipt, and
    /// surface the parsed message.
    ///
    /// Returns `None` for duplicates.
    pub async fn handle_incoming(&self, frame: MessageFrame) -> Result<Option<InboundMessage>> {
        let key = message_key(&frame.sender, frame.message_id);
        let fresh = match self.dedupe.lock().await.check_and_insert(&key) {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(error = %e, "dedupe snapshot write failed");
                true
            }
        };
        if !fresh {
            debug!(sender = %frame.sender, message_id = frame.message_id, "duplicate delivery skipped");
            return Ok(None);
        }

        let sender_key = self.directory.public_key(&frame.sender).await?;
        let (message_type, body, metadata) = open_message(&self.client_key, &sender_key, &frame)?;

        let created_at_ms = metadata
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(u64::from(frame.created_at) * 1000);
        let nickname = metadata.and_then(|m| m.nickname);

        let content = decode_inbound(message_type, &body, &frame.sender)?;

        // Keep peer devices consistent before surfacing locally.
        let reflect = make_envelope(
            envelope::Content::IncomingMessage(IncomingMessage {
                sender_identity: frame.sender.to_string(),
                message_id: frame.message_id,
                created_at: created_at_ms,
                message_type: message_type as u32,
                body,
                nonce: frame.nonce.to_vec(),
            }),
            self.device_id,
        );
        if let Err(e) = self.mediator.reflect(reflect, false).await {
            warn!(error = %e, "failed to reflect incoming message");
        }

        // End-to-end received receipt for content a user would see.
        if matches!(content, InboundContent::Text(_) | InboundContent::File(_))
            && frame.flags & FLAG_NO_SERVER_ACK == 0
        {
            if let Err(e) = self
                .send_delivery_receipt(frame.sender, receipt::RECEIVED, &[frame.message_id])
                .await
            {
                warn!(error = %e, "failed to send received receipt");
            }
        }

        Ok(Some(InboundMessage {
            sender: frame.sender,
            message_id: frame.message_id,
            created_at_ms,
            nickname,
            content,
        }))
    }

    /// Drive one evolving group reply from a fragment stream.
    ///
    /// Fragments are consumed in order (the per-session FIFO), each
    /// mapped through the evolving-reply rules, with edit failures
    /// falling back to a fresh anchor text.
    pub async fn run_group_reply(
        &self,
        group: GroupRef,
        members: Vec<IdentityCode>,
        key: ReplyKey,
        mut fragments: mpsc::Receiver<ReplyFragment>,
        replies: Arc<Mutex<EvolvingReplies>>,
    ) -> Result<()> {
        while let Some(fragment) = fragments.recv().await {
            let action = replies
                .lock()
                .await
                .on_fragment(&key, fragment.kind, &fragment.text, now_ms());
            if let Some(action) = action {
                self.perform_reply_action(&group, &members, &key, action, &replies).await?;
            }
            if fragment.kind == FragmentKind::Final {
                break;
            }
        }
        Ok(())
    }

    async fn perform_reply_action(
        &self,
        group: &GroupRef,
        members: &[IdentityCode],
        key: &ReplyKey,
        action: Action,
        replies: &Arc<Mutex<EvolvingReplies>>,
    ) -> Result<()> {
        match action {
            Action::SendText { text } => {
                let anchor = self.send_group_text(group, members, &text).await?;
                replies.lock().await.on_text_sent(key, anchor, now_ms());
            }
            Action::SendEdit { anchor, text } => {
                if let Err(e) = self.send_group_edit(group, members, anchor, &text).await {
                    warn!(error = %e, "group edit failed, falling back to a fresh text");
                    let fallback = replies.lock().await.on_edit_failed(key, now_ms());
                    if let Some(Action::SendText { text }) = fallback {
                        let anchor = self.send_group_text(group, members, &text).await?;
                        replies.lock().await.on_text_sent(key, anchor, now_ms());
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(s: &str) -> IdentityCode {
        IdentityCode::parse(s).expect("valid identity")
    }

    fn sealed_pair() -> (SecretKey, SecretKey, SealedMessage) {
        let sender_key = SecretKey::generate();
        let recipient_key = SecretKey::generate();
        let sealed = seal_message(
            &ident("SENDER00"),
            &sender_key,
            &ident("RECEIVER"),
            &recipient_key.public_key(),
            Some("desk"),
            msgtype::TEXT,
            FLAG_SEND_PUSH,
            77,
            1_700_000_000_123,
            b"hello over there",
        )
        .expect("seal");
        (sender_key, recipient_key, sealed)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (sender_key, recipient_key, sealed) = sealed_pair();

        let (message_type, body, metadata) =
            open_message(&recipient_key, &sender_key.public_key(), &sealed.frame).expect("open");
        assert_eq!(message_type, msgtype::TEXT);
        assert_eq!(body, b"hello over there");

        let metadata = metadata.expect("metadata");
        assert_eq!(metadata.message_id, 77);
        assert_eq!(metadata.created_at, 1_700_000_000_123);
        assert_eq!(metadata.nickname.as_deref(), Some("desk"));

        // The frame header carries seconds.
        assert_eq!(sealed.frame.created_at, 1_700_000_000);
    }

    #[test]
    fn test_body_and_metadata_share_one_nonce() {
        let (_, _, sealed) = sealed_pair();
        assert_eq!(sealed.frame.nonce, sealed.nonce);
        // Both boxes authenticated under that one nonce, different keys:
        // covered by the roundtrip above; here the layout invariant.
        assert!(!sealed.frame.encrypted_metadata.is_empty());
        assert!(!sealed.frame.encrypted_body.is_empty());
    }

    #[test]
    fn test_wrong_recipient_cannot_open() {
        let (sender_key, _, sealed) = sealed_pair();
        let wrong = SecretKey::generate();
        assert!(open_message(&wrong, &sender_key.public_key(), &sealed.frame).is_err());
    }

    #[test]
    fn test_metadata_failure_is_not_fatal() {
        let (sender_key, recipient_key, mut sealed) = sealed_pair();
        // Corrupt only the metadata box: the body still opens.
        let last = sealed.frame.encrypted_metadata.len() - 1;
        sealed.frame.encrypted_metadata[last] ^= 0xFF;

        let (message_type, body, metadata) =
            open_message(&recipient_key, &sender_key.public_key(), &sealed.frame).expect("open");
        assert_eq!(message_type, msgtype::TEXT);
        assert_eq!(body, b"hello over there");
        assert!(metadata.is_none());
    }

    #[test]
    fn test_padded_body_hides_length() {
        let (_, _, a) = sealed_pair();
        // A one-byte body still produces at least 32 padded bytes plus
        // the type byte and the tag.
        let sender_key = SecretKey::generate();
        let recipient_key = SecretKey::generate();
        let sealed = seal_message(
            &ident("SENDER00"),
            &sender_key,
            &ident("RECEIVER"),
            &recipient_key.public_key(),
            None,
            msgtype::TEXT,
            0,
            1,
            0,
            b"x",
        )
        .expect("seal");
        assert!(sealed.frame.encrypted_body.len() >= 1 + 32 + 16);
        assert!(a.frame.encrypted_body.len() >= 1 + 32 + 16);
    }
}
