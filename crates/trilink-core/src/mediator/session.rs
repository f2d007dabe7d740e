//! The mediator session task.
//!
//! One task owns the socket and every piece of session state: handshake
//! phase, leader role, the pending-reflect table, and the dedupe store.
//! Callers talk to it through a command channel and receive events on an
//! mpsc stream, so all mutation happens under a single writer.

use super::reflect::{
    encode_reflected_ack, ReflectAckFrame, ReflectFrame, ReflectIdAllocator, ReflectedFrame,
    REFLECTED_FLAG_EPHEMERAL,
};
use super::{MAX_CLOCK_DRIFT_MS, REFLECT_ACK_TIMEOUT};
use crate::crypto::{open_prefixed, precompute, seal_prefixed, PublicKey};
use crate::error::{Error, Result};
use crate::identity::{DeviceGroupKeys, IdentityCode};
use crate::messaging::dedupe::{message_key, DedupeStore};
use crate::protocol::d2d::{
    envelope, ClientHello, DeviceInfo, DeviceSlotExpirationPolicy, DeviceSlotState,
    DeviceSlotsExhaustedPolicy, Envelope, Platform, ServerHello, ServerInfo, TransactionEnded,
    TransactionRejected,
};
use crate::protocol::frames::{D2mFrame, D2mFrameType};
use crate::protocol::D2M_PROTOCOL_VERSION;
use futures_util::{SinkExt, StreamExt};
use prost::Message as _;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Events surfaced by the mediator session.
#[derive(Debug)]
pub enum MediatorEvent {
    /// Authentication completed; the session is usable.
    Ready {
        /// Mediator wall-clock time, milliseconds.
        server_time: u64,
        /// Slot capacity of the device group.
        max_device_slots: u32,
    },
    /// The mediator promoted this device to leader.
    PromotedToLeader,
    /// The reflection queue has been drained.
    ReflectionQueueDry,
    /// A fresh (non-duplicate) envelope from a device-group peer.
    Reflected {
        /// The decrypted envelope.
        envelope: Envelope,
        /// Mediator storage timestamp, milliseconds.
        timestamp: u64,
    },
    /// Opaque chat-server bytes for the leader's nested session.
    Proxy(Vec<u8>),
    /// A device-group transaction observation.
    Transaction(TransactionEvent),
    /// The session ended.
    Closed {
        /// Human-readable close reason.
        reason: String,
    },
}

/// Transaction frames surfaced as events; the core keeps no transaction
/// state.
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// Our begin was accepted.
    BeginAck,
    /// Our commit was accepted.
    CommitAck,
    /// Another device holds the lock.
    Rejected {
        /// The device holding the lock.
        device_id: u64,
    },
    /// A peer's transaction ended.
    Ended {
        /// The device whose transaction ended.
        device_id: u64,
    },
}

enum Command {
    Reflect {
        envelope: Envelope,
        ephemeral: bool,
        reply: oneshot::Sender<Result<u64>>,
    },
    Proxy(Vec<u8>),
    Close,
}

/// Handle for submitting work to a mediator session.
#[derive(Clone)]
pub struct MediatorHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl MediatorHandle {
    /// Reflect an envelope to the device group and await the mediator's
    /// acknowledgement (up to 15 s). Returns the mediator timestamp.
    ///
    /// Ephemeral envelopes are fire-and-forget: no acknowledgement is
    /// awaited and the returned timestamp is zero.
    pub async fn reflect(&self, envelope: Envelope, ephemeral: bool) -> Result<u64> {
        let (reply, response) = oneshot::channel();
        self.cmd_tx
            .send(Command::Reflect { envelope, ephemeral, reply })
            .await
            .map_err(|_| Error::SessionClosed("mediator session gone".into()))?;
        response
            .await
            .map_err(|_| Error::SessionClosed("mediator session gone".into()))?
    }

    /// Send opaque chat-server bytes through the proxy channel.
    pub async fn send_proxy(&self, bytes: Vec<u8>) -> Result<()> {
        self.cmd_tx
            .send(Command::Proxy(bytes))
            .await
            .map_err(|_| Error::SessionClosed("mediator session gone".into()))
    }

    /// Ask the session to close gracefully.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;
    }
}

/// Connection parameters for one mediator session.
pub struct MediatorConnectParams {
    /// The mediator WebSocket URL.
    pub url: String,
    /// Our account identity.
    pub identity: IdentityCode,
    /// Our device id.
    pub device_id: u64,
    /// Whether we expect a fresh device slot (first connect).
    pub expect_new_slot: bool,
    /// User-visible device label.
    pub device_label: String,
    /// Platform details string for the device info.
    pub platform_details: String,
}

/// Factory for mediator sessions.
pub struct MediatorConnection;

impl MediatorConnection {
    /// Open the WebSocket and spawn the session task.
    ///
    /// The dedupe store is shared with the message engine, which applies
    /// the same duplicate decisions to direct chat-server deliveries.
    pub async fn connect(
        params: MediatorConnectParams,
        keys: DeviceGroupKeys,
        dedupe: Arc<Mutex<DedupeStore>>,
    ) -> Result<(MediatorHandle, mpsc::Receiver<MediatorEvent>)> {
        let (ws, _) = connect_async(params.url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("mediator connect failed: {e}")))?;
        info!(url = %params.url, "mediator connected");

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);

        let session = Session {
            ws,
            cmd_rx,
            event_tx,
            keys,
            dedupe,
            identity: params.identity,
            device_id: params.device_id,
            expect_new_slot: params.expect_new_slot,
            device_label: params.device_label,
            platform_details: params.platform_details,
            phase: Phase::AwaitServerHello,
            pending: HashMap::new(),
            alloc: ReflectIdAllocator::new(),
        };
        tokio::spawn(session.run());

        Ok((MediatorHandle { cmd_tx }, event_rx))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitServerHello,
    AwaitServerInfo,
    Ready,
}

struct PendingReflect {
    reply: oneshot::Sender<Result<u64>>,
    deadline: Instant,
}

struct Session {
    ws: WsStream,
    cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<MediatorEvent>,
    keys: DeviceGroupKeys,
    dedupe: Arc<Mutex<DedupeStore>>,
    identity: IdentityCode,
    device_id: u64,
    expect_new_slot: bool,
    device_label: String,
    platform_details: String,
    phase: Phase,
    pending: HashMap<u32, PendingReflect>,
    alloc: ReflectIdAllocator,
}

impl Session {
    async fn run(mut self) {
        let mut sweep = tokio::time::interval(std::time::Duration::from_millis(500));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                message = self.ws.next() => match message {
                    Some(Ok(WsMessage::Binary(data))) => {
                        match self.handle_frame(&data).await {
                            Ok(()) => {}
                            Err(e) if e.is_session_fatal() => break e.to_string(),
                            Err(e) => warn!(error = %e, "dropping mediator frame"),
                        }
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(frame))) => break format!("mediator closed: {frame:?}"),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("mediator read failed: {e}"),
                    None => break "mediator stream ended".to_string(),
                },
                command = self.cmd_rx.recv() => match command {
                    Some(Command::Close) | None => break "closed by supervisor".to_string(),
                    Some(command) => {
                        if let Err(e) = self.handle_command(command).await {
                            break e.to_string();
                        }
                    }
                },
                _ = sweep.tick() => self.expire_pending(),
            }
        };

        self.shutdown(reason).await;
    }

    async fn shutdown(mut self, reason: String) {
        info!(reason = %reason, "mediator session down");
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(Error::SessionClosed(reason.clone())));
        }
        let _ = self.ws.close(None).await;
        let _ = self.event_tx.send(MediatorEvent::Closed { reason }).await;
    }

    fn expire_pending(&mut self) {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(pending) = self.pending.remove(&id) {
                warn!(reflect_id = id, "reflect ack timed out");
                let _ = pending.reply.send(Err(Error::Timeout("reflect ack")));
            }
        }
    }

    async fn send_frame(&mut self, frame_type: D2mFrameType, payload: Vec<u8>) -> Result<()> {
        let encoded = D2mFrame::new(frame_type, payload).encode();
        self.ws
            .send(WsMessage::Binary(encoded))
            .await
            .map_err(|e| Error::Transport(format!("mediator send failed: {e}")))
    }

    async fn handle_frame(&mut self, data: &[u8]) -> Result<()> {
        let frame = D2mFrame::decode(data)?;
        match frame.frame_type {
            D2mFrameType::ServerHello => self.handle_server_hello(&frame.payload).await,
            D2mFrameType::ServerInfo => self.handle_server_info(&frame.payload).await,
            D2mFrameType::ReflectionQueueDry => {
                self.emit(MediatorEvent::ReflectionQueueDry).await;
                Ok(())
            }
            D2mFrameType::RolePromotedToLeader => {
                info!("promoted to device-group leader");
                self.emit(MediatorEvent::PromotedToLeader).await;
                Ok(())
            }
            D2mFrameType::Reflected => self.handle_reflected(&frame.payload).await,
            D2mFrameType::ReflectAck => self.handle_reflect_ack(&frame.payload),
            D2mFrameType::Proxy => {
                self.emit(MediatorEvent::Proxy(frame.payload)).await;
                Ok(())
            }
            D2mFrameType::BeginTransactionAck => {
                self.emit(MediatorEvent::Transaction(TransactionEvent::BeginAck)).await;
                Ok(())
            }
            D2mFrameType::CommitTransactionAck => {
                self.emit(MediatorEvent::Transaction(TransactionEvent::CommitAck)).await;
                Ok(())
            }
            D2mFrameType::TransactionRejected => {
                let rejected = TransactionRejected::decode(frame.payload.as_slice())
                    .map_err(|e| Error::Protocol(format!("bad transaction-rejected: {e}")))?;
                self.emit(MediatorEvent::Transaction(TransactionEvent::Rejected {
                    device_id: rejected.device_id,
                }))
                .await;
                Ok(())
            }
            D2mFrameType::TransactionEnded => {
                let ended = TransactionEnded::decode(frame.payload.as_slice())
                    .map_err(|e| Error::Protocol(format!("bad transaction-ended: {e}")))?;
                self.emit(MediatorEvent::Transaction(TransactionEvent::Ended {
                    device_id: ended.device_id,
                }))
                .await;
                Ok(())
            }
            other => {
                debug!(frame_type = ?other, "ignoring mediator frame");
                Ok(())
            }
        }
    }

    async fn handle_server_hello(&mut self, payload: &[u8]) -> Result<()> {
        if self.phase != Phase::AwaitServerHello {
            return Err(Error::Protocol("unexpected ServerHello".into()));
        }
        let hello = ServerHello::decode(payload)
            .map_err(|e| Error::Protocol(format!("bad ServerHello: {e}")))?;
        let esk = PublicKey::from_slice(&hello.esk)
            .map_err(|_| Error::Protocol("bad mediator session key".into()))?;

        // Prove possession of the device-group auth key by boxing the
        // challenge; the response carries its fresh nonce up front.
        let shared = precompute(&self.keys.dgpk_secret, &esk);
        let response = seal_prefixed(&shared, &hello.challenge)?;

        let device_info = DeviceInfo {
            padding: vec![],
            platform: Platform::Desktop as i32,
            platform_details: self.platform_details.clone(),
            app_version: crate::VERSION.to_string(),
            label: self.device_label.clone(),
        };
        let encrypted_device_info = seal_prefixed(&self.keys.dgdik, &device_info.encode_to_vec())?;

        let client_hello = ClientHello {
            version: D2M_PROTOCOL_VERSION,
            response,
            device_id: self.device_id,
            device_slots_exhausted_policy: DeviceSlotsExhaustedPolicy::Reject as i32,
            device_slot_expiration_policy: DeviceSlotExpirationPolicy::Persistent as i32,
            expected_device_slot_state: if self.expect_new_slot {
                DeviceSlotState::New
            } else {
                DeviceSlotState::Existing
            } as i32,
            encrypted_device_info,
        };
        self.send_frame(D2mFrameType::ClientHello, client_hello.encode_to_vec())
            .await?;
        self.phase = Phase::AwaitServerInfo;
        Ok(())
    }

    async fn handle_server_info(&mut self, payload: &[u8]) -> Result<()> {
        if self.phase != Phase::AwaitServerInfo {
            return Err(Error::Protocol("unexpected ServerInfo".into()));
        }
        let info = ServerInfo::decode(payload)
            .map_err(|e| Error::Protocol(format!("bad ServerInfo: {e}")))?;

        let local = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let drift = local.abs_diff(info.current_time);
        if drift > MAX_CLOCK_DRIFT_MS {
            warn!(drift_ms = drift, "mediator clock drift exceeds 20 minutes");
        }

        self.phase = Phase::Ready;
        self.emit(MediatorEvent::Ready {
            server_time: info.current_time,
            max_device_slots: info.max_device_slots,
        })
        .await;
        Ok(())
    }

    async fn handle_reflected(&mut self, payload: &[u8]) -> Result<()> {
        let frame = ReflectedFrame::decode(payload)?;

        let plain = match open_prefixed(&self.keys.dgrk, &frame.encrypted_envelope) {
            Ok(plain) => plain,
            Err(e) => {
                // The mediator cannot retry per message; drop with
                // diagnostics. Non-ephemeral frames are still acked.
                warn!(reflected_id = frame.reflected_id, error = %e, "undecryptable reflected envelope");
                if !frame.is_ephemeral() {
                    self.send_reflected_ack(frame.reflected_id).await?;
                }
                return Ok(());
            }
        };

        let envelope = Envelope::decode(&plain[..])
            .map_err(|e| Error::Protocol(format!("malformed reflected envelope: {e}")))?;

        if self.is_fresh(&envelope).await {
            self.emit(MediatorEvent::Reflected {
                envelope,
                timestamp: frame.timestamp,
            })
            .await;
        } else {
            debug!(reflected_id = frame.reflected_id, "duplicate reflected message skipped");
        }

        if !frame.is_ephemeral() {
            self.send_reflected_ack(frame.reflected_id).await?;
        }
        Ok(())
    }

    /// Consult the dedupe set for message-bearing envelopes. Everything
    /// else is always fresh.
    async fn is_fresh(&mut self, envelope: &Envelope) -> bool {
        let key = match &envelope.content {
            Some(envelope::Content::IncomingMessage(message)) => {
                match IdentityCode::parse(&message.sender_identity) {
                    Ok(sender) => message_key(&sender, message.message_id),
                    Err(_) => {
                        warn!("reflected incoming message with bad sender identity");
                        return true;
                    }
                }
            }
            Some(envelope::Content::OutgoingMessage(message)) => {
                message_key(&self.identity, message.message_id)
            }
            _ => return true,
        };

        match self.dedupe.lock().await.check_and_insert(&key) {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(error = %e, "dedupe snapshot write failed");
                true
            }
        }
    }

    async fn send_reflected_ack(&mut self, reflected_id: u32) -> Result<()> {
        self.send_frame(D2mFrameType::ReflectedAck, encode_reflected_ack(reflected_id))
            .await
    }

    fn handle_reflect_ack(&mut self, payload: &[u8]) -> Result<()> {
        let ack = ReflectAckFrame::decode(payload)?;
        match self.pending.remove(&ack.reflect_id) {
            Some(pending) => {
                let _ = pending.reply.send(Ok(ack.timestamp));
            }
            None => warn!(reflect_id = ack.reflect_id, "reflect ack for unknown id"),
        }
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Reflect { envelope, ephemeral, reply } => {
                let encrypted = seal_prefixed(&self.keys.dgrk, &envelope.encode_to_vec())?;

                if ephemeral {
                    let frame = ReflectFrame {
                        flags: REFLECTED_FLAG_EPHEMERAL,
                        reflect_id: self.alloc.allocate(&self.pending),
                        encrypted_envelope: encrypted,
                    };
                    self.send_frame(D2mFrameType::Reflect, frame.encode()).await?;
                    let _ = reply.send(Ok(0));
                } else {
                    let reflect_id = self.alloc.allocate(&self.pending);
                    self.pending.insert(
                        reflect_id,
                        PendingReflect {
                            reply,
                            deadline: Instant::now() + REFLECT_ACK_TIMEOUT,
                        },
                    );
                    let frame = ReflectFrame {
                        flags: 0,
                        reflect_id,
                        encrypted_envelope: encrypted,
                    };
                    self.send_frame(D2mFrameType::Reflect, frame.encode()).await?;
                }
                Ok(())
            }
            Command::Proxy(bytes) => self.send_frame(D2mFrameType::Proxy, bytes).await,
            Command::Close => Ok(()),
        }
    }

    async fn emit(&self, event: MediatorEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("mediator event receiver dropped");
        }
    }
}
