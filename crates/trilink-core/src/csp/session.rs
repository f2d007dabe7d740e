//! The chat-server session task.
//!
//! Runs bytes-in/bytes-out against the mediator's proxy channel: the
//! supervisor feeds proxied payloads in and forwards our output as proxy
//! frames. One task owns the handshake state, both nonce sequences, and
//! the outgoing-ack table.

use super::handshake::{parse_login_ack, process_server_hello, seal_login, ClientHandshake};
use super::{
    Container, NonceSequence, Phase, CONTAINER_ECHO_REPLY, CONTAINER_ECHO_REQUEST,
    CONTAINER_INCOMING_MESSAGE, CONTAINER_INCOMING_MESSAGE_ACK, CONTAINER_OUTGOING_MESSAGE,
    CONTAINER_OUTGOING_MESSAGE_ACK, CONTAINER_UNBLOCK_INCOMING, OUTGOING_ACK_TIMEOUT,
    SERVER_HELLO_LEN,
};
use crate::crypto::{xsalsa_open, xsalsa_seal, PublicKey, SecretKey, SymmetricKey};
use crate::error::{Error, Result};
use crate::identity::IdentityCode;
use crate::protocol::frames::{encode_csp_frame, CspFrameReader};
use crate::protocol::message::{MessageFrame, FLAG_NO_SERVER_ACK};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Events surfaced by the chat-server session.
#[derive(Debug)]
pub enum CspEvent {
    /// Login completed; the session accepts sends.
    Ready {
        /// Server wall-clock time, seconds since the epoch.
        server_time: u64,
        /// Number of messages queued for delivery.
        queued_messages: u32,
    },
    /// An end-to-end message delivered by the server.
    IncomingMessage(MessageFrame),
    /// An echo reply with its payload.
    EchoReply(Vec<u8>),
    /// The session ended.
    Closed {
        /// Human-readable close reason.
        reason: String,
    },
}

enum Command {
    SendMessage {
        receiver: IdentityCode,
        message_id: u64,
        frame: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    SendContainer {
        container_type: u8,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Handle for submitting work to a chat-server session.
#[derive(Clone)]
pub struct CspHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl CspHandle {
    /// Send an outgoing message container and await the server's
    /// acknowledgement (up to 20 s).
    pub async fn send_message(
        &self,
        receiver: IdentityCode,
        message_id: u64,
        frame: Vec<u8>,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendMessage { receiver, message_id, frame, reply })
            .await
            .map_err(|_| Error::SessionClosed("chat-server session gone".into()))?;
        response
            .await
            .map_err(|_| Error::SessionClosed("chat-server session gone".into()))?
    }

    /// Send an arbitrary container without acknowledgement tracking.
    pub async fn send_container(&self, container_type: u8, data: Vec<u8>) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendContainer { container_type, data, reply })
            .await
            .map_err(|_| Error::SessionClosed("chat-server session gone".into()))?;
        response
            .await
            .map_err(|_| Error::SessionClosed("chat-server session gone".into()))?
    }

    /// Send an echo request; the reply surfaces as [`CspEvent::EchoReply`].
    pub async fn echo(&self, payload: Vec<u8>) -> Result<()> {
        self.send_container(CONTAINER_ECHO_REQUEST, payload).await
    }

    /// Ask the session to close gracefully.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;
    }
}

/// Static parameters of one chat-server session.
pub struct CspSessionParams {
    /// Our account identity.
    pub identity: IdentityCode,
    /// The account's long-term client key.
    pub client_key: SecretKey,
    /// The chat server's long-term public key.
    pub server_key: PublicKey,
    /// This device's id, reported in the login extensions.
    pub device_id: u64,
    /// The device cookie, reported in the login extensions.
    pub device_cookie: [u8; 16],
    /// Client-info string.
    pub client_info: String,
}

/// Factory for chat-server sessions.
pub struct CspSession;

impl CspSession {
    /// Spawn the session task.
    ///
    /// `proxy_in` carries payloads of mediator proxy frames; everything
    /// the session emits on `proxy_out` must be wrapped into proxy
    /// frames by the caller. The 48-byte client hello is sent
    /// immediately.
    pub fn spawn(
        params: CspSessionParams,
        proxy_in: mpsc::Receiver<Vec<u8>>,
        proxy_out: mpsc::Sender<Vec<u8>>,
    ) -> (CspHandle, mpsc::Receiver<CspEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);

        let session = Session {
            params,
            proxy_in,
            proxy_out,
            cmd_rx,
            event_tx,
            reader: CspFrameReader::new(),
            state: State::Idle,
            pending: HashMap::new(),
        };
        tokio::spawn(session.run());

        (CspHandle { cmd_tx }, event_rx)
    }
}

struct TransportState {
    key: SymmetricKey,
    client_nonces: NonceSequence,
    server_nonces: NonceSequence,
}

enum State {
    Idle,
    AwaitingServerHello { handshake: ClientHandshake },
    AwaitingLoginAck { transport: TransportState },
    Ready { transport: TransportState },
    Closed,
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            State::Idle => Phase::Idle,
            State::AwaitingServerHello { .. } => Phase::AwaitingServerHello,
            State::AwaitingLoginAck { .. } => Phase::AwaitingLoginAck,
            State::Ready { .. } => Phase::Ready,
            State::Closed => Phase::Closed,
        }
    }
}

struct PendingAck {
    reply: oneshot::Sender<Result<()>>,
    deadline: Instant,
}

struct Session {
    params: CspSessionParams,
    proxy_in: mpsc::Receiver<Vec<u8>>,
    proxy_out: mpsc::Sender<Vec<u8>>,
    cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<CspEvent>,
    reader: CspFrameReader,
    state: State,
    pending: HashMap<(IdentityCode, u64), PendingAck>,
}

impl Session {
    async fn run(mut self) {
        let reason = match self.start().await {
            Ok(()) => self.main_loop().await,
            Err(e) => e.to_string(),
        };
        self.shutdown(reason).await;
    }

    async fn start(&mut self) -> Result<()> {
        let handshake = ClientHandshake::new();
        self.send_raw(handshake.hello_bytes().to_vec()).await?;
        self.state = State::AwaitingServerHello { handshake };
        Ok(())
    }

    async fn main_loop(&mut self) -> String {
        let mut sweep = tokio::time::interval(std::time::Duration::from_millis(500));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                bytes = self.proxy_in.recv() => match bytes {
                    Some(bytes) => {
                        self.reader.push(&bytes);
                        if let Err(e) = self.process_buffered().await {
                            break e.to_string();
                        }
                    }
                    None => break "proxy channel ended".to_string(),
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
        }
    }

    async fn shutdown(&mut self, reason: String) {
        info!(reason = %reason, "chat-server session down");
        self.state = State::Closed;
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(Error::SessionClosed(reason.clone())));
        }
        let _ = self.event_tx.send(CspEvent::Closed { reason }).await;
    }

    fn expire_pending(&mut self) {
        let now = Instant::now();
        let expired: Vec<(IdentityCode, u64)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            if let Some(pending) = self.pending.remove(&key) {
                warn!(receiver = %key.0, message_id = key.1, "outgoing message ack timed out");
                let _ = pending.reply.send(Err(Error::Timeout("outgoing message ack")));
            }
        }
    }

    async fn send_raw(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.proxy_out
            .send(bytes)
            .await
            .map_err(|_| Error::Transport("proxy channel closed".into()))
    }

    /// Drive the phase machine over whatever is buffered.
    async fn process_buffered(&mut self) -> Result<()> {
        loop {
            match std::mem::replace(&mut self.state, State::Closed) {
                State::AwaitingServerHello { handshake } => {
                    let Some(hello) = self.reader.take_raw(SERVER_HELLO_LEN) else {
                        self.state = State::AwaitingServerHello { handshake };
                        return Ok(());
                    };
                    let outcome =
                        process_server_hello(&handshake, &self.params.server_key, &hello)?;

                    let mut client_nonces = NonceSequence::new(handshake.cck);
                    let mut server_nonces = NonceSequence::new(outcome.sck);
                    // The server consumed its sequence 1 on the
                    // challenge box we just opened.
                    server_nonces.next()?;

                    let login = seal_login(
                        &outcome.transport_key,
                        &mut client_nonces,
                        &self.params.identity,
                        &self.params.client_key,
                        &self.params.server_key,
                        &outcome,
                        &handshake,
                        &self.params.client_info,
                        self.params.device_id,
                        &self.params.device_cookie,
                    )?;
                    self.send_raw(login).await?;

                    self.state = State::AwaitingLoginAck {
                        transport: TransportState {
                            key: outcome.transport_key,
                            client_nonces,
                            server_nonces,
                        },
                    };
                }
                State::AwaitingLoginAck { mut transport } => {
                    let Some(boxed) = self.reader.take_raw(32) else {
                        self.state = State::AwaitingLoginAck { transport };
                        return Ok(());
                    };
                    let nonce = transport.server_nonces.next()?;
                    let plain = xsalsa_open(&transport.key, &nonce, &boxed)
                        .map_err(|_| Error::Protocol("login rejected by chat server".into()))?;
                    let ack = parse_login_ack(&plain)?;

                    self.state = State::Ready { transport };
                    self.send_container(Container::new(CONTAINER_UNBLOCK_INCOMING, vec![]))
                        .await?;

                    info!(queued = ack.queued_messages, "chat-server login complete");
                    self.emit(CspEvent::Ready {
                        server_time: ack.server_time,
                        queued_messages: ack.queued_messages,
                    })
                    .await;
                }
                State::Ready { mut transport } => {
                    let Some(frame) = self.reader.try_read() else {
                        self.state = State::Ready { transport };
                        return Ok(());
                    };
                    // The sequence is consumed by the attempt; any
                    // mismatch or tampering is fatal to the session.
                    let nonce = transport.server_nonces.next()?;
                    let plain = xsalsa_open(&transport.key, &nonce, &frame)
                        .map_err(|_| Error::Protocol("chat-server frame authentication failed".into()))?;
                    let container = Container::decode(&plain)?;

                    self.state = State::Ready { transport };
                    self.handle_container(container).await?;
                }
                other => {
                    self.state = other;
                    return Ok(());
                }
            }
        }
    }

    async fn handle_container(&mut self, container: Container) -> Result<()> {
        match container.container_type {
            CONTAINER_ECHO_REQUEST => {
                self.send_container(Container::new(CONTAINER_ECHO_REPLY, container.data))
                    .await
            }
            CONTAINER_ECHO_REPLY => {
                self.emit(CspEvent::EchoReply(container.data)).await;
                Ok(())
            }
            CONTAINER_INCOMING_MESSAGE => {
                let frame = MessageFrame::decode(&container.data)?;
                if frame.flags & FLAG_NO_SERVER_ACK == 0 {
                    let mut ack = Vec::with_capacity(16);
                    ack.extend_from_slice(frame.sender.as_bytes());
                    ack.extend_from_slice(&frame.message_id.to_le_bytes());
                    self.send_container(Container::new(CONTAINER_INCOMING_MESSAGE_ACK, ack))
                        .await?;
                }
                self.emit(CspEvent::IncomingMessage(frame)).await;
                Ok(())
            }
            CONTAINER_OUTGOING_MESSAGE_ACK => {
                if container.data.len() < 16 {
                    return Err(Error::Protocol("short outgoing-message ack".into()));
                }
                let receiver = IdentityCode::from_wire(&container.data[..8])?;
                let message_id = u64::from_le_bytes(
                    container.data[8..16]
                        .try_into()
                        .map_err(|_| Error::Protocol("bad ack message id".into()))?,
                );
                match self.pending.remove(&(receiver, message_id)) {
                    Some(pending) => {
                        let _ = pending.reply.send(Ok(()));
                    }
                    None => {
                        warn!(receiver = %receiver, message_id, "ack for unknown outgoing message");
                    }
                }
                Ok(())
            }
            other => {
                debug!(container_type = other, "ignoring chat-server container");
                Ok(())
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::SendMessage { receiver, message_id, frame, reply } => {
                if self.state.phase() != Phase::Ready {
                    let _ = reply.send(Err(Error::SessionClosed(
                        "chat-server session not ready".into(),
                    )));
                    return Ok(());
                }
                self.pending.insert(
                    (receiver, message_id),
                    PendingAck {
                        reply,
                        deadline: Instant::now() + OUTGOING_ACK_TIMEOUT,
                    },
                );
                self.send_container(Container::new(CONTAINER_OUTGOING_MESSAGE, frame))
                    .await
            }
            Command::SendContainer { container_type, data, reply } => {
                if self.state.phase() != Phase::Ready {
                    let _ = reply.send(Err(Error::SessionClosed(
                        "chat-server session not ready".into(),
                    )));
                    return Ok(());
                }
                let result = self
                    .send_container(Container::new(container_type, data))
                    .await;
                let failed = result.is_err();
                let _ = reply.send(result);
                if failed {
                    return Err(Error::Transport("proxy channel closed".into()));
                }
                Ok(())
            }
            Command::Close => Ok(()),
        }
    }

    async fn send_container(&mut self, container: Container) -> Result<()> {
        let State::Ready { transport } = &mut self.state else {
            return Err(Error::SessionClosed("chat-server session not ready".into()));
        };
        let nonce = transport.client_nonces.next()?;
        let boxed = xsalsa_seal(&transport.key, &nonce, &container.encode())?;
        let framed = encode_csp_frame(&boxed)?;
        self.send_raw(framed).await
    }

    async fn emit(&self, event: CspEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("chat-server event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::precompute;

    /// A scripted chat server driving the session through channels.
    struct ScriptedServer {
        secret: SecretKey,
        sck: [u8; 16],
        transport: Option<SymmetricKey>,
        send_seq: u64,
        recv_seq: u64,
        tck_public: Option<PublicKey>,
        cck: Option<[u8; 16]>,
    }

    impl ScriptedServer {
        fn new() -> Self {
            Self {
                secret: SecretKey::generate(),
                sck: [7u8; 16],
                transport: None,
                send_seq: 1,
                recv_seq: 1,
                tck_public: None,
                cck: None,
            }
        }

        fn nonce(cookie: &[u8; 16], seq: u64) -> [u8; 24] {
            let mut nonce = [0u8; 24];
            nonce[..16].copy_from_slice(cookie);
            nonce[16..].copy_from_slice(&seq.to_le_bytes());
            nonce
        }

        /// Consume the 48-byte client hello, produce the 80-byte reply.
        fn answer_hello(&mut self, hello: &[u8]) -> Vec<u8> {
            assert_eq!(hello.len(), 48);
            let tck_public = PublicKey::from_slice(&hello[..32]).expect("tck");
            let mut cck = [0u8; 16];
            cck.copy_from_slice(&hello[32..]);

            let tsk = SecretKey::generate();
            let auth_key = precompute(&self.secret, &tck_public);

            let mut plain = [0u8; 48];
            plain[..32].copy_from_slice(tsk.public_key().as_bytes());
            plain[32..].copy_from_slice(&cck);

            let nonce = Self::nonce(&self.sck, self.send_seq);
            self.send_seq += 1;
            let boxed = xsalsa_seal(&auth_key, &nonce, &plain).expect("seal");

            self.transport = Some(precompute(&tsk, &tck_public));
            self.tck_public = Some(tck_public);
            self.cck = Some(cck);

            let mut out = Vec::with_capacity(80);
            out.extend_from_slice(&self.sck);
            out.extend_from_slice(&boxed);
            out
        }

        /// Open the two login boxes; returns (loginData, extensions).
        fn open_login(&mut self, login: &[u8]) -> (Vec<u8>, Vec<u8>) {
            let transport = self.transport.as_ref().expect("transport");
            let cck = self.cck.expect("cck");

            let login_box = &login[..128 + 16];
            let data = xsalsa_open(transport, &Self::nonce(&cck, self.recv_seq), login_box)
                .expect("login box");
            self.recv_seq += 1;

            let ext_len =
                u16::from_le_bytes([data[38], data[39]]) as usize;
            assert_eq!(login.len(), 144 + ext_len);
            let extensions = xsalsa_open(
                transport,
                &Self::nonce(&cck, self.recv_seq),
                &login[144..],
            )
            .expect("extensions box");
            self.recv_seq += 1;

            (data.to_vec(), extensions.to_vec())
        }

        /// Produce the 32-byte login acknowledgement box.
        fn login_ack(&mut self, queued: u32) -> Vec<u8> {
            let transport = self.transport.as_ref().expect("transport");
            let mut plain = [0u8; 16];
            plain[4..12].copy_from_slice(&1_700_000_000u64.to_le_bytes());
            plain[12..16].copy_from_slice(&queued.to_le_bytes());

            let nonce = Self::nonce(&self.sck, self.send_seq);
            self.send_seq += 1;
            xsalsa_seal(transport, &nonce, &plain).expect("seal")
        }

        /// Open a framed container from the client.
        fn open_container(&mut self, framed: &[u8]) -> Container {
            let transport = self.transport.as_ref().expect("transport");
            let cck = self.cck.expect("cck");

            let len = u16::from_le_bytes([framed[0], framed[1]]) as usize;
            assert_eq!(framed.len(), 2 + len);
            let plain = xsalsa_open(transport, &Self::nonce(&cck, self.recv_seq), &framed[2..])
                .expect("container box");
            self.recv_seq += 1;
            Container::decode(&plain).expect("container")
        }

        /// Frame and seal a container for the client.
        fn seal_container(&mut self, container: Container) -> Vec<u8> {
            let transport = self.transport.as_ref().expect("transport");
            let nonce = Self::nonce(&self.sck, self.send_seq);
            self.send_seq += 1;
            let boxed = xsalsa_seal(transport, &nonce, &container.encode()).expect("seal");
            encode_csp_frame(&boxed).expect("frame")
        }
    }

    async fn handshake_session() -> (
        ScriptedServer,
        CspHandle,
        mpsc::Receiver<CspEvent>,
        mpsc::Sender<Vec<u8>>,
        mpsc::Receiver<Vec<u8>>,
    ) {
        let mut server = ScriptedServer::new();
        let params = CspSessionParams {
            identity: IdentityCode::parse("ECHOECHO").expect("valid"),
            client_key: SecretKey::generate(),
            server_key: server.secret.public_key(),
            device_id: 0xD00D,
            device_cookie: [0xAB; 16],
            client_info: "trilink-test/1.0".into(),
        };

        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (handle, mut events) = CspSession::spawn(params, in_rx, out_tx);

        // Client hello.
        let hello = out_rx.recv().await.expect("hello");
        let reply = server.answer_hello(&hello);
        in_tx.send(reply).await.expect("send");

        // Login boxes.
        let login = out_rx.recv().await.expect("login");
        let (login_data, extensions) = server.open_login(&login);
        assert_eq!(&login_data[..8], b"ECHOECHO");
        assert_eq!(&login_data[8..38], crate::protocol::CSP_EXTENSION_MAGIC);
        assert!(!extensions.is_empty());

        // Login ack → Ready → UnblockIncomingMessages.
        in_tx.send(server.login_ack(3)).await.expect("send");
        let unblock = out_rx.recv().await.expect("unblock");
        let container = server.open_container(&unblock);
        assert_eq!(container.container_type, CONTAINER_UNBLOCK_INCOMING);
        assert!(container.data.is_empty());

        match events.recv().await.expect("event") {
            CspEvent::Ready { queued_messages, .. } => assert_eq!(queued_messages, 3),
            other => panic!("expected Ready, got {other:?}"),
        }

        (server, handle, events, in_tx, out_rx)
    }

    #[tokio::test]
    async fn test_scripted_handshake_reaches_ready_with_sequences_at_3() {
        let (server, _handle, _events, _in_tx, _out_rx) = handshake_session().await;
        // Client consumed nonces 1 and 2 (login + extensions), the
        // unblock container used 3; the server consumed 1 (challenge
        // box) and 2 (login ack). Both sides now sit at sequence 3+.
        assert_eq!(server.recv_seq, 4); // server saw client nonces 1..3
        assert_eq!(server.send_seq, 3);
    }

    #[tokio::test]
    async fn test_outgoing_message_ack_resolution() {
        let (mut server, handle, _events, in_tx, mut out_rx) = handshake_session().await;
        let receiver = IdentityCode::parse("PEER0000").expect("valid");

        let send = tokio::spawn({
            let handle = handle.clone();
            async move { handle.send_message(receiver, 77, vec![0xFE; 32]).await }
        });

        let framed = out_rx.recv().await.expect("outgoing");
        let container = server.open_container(&framed);
        assert_eq!(container.container_type, CONTAINER_OUTGOING_MESSAGE);

        // Acknowledge it.
        let mut ack = Vec::new();
        ack.extend_from_slice(receiver.as_bytes());
        ack.extend_from_slice(&77u64.to_le_bytes());
        let ack_frame = server.seal_container(Container::new(CONTAINER_OUTGOING_MESSAGE_ACK, ack));
        in_tx.send(ack_frame).await.expect("send");

        send.await.expect("join").expect("acked");
    }

    #[tokio::test]
    async fn test_incoming_message_is_acked_and_surfaced() {
        let (mut server, _handle, mut events, in_tx, mut out_rx) = handshake_session().await;

        let sender = IdentityCode::parse("PEER0000").expect("valid");
        let receiver = IdentityCode::parse("ECHOECHO").expect("valid");
        let message = MessageFrame {
            sender,
            receiver,
            message_id: 555,
            created_at: 1_700_000_000,
            flags: 0,
            legacy_nickname: [0u8; 32],
            encrypted_metadata: vec![],
            nonce: [9u8; 24],
            encrypted_body: vec![0xBB; 48],
        };
        let frame = server.seal_container(Container::new(
            CONTAINER_INCOMING_MESSAGE,
            message.encode().expect("encode"),
        ));
        in_tx.send(frame).await.expect("send");

        // Transport-level ack first.
        let ack_frame = out_rx.recv().await.expect("ack");
        let ack = server.open_container(&ack_frame);
        assert_eq!(ack.container_type, CONTAINER_INCOMING_MESSAGE_ACK);
        assert_eq!(&ack.data[..8], sender.as_bytes());
        assert_eq!(u64::from_le_bytes(ack.data[8..16].try_into().expect("8")), 555);

        match events.recv().await.expect("event") {
            CspEvent::IncomingMessage(received) => assert_eq!(received.message_id, 555),
            other => panic!("expected IncomingMessage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_incoming_no_ack_flag_suppresses_transport_ack() {
        let (mut server, handle, mut events, in_tx, mut out_rx) = handshake_session().await;

        let message = MessageFrame {
            sender: IdentityCode::parse("PEER0000").expect("valid"),
            receiver: IdentityCode::parse("ECHOECHO").expect("valid"),
            message_id: 556,
            created_at: 1_700_000_000,
            flags: FLAG_NO_SERVER_ACK,
            legacy_nickname: [0u8; 32],
            encrypted_metadata: vec![],
            nonce: [9u8; 24],
            encrypted_body: vec![0xBB; 48],
        };
        let frame = server.seal_container(Container::new(
            CONTAINER_INCOMING_MESSAGE,
            message.encode().expect("encode"),
        ));
        in_tx.send(frame).await.expect("send");

        match events.recv().await.expect("event") {
            CspEvent::IncomingMessage(received) => assert_eq!(received.message_id, 556),
            other => panic!("expected IncomingMessage, got {other:?}"),
        }

        // Send an echo to flush; the next outbound frame must be the
        // echo request, not an ack.
        handle.echo(b"ping".to_vec()).await.expect("echo");
        let next = out_rx.recv().await.expect("frame");
        let container = server.open_container(&next);
        assert_eq!(container.container_type, CONTAINER_ECHO_REQUEST);
    }

    #[tokio::test]
    async fn test_echo_request_is_auto_answered() {
        let (mut server, _handle, _events, in_tx, mut out_rx) = handshake_session().await;

        let frame = server.seal_container(Container::new(CONTAINER_ECHO_REQUEST, b"marco".to_vec()));
        in_tx.send(frame).await.expect("send");

        let reply_frame = out_rx.recv().await.expect("reply");
        let reply = server.open_container(&reply_frame);
        assert_eq!(reply.container_type, CONTAINER_ECHO_REPLY);
        assert_eq!(reply.data, b"marco");
    }

    #[tokio::test]
    async fn test_close_rejects_pending_sends() {
        let (mut server, handle, _events, in_tx, mut out_rx) = handshake_session().await;
        let receiver = IdentityCode::parse("PEER0000").expect("valid");

        let send = tokio::spawn({
            let handle = handle.clone();
            async move { handle.send_message(receiver, 78, vec![0xFE; 32]).await }
        });

        let framed = out_rx.recv().await.expect("outgoing");
        let _ = server.open_container(&framed);

        drop(in_tx); // proxy stream ends, session tears down
        let result = send.await.expect("join");
        assert!(matches!(result, Err(Error::SessionClosed(_))));
    }
}
