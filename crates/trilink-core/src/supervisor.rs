//! The supervisor: session lifecycle, reconnect, and readiness waiters.
//!
//! Owns the mediator session, starts the nested chat-server session on
//! leader promotion, binds the message engine once both are ready, and
//! reconnects with a fixed backoff after any unexpected close. Teardown
//! releases every pending acknowledgement through the session tasks.

use crate::config::Config;
use crate::csp::{CspEvent, CspHandle, CspSession, CspSessionParams};
use crate::crypto::PublicKey;
use crate::directory::{ContactDirectory, PublicKeyLookup};
use crate::error::{Error, Result};
use crate::identity::AccountIdentity;
use crate::mediator::{
    mediator_url, MediatorConnectParams, MediatorConnection, MediatorEvent, MediatorHandle,
};
use crate::messaging::dedupe::DedupeStore;
use crate::messaging::engine::{InboundMessage, MessageEngine};
use crate::protocol::d2d::Envelope;
use crate::protocol::CHAT_SERVER_PUBLIC_KEY;
use crate::storage::DataDir;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Application-level events surfaced by the supervisor.
#[derive(Debug)]
pub enum HostEvent {
    /// The mediator session authenticated.
    MediatorReady,
    /// This device was promoted to leader.
    Leader,
    /// The chat-server session is ready.
    CspReady {
        /// Messages queued on the server at login.
        queued_messages: u32,
    },
    /// A parsed inbound chat-server message.
    Inbound(InboundMessage),
    /// A fresh reflected envelope from a device-group peer.
    Reflected(Envelope),
    /// The stack disconnected; a reconnect follows unless shut down.
    Disconnected {
        /// Human-readable reason.
        reason: String,
    },
}

/// Connection readiness snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkState {
    /// Mediator handshake completed.
    pub mediator_ready: bool,
    /// This device currently holds the leader role.
    pub leader: bool,
    /// The chat-server session is logged in.
    pub csp_ready: bool,
}

/// Handle onto a running supervisor.
pub struct Supervisor {
    state_rx: watch::Receiver<LinkState>,
    engine_rx: watch::Receiver<Option<MessageEngine>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    /// Start the supervisor.
    ///
    /// Allocates the device id on first use and persists it, then runs
    /// the connect loop until [`Supervisor::shutdown`].
    pub fn start(
        config: Config,
        mut account: AccountIdentity,
        resolver: Option<Box<dyn PublicKeyLookup>>,
    ) -> Result<(Self, mpsc::Receiver<HostEvent>)> {
        let data_dir = DataDir::new(&config.data_dir);
        data_dir.ensure_layout()?;

        let first_connect = account.device_id.is_none();
        account.ensure_device_id();
        if first_connect {
            account.save(&data_dir.identity_path())?;
        }
        // Fail early if the key schedule cannot be derived.
        account.device_group_keys()?;

        let directory = Arc::new(ContactDirectory::open(data_dir.clone(), resolver)?);

        let (state_tx, state_rx) = watch::channel(LinkState::default());
        let (engine_tx, engine_rx) = watch::channel(None);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = Runner {
            config,
            account,
            data_dir,
            directory,
            first_connect,
            state_tx,
            engine_tx,
            event_tx,
            shutdown_rx,
        };
        tokio::spawn(runner.run());

        Ok((
            Self {
                state_rx,
                engine_rx,
                shutdown_tx,
            },
            event_rx,
        ))
    }

    /// The current readiness snapshot.
    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    /// The bound message engine, once leader and chat-server are up.
    pub fn engine(&self) -> Option<MessageEngine> {
        self.engine_rx.borrow().clone()
    }

    /// Wait until this device is leader with a ready chat-server
    /// session.
    pub async fn wait_for_leader_and_csp(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.state_rx.clone();
        tokio::time::timeout(timeout, rx.wait_for(|s| s.leader && s.csp_ready))
            .await
            .map_err(|_| Error::Timeout("leader and chat-server readiness"))?
            .map_err(|_| Error::SessionClosed("supervisor stopped".into()))?;
        Ok(())
    }

    /// Wait until the chat-server session is ready.
    pub async fn wait_for_csp_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.state_rx.clone();
        tokio::time::timeout(timeout, rx.wait_for(|s| s.csp_ready))
            .await
            .map_err(|_| Error::Timeout("chat-server readiness"))?
            .map_err(|_| Error::SessionClosed("supervisor stopped".into()))?;
        Ok(())
    }

    /// Stop the connect loop and tear down the sessions.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

struct CspRuntime {
    handle: CspHandle,
    events: mpsc::Receiver<CspEvent>,
    proxy_in: mpsc::Sender<Vec<u8>>,
    forward: JoinHandle<()>,
}

struct Runner {
    config: Config,
    account: AccountIdentity,
    data_dir: DataDir,
    directory: Arc<ContactDirectory>,
    first_connect: bool,
    state_tx: watch::Sender<LinkState>,
    engine_tx: watch::Sender<Option<MessageEngine>>,
    event_tx: mpsc::Sender<HostEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

async fn next_csp_event(csp: &mut Option<CspRuntime>) -> Option<CspEvent> {
    match csp {
        Some(runtime) => runtime.events.recv().await,
        None => std::future::pending().await,
    }
}

impl Runner {
    async fn run(mut self) {
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        let mut expect_new_slot = self.first_connect;

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let reason = self.run_once(&mut expect_new_slot).await;
            let _ = self.state_tx.send(LinkState::default());
            let _ = self.engine_tx.send(None);
            let _ = self
                .event_tx
                .send(HostEvent::Disconnected { reason: reason.clone() })
                .await;

            if *self.shutdown_rx.borrow() {
                break;
            }
            info!(reason = %reason, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown_rx.changed() => {}
            }
        }
        info!("supervisor stopped");
    }

    /// One full connect → serve → close cycle. Returns the close reason.
    async fn run_once(&mut self, expect_new_slot: &mut bool) -> String {
        let keys = match self.account.device_group_keys() {
            Ok(keys) => keys,
            Err(e) => return format!("key schedule failed: {e}"),
        };
        let device_id = match self.account.device_id {
            Some(id) => id,
            None => return "device id missing".to_string(),
        };

        let dedupe = Arc::new(Mutex::new(DedupeStore::load(&self.data_dir.dedupe_path())));
        let url = mediator_url(&self.config.mediator_host, &keys.dgpk_public);

        let params = MediatorConnectParams {
            url,
            identity: self.account.identity,
            device_id,
            expect_new_slot: *expect_new_slot,
            device_label: self.config.device_label.clone(),
            platform_details: self.config.platform_details.clone(),
        };
        let (mediator, mut mediator_events) =
            match MediatorConnection::connect(params, keys, dedupe.clone()).await {
                Ok(connected) => connected,
                Err(e) => return e.to_string(),
            };

        let mut state = LinkState::default();
        let mut csp: Option<CspRuntime> = None;
        let mut engine: Option<MessageEngine> = None;

        let reason = loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        break "shutdown requested".to_string();
                    }
                }
                event = mediator_events.recv() => match event {
                    None => break "mediator event stream ended".to_string(),
                    Some(MediatorEvent::Closed { reason }) => break reason,
                    Some(MediatorEvent::Ready { .. }) => {
                        *expect_new_slot = false;
                        state.mediator_ready = true;
                        let _ = self.state_tx.send(state);
                        self.emit(HostEvent::MediatorReady).await;
                    }
                    Some(MediatorEvent::PromotedToLeader) => {
                        state.leader = true;
                        let _ = self.state_tx.send(state);
                        self.emit(HostEvent::Leader).await;
                        if csp.is_none() {
                            csp = Some(self.start_csp(&mediator, device_id));
                        }
                    }
                    Some(MediatorEvent::Proxy(bytes)) => {
                        if let Some(runtime) = &csp {
                            if runtime.proxy_in.send(bytes).await.is_err() {
                                break "chat-server session gone".to_string();
                            }
                        } else {
                            debug!("proxy bytes without a chat-server session");
                        }
                    }
                    Some(MediatorEvent::Reflected { envelope, .. }) => {
                        self.emit(HostEvent::Reflected(envelope)).await;
                    }
                    Some(MediatorEvent::ReflectionQueueDry) => {
                        debug!("reflection queue dry");
                    }
                    Some(MediatorEvent::Transaction(event)) => {
                        debug!(?event, "transaction observation");
                    }
                },
                event = next_csp_event(&mut csp) => match event {
                    None => break "chat-server event stream ended".to_string(),
                    Some(CspEvent::Closed { reason }) => {
                        // Leader-loss or server close: rebuild the whole
                        // stack for a clean re-election.
                        break format!("chat-server session closed: {reason}");
                    }
                    Some(CspEvent::Ready { queued_messages, .. }) => {
                        state.csp_ready = true;
                        let _ = self.state_tx.send(state);

                        if let Some(runtime) = &csp {
                            let bound = MessageEngine::new(
                                self.account.identity,
                                self.account.client_key.clone(),
                                self.config.nickname.clone(),
                                device_id,
                                self.directory.clone(),
                                dedupe.clone(),
                                mediator.clone(),
                                runtime.handle.clone(),
                            );
                            let _ = self.engine_tx.send(Some(bound.clone()));
                            engine = Some(bound);
                        }
                        self.emit(HostEvent::CspReady { queued_messages }).await;
                    }
                    Some(CspEvent::IncomingMessage(frame)) => {
                        if let Some(engine) = &engine {
                            let engine = engine.clone();
                            let event_tx = self.event_tx.clone();
                            tokio::spawn(async move {
                                match engine.handle_incoming(frame).await {
                                    Ok(Some(inbound)) => {
                                        let _ = event_tx.send(HostEvent::Inbound(inbound)).await;
                                    }
                                    Ok(None) => {}
                                    Err(e) => warn!(error = %e, "dropping inbound message"),
                                }
                            });
                        }
                    }
                    Some(CspEvent::EchoReply(payload)) => {
                        debug!(bytes = payload.len(), "echo reply");
                    }
                },
            }
        };

        if let Some(runtime) = csp.take() {
            runtime.handle.close().await;
            runtime.forward.abort();
        }
        mediator.close().await;
        reason
    }

    fn start_csp(&self, mediator: &MediatorHandle, device_id: u64) -> CspRuntime {
        let (proxy_in_tx, proxy_in_rx) = mpsc::channel(256);
        let (proxy_out_tx, mut proxy_out_rx) = mpsc::channel::<Vec<u8>>(256);

        let params = CspSessionParams {
            identity: self.account.identity,
            client_key: self.account.client_key.clone(),
            server_key: PublicKey::from_bytes(CHAT_SERVER_PUBLIC_KEY),
            device_id,
            device_cookie: self.account.device_cookie,
            client_info: self.config.client_info.clone(),
        };
        let (handle, events) = CspSession::spawn(params, proxy_in_rx, proxy_out_tx);

        // Bridge session output into mediator proxy frames.
        let mediator = mediator.clone();
        let forward = tokio::spawn(async move {
            while let Some(bytes) = proxy_out_rx.recv().await {
                if mediator.send_proxy(bytes).await.is_err() {
                    break;
                }
            }
        });

        CspRuntime {
            handle,
            events,
            proxy_in: proxy_in_tx,
            forward,
        }
    }

    async fn emit(&self, event: HostEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("host event receiver dropped");
        }
    }
}
