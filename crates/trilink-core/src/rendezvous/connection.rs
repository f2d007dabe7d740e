//! The rendezvous relay connection and its handshake state machine.
//!
//! Initiator role. States: `AwaitingHello` → `AwaitingAuth` →
//! `AwaitingNominate` → `Nominated`. Any decrypt failure or unexpected
//! frame terminates the session; rendezvous sessions are single-use.

use super::cipher::PathCipher;
use super::{RendezvousSetup, PATH_ID};
use crate::crypto::{derive_key, precompute, PublicKey, SecretKey};
use crate::error::{Error, Result};
use crate::protocol::frames::{encode_relay_frame, RelayFrameReader};
use crate::protocol::join::{
    RendezvousAuth, RendezvousAuthHello, RendezvousHello, RendezvousNominate,
};
use crate::protocol::RENDEZVOUS_PERSONAL;
use futures_util::{SinkExt, StreamExt};
use prost::Message as _;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use zeroize::Zeroizing;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Length of the handshake challenges.
const CHALLENGE_LEN: usize = 16;

/// A nominated rendezvous path carrying user-level payloads.
pub struct RendezvousConnection {
    ws: WsStream,
    reader: RelayFrameReader,
    cipher: PathCipher,
    rph: [u8; 32],
}

impl RendezvousConnection {
    /// Connect to the relay and run the initiator handshake to the
    /// nominated (data) phase.
    pub async fn establish(setup: &RendezvousSetup) -> Result<Self> {
        let (ws, _) = connect_async(setup.relay_url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("relay connect failed: {e}")))?;
        debug!(url = %setup.relay_url, "rendezvous relay connected");

        let ridak = derive_key(setup.ak.as_bytes(), b"rida", RENDEZVOUS_PERSONAL, &[])?;
        let rrdak = derive_key(setup.ak.as_bytes(), b"rrda", RENDEZVOUS_PERSONAL, &[])?;

        let mut conn = Self {
            ws,
            reader: RelayFrameReader::new(),
            cipher: PathCipher::new(PATH_ID, ridak, rrdak),
            rph: [0u8; 32],
        };

        // AwaitingHello: the peer opens with its challenge and ephemeral
        // transport key, under the authentication keys.
        let hello_plain = conn.recv_decrypted().await?;
        let hello = RendezvousHello::decode(&hello_plain[..])
            .map_err(|e| Error::Protocol(format!("bad rendezvous hello: {e}")))?;
        if hello.challenge.len() != CHALLENGE_LEN {
            return Err(Error::Protocol("bad rendezvous challenge length".into()));
        }
        let peer_etk = PublicKey::from_slice(&hello.etk)
            .map_err(|_| Error::Protocol("bad rendezvous transport key".into()))?;

        // Reply: echo the peer challenge, add our own, and our ephemeral.
        let ephemeral = SecretKey::generate();
        let our_challenge: [u8; CHALLENGE_LEN] = crate::crypto::random_bytes();
        let auth_hello = RendezvousAuthHello {
            response: hello.challenge,
            challenge: our_challenge.to_vec(),
            etk: ephemeral.public_key().as_bytes().to_vec(),
        };
        conn.send_encrypted(&auth_hello.encode_to_vec()).await?;

        // Shared transport key schedule.
        let shared_etk = precompute(&ephemeral, &peer_etk);
        let mut stk_input = Zeroizing::new(Vec::with_capacity(64));
        stk_input.extend_from_slice(setup.ak.as_bytes());
        stk_input.extend_from_slice(shared_etk.as_bytes());
        let stk = derive_key(&stk_input, b"st", RENDEZVOUS_PERSONAL, &[])?;
        let ridtk = derive_key(stk.as_bytes(), b"ridt", RENDEZVOUS_PERSONAL, &[])?;
        let rrdtk = derive_key(stk.as_bytes(), b"rrdt", RENDEZVOUS_PERSONAL, &[])?;
        let rph = derive_key(&[], b"ph", RENDEZVOUS_PERSONAL, stk.as_bytes())?;
        conn.rph.copy_from_slice(rph.as_bytes());

        // AwaitingAuth: still under the authentication keys; the peer
        // must echo our challenge.
        let auth_plain = conn.recv_decrypted().await?;
        let auth = RendezvousAuth::decode(&auth_plain[..])
            .map_err(|e| Error::Protocol(format!("bad rendezvous auth: {e}")))?;
        if auth.response != our_challenge {
            return Err(Error::Protocol("rendezvous challenge mismatch".into()));
        }

        // Upgrade to transport keys, preserving sequence numbers.
        conn.cipher.swap_keys(ridtk, rrdtk);

        // AwaitingNominate: a successful transport-key decode promotes
        // the path to the data phase.
        let nominate_plain = conn.recv_decrypted().await?;
        RendezvousNominate::decode(&nominate_plain[..])
            .map_err(|e| Error::Protocol(format!("bad nominate frame: {e}")))?;

        debug!("rendezvous path nominated");
        Ok(conn)
    }

    /// The 32-byte rendezvous path hash, shown to the user as a
    /// verification sequence for out-of-band comparison.
    pub fn verification_hash(&self) -> &[u8; 32] {
        &self.rph
    }

    /// Receive and decrypt the next user-level payload.
    pub async fn recv(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        self.recv_decrypted().await
    }

    /// Encrypt and send a user-level payload.
    pub async fn send(&mut self, plaintext: &[u8]) -> Result<()> {
        self.send_encrypted(plaintext).await
    }

    /// Close the relay socket. Rendezvous sessions close on success.
    pub async fn close(mut self) -> Result<()> {
        self.ws
            .close(None)
            .await
            .map_err(|e| Error::Transport(format!("relay close failed: {e}")))
    }

    async fn next_frame(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(frame) = self.reader.try_read()? {
                return Ok(frame);
            }
            match self.ws.next().await {
                Some(Ok(WsMessage::Binary(data))) => self.reader.push(&data),
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(frame))) => {
                    return Err(Error::Transport(format!("relay closed: {frame:?}")));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(Error::Transport(format!("relay read failed: {e}"))),
                None => return Err(Error::Transport("relay stream ended".into())),
            }
        }
    }

    async fn recv_decrypted(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        let frame = self.next_frame().await?;
        // Decrypt failures are fatal here; the caller drops the session.
        self.cipher.decrypt(&frame)
    }

    async fn send_encrypted(&mut self, plaintext: &[u8]) -> Result<()> {
        let ciphertext = self.cipher.encrypt(plaintext)?;
        let framed = encode_relay_frame(&ciphertext)?;
        self.ws
            .send(WsMessage::Binary(framed))
            .await
            .map_err(|e| Error::Transport(format!("relay send failed: {e}")))
    }
}
