//! Chat-server handshake primitives.
//!
//! The handshake exchanges raw (unframed) byte blocks:
//!
//! 1. Client hello: `tckPublic(32) || cck(16)` — 48 bytes, no AEAD.
//! 2. Server hello: `sck(16) || box(tskPublic ‖ cckEcho)` — 80 bytes.
//! 3. Login: `box(loginData(128)) || box(extensions)`.
//! 4. Login ack: `box(16 bytes)` — 32 bytes.

use crate::crypto::{precompute, xsalsa_open, xsalsa_seal, PublicKey, SecretKey, SymmetricKey};
use crate::error::{Error, Result};
use crate::identity::IdentityCode;
use crate::protocol::{CSP_EXTENSION_MAGIC, CSP_PERSONAL};

/// Length of the raw client hello.
pub const CLIENT_HELLO_LEN: usize = 48;

/// Length of the raw server hello.
pub const SERVER_HELLO_LEN: usize = 80;

/// Length of the login data plaintext.
pub const LOGIN_DATA_LEN: usize = 128;

/// Length of the login acknowledgement plaintext.
pub const LOGIN_ACK_LEN: usize = 16;

/// Extension entry: client-info string.
const EXTENSION_CLIENT_INFO: u8 = 0x00;

/// Extension entry: CSP device id.
const EXTENSION_CSP_DEVICE_ID: u8 = 0x01;

/// Extension entry: supported payload version.
const EXTENSION_PAYLOAD_VERSION: u8 = 0x02;

/// Extension entry: device cookie.
const EXTENSION_DEVICE_COOKIE: u8 = 0x03;

/// Ephemeral client state for one handshake attempt.
pub struct ClientHandshake {
    /// Ephemeral client secret.
    pub tck_secret: SecretKey,
    /// Ephemeral client public key.
    pub tck_public: PublicKey,
    /// The 16-byte client cookie.
    pub cck: [u8; 16],
}

impl ClientHandshake {
    /// Generate fresh ephemeral material.
    pub fn new() -> Self {
        let tck_secret = SecretKey::generate();
        let tck_public = tck_secret.public_key();
        Self {
            tck_secret,
            tck_public,
            cck: crate::crypto::random_bytes(),
        }
    }

    /// The raw 48-byte client hello: `tckPublic || cck`.
    pub fn hello_bytes(&self) -> [u8; CLIENT_HELLO_LEN] {
        let mut out = [0u8; CLIENT_HELLO_LEN];
        out[..32].copy_from_slice(self.tck_public.as_bytes());
        out[32..].copy_from_slice(&self.cck);
        out
    }
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

/// What a processed server hello yields.
pub struct ServerHelloOutcome {
    /// The server cookie.
    pub sck: [u8; 16],
    /// The server's ephemeral session public key.
    pub tsk_public: PublicKey,
    /// The session transport key.
    pub transport_key: SymmetricKey,
}

/// Process the 80-byte server hello.
///
/// The 64-byte box decrypts under `precompute(tckSecret, serverKey)`
/// with nonce `sck || 1`, and must echo our cookie. Both cookies equal
/// is a reflection attack and is rejected.
pub fn process_server_hello(
    handshake: &ClientHandshake,
    server_key: &PublicKey,
    data: &[u8],
) -> Result<ServerHelloOutcome> {
    if data.len() != SERVER_HELLO_LEN {
        return Err(Error::Protocol(format!("server hello must be 80 bytes, got {}", data.len())));
    }

    let mut sck = [0u8; 16];
    sck.copy_from_slice(&data[..16]);
    if sck == handshake.cck {
        return Err(Error::Protocol("server echoed our cookie as its own".into()));
    }

    let auth_key = precompute(&handshake.tck_secret, server_key);
    let mut nonce = [0u8; 24];
    nonce[..16].copy_from_slice(&sck);
    nonce[16..].copy_from_slice(&1u64.to_le_bytes());

    let plain = xsalsa_open(&auth_key, &nonce, &data[16..])
        .map_err(|_| Error::Protocol("server hello authentication failed".into()))?;
    if plain.len() != 48 {
        return Err(Error::Protocol("bad server hello plaintext length".into()));
    }
    if plain[32..] != handshake.cck {
        return Err(Error::Protocol("server failed to echo client cookie".into()));
    }

    let tsk_public = PublicKey::from_slice(&plain[..32])
        .map_err(|_| Error::Protocol("bad server session key".into()))?;
    let transport_key = precompute(&handshake.tck_secret, &tsk_public);

    Ok(ServerHelloOutcome {
        sck,
        tsk_public,
        transport_key,
    })
}

/// Derive the login vouch.
///
/// `vouchKey = kdf(key = ss1 ‖ ss2, salt = "v2", personal = "3ma-csp")`
/// with `ss1 = precompute(clientKey, serverKey)` and
/// `ss2 = precompute(clientKey, tskPublic)`; the vouch MACs
/// `sck ‖ tckPublic` under that key.
pub fn derive_vouch(
    client_key: &SecretKey,
    server_key: &PublicKey,
    tsk_public: &PublicKey,
    sck: &[u8; 16],
    tck_public: &PublicKey,
) -> Result<[u8; 32]> {
    let ss1 = precompute(client_key, server_key);
    let ss2 = precompute(client_key, tsk_public);

    let mut vouch_key_input = zeroize::Zeroizing::new([0u8; 64]);
    vouch_key_input[..32].copy_from_slice(ss1.as_bytes());
    vouch_key_input[32..].copy_from_slice(ss2.as_bytes());
    let vouch_key = crate::crypto::derive_key(&vouch_key_input[..], b"v2", CSP_PERSONAL, &[])?;

    let mut vouched = [0u8; 48];
    vouched[..16].copy_from_slice(sck);
    vouched[16..].copy_from_slice(tck_public.as_bytes());
    let vouch = crate::crypto::derive_key(vouch_key.as_bytes(), b"v2", CSP_PERSONAL, &vouched)?;

    Ok(*vouch.as_bytes())
}

/// Assemble the 128-byte login data plaintext.
///
/// Layout: `identity(8) @ 0 | extensionMagic(30) @ 8 |
/// extensionsBoxLen(u16LE) @ 38 | sck(16) @ 40 | vouch(32) @ 80`;
/// all other bytes zero.
pub fn build_login_data(
    identity: &IdentityCode,
    sck: &[u8; 16],
    vouch: &[u8; 32],
    extensions_box_len: u16,
) -> [u8; LOGIN_DATA_LEN] {
    let mut out = [0u8; LOGIN_DATA_LEN];
    out[..8].copy_from_slice(identity.as_bytes());
    out[8..38].copy_from_slice(CSP_EXTENSION_MAGIC);
    out[38..40].copy_from_slice(&extensions_box_len.to_le_bytes());
    out[40..56].copy_from_slice(sck);
    out[80..112].copy_from_slice(vouch);
    out
}

/// Assemble the extensions plaintext: `(type:u8, length:u16LE, payload)`
/// entries for client info, CSP device id, payload version, and the
/// device cookie.
pub fn build_extensions(client_info: &str, device_id: u64, device_cookie: &[u8; 16]) -> Vec<u8> {
    fn push_entry(out: &mut Vec<u8>, entry_type: u8, payload: &[u8]) {
        out.push(entry_type);
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
    }

    let mut out = Vec::new();
    push_entry(&mut out, EXTENSION_CLIENT_INFO, client_info.as_bytes());
    push_entry(&mut out, EXTENSION_CSP_DEVICE_ID, &device_id.to_le_bytes());
    push_entry(&mut out, EXTENSION_PAYLOAD_VERSION, &[1u8]);
    push_entry(&mut out, EXTENSION_DEVICE_COOKIE, device_cookie);
    out
}

/// The decrypted login acknowledgement.
#[derive(Debug, Clone, Copy)]
pub struct LoginAck {
    /// Server wall-clock time, seconds since the epoch.
    pub server_time: u64,
    /// Number of queued incoming messages.
    pub queued_messages: u32,
}

/// Parse the 16-byte login acknowledgement plaintext.
pub fn parse_login_ack(plain: &[u8]) -> Result<LoginAck> {
    if plain.len() != LOGIN_ACK_LEN {
        return Err(Error::Protocol(format!("login ack must be 16 bytes, got {}", plain.len())));
    }
    if plain[..4] != [0u8; 4] {
        return Err(Error::Protocol("login ack reserved bytes not zero".into()));
    }
    Ok(LoginAck {
        server_time: u64::from_le_bytes(
            plain[4..12].try_into().map_err(|_| Error::Protocol("bad login ack".into()))?,
        ),
        queued_messages: u32::from_le_bytes(
            plain[12..16].try_into().map_err(|_| Error::Protocol("bad login ack".into()))?,
        ),
    })
}

/// Seal the two login boxes with successive client nonces.
#[allow(clippy::too_many_arguments)]
pub fn seal_login(
    transport_key: &SymmetricKey,
    client_nonces: &mut crate::csp::NonceSequence,
    identity: &IdentityCode,
    client_key: &SecretKey,
    server_key: &PublicKey,
    outcome: &ServerHelloOutcome,
    handshake: &ClientHandshake,
    client_info: &str,
    device_id: u64,
    device_cookie: &[u8; 16],
) -> Result<Vec<u8>> {
    let extensions = build_extensions(client_info, device_id, device_cookie);
    let vouch = derive_vouch(
        client_key,
        server_key,
        &outcome.tsk_public,
        &outcome.sck,
        &handshake.tck_public,
    )?;
    let extensions_box_len = (extensions.len() + crate::crypto::TAG_LEN) as u16;
    let login_data = build_login_data(identity, &outcome.sck, &vouch, extensions_box_len);

    let login_box = xsalsa_seal(transport_key, &client_nonces.next()?, &login_data)?;
    let extensions_box = xsalsa_seal(transport_key, &client_nonces.next()?, &extensions)?;

    let mut out = Vec::with_capacity(login_box.len() + extensions_box.len());
    out.extend_from_slice(&login_box);
    out.extend_from_slice(&extensions_box);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csp::NonceSequence;

    fn scripted_server_hello(
        handshake: &ClientHandshake,
        server_secret: &SecretKey,
        sck: [u8; 16],
    ) -> (Vec<u8>, SecretKey) {
        // The scripted server derives the same auth key from its side.
        let tsk_secret = SecretKey::generate();
        let auth_key = precompute(server_secret, &handshake.tck_public);

        let mut plain = [0u8; 48];
        plain[..32].copy_from_slice(tsk_secret.public_key().as_bytes());
        plain[32..].copy_from_slice(&handshake.cck);

        let mut nonce = [0u8; 24];
        nonce[..16].copy_from_slice(&sck);
        nonce[16..].copy_from_slice(&1u64.to_le_bytes());
        let boxed = xsalsa_seal(&auth_key, &nonce, &plain).expect("seal");

        let mut hello = Vec::with_capacity(SERVER_HELLO_LEN);
        hello.extend_from_slice(&sck);
        hello.extend_from_slice(&boxed);
        (hello, tsk_secret)
    }

    #[test]
    fn test_client_hello_layout() {
        let handshake = ClientHandshake::new();
        let hello = handshake.hello_bytes();
        assert_eq!(&hello[..32], handshake.tck_public.as_bytes());
        assert_eq!(&hello[32..], &handshake.cck);
    }

    #[test]
    fn test_server_hello_rejects() {
        let handshake = ClientHandshake::new();
        let server_key = SecretKey::generate().public_key();

        // Wrong length.
        assert!(process_server_hello(&handshake, &server_key, &[0u8; 79]).is_err());

        // Reflected cookie.
        let mut reflected = vec![0u8; SERVER_HELLO_LEN];
        reflected[..16].copy_from_slice(&handshake.cck);
        assert!(process_server_hello(&handshake, &server_key, &reflected).is_err());

        // Garbage box fails authentication.
        let mut garbage = vec![0u8; SERVER_HELLO_LEN];
        garbage[0] = 1;
        assert!(process_server_hello(&handshake, &server_key, &garbage).is_err());
    }

    #[test]
    fn test_scripted_server_hello_succeeds() {
        let handshake = ClientHandshake::new();
        let server_secret = SecretKey::generate();
        let (hello, tsk_secret) = scripted_server_hello(&handshake, &server_secret, [7u8; 16]);

        let outcome = process_server_hello(&handshake, &server_secret.public_key(), &hello)
            .expect("server hello");
        assert_eq!(outcome.sck, [7u8; 16]);
        assert_eq!(outcome.tsk_public, tsk_secret.public_key());

        // Both sides agree on the transport key.
        let server_transport = precompute(&tsk_secret, &handshake.tck_public);
        assert_eq!(outcome.transport_key.as_bytes(), server_transport.as_bytes());
    }

    #[test]
    fn test_scripted_server_hello_wrong_echo_rejected() {
        let mut handshake = ClientHandshake::new();
        let server_secret = SecretKey::generate();
        let (hello, _) = scripted_server_hello(&handshake, &server_secret, [7u8; 16]);

        // Flip our cookie after the server echoed the original.
        handshake.cck[0] ^= 0xFF;
        assert!(process_server_hello(&handshake, &server_secret.public_key(), &hello).is_err());
    }

    #[test]
    fn test_login_data_layout() {
        let identity = IdentityCode::parse("ECHOECHO").expect("valid");
        let sck = [0xCC; 16];
        let vouch = [0xEF; 32];

        let data = build_login_data(&identity, &sck, &vouch, 0x1234);
        assert_eq!(&data[..8], b"ECHOECHO");
        assert_eq!(&data[8..38], CSP_EXTENSION_MAGIC);
        assert_eq!(u16::from_le_bytes([data[38], data[39]]), 0x1234);
        assert_eq!(&data[40..56], &sck);
        assert_eq!(&data[56..80], &[0u8; 24]);
        assert_eq!(&data[80..112], &vouch);
        assert_eq!(&data[112..128], &[0u8; 16]);
    }

    #[test]
    fn test_extensions_layout() {
        let extensions = build_extensions("client/1.0", 0x1122334455667788, &[0xAB; 16]);

        // client info
        assert_eq!(extensions[0], EXTENSION_CLIENT_INFO);
        assert_eq!(u16::from_le_bytes([extensions[1], extensions[2]]), 10);
        assert_eq!(&extensions[3..13], b"client/1.0");

        // device id
        let mut offset = 13;
        assert_eq!(extensions[offset], EXTENSION_CSP_DEVICE_ID);
        assert_eq!(
            u16::from_le_bytes([extensions[offset + 1], extensions[offset + 2]]),
            8
        );
        assert_eq!(
            u64::from_le_bytes(extensions[offset + 3..offset + 11].try_into().expect("8")),
            0x1122334455667788
        );

        // payload version
        offset += 11;
        assert_eq!(extensions[offset], EXTENSION_PAYLOAD_VERSION);
        assert_eq!(extensions[offset + 3], 1);

        // device cookie
        offset += 4;
        assert_eq!(extensions[offset], EXTENSION_DEVICE_COOKIE);
        assert_eq!(&extensions[offset + 3..offset + 19], &[0xAB; 16]);
        assert_eq!(extensions.len(), offset + 19);
    }

    #[test]
    fn test_vouch_depends_on_every_input() {
        let client = SecretKey::generate();
        let server = SecretKey::generate().public_key();
        let tsk = SecretKey::generate().public_key();
        let tck = SecretKey::generate().public_key();
        let sck = [1u8; 16];

        let base = derive_vouch(&client, &server, &tsk, &sck, &tck).expect("vouch");
        let other_sck = derive_vouch(&client, &server, &tsk, &[2u8; 16], &tck).expect("vouch");
        let other_client =
            derive_vouch(&SecretKey::generate(), &server, &tsk, &sck, &tck).expect("vouch");

        assert_ne!(base, other_sck);
        assert_ne!(base, other_client);
        assert_eq!(base, derive_vouch(&client, &server, &tsk, &sck, &tck).expect("vouch"));
    }

    #[test]
    fn test_login_ack_parsing() {
        let mut plain = [0u8; 16];
        plain[4..12].copy_from_slice(&1_700_000_000u64.to_le_bytes());
        plain[12..16].copy_from_slice(&5u32.to_le_bytes());

        let ack = parse_login_ack(&plain).expect("parse");
        assert_eq!(ack.server_time, 1_700_000_000);
        assert_eq!(ack.queued_messages, 5);

        let mut bad_reserved = plain;
        bad_reserved[0] = 1;
        assert!(parse_login_ack(&bad_reserved).is_err());
        assert!(parse_login_ack(&plain[..15]).is_err());
    }

    #[test]
    fn test_seal_login_consumes_two_nonces() {
        let handshake = ClientHandshake::new();
        let transport = SymmetricKey::from_bytes([3u8; 32]);
        let outcome = ServerHelloOutcome {
            sck: [9u8; 16],
            tsk_public: SecretKey::generate().public_key(),
            transport_key: transport.clone(),
        };
        let mut nonces = NonceSequence::new(handshake.cck);
        let identity = IdentityCode::parse("ECHOECHO").expect("valid");
        let client_key = SecretKey::generate();
        let server_key = SecretKey::generate().public_key();

        let login = seal_login(
            &transport,
            &mut nonces,
            &identity,
            &client_key,
            &server_key,
            &outcome,
            &handshake,
            "client/1.0",
            7,
            &[0xAB; 16],
        )
        .expect("seal");

        assert_eq!(nonces.peek(), 3);
        // First box is 128 + 16 bytes; the remainder is the extensions box.
        assert!(login.len() > 144);
    }
}
