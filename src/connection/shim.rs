//! Transport encryption shim
//!
//! Sits between the socket and the frame assembler when TLS is enabled. Inbound
//! ciphertext goes through [`EncryptionShim::on_read`], which loops over the session
//! until the input is used up and reports, in order, the bytes that must be written
//! back to the socket, the moment the handshake completes, and decrypted application
//! data. Application data is never reported before the handshake completion.

use super::tls::{parse_server_name, TlsConfig};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use rustls::ClientConnection;
use rustls_pki_types::ServerName;
use std::io::{self, Read, Write};

/// Result of one pass over a secure session
#[derive(Debug, Default)]
pub struct SessionOutput {
    /// Input bytes taken by the session
    pub consumed: usize,
    /// Decrypted application data
    pub plaintext: Bytes,
    /// Encrypted bytes to write to the socket (handshake flights, alerts, ...)
    pub ciphertext: Bytes,
}

/// Sans-io secure session driven by the shim
pub trait SecureSession: Send {
    /// Feed inbound ciphertext (possibly empty) and collect what the session produced
    fn read_write(&mut self, input: &[u8]) -> Result<SessionOutput>;

    /// Encrypt outbound application data
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Bytes>;

    /// Whether the handshake has finished
    fn handshake_done(&self) -> bool;
}

/// Output of [`EncryptionShim::on_read`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShimEvent {
    /// Bytes that must be written to the socket
    Write(Bytes),
    /// The handshake finished; reported once
    HandshakeComplete,
    /// Decrypted application bytes for the frame assembler
    Plaintext(Bytes),
}

/// Drives a [`SecureSession`] from socket reads
pub struct EncryptionShim {
    session: Box<dyn SecureSession>,
    handshake_observed: bool,
    held: BytesMut,
}

impl EncryptionShim {
    /// Wrap a session
    pub fn new(session: Box<dyn SecureSession>) -> Self {
        Self {
            session,
            handshake_observed: false,
            held: BytesMut::new(),
        }
    }

    /// Process inbound socket bytes
    ///
    /// An empty `input` primes the session, producing the first handshake flight.
    pub fn on_read(&mut self, input: &[u8]) -> Result<Vec<ShimEvent>> {
        let mut events = Vec::new();
        let mut cursor = 0;

        loop {
            let remaining = &input[cursor..];
            let output = self.session.read_write(remaining)?;
            if output.consumed > remaining.len() {
                return Err(Error::Tls(format!(
                    "session consumed {} bytes of {}",
                    output.consumed,
                    remaining.len()
                )));
            }
            cursor += output.consumed;

            let progressed = output.consumed > 0
                || !output.plaintext.is_empty()
                || !output.ciphertext.is_empty();

            if !output.ciphertext.is_empty() {
                events.push(ShimEvent::Write(output.ciphertext));
            }

            if !output.plaintext.is_empty() {
                if self.handshake_observed {
                    events.push(ShimEvent::Plaintext(output.plaintext));
                } else {
                    self.held.extend_from_slice(&output.plaintext);
                }
            }

            if !self.handshake_observed && self.session.handshake_done() {
                self.handshake_observed = true;
                events.push(ShimEvent::HandshakeComplete);
                if !self.held.is_empty() {
                    events.push(ShimEvent::Plaintext(self.held.split().freeze()));
                }
            }

            if cursor == input.len() {
                break;
            }
            if !progressed {
                return Err(Error::Tls(format!(
                    "session stalled with {} unread bytes",
                    input.len() - cursor
                )));
            }
        }

        Ok(events)
    }

    /// Encrypt an outbound frame
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Bytes> {
        self.session.encrypt(plaintext)
    }

    /// Whether [`ShimEvent::HandshakeComplete`] has been reported
    pub fn is_handshake_done(&self) -> bool {
        self.handshake_observed
    }
}

impl std::fmt::Debug for EncryptionShim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionShim")
            .field("handshake_observed", &self.handshake_observed)
            .field("held", &self.held.len())
            .finish()
    }
}

/// [`SecureSession`] backed by a rustls client connection
pub struct RustlsSession {
    conn: ClientConnection,
}

impl RustlsSession {
    /// Start a client session for `host`
    pub fn new(tls: &TlsConfig, host: &str) -> Result<Self> {
        let name = parse_server_name(host)?;
        let server_name = ServerName::try_from(name)
            .map_err(|_| Error::Config(format!("Invalid hostname for TLS: {}", host)))?;
        let conn = ClientConnection::new(tls.client_config(), server_name)?;
        Ok(Self { conn })
    }

    fn drain_ciphertext(&mut self) -> Result<Bytes> {
        let mut out = Vec::new();
        while self.conn.wants_write() {
            self.conn.write_tls(&mut out)?;
        }
        Ok(Bytes::from(out))
    }
}

impl SecureSession for RustlsSession {
    fn read_write(&mut self, input: &[u8]) -> Result<SessionOutput> {
        let mut consumed = 0;
        if !input.is_empty() {
            let mut rd = input;
            consumed = self.conn.read_tls(&mut rd)?;
            self.conn.process_new_packets()?;
        }

        let mut plaintext = Vec::new();
        match self.conn.reader().read_to_end(&mut plaintext) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }

        Ok(SessionOutput {
            consumed,
            plaintext: Bytes::from(plaintext),
            ciphertext: self.drain_ciphertext()?,
        })
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Bytes> {
        self.conn.writer().write_all(plaintext)?;
        self.drain_ciphertext()
    }

    fn handshake_done(&self) -> bool {
        !self.conn.is_handshaking()
    }
}

impl std::fmt::Debug for RustlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsSession")
            .field("handshaking", &self.conn.is_handshaking())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Session whose handshake takes two server flights (`S1`, `S2`)
    ///
    /// After the handshake, input is passed through as plaintext and encryption
    /// prefixes `E:`.
    #[derive(Debug, Default)]
    pub(crate) struct FakeSession {
        pub(crate) flights_sent: usize,
        pub(crate) done: bool,
    }

    impl SecureSession for FakeSession {
        fn read_write(&mut self, input: &[u8]) -> Result<SessionOutput> {
            if self.done {
                return Ok(SessionOutput {
                    consumed: input.len(),
                    plaintext: Bytes::copy_from_slice(input),
                    ciphertext: Bytes::new(),
                });
            }
            if input.is_empty() && self.flights_sent == 0 {
                self.flights_sent = 1;
                return Ok(SessionOutput {
                    consumed: 0,
                    plaintext: Bytes::new(),
                    ciphertext: Bytes::from_static(b"C1"),
                });
            }
            if input.starts_with(b"S1") {
                self.flights_sent = 2;
                return Ok(SessionOutput {
                    consumed: 2,
                    plaintext: Bytes::new(),
                    ciphertext: Bytes::from_static(b"C2"),
                });
            }
            if input.starts_with(b"S2") {
                self.done = true;
                return Ok(SessionOutput {
                    consumed: 2,
                    ..Default::default()
                });
            }
            Ok(SessionOutput::default())
        }

        fn encrypt(&mut self, plaintext: &[u8]) -> Result<Bytes> {
            let mut out = b"E:".to_vec();
            out.extend_from_slice(plaintext);
            Ok(Bytes::from(out))
        }

        fn handshake_done(&self) -> bool {
            self.done
        }
    }

    #[test]
    fn test_two_round_trip_handshake() {
        let mut shim = EncryptionShim::new(Box::new(FakeSession::default()));

        let events = shim.on_read(&[]).unwrap();
        assert_eq!(events, vec![ShimEvent::Write(Bytes::from_static(b"C1"))]);

        let events = shim.on_read(b"S1").unwrap();
        assert_eq!(events, vec![ShimEvent::Write(Bytes::from_static(b"C2"))]);
        assert!(!shim.is_handshake_done());

        let events = shim.on_read(b"S2").unwrap();
        assert_eq!(events, vec![ShimEvent::HandshakeComplete]);
        assert!(shim.is_handshake_done());

        let events = shim.on_read(b"frame").unwrap();
        assert_eq!(events, vec![ShimEvent::Plaintext(Bytes::from_static(b"frame"))]);
    }

    #[test]
    fn test_final_flight_and_data_in_one_read() {
        let mut shim = EncryptionShim::new(Box::new(FakeSession::default()));
        shim.on_read(&[]).unwrap();
        shim.on_read(b"S1").unwrap();

        let events = shim.on_read(b"S2data").unwrap();
        assert_eq!(
            events,
            vec![
                ShimEvent::HandshakeComplete,
                ShimEvent::Plaintext(Bytes::from_static(b"data")),
            ]
        );
    }

    #[test]
    fn test_stalled_session_is_an_error() {
        let mut shim = EncryptionShim::new(Box::new(FakeSession::default()));
        shim.on_read(&[]).unwrap();
        assert!(matches!(shim.on_read(b"garbage"), Err(Error::Tls(_))));
    }

    /// Emits plaintext one call before reporting the handshake as done
    struct EarlyDataSession {
        calls: usize,
    }

    impl SecureSession for EarlyDataSession {
        fn read_write(&mut self, input: &[u8]) -> Result<SessionOutput> {
            self.calls += 1;
            Ok(SessionOutput {
                consumed: input.len(),
                plaintext: Bytes::from_static(b"early"),
                ciphertext: Bytes::new(),
            })
        }

        fn encrypt(&mut self, plaintext: &[u8]) -> Result<Bytes> {
            Ok(Bytes::copy_from_slice(plaintext))
        }

        fn handshake_done(&self) -> bool {
            self.calls > 1
        }
    }

    #[test]
    fn test_plaintext_held_until_handshake_complete() {
        let mut shim = EncryptionShim::new(Box::new(EarlyDataSession { calls: 0 }));

        assert!(shim.on_read(b"x").unwrap().is_empty());

        let events = shim.on_read(b"y").unwrap();
        assert_eq!(
            events,
            vec![
                ShimEvent::HandshakeComplete,
                ShimEvent::Plaintext(Bytes::from_static(b"earlyearly")),
            ]
        );
    }

    #[test]
    fn test_encrypt_delegates_to_session() {
        let mut shim = EncryptionShim::new(Box::new(FakeSession::default()));
        assert_eq!(shim.encrypt(b"abc").unwrap(), Bytes::from_static(b"E:abc"));
    }

    #[test]
    fn test_rustls_session_first_flight() {
        let tls = TlsConfig::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap();
        let mut session = RustlsSession::new(&tls, "localhost").unwrap();
        assert!(!session.handshake_done());

        let output = session.read_write(&[]).unwrap();
        assert_eq!(output.consumed, 0);
        // ClientHello is a handshake record
        assert_eq!(output.ciphertext[0], 0x16);
        assert!(output.plaintext.is_empty());
    }

    fn local_server() -> rustls::ServerConnection {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = rustls_pki_types::PrivateKeyDer::Pkcs8(
            rustls_pki_types::PrivatePkcs8KeyDer::from(key_pair.serialize_der()),
        );
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert.der().clone()], key)
            .unwrap();
        rustls::ServerConnection::new(std::sync::Arc::new(config)).unwrap()
    }

    fn server_receive(server: &mut rustls::ServerConnection, mut data: &[u8]) {
        while !data.is_empty() {
            server.read_tls(&mut data).unwrap();
            server.process_new_packets().unwrap();
        }
    }

    fn server_flight(server: &mut rustls::ServerConnection) -> Vec<u8> {
        let mut out = Vec::new();
        while server.wants_write() {
            server.write_tls(&mut out).unwrap();
        }
        out
    }

    #[test]
    fn test_rustls_handshake_and_data_through_shim() {
        let tls = TlsConfig::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap();
        let session = RustlsSession::new(&tls, "localhost").unwrap();
        let mut shim = EncryptionShim::new(Box::new(session));
        let mut server = local_server();

        let mut events = shim.on_read(&[]).unwrap();
        let mut completed = 0;
        for _ in 0..8 {
            let mut to_server = Vec::new();
            for event in events.drain(..) {
                match event {
                    ShimEvent::Write(bytes) => to_server.extend_from_slice(&bytes),
                    ShimEvent::HandshakeComplete => completed += 1,
                    ShimEvent::Plaintext(bytes) => panic!("unexpected plaintext {:?}", bytes),
                }
            }
            server_receive(&mut server, &to_server);
            if completed > 0 && !server.is_handshaking() {
                break;
            }
            events = shim.on_read(&server_flight(&mut server)).unwrap();
        }
        assert_eq!(completed, 1);
        assert!(shim.is_handshake_done());
        assert!(!server.is_handshaking());

        // server to client
        server.writer().write_all(b"hello-frame").unwrap();
        let mut received = Vec::new();
        for event in shim.on_read(&server_flight(&mut server)).unwrap() {
            match event {
                ShimEvent::Plaintext(bytes) => received.extend_from_slice(&bytes),
                ShimEvent::Write(_) => {}
                ShimEvent::HandshakeComplete => panic!("handshake reported twice"),
            }
        }
        assert_eq!(received, b"hello-frame");

        // client to server
        let ciphertext = shim.encrypt(b"client-data").unwrap();
        server_receive(&mut server, &ciphertext);
        let mut buf = [0u8; 64];
        let n = server.reader().read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"client-data");
    }
}
