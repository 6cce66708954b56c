//! Scripted in-process MySQL server for integration tests.
//!
//! Each test spawns a script against one end of a `tokio::io::duplex` pipe
//! and connects the driver to the other end.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

use qail_mysql::protocol::CapabilityFlags;
use qail_mysql::protocol::wire::{write_len_enc_bytes, write_len_enc_int};
use qail_mysql::{MySqlConfig, TlsMode};

pub const SEED: [u8; 20] = [
    0x3a, 0x07, 0x51, 0x6c, 0x2e, 0x44, 0x11, 0x7f, 0x29, 0x5d, 0x63, 0x18, 0x0b, 0x72, 0x4e,
    0x36, 0x15, 0x5a, 0x21, 0x6e,
];

pub const PASSWORD: &str = "secret";

/// Self-signed `localhost` certificate (ECDSA P-256) and its key.
pub const SERVER_CERT: &[u8] = include_bytes!("../fixtures/server.crt");
pub const SERVER_KEY: &[u8] = include_bytes!("../fixtures/server.key");

/// RSA key pair the server hands out for caching_sha2_password full auth.
pub const RSA_PUBLIC_KEY: &[u8] = include_bytes!("../fixtures/rsa_public.pem");
pub const RSA_PRIVATE_KEY: &[u8] = include_bytes!("../fixtures/rsa_private.pem");

pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;

/// What the scripted server advertises.
pub fn server_capabilities() -> CapabilityFlags {
    CapabilityFlags::LONG_PASSWORD
        | CapabilityFlags::CONNECT_WITH_DB
        | CapabilityFlags::PROTOCOL_41
        | CapabilityFlags::TRANSACTIONS
        | CapabilityFlags::SECURE_CONNECTION
        | CapabilityFlags::MULTI_STATEMENTS
        | CapabilityFlags::MULTI_RESULTS
        | CapabilityFlags::PS_MULTI_RESULTS
        | CapabilityFlags::PLUGIN_AUTH
        | CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CapabilityFlags::DEPRECATE_EOF
}

pub fn config() -> MySqlConfig {
    MySqlConfig::builder()
        .user("app")
        .password(PASSWORD)
        .tls_mode(TlsMode::Disable)
        .build()
}

pub fn tls_acceptor() -> TlsAcceptor {
    let certs = rustls_pemfile::certs(&mut &SERVER_CERT[..])
        .collect::<Result<Vec<_>, _>>()
        .expect("server certificate");
    let key = rustls_pemfile::private_key(&mut &SERVER_KEY[..])
        .expect("server key")
        .expect("server key present");
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("server config");
    TlsAcceptor::from(Arc::new(config))
}

pub struct MockServer<S = DuplexStream> {
    stream: S,
}

impl MockServer<DuplexStream> {
    /// Accept the client's TLS handshake and keep talking over it.
    pub async fn start_tls(self) -> MockServer<TlsStream<DuplexStream>> {
        let stream = tls_acceptor()
            .accept(self.stream)
            .await
            .expect("TLS handshake");
        MockServer { stream }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> MockServer<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Next client packet as `(sequence, payload)`, `None` on EOF.
    pub async fn read_packet(&mut self) -> Option<(u8, Vec<u8>)> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).await.ok()?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.ok()?;
        Some((header[3], payload))
    }

    /// Read a packet and check it starts a new command.
    pub async fn expect_command(&mut self, command: u8) -> Vec<u8> {
        let (sequence, payload) = self.read_packet().await.expect("client packet");
        assert_eq!(sequence, 0, "commands start a new sequence");
        assert_eq!(payload[0], command, "unexpected command byte");
        payload
    }

    pub async fn send(&mut self, sequence: u8, payload: &[u8]) {
        let mut frame = BytesMut::with_capacity(payload.len() + 4);
        frame.put_uint_le(payload.len() as u64, 3);
        frame.put_u8(sequence);
        frame.put_slice(payload);
        self.stream.write_all(&frame).await.expect("write to client");
    }

    /// Send packets with consecutive sequence numbers starting at `first`.
    pub async fn send_all(&mut self, first: u8, packets: &[Vec<u8>]) {
        for (i, packet) in packets.iter().enumerate() {
            self.send(first.wrapping_add(i as u8), packet).await;
        }
    }

    /// Greeting, handshake response, OK.
    pub async fn accept(&mut self) -> Vec<u8> {
        self.send(0, &greeting("mysql_native_password")).await;
        let (sequence, response) = self.read_packet().await.expect("handshake response");
        assert_eq!(sequence, 1);
        self.send(2, &ok(0, 0, SERVER_STATUS_AUTOCOMMIT)).await;
        response
    }

    pub async fn shutdown(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// HandshakeV10 for a MySQL 8 server.
pub fn greeting(plugin: &str) -> Vec<u8> {
    greeting_with(plugin, server_capabilities())
}

pub fn greeting_with(plugin: &str, caps: CapabilityFlags) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(10);
    buf.put_slice(b"8.0.36\0");
    buf.put_u32_le(42);
    buf.put_slice(&SEED[..8]);
    buf.put_u8(0);
    buf.put_u16_le(caps.lower() as u16);
    buf.put_u8(45);
    buf.put_u16_le(SERVER_STATUS_AUTOCOMMIT);
    buf.put_u16_le((caps.lower() >> 16) as u16);
    buf.put_u8(21);
    buf.put_slice(&[0u8; 10]);
    buf.put_slice(&SEED[8..]);
    buf.put_u8(0);
    buf.put_slice(plugin.as_bytes());
    buf.put_u8(0);
    buf.to_vec()
}

/// AuthSwitchRequest asking for `plugin` with a fresh seed.
pub fn auth_switch(plugin: &str, seed: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(0xfe);
    buf.put_slice(plugin.as_bytes());
    buf.put_u8(0);
    buf.put_slice(seed);
    buf.put_u8(0);
    buf.to_vec()
}

pub fn ok(affected_rows: u64, last_insert_id: u64, status: u16) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(0x00);
    write_len_enc_int(&mut buf, affected_rows);
    write_len_enc_int(&mut buf, last_insert_id);
    buf.put_u16_le(status);
    buf.put_u16_le(0);
    buf.to_vec()
}

/// End of a row stream under CLIENT_DEPRECATE_EOF.
pub fn result_end(status: u16) -> Vec<u8> {
    let mut packet = ok(0, 0, status);
    packet[0] = 0xfe;
    packet
}

pub fn err(code: u16, state: &str, message: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(0xff);
    buf.put_u16_le(code);
    buf.put_u8(b'#');
    buf.put_slice(state.as_bytes());
    buf.put_slice(message.as_bytes());
    buf.to_vec()
}

pub fn column_count(count: u64) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_len_enc_int(&mut buf, count);
    buf.to_vec()
}

pub fn column_def(name: &str, column_type: u8) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for part in ["def", "shop", "users", "users", name, name] {
        write_len_enc_bytes(&mut buf, part.as_bytes());
    }
    write_len_enc_int(&mut buf, 0x0c);
    buf.put_u16_le(45);
    buf.put_u32_le(255);
    buf.put_u8(column_type);
    buf.put_u16_le(0);
    buf.put_u8(0);
    buf.put_u16_le(0);
    buf.to_vec()
}

pub fn text_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for value in values {
        match value {
            Some(v) => write_len_enc_bytes(&mut buf, v.as_bytes()),
            None => buf.put_u8(0xfb),
        }
    }
    buf.to_vec()
}

pub fn prepare_ok(statement_id: u32, columns: u16, params: u16) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(0x00);
    buf.put_u32_le(statement_id);
    buf.put_u16_le(columns);
    buf.put_u16_le(params);
    buf.put_u8(0);
    buf.put_u16_le(0);
    buf.to_vec()
}
