//! Connection-phase packets: the server greeting (HandshakeV10), the SSL
//! request, and the client's HandshakeResponse41.

use bytes::{BufMut, BytesMut};

use super::capabilities::{CapabilityFlags, StatusFlags};
use super::wire::{
    read_bytes, read_null_string, read_u8, read_u16_le, read_u32_le, write_len_enc_bytes,
    write_len_enc_int, write_null_string,
};
use crate::error::{MySqlError, MySqlResult};

/// utf8mb4_general_ci
pub const UTF8MB4_GENERAL_CI: u8 = 45;

/// Largest packet the client announces it will accept.
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 0x00ff_ffff;

/// Initial handshake packet from server.
#[derive(Debug, Clone)]
pub struct Greeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Scramble with the trailing NUL removed (20 bytes for both plugins).
    pub auth_plugin_data: Vec<u8>,
    pub capabilities: CapabilityFlags,
    pub character_set: u8,
    pub status_flags: StatusFlags,
    pub auth_plugin_name: String,
}

impl Greeting {
    pub fn parse(data: &[u8]) -> MySqlResult<Self> {
        let mut buf = data;

        let protocol_version = read_u8(&mut buf)?;
        if protocol_version != 10 {
            return Err(MySqlError::UnsupportedServer(format!(
                "unsupported handshake protocol version {}",
                protocol_version
            )));
        }
        let server_version = String::from_utf8_lossy(read_null_string(&mut buf)).into_owned();
        let connection_id = read_u32_le(&mut buf)?;
        let mut auth_data = read_bytes(&mut buf, 8)?.to_vec();
        read_u8(&mut buf)?; // filler
        let cap_lower = read_u16_le(&mut buf)? as u32;

        let mut greeting = Self {
            protocol_version,
            server_version,
            connection_id,
            auth_plugin_data: Vec::new(),
            capabilities: CapabilityFlags::from_parts(cap_lower, 0),
            character_set: 0,
            status_flags: StatusFlags::default(),
            auth_plugin_name: String::new(),
        };

        if buf.is_empty() {
            greeting.auth_plugin_data = auth_data;
            return Ok(greeting);
        }

        greeting.character_set = read_u8(&mut buf)?;
        greeting.status_flags = StatusFlags::from_bits(read_u16_le(&mut buf)?);
        let cap_upper = (read_u16_le(&mut buf)? as u32) << 16;
        let auth_data_len = read_u8(&mut buf)? as usize;
        read_bytes(&mut buf, 6)?; // reserved

        // MariaDB reuses the last 4 reserved bytes for its extended capabilities
        // when it does not advertise CLIENT_LONG_PASSWORD.
        let standard = cap_lower | cap_upper;
        let extended = if standard & CapabilityFlags::LONG_PASSWORD.lower() == 0 {
            read_u32_le(&mut buf)?
        } else {
            read_bytes(&mut buf, 4)?;
            0
        };
        let capabilities = CapabilityFlags::from_parts(standard, extended);
        greeting.capabilities = capabilities;

        if capabilities.contains(CapabilityFlags::SECURE_CONNECTION) {
            if capabilities.contains(CapabilityFlags::PLUGIN_AUTH) {
                let part2_len = auth_data_len.saturating_sub(8).max(13);
                auth_data.extend_from_slice(read_bytes(&mut buf, part2_len)?);
            } else {
                auth_data.extend_from_slice(read_bytes(&mut buf, 12)?);
                read_u8(&mut buf)?; // filler
            }
        }
        if auth_data.len() > 20 && auth_data.last() == Some(&0) {
            auth_data.pop();
        }
        greeting.auth_plugin_data = auth_data;

        if capabilities.contains(CapabilityFlags::PLUGIN_AUTH) {
            greeting.auth_plugin_name =
                String::from_utf8_lossy(read_null_string(&mut buf)).into_owned();
        }

        Ok(greeting)
    }

    /// Parsed form of `server_version`.
    pub fn version(&self) -> Option<ServerVersion> {
        ServerVersion::parse(&self.server_version)
    }
}

/// Server product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFlavor {
    MySql,
    MariaDb,
}

/// A parsed server version string such as `8.0.36` or `5.5.5-10.6.12-MariaDB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    pub flavor: ServerFlavor,
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl ServerVersion {
    pub fn parse(raw: &str) -> Option<Self> {
        let flavor = if raw.contains("MariaDB") {
            ServerFlavor::MariaDb
        } else {
            ServerFlavor::MySql
        };
        // MariaDB prefixes its real version with a fake 5.5.5 for old replicas.
        let version = raw.strip_prefix("5.5.5-").unwrap_or(raw);
        let numeric = version
            .split(|c: char| !c.is_ascii_digit() && c != '.')
            .next()?;
        let mut parts = numeric.split('.').map(|p| p.parse::<u16>());
        let major = parts.next()?.ok()?;
        let minor = parts.next().and_then(Result::ok).unwrap_or(0);
        let patch = parts.next().and_then(Result::ok).unwrap_or(0);
        Some(Self {
            flavor,
            major,
            minor,
            patch,
        })
    }

    /// MySQL 5.7 / 8.x and MariaDB 10.3 onwards.
    pub fn is_supported(&self) -> bool {
        match self.flavor {
            ServerFlavor::MySql => (self.major, self.minor) == (5, 7) || self.major == 8,
            ServerFlavor::MariaDb => (self.major == 10 && self.minor >= 3) || self.major >= 11,
        }
    }
}

/// Connection attributes sent with every handshake response.
pub fn default_connection_attributes() -> Vec<(String, String)> {
    vec![
        ("_client_name".to_string(), env!("CARGO_PKG_NAME").to_string()),
        ("_client_version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
        ("_os".to_string(), std::env::consts::OS.to_string()),
        ("_platform".to_string(), std::env::consts::ARCH.to_string()),
    ]
}

/// Shared 32-byte prefix of SSLRequest and HandshakeResponse41.
fn put_response_prefix(buf: &mut BytesMut, capabilities: CapabilityFlags, max_packet_size: u32, charset: u8) {
    buf.put_u32_le(capabilities.lower());
    buf.put_u32_le(max_packet_size);
    buf.put_u8(charset);
    buf.put_slice(&[0u8; 19]);
    // MariaDB extended capabilities, zero for MySQL.
    buf.put_u32_le(capabilities.upper());
}

/// Encode SSL request packet (for TLS upgrade).
pub fn encode_ssl_request(capabilities: CapabilityFlags, max_packet_size: u32, charset: u8) -> BytesMut {
    let mut buf = BytesMut::with_capacity(32);
    put_response_prefix(&mut buf, capabilities, max_packet_size, charset);
    buf
}

/// Client authentication packet.
#[derive(Debug, Clone)]
pub struct HandshakeResponse<'a> {
    pub capabilities: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin: &'a str,
    pub attributes: &'a [(String, String)],
}

impl HandshakeResponse<'_> {
    pub fn encode(&self) -> BytesMut {
        let caps = self.capabilities;
        let mut buf = BytesMut::with_capacity(128 + self.auth_response.len());
        put_response_prefix(&mut buf, caps, self.max_packet_size, self.charset);

        write_null_string(&mut buf, self.username.as_bytes());

        if caps.contains(CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA) {
            write_len_enc_bytes(&mut buf, self.auth_response);
        } else if caps.contains(CapabilityFlags::SECURE_CONNECTION) {
            buf.put_u8(self.auth_response.len() as u8);
            buf.put_slice(self.auth_response);
        } else {
            write_null_string(&mut buf, self.auth_response);
        }

        if caps.contains(CapabilityFlags::CONNECT_WITH_DB) {
            write_null_string(&mut buf, self.database.unwrap_or_default().as_bytes());
        }

        if caps.contains(CapabilityFlags::PLUGIN_AUTH) {
            write_null_string(&mut buf, self.auth_plugin.as_bytes());
        }

        if caps.contains(CapabilityFlags::CONNECT_ATTRS) {
            let mut attrs = BytesMut::new();
            for (key, value) in self.attributes {
                write_len_enc_bytes(&mut attrs, key.as_bytes());
                write_len_enc_bytes(&mut attrs, value.as_bytes());
            }
            write_len_enc_int(&mut buf, attrs.len() as u64);
            buf.put_slice(&attrs);
        }

        buf
    }
}
