//! Connection configuration

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::protocol::capabilities::CapabilityFlags;
use crate::protocol::handshake::{DEFAULT_MAX_PACKET_SIZE, UTF8MB4_GENERAL_CI};

/// Whether and how to upgrade the connection to TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Never send an SSL request.
    Disable,
    /// Upgrade when the server offers TLS, otherwise continue in plaintext.
    #[default]
    Prefer,
    /// Fail the connection if the server cannot do TLS.
    Require,
}

/// MySQL connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MySqlConfig {
    pub host: String,
    pub port: u16,

    /// Connect over this Unix socket instead of TCP (optional)
    pub socket: Option<String>,

    pub user: String,
    pub password: Option<String>,
    pub database: Option<String>,

    pub tls_mode: TlsMode,

    /// Name to verify the server certificate against; defaults to `host`
    pub tls_server_name: Option<String>,

    /// Skip certificate verification (local and test servers)
    pub accept_invalid_certs: bool,

    /// PEM file with extra trusted root certificates (optional)
    pub root_cert_path: Option<String>,

    pub charset: u8,
    pub max_packet_size: u32,

    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Sent after the built-in `_client_name`, `_os`, ... attributes
    pub attributes: BTreeMap<String, String>,

    /// Replace the default requested capability set (advanced)
    #[serde(skip)]
    pub capabilities: Option<CapabilityFlags>,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            socket: None,
            user: "root".to_string(),
            password: None,
            database: None,
            tls_mode: TlsMode::default(),
            tls_server_name: None,
            accept_invalid_certs: false,
            root_cert_path: None,
            charset: UTF8MB4_GENERAL_CI,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            connect_timeout: Duration::from_secs(10),
            attributes: BTreeMap::new(),
            capabilities: None,
        }
    }
}

impl MySqlConfig {
    /// Create a new configuration builder
    pub fn builder() -> MySqlConfigBuilder {
        MySqlConfigBuilder::default()
    }

    /// Capabilities to request from the server, before intersecting with
    /// what it offers.
    pub fn desired_capabilities(&self) -> CapabilityFlags {
        let mut caps = self
            .capabilities
            .unwrap_or(CapabilityFlags::CLIENT_DEFAULT)
            .difference(CapabilityFlags::UNSUPPORTED);
        caps.set(CapabilityFlags::CONNECT_WITH_DB, self.database.is_some());
        caps.set(CapabilityFlags::SSL, self.tls_mode != TlsMode::Disable);
        caps
    }

    /// Server name for TLS verification.
    pub fn server_name(&self) -> &str {
        self.tls_server_name.as_deref().unwrap_or(&self.host)
    }
}

/// Builder for MySqlConfig
#[derive(Debug, Default)]
pub struct MySqlConfigBuilder {
    config: MySqlConfig,
}

impl MySqlConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Connect through a Unix domain socket
    pub fn socket(mut self, path: impl Into<String>) -> Self {
        self.config.socket = Some(path.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.config.tls_mode = mode;
        self
    }

    pub fn tls_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.tls_server_name = Some(name.into());
        self
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.accept_invalid_certs = accept;
        self
    }

    pub fn root_cert_path(mut self, path: impl Into<String>) -> Self {
        self.config.root_cert_path = Some(path.into());
        self
    }

    pub fn charset(mut self, charset: u8) -> Self {
        self.config.charset = charset;
        self
    }

    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.config.max_packet_size = size;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Add a connection attribute
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.attributes.insert(key.into(), value.into());
        self
    }

    pub fn capabilities(mut self, capabilities: CapabilityFlags) -> Self {
        self.config.capabilities = Some(capabilities);
        self
    }

    /// Build the configuration
    pub fn build(self) -> MySqlConfig {
        self.config
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = MySqlConfig::builder()
            .host("db.internal")
            .port(3307)
            .user("app")
            .password("pw")
            .database("shop")
            .tls_mode(TlsMode::Require)
            .attribute("program_name", "tests")
            .build();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 3307);
        assert_eq!(config.server_name(), "db.internal");
        assert_eq!(config.attributes.get("program_name").map(String::as_str), Some("tests"));
    }

    #[test]
    fn test_desired_capabilities() {
        let config = MySqlConfig::builder().database("shop").build();
        let caps = config.desired_capabilities();
        assert!(caps.contains(CapabilityFlags::CONNECT_WITH_DB));
        assert!(caps.contains(CapabilityFlags::SSL));

        let config = MySqlConfig::builder().tls_mode(TlsMode::Disable).build();
        let caps = config.desired_capabilities();
        assert!(!caps.contains(CapabilityFlags::CONNECT_WITH_DB));
        assert!(!caps.contains(CapabilityFlags::SSL));
    }

    #[test]
    fn test_override_cannot_request_unsupported() {
        let config = MySqlConfig::builder()
            .capabilities(CapabilityFlags::CLIENT_DEFAULT | CapabilityFlags::COMPRESS)
            .build();
        assert!(!config.desired_capabilities().contains(CapabilityFlags::COMPRESS));
    }

    #[test]
    fn test_deserialize() {
        let config: MySqlConfig = serde_json::from_str(
            r#"{"host": "10.0.0.5", "user": "reader", "tls_mode": "require", "connect_timeout": 3}"#,
        )
        .unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 3306);
        assert_eq!(config.tls_mode, TlsMode::Require);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
    }
}
