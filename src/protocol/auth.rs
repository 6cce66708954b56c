//! MySQL authentication plugins.
//!
//! Implements:
//! - mysql_native_password (SHA1-based, legacy)
//! - caching_sha2_password (SHA256-based, MySQL 8+), including the full
//!   authentication path over TLS or with the server's RSA public key
//!
//! Everything here is pure: the lifecycle feeds in seeds and server data and
//! sends back whatever bytes these functions produce.

use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tracing::debug;

use crate::error::{MySqlError, MySqlResult};

pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";

/// caching_sha2_password "more data" status: scramble matched the server cache.
pub const FAST_AUTH_SUCCESS: u8 = 0x03;
/// caching_sha2_password "more data" status: the server wants the full password.
pub const PERFORM_FULL_AUTHENTICATION: u8 = 0x04;
/// Client request for the server's RSA public key.
pub const REQUEST_PUBLIC_KEY: u8 = 0x02;

/// Length of the seed both plugins expect.
pub const SEED_LEN: usize = 20;

/// Compute mysql_native_password authentication response (legacy).
///
/// Formula: SHA1(password) XOR SHA1(scramble + SHA1(SHA1(password)))
pub fn mysql_native_password(password: &[u8], scramble: &[u8]) -> [u8; 20] {
    let hash1 = Sha1::digest(password);
    let hash2 = Sha1::digest(hash1);

    let mut hasher = Sha1::new();
    hasher.update(scramble);
    hasher.update(hash2);
    let hash3 = hasher.finalize();

    let mut result = [0u8; 20];
    for (out, (a, b)) in result.iter_mut().zip(hash1.iter().zip(hash3.iter())) {
        *out = a ^ b;
    }
    result
}

/// Compute caching_sha2_password authentication response (MySQL 8+).
///
/// Formula: SHA256(password) XOR SHA256(SHA256(SHA256(password)) + scramble)
pub fn caching_sha2_password(password: &[u8], scramble: &[u8]) -> [u8; 32] {
    let hash1 = Sha256::digest(password);
    let hash2 = Sha256::digest(hash1);

    let mut hasher = Sha256::new();
    hasher.update(hash2);
    hasher.update(scramble);
    let hash3 = hasher.finalize();

    let mut result = [0u8; 32];
    for (out, (a, b)) in result.iter_mut().zip(hash1.iter().zip(hash3.iter())) {
        *out = a ^ b;
    }
    result
}

/// XOR the NUL-terminated password with the seed, repeating the seed as needed.
pub fn xor_password_with_seed(password: &[u8], seed: &[u8]) -> Vec<u8> {
    password
        .iter()
        .chain(std::iter::once(&0u8))
        .enumerate()
        .map(|(i, b)| b ^ seed.get(i % seed.len().max(1)).copied().unwrap_or(0))
        .collect()
}

/// Encrypt the password with the server's RSA public key (PEM, PKCS#8 or PKCS#1)
/// using OAEP padding, as caching_sha2_password full authentication requires.
pub fn encrypt_password(password: &[u8], seed: &[u8], public_key_pem: &[u8]) -> MySqlResult<Vec<u8>> {
    if seed.is_empty() {
        return Err(MySqlError::Auth("empty auth seed".into()));
    }
    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| MySqlError::Auth(format!("public key is not valid PEM: {}", e)))?;
    let pem = pem.trim_end_matches('\0');
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| MySqlError::Auth(format!("failed to parse RSA public key: {}", e)))?;

    let plain = xor_password_with_seed(password, seed);
    key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &plain)
        .map_err(|e| MySqlError::Auth(format!("RSA encryption failed: {}", e)))
}

/// The two supported authentication plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2Password,
}

impl AuthPlugin {
    pub fn from_name(name: &str) -> MySqlResult<Self> {
        match name {
            MYSQL_NATIVE_PASSWORD => Ok(AuthPlugin::NativePassword),
            CACHING_SHA2_PASSWORD => Ok(AuthPlugin::CachingSha2Password),
            other => Err(MySqlError::UnsupportedAuthPlugin(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AuthPlugin::NativePassword => MYSQL_NATIVE_PASSWORD,
            AuthPlugin::CachingSha2Password => CACHING_SHA2_PASSWORD,
        }
    }

    /// The first response for this plugin. An empty password always answers
    /// with an empty response.
    pub fn scramble(self, password: &[u8], seed: &[u8]) -> MySqlResult<Vec<u8>> {
        if password.is_empty() {
            return Ok(Vec::new());
        }
        if seed.len() != SEED_LEN {
            return Err(MySqlError::Auth(format!(
                "{} expects a {}-byte seed, got {}",
                self.name(),
                SEED_LEN,
                seed.len()
            )));
        }
        Ok(match self {
            AuthPlugin::NativePassword => mysql_native_password(password, seed).to_vec(),
            AuthPlugin::CachingSha2Password => caching_sha2_password(password, seed).to_vec(),
        })
    }
}

/// Where a caching_sha2_password exchange stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    SentScramble,
    RequestedPublicKey,
    SentFinal,
}

/// Client side of one authentication exchange.
#[derive(Debug, Clone)]
pub struct AuthState {
    plugin: AuthPlugin,
    password: Vec<u8>,
    secure: bool,
    seed: Vec<u8>,
    stage: Stage,
}

impl AuthState {
    /// Begin authenticating with `plugin_name`; returns the state and the
    /// initial response to put in the handshake response.
    pub fn start(
        plugin_name: &str,
        password: &[u8],
        seed: &[u8],
        secure: bool,
    ) -> MySqlResult<(Self, Vec<u8>)> {
        let plugin = AuthPlugin::from_name(plugin_name)?;
        let response = plugin.scramble(password, seed)?;
        let state = Self {
            plugin,
            password: password.to_vec(),
            secure,
            seed: seed.to_vec(),
            stage: Stage::SentScramble,
        };
        Ok((state, response))
    }

    pub fn plugin(&self) -> AuthPlugin {
        self.plugin
    }

    /// Handle an AuthSwitchRequest: restart with a new plugin and seed.
    pub fn switch(&mut self, plugin_name: &str, seed: &[u8]) -> MySqlResult<Vec<u8>> {
        let plugin = AuthPlugin::from_name(plugin_name)?;
        debug!(from = self.plugin.name(), to = plugin.name(), "auth plugin switch");
        let response = plugin.scramble(&self.password, seed)?;
        self.plugin = plugin;
        self.seed = seed.to_vec();
        self.stage = Stage::SentScramble;
        Ok(response)
    }

    /// Handle the payload of an AuthMoreData packet (without its 0x01 tag).
    ///
    /// Returns the reply to send, or `None` when the server's OK is next.
    pub fn more_data(&mut self, data: &[u8]) -> MySqlResult<Option<Vec<u8>>> {
        if self.plugin == AuthPlugin::NativePassword {
            return Err(MySqlError::Protocol(
                "mysql_native_password received unexpected auth data".into(),
            ));
        }
        match self.stage {
            Stage::SentScramble => match data.first().copied() {
                Some(FAST_AUTH_SUCCESS) => {
                    debug!("caching_sha2_password fast auth succeeded");
                    self.stage = Stage::SentFinal;
                    Ok(None)
                }
                Some(PERFORM_FULL_AUTHENTICATION) if self.secure => {
                    debug!("caching_sha2_password full auth over secure transport");
                    self.stage = Stage::SentFinal;
                    let mut reply = self.password.clone();
                    reply.push(0);
                    Ok(Some(reply))
                }
                Some(PERFORM_FULL_AUTHENTICATION) => {
                    debug!("caching_sha2_password full auth, requesting public key");
                    self.stage = Stage::RequestedPublicKey;
                    Ok(Some(vec![REQUEST_PUBLIC_KEY]))
                }
                other => Err(MySqlError::Auth(format!(
                    "missing or invalid auth more data status: {:?}",
                    other
                ))),
            },
            Stage::RequestedPublicKey => {
                let reply = encrypt_password(&self.password, &self.seed, data)?;
                self.stage = Stage::SentFinal;
                Ok(Some(reply))
            }
            Stage::SentFinal => Err(MySqlError::Protocol(
                "unexpected auth data after final caching_sha2_password response".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::RsaPrivateKey;

    fn seed() -> Vec<u8> {
        (1..=20).collect()
    }

    #[test]
    fn test_native_password_known_answer() {
        let result = mysql_native_password(b"secret", &seed());
        assert_eq!(
            result,
            [
                0xb3, 0x2b, 0xb3, 0xa5, 0x83, 0xe1, 0x34, 0x0c, 0x0a, 0x11, 0x08, 0xd5, 0x8b,
                0x1b, 0xe4, 0x97, 0x81, 0xad, 0x8c, 0x2f
            ]
        );
    }

    #[test]
    fn test_caching_sha2_password_known_answer() {
        let result = caching_sha2_password(b"secret", &seed());
        assert_eq!(
            result,
            [
                0x74, 0x6e, 0xbe, 0x20, 0x5d, 0x56, 0xa0, 0x70, 0x7a, 0xcb, 0x3e, 0x79, 0x6e,
                0x83, 0x4e, 0x0d, 0xd7, 0xb1, 0xd6, 0x17, 0x43, 0xb2, 0x6b, 0xd5, 0x20, 0x2c,
                0x7a, 0x62, 0x32, 0x30, 0xc7, 0xc9
            ]
        );
    }

    #[test]
    fn test_empty_password_empty_response() {
        for seed in [Vec::new(), seed(), vec![9; 7]] {
            assert!(AuthPlugin::NativePassword.scramble(b"", &seed).unwrap().is_empty());
            assert!(AuthPlugin::CachingSha2Password.scramble(b"", &seed).unwrap().is_empty());
        }
    }

    #[test]
    fn test_short_seed_rejected() {
        assert!(AuthPlugin::NativePassword.scramble(b"pw", &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_unknown_plugin() {
        assert!(matches!(
            AuthPlugin::from_name("sha256_password"),
            Err(MySqlError::UnsupportedAuthPlugin(_))
        ));
    }

    #[test]
    fn test_xor_password_cycles_seed() {
        let seed = [0x01, 0x02];
        let xored = xor_password_with_seed(b"abc", &seed);
        assert_eq!(xored, vec![b'a' ^ 1, b'b' ^ 2, b'c' ^ 1, 2]);
    }

    #[test]
    fn test_fast_auth_waits_for_ok() {
        let (mut state, response) =
            AuthState::start(CACHING_SHA2_PASSWORD, b"secret", &seed(), false).unwrap();
        assert_eq!(response.len(), 32);
        assert_eq!(state.more_data(&[FAST_AUTH_SUCCESS]).unwrap(), None);
        assert!(state.more_data(&[FAST_AUTH_SUCCESS]).is_err());
    }

    #[test]
    fn test_full_auth_over_tls_sends_cleartext() {
        let (mut state, _) =
            AuthState::start(CACHING_SHA2_PASSWORD, b"secret", &seed(), true).unwrap();
        let reply = state.more_data(&[PERFORM_FULL_AUTHENTICATION]).unwrap();
        assert_eq!(reply, Some(b"secret\0".to_vec()));
    }

    #[test]
    fn test_full_auth_with_public_key() {
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let (mut state, _) =
            AuthState::start(CACHING_SHA2_PASSWORD, b"secret", &seed(), false).unwrap();
        let reply = state.more_data(&[PERFORM_FULL_AUTHENTICATION]).unwrap();
        assert_eq!(reply, Some(vec![REQUEST_PUBLIC_KEY]));

        let encrypted = state.more_data(pem.as_bytes()).unwrap().unwrap();
        let decrypted = private
            .decrypt(rsa::Oaep::new::<Sha1>(), &encrypted)
            .unwrap();
        assert_eq!(decrypted, xor_password_with_seed(b"secret", &seed()));
    }

    #[test]
    fn test_native_rejects_more_data() {
        let (mut state, _) =
            AuthState::start(MYSQL_NATIVE_PASSWORD, b"secret", &seed(), false).unwrap();
        assert!(state.more_data(&[FAST_AUTH_SUCCESS]).is_err());
    }

    #[test]
    fn test_switch_recomputes_with_new_seed() {
        let (mut state, _) =
            AuthState::start(CACHING_SHA2_PASSWORD, b"secret", &[7; 20], false).unwrap();
        let response = state.switch(MYSQL_NATIVE_PASSWORD, &seed()).unwrap();
        assert_eq!(response, mysql_native_password(b"secret", &seed()).to_vec());
        assert_eq!(state.plugin(), AuthPlugin::NativePassword);
    }
}
