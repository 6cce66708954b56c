//! TLS client setup for the in-handshake upgrade.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::stream::MySqlStream;
use crate::config::MySqlConfig;
use crate::error::{MySqlError, MySqlResult};

/// Everything needed to wrap the transport once the server accepts the SSL request.
#[derive(Clone)]
pub struct TlsSettings {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl TlsSettings {
    pub fn from_config(config: &MySqlConfig) -> MySqlResult<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| MySqlError::Tls(e.to_string()))?;

        let tls_config = if config.accept_invalid_certs {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoCertVerifier { provider }))
                .with_no_client_auth()
        } else {
            builder
                .with_root_certificates(root_store(config)?)
                .with_no_client_auth()
        };

        let server_name = ServerName::try_from(config.server_name().to_string())
            .map_err(|_| MySqlError::Tls(format!("invalid server name: {}", config.server_name())))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(tls_config)),
            server_name,
        })
    }

    /// Run the TLS handshake over `stream`.
    pub async fn upgrade(&self, stream: MySqlStream) -> MySqlResult<MySqlStream> {
        debug!(server_name = ?self.server_name, "starting TLS handshake");
        let tls_stream = self
            .connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(|e| MySqlError::Tls(format!("handshake failed: {}", e)))?;
        Ok(MySqlStream::Tls(Box::new(tls_stream)))
    }
}

fn root_store(config: &MySqlConfig) -> MySqlResult<RootCertStore> {
    let mut roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(path) = &config.root_cert_path {
        let pem = std::fs::read(path)?;
        let certs = rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| MySqlError::Tls(format!("invalid certificate in {}: {}", path, e)))?;
        if certs.is_empty() {
            return Err(MySqlError::Tls(format!("no certificates found in {}", path)));
        }
        for cert in certs {
            roots
                .add(cert)
                .map_err(|e| MySqlError::Tls(format!("rejected root certificate: {}", e)))?;
        }
    }
    Ok(roots)
}

/// Accepts any server certificate; handshake signatures are still checked.
#[derive(Debug)]
struct NoCertVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
