//! TLS transport with client-certificate authentication.
//!
//! The certificate bundle is a PEM file holding the client certificate chain
//! and its private key. An `ENCRYPTED PRIVATE KEY` (PKCS#8) block is
//! decrypted with the configured passphrase. The bundle is loaded on every
//! dial, so a replaced file is picked up by the next connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::connection::{Connector, Endpoint, GatewayStream};
use crate::errors::ConnectionError;

const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// Dials the gateway over TCP and performs the TLS handshake.
pub struct TlsConnector {
    certificate: PathBuf,
    pass_phrase: Option<SecretString>,
    ca_file: Option<PathBuf>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("certificate", &self.certificate)
            .field("has_pass_phrase", &self.pass_phrase.is_some())
            .field("ca_file", &self.ca_file)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl TlsConnector {
    /// Create a connector. Nothing is read from disk until [`Connector::connect`].
    pub fn new(
        certificate: PathBuf,
        pass_phrase: Option<SecretString>,
        ca_file: Option<PathBuf>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            certificate,
            pass_phrase,
            ca_file,
            connect_timeout,
        }
    }

    /// Build the rustls client configuration from the bundle.
    pub fn client_config(&self) -> Result<ClientConfig, ConnectionError> {
        let (certs, key) = load_identity(&self.certificate, self.pass_phrase.as_ref())?;
        let roots = load_roots(self.ca_file.as_deref())?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ConnectionError::TlsConfig(format!("protocol versions: {e}")))?
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| ConnectionError::TlsConfig(format!("client certificate: {e}")))
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn GatewayStream>, ConnectionError> {
        let config = self.client_config()?;
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

        let server_name = ServerName::try_from(endpoint.host.clone()).map_err(|e| {
            ConnectionError::Handshake {
                endpoint: endpoint.clone(),
                reason: format!("invalid server name: {e}"),
            }
        })?;

        let tcp = timeout(
            self.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| ConnectionError::Timeout {
            operation: "TCP connect",
            endpoint: endpoint.clone(),
            timeout: self.connect_timeout,
        })?
        .map_err(|source| ConnectionError::Connect {
            endpoint: endpoint.clone(),
            source,
        })?;
        tcp.set_nodelay(true)
            .map_err(|source| ConnectionError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;

        let tls = timeout(self.connect_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| ConnectionError::Timeout {
                operation: "TLS handshake",
                endpoint: endpoint.clone(),
                timeout: self.connect_timeout,
            })?
            .map_err(|e| ConnectionError::Handshake {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        debug!(endpoint = %endpoint, "TLS handshake complete");
        Ok(Box::new(tls))
    }
}

/// Load the client certificate chain and private key from a PEM bundle.
pub fn load_identity(
    path: &Path,
    pass_phrase: Option<&SecretString>,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ConnectionError> {
    let cert_err = |reason: String| ConnectionError::Certificate {
        path: path.to_path_buf(),
        reason,
    };

    let pem = std::fs::read(path).map_err(|e| cert_err(e.to_string()))?;

    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| cert_err(format!("invalid certificate: {e}")))?;
    if certs.is_empty() {
        return Err(cert_err("no certificate found".into()));
    }

    let text = String::from_utf8_lossy(&pem);
    let key = match pem_block(&text, ENCRYPTED_KEY_LABEL) {
        Some(block) => {
            let pass_phrase = pass_phrase
                .ok_or_else(|| cert_err("private key is encrypted but no passphrase is set".into()))?;
            decrypt_pkcs8(block, pass_phrase).map_err(cert_err)?
        }
        None => {
            if pass_phrase.is_some() {
                debug!(path = %path.display(), "passphrase set but private key is not encrypted");
            }
            PrivateKeyDer::from_pem_slice(&pem)
                .map_err(|e| cert_err(format!("invalid private key: {e}")))?
        }
    };

    Ok((certs, key))
}

fn decrypt_pkcs8(block: &str, pass_phrase: &SecretString) -> Result<PrivateKeyDer<'static>, String> {
    let (_, document) =
        pkcs8::der::Document::from_pem(block).map_err(|e| format!("invalid encrypted key: {e}"))?;
    let info = pkcs8::EncryptedPrivateKeyInfo::try_from(document.as_bytes())
        .map_err(|e| format!("invalid encrypted key: {e}"))?;
    let secret = info
        .decrypt(pass_phrase.expose_secret().as_bytes())
        .map_err(|e| format!("failed to decrypt private key: {e}"))?;
    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        secret.as_bytes().to_vec(),
    )))
}

/// Locate the first PEM block with `label`, including its armor lines.
fn pem_block<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let start = text.find(&begin)?;
    let stop = start + text[start..].find(&end)? + end.len();
    Some(&text[start..stop])
}

fn load_roots(ca_file: Option<&Path>) -> Result<RootCertStore, ConnectionError> {
    let mut roots = RootCertStore::empty();
    let Some(path) = ca_file else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(roots);
    };

    let ca_err = |reason: String| ConnectionError::Certificate {
        path: path.to_path_buf(),
        reason,
    };
    let pem = std::fs::read(path).map_err(|e| ca_err(e.to_string()))?;
    for cert in CertificateDer::pem_slice_iter(&pem) {
        let cert = cert.map_err(|e| ca_err(format!("invalid CA certificate: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| ca_err(format!("failed to add CA certificate: {e}")))?;
    }
    if roots.is_empty() {
        return Err(ca_err("no CA certificate found".into()));
    }
    Ok(roots)
}
