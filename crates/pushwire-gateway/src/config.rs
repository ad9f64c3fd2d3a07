//! Gateway client configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::connection::{Endpoint, Environment};
use crate::errors::ConfigurationError;
use crate::frame::DEFAULT_EXPIRY_TTL;

/// Default bound on TCP connect and TLS handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for [`GatewayClient`](crate::GatewayClient).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// PEM bundle with the client certificate and private key.
    pub certificate: PathBuf,
    /// Passphrase for an encrypted private key.
    pub pass_phrase: Option<SecretString>,
    /// Which gateway to use.
    pub environment: Environment,
    /// Production gateway address.
    pub production_endpoint: Endpoint,
    /// Sandbox gateway address.
    pub sandbox_endpoint: Endpoint,
    /// CA bundle replacing the built-in web PKI roots.
    pub ca_file: Option<PathBuf>,
    /// Bound on TCP connect and on the TLS handshake.
    pub connect_timeout: Duration,
    /// How long the post-write read may wait for an error response.
    pub response_wait: Duration,
    /// Notification time-to-live.
    pub expiry_ttl: Duration,
}

impl GatewayConfig {
    /// Configuration with legacy defaults for the given certificate.
    pub fn new(certificate: impl Into<PathBuf>) -> Self {
        Self {
            certificate: certificate.into(),
            pass_phrase: None,
            environment: Environment::default(),
            production_endpoint: Endpoint::production(),
            sandbox_endpoint: Endpoint::sandbox(),
            ca_file: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_wait: Duration::ZERO,
            expiry_ttl: DEFAULT_EXPIRY_TTL,
        }
    }

    /// Set the private key passphrase.
    pub fn with_pass_phrase(mut self, pass_phrase: impl Into<String>) -> Self {
        self.pass_phrase = Some(SecretString::from(pass_phrase.into()));
        self
    }

    /// Select the gateway environment.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Endpoint selected by the environment.
    pub fn endpoint(&self) -> &Endpoint {
        if self.environment.is_production() {
            &self.production_endpoint
        } else {
            &self.sandbox_endpoint
        }
    }

    /// Check the configuration without touching the network.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.certificate.is_file() {
            return Err(ConfigurationError::CertificateNotFound {
                path: self.certificate.clone(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigurationError::InvalidValue(
                "connect timeout must be positive".into(),
            ));
        }
        let endpoint = self.endpoint();
        if endpoint.host.is_empty() || endpoint.port == 0 {
            return Err(ConfigurationError::InvalidValue(format!(
                "invalid {} endpoint {endpoint}",
                self.environment
            )));
        }
        Ok(())
    }
}
