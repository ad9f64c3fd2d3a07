//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`,
//! so a partial file only overrides what it names.

use pushwire_gateway::Environment;
use pushwire_logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Placeholder shown instead of a configured passphrase.
pub const REDACTED: &str = "[redacted]";

/// Root settings type.
///
/// ```json
/// {
///   "gateway": { "certificate": "/etc/pushwire/bundle.pem", "environment": "production" },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PushwireSettings {
    /// Gateway connection settings.
    pub gateway: GatewaySettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl PushwireSettings {
    /// Copy with the passphrase masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.gateway.pass_phrase.is_some() {
            copy.gateway.pass_phrase = Some(REDACTED.to_string());
        }
        copy
    }
}

/// A `host:port` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSettings {
    /// Host name, also used for TLS server name verification.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl EndpointSettings {
    fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: 2195,
        }
    }
}

/// Gateway connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// PEM bundle with client certificate and private key.
    pub certificate: Option<String>,
    /// Passphrase for an encrypted private key.
    pub pass_phrase: Option<String>,
    /// Selected gateway.
    pub environment: Environment,
    /// Production gateway address.
    pub production_endpoint: EndpointSettings,
    /// Sandbox gateway address.
    pub sandbox_endpoint: EndpointSettings,
    /// CA bundle replacing the built-in roots.
    pub ca_file: Option<String>,
    /// TCP connect and TLS handshake bound.
    pub connect_timeout_ms: u64,
    /// Post-write wait for an error response; 0 means poll only.
    pub response_wait_ms: u64,
    /// Notification time-to-live.
    pub expiry_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            certificate: None,
            pass_phrase: None,
            environment: Environment::default(),
            production_endpoint: EndpointSettings::new("gateway.push.apple.com"),
            sandbox_endpoint: EndpointSettings::new("gateway.sandbox.push.apple.com"),
            ca_file: None,
            connect_timeout_ms: 60_000,
            response_wait_ms: 0,
            expiry_secs: 86_400,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `info` or `pushwire_gateway=debug`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: pushwire_logging::DEFAULT_LEVEL.to_string(),
            format: LogFormat::default(),
        }
    }
}
