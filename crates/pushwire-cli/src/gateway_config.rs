//! Builds a [`GatewayConfig`] from loaded settings and command-line flags.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use pushwire_gateway::{Endpoint, Environment, GatewayConfig};
use pushwire_settings::{EndpointSettings, GatewaySettings};

/// Flags that take precedence over settings.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub certificate: Option<PathBuf>,
    pub environment: Option<Environment>,
}

fn endpoint(settings: &EndpointSettings) -> Endpoint {
    Endpoint::new(settings.host.clone(), settings.port)
}

/// Merge settings and flags into a client configuration.
pub fn gateway_config(settings: &GatewaySettings, overrides: &Overrides) -> Result<GatewayConfig> {
    let Some(certificate) = overrides
        .certificate
        .clone()
        .or_else(|| settings.certificate.as_ref().map(PathBuf::from))
    else {
        bail!("no certificate configured: pass --certificate or set PUSHWIRE_CERTIFICATE");
    };

    let mut config = GatewayConfig::new(certificate)
        .with_environment(overrides.environment.unwrap_or(settings.environment));
    if let Some(pass_phrase) = &settings.pass_phrase {
        config = config.with_pass_phrase(pass_phrase.clone());
    }
    config.production_endpoint = endpoint(&settings.production_endpoint);
    config.sandbox_endpoint = endpoint(&settings.sandbox_endpoint);
    config.ca_file = settings.ca_file.as_ref().map(PathBuf::from);
    config.connect_timeout = Duration::from_millis(settings.connect_timeout_ms);
    config.response_wait = Duration::from_millis(settings.response_wait_ms);
    config.expiry_ttl = Duration::from_secs(settings.expiry_secs);
    Ok(config)
}
