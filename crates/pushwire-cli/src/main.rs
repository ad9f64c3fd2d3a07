//! # pushwire
//!
//! Command-line client for the binary push gateway.

#![deny(unsafe_code)]

mod gateway_config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use pushwire_gateway::{Device, Environment, GatewayClient, Message, PushError};
use serde_json::Value;

use crate::gateway_config::{Overrides, gateway_config};

/// Push gateway client.
#[derive(Parser, Debug)]
#[command(name = "pushwire", about = "Send notifications through the binary push gateway")]
struct Cli {
    /// Settings file (defaults to `~/.pushwire/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter, overriding settings (e.g. `debug`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message to a list of devices.
    Push(PushArgs),
    /// Check whether a device token can be delivered.
    CheckToken {
        /// Hex device token.
        token: String,
    },
    /// Print the effective settings.
    Settings,
}

#[derive(Args, Debug)]
struct PushArgs {
    /// Device as `HEX` or `HEX:BADGE_OFFSET`. Repeatable.
    #[arg(long = "token", required = true, value_parser = parse_device)]
    devices: Vec<Device>,

    /// Alert text.
    #[arg(long)]
    text: String,

    /// Badge value added to each device's offset.
    #[arg(long, allow_negative_numbers = true)]
    badge: Option<i64>,

    /// Custom payload field as `KEY=VALUE`; VALUE is JSON if it parses. Repeatable.
    #[arg(long = "data", value_parser = parse_data)]
    data: Vec<(String, Value)>,

    /// Use the sandbox gateway.
    #[arg(long, conflicts_with = "production")]
    sandbox: bool,

    /// Use the production gateway.
    #[arg(long)]
    production: bool,

    /// Certificate bundle, overriding settings.
    #[arg(long)]
    certificate: Option<PathBuf>,
}

impl PushArgs {
    fn environment(&self) -> Option<Environment> {
        match (self.sandbox, self.production) {
            (true, _) => Some(Environment::Sandbox),
            (_, true) => Some(Environment::Production),
            _ => None,
        }
    }

    fn message(&self) -> Message {
        let mut message = Message::new(self.text.clone());
        if let Some(badge) = self.badge {
            message = message.with_badge(badge);
        }
        for (key, value) in &self.data {
            message = message.with_custom(key.clone(), value.clone());
        }
        message
    }
}

/// Parse `HEX` or `HEX:BADGE_OFFSET`.
fn parse_device(arg: &str) -> Result<Device, String> {
    let (token, badge) = match arg.split_once(':') {
        Some((token, badge)) => {
            let badge = badge
                .parse::<i64>()
                .map_err(|e| format!("invalid badge offset '{badge}': {e}"))?;
            (token, Some(badge))
        }
        None => (arg, None),
    };
    if !pushwire_gateway::token::supports(token) {
        return Err(format!("'{token}' is not a 64-character hex device token"));
    }
    let device = Device::new(token);
    Ok(match badge {
        Some(badge) => device.with_badge(badge),
        None => device,
    })
}

/// Parse `KEY=VALUE`, reading VALUE as JSON when possible.
fn parse_data(arg: &str) -> Result<(String, Value), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{arg}'"))?;
    if key.is_empty() {
        return Err("custom field key must not be empty".into());
    }
    if key == "aps" {
        return Err("'aps' is reserved".into());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

async fn push(args: &PushArgs, settings: &pushwire_settings::PushwireSettings) -> Result<ExitCode> {
    let overrides = Overrides {
        certificate: args.certificate.clone(),
        environment: args.environment(),
    };
    let config = gateway_config(&settings.gateway, &overrides)?;
    let client = GatewayClient::new(config).context("Invalid gateway configuration")?;
    tracing::info!(
        endpoint = %client.config().endpoint(),
        devices = args.devices.len(),
        "pushing"
    );

    match client.push_all(&args.devices, &args.message()).await {
        Ok(report) => {
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            if let Some(report) = err.report() {
                print_json(report)?;
            }
            let err = match err {
                PushError::Connection(source) => {
                    anyhow!(source).context("Failed to connect to the gateway")
                }
                other => anyhow!(other).context("Push aborted"),
            };
            Err(err)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(pushwire_settings::settings_path);
    let settings = pushwire_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(settings.logging.level.as_str());
    pushwire_logging::init_subscriber(level, settings.logging.format);
    tracing::debug!(path = %settings_path.display(), "settings loaded");

    match &args.command {
        Command::Push(push_args) => push(push_args, &settings).await,
        Command::CheckToken { token } => {
            let supported = pushwire_gateway::token::supports(token);
            println!("{}", if supported { "supported" } else { "unsupported" });
            Ok(if supported {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Settings => {
            print_json(&settings.redacted())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
