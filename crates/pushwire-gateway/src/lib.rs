//! # pushwire-gateway
//!
//! Client for the legacy binary push gateway.
//!
//! - **Frames**: command-2 notification frames with token, payload,
//!   identifier, expiry and priority items ([`frame`])
//! - **Connection**: one TLS connection per batch, authenticated with a
//!   client certificate ([`connection`], [`tls`])
//! - **Responses**: non-blocking decoding of asynchronous 6-byte error
//!   responses ([`response`])
//! - **Orchestration**: [`GatewayClient::push_all`] sends a message to a
//!   list of devices and reports what was submitted and what was rejected

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod connection;
pub mod errors;
pub mod feedback;
pub mod frame;
pub mod payload;
pub mod response;
pub mod tls;
pub mod token;

pub use client::{GatewayClient, GatewayRejection, PushOutcome, PushReport};
pub use config::GatewayConfig;
pub use connection::{Connector, Endpoint, Environment, GatewayStream};
pub use errors::{
    ConfigurationError, ConnectionError, DecodeError, EncodingError, FeedbackError, PushError,
};
pub use feedback::FeedbackEntry;
pub use payload::{Device, Message};
pub use response::{ErrorResponse, StatusCode};
pub use token::DeviceToken;
