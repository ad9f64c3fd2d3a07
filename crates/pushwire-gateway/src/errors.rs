//! Gateway error types.
//!
//! Configuration and connection failures are terminal for the caller.
//! Per-device encode or write failures abort the running batch and carry the
//! partial [`PushReport`]. Asynchronous gateway rejections are never raised
//! as errors; they are reported through [`PushReport::rejections`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::client::PushReport;
use crate::connection::Endpoint;

/// Invalid client configuration, detected before any socket is opened.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The certificate bundle does not exist.
    #[error("certificate {} does not exist", path.display())]
    CertificateNotFound {
        /// Configured certificate path.
        path: PathBuf,
    },
    /// A configuration value was rejected.
    #[error("invalid gateway configuration: {0}")]
    InvalidValue(String),
}

/// Failure to establish the gateway connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The certificate bundle could not be read or parsed.
    #[error("failed to load certificate {}: {reason}", path.display())]
    Certificate {
        /// Certificate path.
        path: PathBuf,
        /// Error description.
        reason: String,
    },
    /// TLS client configuration could not be built.
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    /// TCP connect failed.
    #[error("can not connect to gateway {endpoint}: {source}")]
    Connect {
        /// Target endpoint.
        endpoint: Endpoint,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// TLS handshake failed.
    #[error("TLS handshake with {endpoint} failed: {reason}")]
    Handshake {
        /// Target endpoint.
        endpoint: Endpoint,
        /// Error description.
        reason: String,
    },
    /// Connect or handshake did not finish in time.
    #[error("{operation} to {endpoint} timed out after {timeout:?}")]
    Timeout {
        /// Which step timed out.
        operation: &'static str,
        /// Target endpoint.
        endpoint: Endpoint,
        /// Configured bound.
        timeout: Duration,
    },
}

/// A notification could not be encoded into a frame.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// Token is not 64 hexadecimal characters.
    #[error("invalid device token {token:?}: expected 64 hexadecimal characters")]
    InvalidToken {
        /// Offending token, truncated for display.
        token: String,
    },
    /// Payload exceeds the 16-bit item length.
    #[error("payload of {len} bytes exceeds the {max} byte item limit")]
    PayloadTooLarge {
        /// Serialized payload length.
        len: usize,
        /// Largest encodable length.
        max: usize,
    },
    /// Expiry does not fit a 32-bit Unix timestamp.
    #[error("expiry timestamp {0} does not fit in 32 bits")]
    ExpiryOutOfRange(i64),
    /// Payload serialization failed.
    #[error("failed to serialize payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// A binary frame could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer shorter than the layout requires.
    #[error("truncated frame: needed {needed} bytes, got {actual}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        actual: usize,
    },
    /// Leading command byte was not the expected one.
    #[error("unexpected command {actual}, expected {expected}")]
    UnexpectedCommand {
        /// Expected command byte.
        expected: u8,
        /// Received command byte.
        actual: u8,
    },
    /// Outer length disagrees with the body actually present.
    #[error("frame declares {declared} body bytes but carries {actual}")]
    LengthMismatch {
        /// Length field value.
        declared: usize,
        /// Bytes following the header.
        actual: usize,
    },
    /// An item was missing, repeated or malformed.
    #[error("malformed item {id}: {reason}")]
    MalformedItem {
        /// Item id.
        id: u8,
        /// What was wrong.
        reason: &'static str,
    },
}

/// A push batch ended before every device was submitted.
#[derive(Debug, Error)]
pub enum PushError {
    /// The gateway connection could not be opened.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// The frame for device `index` could not be built.
    #[error("device {index} could not be encoded: {source}")]
    Encoding {
        /// Position of the device in the batch.
        index: usize,
        /// Encoding failure.
        #[source]
        source: EncodingError,
        /// Devices submitted before the failure.
        report: Box<PushReport>,
    },
    /// The frame for device `index` could not be written.
    #[error("message could not be delivered to device {index}: {source}")]
    Write {
        /// Position of the device in the batch.
        index: usize,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
        /// Devices submitted before the failure.
        report: Box<PushReport>,
    },
}

impl PushError {
    /// Partial report of a batch that was aborted mid-way.
    ///
    /// `None` when the batch never started (connection failure).
    pub fn report(&self) -> Option<&PushReport> {
        match self {
            Self::Connection(_) => None,
            Self::Encoding { report, .. } | Self::Write { report, .. } => Some(report),
        }
    }
}

/// Feedback channel errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedbackError {
    /// This client does not implement the feedback service.
    #[error("feedback service is not supported by the binary gateway client")]
    NotSupported,
}
