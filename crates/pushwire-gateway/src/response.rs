//! Asynchronous error responses.
//!
//! The gateway never acknowledges a frame. When it rejects one it sends a
//! single 6-byte frame `[command=8][status][identifier u32 BE]` and then
//! closes the connection. The response may refer to any earlier frame.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::errors::DecodeError;

/// Command byte of an error response.
pub const ERROR_RESPONSE_COMMAND: u8 = 8;
/// Size of an error response.
pub const ERROR_RESPONSE_LEN: usize = 6;

/// Gateway status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
pub enum StatusCode {
    /// 0
    NoErrors,
    /// 1
    ProcessingError,
    /// 2
    MissingDeviceToken,
    /// 3
    MissingTopic,
    /// 4
    MissingPayload,
    /// 5
    InvalidTokenSize,
    /// 6
    InvalidTopicSize,
    /// 7
    InvalidPayloadSize,
    /// 8
    InvalidToken,
    /// 10: the gateway is closing the connection for maintenance.
    Shutdown,
    /// 255
    Unknown,
    /// Any other value.
    Other(u8),
}

impl StatusCode {
    /// Wire value.
    pub const fn code(self) -> u8 {
        match self {
            Self::NoErrors => 0,
            Self::ProcessingError => 1,
            Self::MissingDeviceToken => 2,
            Self::MissingTopic => 3,
            Self::MissingPayload => 4,
            Self::InvalidTokenSize => 5,
            Self::InvalidTopicSize => 6,
            Self::InvalidPayloadSize => 7,
            Self::InvalidToken => 8,
            Self::Shutdown => 10,
            Self::Unknown => 255,
            Self::Other(code) => code,
        }
    }

    /// Whether this status reports a problem.
    pub const fn is_error(self) -> bool {
        self.code() != 0
    }

    /// Human-readable description.
    pub const fn description(self) -> &'static str {
        match self {
            Self::NoErrors => "no errors encountered",
            Self::ProcessingError => "processing error",
            Self::MissingDeviceToken => "missing device token",
            Self::MissingTopic => "missing topic",
            Self::MissingPayload => "missing payload",
            Self::InvalidTokenSize => "invalid token size",
            Self::InvalidTopicSize => "invalid topic size",
            Self::InvalidPayloadSize => "invalid payload size",
            Self::InvalidToken => "invalid token",
            Self::Shutdown => "shutdown",
            Self::Unknown => "none (unknown)",
            Self::Other(_) => "unrecognized status",
        }
    }
}

impl From<u8> for StatusCode {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::NoErrors,
            1 => Self::ProcessingError,
            2 => Self::MissingDeviceToken,
            3 => Self::MissingTopic,
            4 => Self::MissingPayload,
            5 => Self::InvalidTokenSize,
            6 => Self::InvalidTopicSize,
            7 => Self::InvalidPayloadSize,
            8 => Self::InvalidToken,
            10 => Self::Shutdown,
            255 => Self::Unknown,
            other => Self::Other(other),
        }
    }
}

impl From<StatusCode> for u8 {
    fn from(status: StatusCode) -> Self {
        status.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

/// A decoded error-response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Status reported by the gateway.
    pub status: StatusCode,
    /// Identifier of the notification the status refers to.
    pub identifier: u32,
}

impl ErrorResponse {
    /// Decode a 6-byte response frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let [command, status, a, b, c, d] = *bytes else {
            return Err(DecodeError::Truncated {
                needed: ERROR_RESPONSE_LEN,
                actual: bytes.len(),
            });
        };
        if command != ERROR_RESPONSE_COMMAND {
            return Err(DecodeError::UnexpectedCommand {
                expected: ERROR_RESPONSE_COMMAND,
                actual: command,
            });
        }
        Ok(Self {
            status: StatusCode::from(status),
            identifier: u32::from_be_bytes([a, b, c, d]),
        })
    }

    /// Encode back into wire form.
    pub fn to_bytes(&self) -> [u8; ERROR_RESPONSE_LEN] {
        let [a, b, c, d] = self.identifier.to_be_bytes();
        [ERROR_RESPONSE_COMMAND, self.status.code(), a, b, c, d]
    }

    /// Raw status byte.
    pub const fn status_code(&self) -> u8 {
        self.status.code()
    }
}

/// Reads pending error responses without stalling the caller.
#[derive(Debug, Clone, Copy)]
pub struct ResponseDecoder {
    wait: Duration,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl ResponseDecoder {
    /// Decoder that waits at most `wait` for bytes to arrive.
    pub const fn new(wait: Duration) -> Self {
        Self { wait }
    }

    /// Read an error response if one is available.
    ///
    /// Returns `None` when nothing has arrived yet, on EOF, on a read error,
    /// or when the bytes do not form a valid response. A response split
    /// across reads is buffered on the connection and completed later.
    pub async fn read_pending(&self, conn: &mut Connection) -> Option<ErrorResponse> {
        let mut chunk = [0u8; ERROR_RESPONSE_LEN];

        while conn.partial_response.len() < ERROR_RESPONSE_LEN {
            let needed = ERROR_RESPONSE_LEN - conn.partial_response.len();
            match timeout(self.wait, conn.stream.read(&mut chunk[..needed])).await {
                Err(_) => return None,
                Ok(Ok(0)) => {
                    debug!(endpoint = %conn.endpoint(), "gateway closed the stream");
                    return None;
                }
                Ok(Ok(n)) => conn.partial_response.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => {
                    warn!(endpoint = %conn.endpoint(), error = %e, "error response read failed");
                    return None;
                }
            }
        }

        let frame = std::mem::take(&mut conn.partial_response);
        match ErrorResponse::decode(&frame) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(error = %e, bytes = ?frame, "discarding malformed error response");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connection::testing::ScriptedConnector;
    use crate::connection::{ConnectionManager, Endpoint};

    #[test]
    fn decode_no_error() {
        let response = ErrorResponse::decode(&[8, 0, 0, 0, 0, 1]).unwrap();
        assert_eq!(response.status_code(), 0);
        assert_eq!(response.status, StatusCode::NoErrors);
        assert!(!response.status.is_error());
    }

    #[test]
    fn decode_invalid_payload_size() {
        let response = ErrorResponse::decode(&[8, 7, 0, 0, 0, 1]).unwrap();
        assert_eq!(response.status_code(), 7);
        assert_eq!(response.status, StatusCode::InvalidPayloadSize);
        assert_eq!(response.identifier, 1);
    }

    #[test]
    fn decode_big_endian_identifier() {
        let response = ErrorResponse::decode(&[8, 8, 0x01, 0x02, 0x03, 0x04]).unwrap();
        assert_eq!(response.identifier, 0x0102_0304);
        assert_eq!(response.to_bytes(), [8, 8, 1, 2, 3, 4]);
    }

    #[test]
    fn decode_rejects_other_commands() {
        assert_eq!(
            ErrorResponse::decode(&[2, 7, 0, 0, 0, 1]),
            Err(DecodeError::UnexpectedCommand {
                expected: 8,
                actual: 2
            })
        );
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert_eq!(
            ErrorResponse::decode(&[8, 7, 0]),
            Err(DecodeError::Truncated {
                needed: 6,
                actual: 3
            })
        );
    }

    #[test]
    fn status_code_round_trips_through_u8() {
        for code in 0..=u8::MAX {
            assert_eq!(StatusCode::from(code).code(), code);
        }
        assert_eq!(StatusCode::from(9), StatusCode::Other(9));
        assert_eq!(StatusCode::Shutdown.to_string(), "10 (shutdown)");
    }

    async fn open(connector: &Arc<ScriptedConnector>) -> ConnectionManager {
        let mut manager = ConnectionManager::new(connector.clone(), Endpoint::sandbox());
        let _ = manager.open().await.unwrap();
        manager
    }

    #[tokio::test]
    async fn nothing_pending_is_none() {
        let connector = ScriptedConnector::shared();
        let mut manager = open(&connector).await;
        let conn = manager.open().await.unwrap();

        assert!(ResponseDecoder::default().read_pending(conn).await.is_none());
    }

    #[tokio::test]
    async fn zero_byte_read_is_none() {
        let connector = ScriptedConnector::shared();
        connector.state().eof = true;
        let mut manager = open(&connector).await;
        let conn = manager.open().await.unwrap();

        assert!(ResponseDecoder::default().read_pending(conn).await.is_none());
    }

    #[tokio::test]
    async fn complete_frame_is_decoded() {
        let connector = ScriptedConnector::shared();
        connector.state().reads.push_back(vec![8, 8, 0, 0, 0x12, 0x34]);
        let mut manager = open(&connector).await;
        let conn = manager.open().await.unwrap();

        let response = ResponseDecoder::default().read_pending(conn).await.unwrap();
        assert_eq!(response.status, StatusCode::InvalidToken);
        assert_eq!(response.identifier, 0x1234);
    }

    #[tokio::test]
    async fn split_frame_is_completed_on_next_read() {
        let connector = ScriptedConnector::shared();
        connector.state().reads.push_back(vec![8, 7, 0]);
        let mut manager = open(&connector).await;
        let decoder = ResponseDecoder::default();

        let conn = manager.open().await.unwrap();
        assert!(decoder.read_pending(conn).await.is_none());

        connector.state().reads.push_back(vec![0, 0, 9]);
        let response = decoder.read_pending(conn).await.unwrap();
        assert_eq!(response.status_code(), 7);
        assert_eq!(response.identifier, 9);
        assert!(conn.partial_response.is_empty());
    }

    #[tokio::test]
    async fn malformed_frame_is_discarded() {
        let connector = ScriptedConnector::shared();
        connector.state().reads.push_back(vec![1, 7, 0, 0, 0, 1]);
        let mut manager = open(&connector).await;
        let conn = manager.open().await.unwrap();

        let (logs, _guard) = pushwire_logging::test_utils::capture_logs();
        assert!(ResponseDecoder::default().read_pending(conn).await.is_none());
        assert!(logs.has_event(tracing::Level::WARN, "malformed error response"));
        assert!(conn.partial_response.is_empty());
    }
}
