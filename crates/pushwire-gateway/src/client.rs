//! Push orchestration.
//!
//! [`GatewayClient::push_all`] runs one batch: open the connection, then for
//! each device encode, write, and poll for an error response; close the
//! connection at the end whether the batch finished or not.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::GatewayConfig;
use crate::connection::{Connection, ConnectionManager, Connector};
use crate::errors::{ConfigurationError, EncodingError, FeedbackError, PushError};
use crate::feedback::{FeedbackEntry, FeedbackService, UnsupportedFeedback};
use crate::frame::{FrameEncoder, IDENTIFIER_RANGE, random_identifier};
use crate::payload::{Device, Message, NotificationPayload};
use crate::response::{ErrorResponse, ResponseDecoder, StatusCode};
use crate::tls::TlsConnector;
use crate::token;

#[allow(clippy::cast_possible_truncation)]
const IDENTIFIER_SPACE: usize = (*IDENTIFIER_RANGE.end() - *IDENTIFIER_RANGE.start() + 1) as usize;

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "index")]
pub enum PushOutcome {
    /// Every device was written.
    AllSubmitted,
    /// The batch stopped at this device; later devices were not attempted.
    FailedAtDevice(usize),
}

/// An error response received during a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRejection {
    /// Identifier echoed by the gateway.
    pub identifier: u32,
    /// Reported status.
    pub status: StatusCode,
    /// Batch index of the rejected notification, when the identifier is known.
    pub device_index: Option<usize>,
    /// Token of the rejected notification, when the identifier is known.
    pub device_token: Option<String>,
}

/// Result of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    /// Devices whose frame was fully written, in order.
    ///
    /// A write only means the transport accepted the bytes; rejections arrive
    /// asynchronously in [`rejections`](Self::rejections).
    pub submitted: Vec<Device>,
    /// Terminal state.
    pub outcome: PushOutcome,
    /// Error responses read during the batch.
    pub rejections: Vec<GatewayRejection>,
}

impl PushReport {
    /// Empty report with the given outcome.
    pub fn new(outcome: PushOutcome) -> Self {
        Self {
            submitted: Vec::new(),
            outcome,
            rejections: Vec::new(),
        }
    }
}

/// Per-batch bookkeeping: identifiers in flight and what has been submitted.
struct Batch {
    identifiers: HashMap<u32, usize>,
    submitted: Vec<Device>,
    rejections: Vec<GatewayRejection>,
}

impl Batch {
    fn new(capacity: usize) -> Self {
        Self {
            identifiers: HashMap::with_capacity(capacity),
            submitted: Vec::with_capacity(capacity),
            rejections: Vec::new(),
        }
    }

    /// Draw an identifier not yet used in this batch, if the range allows.
    fn next_identifier(&self) -> u32 {
        let exhausted = self.identifiers.len() >= IDENTIFIER_SPACE;
        loop {
            let identifier = random_identifier();
            if exhausted || !self.identifiers.contains_key(&identifier) {
                return identifier;
            }
        }
    }

    fn track(&mut self, identifier: u32, index: usize) {
        if let Some(previous) = self.identifiers.insert(identifier, index) {
            debug!(identifier, previous, index, "identifier reused within batch");
        }
    }

    fn into_report(self, outcome: PushOutcome) -> PushReport {
        PushReport {
            submitted: self.submitted,
            outcome,
            rejections: self.rejections,
        }
    }
}

enum BatchFailure {
    Encoding(usize, EncodingError),
    Write(usize, std::io::Error),
}

/// Client for the binary push gateway.
///
/// Holds one connection manager behind an async mutex: batches run one at a
/// time over a single writer.
pub struct GatewayClient {
    config: GatewayConfig,
    encoder: FrameEncoder,
    decoder: ResponseDecoder,
    connections: Mutex<ConnectionManager>,
    feedback: Arc<dyn FeedbackService>,
    last_error: AtomicU8,
}

impl fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClient")
            .field("config", &self.config)
            .field("last_error", &self.last_error_code())
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    /// Create a client that dials the gateway over TLS.
    ///
    /// Fails if the certificate does not exist; no connection is attempted.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigurationError> {
        let connector = Arc::new(TlsConnector::new(
            config.certificate.clone(),
            config.pass_phrase.clone(),
            config.ca_file.clone(),
            config.connect_timeout,
        ));
        Self::with_connector(config, connector)
    }

    /// Create a client with a custom transport.
    pub fn with_connector(
        config: GatewayConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let endpoint = config.endpoint().clone();
        info!(
            environment = %config.environment,
            endpoint = %endpoint,
            certificate = %config.certificate.display(),
            expiry_ttl_secs = config.expiry_ttl.as_secs(),
            "gateway client initialized"
        );

        Ok(Self {
            encoder: FrameEncoder::new(config.expiry_ttl),
            decoder: ResponseDecoder::new(config.response_wait),
            connections: Mutex::new(ConnectionManager::new(connector, endpoint)),
            feedback: Arc::new(UnsupportedFeedback),
            last_error: AtomicU8::new(0),
            config,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Whether `token` can be delivered through this client.
    pub fn supports(&self, token: &str) -> bool {
        token::supports(token)
    }

    /// Last non-zero status seen, or 0 if none since the last batch started.
    pub fn last_error_code(&self) -> u8 {
        self.last_error.load(Ordering::SeqCst)
    }

    /// Invalid-token reports. Always [`FeedbackError::NotSupported`].
    pub async fn feedback(&self) -> Result<Vec<FeedbackEntry>, FeedbackError> {
        self.feedback.fetch().await
    }

    /// Whether the gateway connection is currently open.
    pub async fn is_connected(&self) -> bool {
        self.connections.lock().await.is_open()
    }

    /// Send `message` to every device in order.
    pub async fn push_all(
        &self,
        devices: &[Device],
        message: &Message,
    ) -> Result<PushReport, PushError> {
        let mut connections = self.connections.lock().await;
        self.last_error.store(0, Ordering::SeqCst);

        if devices.is_empty() {
            debug!("empty push, not connecting");
            return Ok(PushReport::new(PushOutcome::AllSubmitted));
        }

        let span = info_span!("push", devices = devices.len());
        self.push_batch(&mut connections, devices, message)
            .instrument(span)
            .await
    }

    async fn push_batch(
        &self,
        connections: &mut ConnectionManager,
        devices: &[Device],
        message: &Message,
    ) -> Result<PushReport, PushError> {
        let connection = connections.open().await?;
        let mut batch = Batch::new(devices.len());
        let result = self
            .run_batch(connection, devices, message, &mut batch)
            .await;
        connections.close().await;

        match result {
            Ok(()) => {
                info!(
                    submitted = batch.submitted.len(),
                    rejections = batch.rejections.len(),
                    "push complete"
                );
                Ok(batch.into_report(PushOutcome::AllSubmitted))
            }
            Err(BatchFailure::Encoding(index, source)) => {
                warn!(index, error = %source, "push aborted: device could not be encoded");
                Err(PushError::Encoding {
                    index,
                    source,
                    report: Box::new(batch.into_report(PushOutcome::FailedAtDevice(index))),
                })
            }
            Err(BatchFailure::Write(index, source)) => {
                warn!(index, error = %source, "push aborted: message could not be delivered");
                Err(PushError::Write {
                    index,
                    source,
                    report: Box::new(batch.into_report(PushOutcome::FailedAtDevice(index))),
                })
            }
        }
    }

    async fn run_batch(
        &self,
        connection: &mut Connection,
        devices: &[Device],
        message: &Message,
        batch: &mut Batch,
    ) -> Result<(), BatchFailure> {
        for (index, device) in devices.iter().enumerate() {
            let identifier = batch.next_identifier();
            let payload = NotificationPayload::for_device(device, message);
            let frame = self
                .encoder
                .encode_as(&device.token, &payload, identifier)
                .map_err(|e| BatchFailure::Encoding(index, e))?;

            connection
                .write_frame(frame.as_bytes())
                .await
                .map_err(|e| BatchFailure::Write(index, e))?;
            batch.track(identifier, index);
            debug!(
                index,
                identifier,
                token = %frame.token().prefix(),
                bytes = frame.len(),
                "frame written"
            );

            if let Some(response) = self.decoder.read_pending(connection).await {
                self.record(response, devices, batch);
            }

            batch.submitted.push(device.clone());
        }
        Ok(())
    }

    fn record(&self, response: ErrorResponse, devices: &[Device], batch: &mut Batch) {
        if !response.status.is_error() {
            debug!(identifier = response.identifier, "gateway reported no error");
            return;
        }

        self.last_error
            .store(response.status_code(), Ordering::SeqCst);

        let device_index = batch.identifiers.get(&response.identifier).copied();
        let device_token = device_index.map(|i| devices[i].token.clone());
        warn!(
            status = %response.status,
            identifier = response.identifier,
            device_index = ?device_index,
            "gateway rejected notification"
        );

        batch.rejections.push(GatewayRejection {
            identifier: response.identifier,
            status: response.status,
            device_index,
            device_token,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use assert_matches::assert_matches;

    use super::*;
    use crate::connection::testing::ScriptedConnector;
    use crate::connection::{Endpoint, Environment};
    use crate::frame::decode_frame;

    fn token(n: u8) -> String {
        format!("{n:02x}").repeat(32)
    }

    fn client(connector: &Arc<ScriptedConnector>) -> (GatewayClient, tempfile::NamedTempFile) {
        let cert = tempfile::NamedTempFile::new().unwrap();
        let config = GatewayConfig::new(cert.path());
        let client = GatewayClient::with_connector(config, connector.clone()).unwrap();
        (client, cert)
    }

    #[test]
    fn missing_certificate_fails_before_connecting() {
        let connector = ScriptedConnector::shared();
        let config = GatewayConfig::new(PathBuf::from("/nonexistent/bundle.pem"));
        let result = GatewayClient::with_connector(config, connector.clone());
        assert_matches!(result, Err(ConfigurationError::CertificateNotFound { .. }));
        assert_eq!(connector.connect_count(), 0);
    }

    #[test]
    fn tls_client_checks_certificate() {
        let config = GatewayConfig::new("/nonexistent/bundle.pem");
        assert_matches!(
            GatewayClient::new(config),
            Err(ConfigurationError::CertificateNotFound { .. })
        );
    }

    #[test]
    fn config_is_kept_after_validation() {
        let connector = ScriptedConnector::shared();
        let cert = tempfile::NamedTempFile::new().unwrap();
        let config = GatewayConfig::new(cert.path()).with_environment(Environment::Production);
        let client = GatewayClient::with_connector(config, connector).unwrap();

        assert_eq!(client.config().environment, Environment::Production);
        assert_eq!(client.config().certificate, cert.path());
        assert_eq!(client.config().endpoint(), &Endpoint::production());
    }

    #[tokio::test]
    async fn pushes_every_device_then_closes() {
        let connector = ScriptedConnector::shared();
        let (client, _cert) = client(&connector);
        let devices = vec![Device::new(token(1)), Device::new(token(2)).with_badge(2)];
        let message = Message::new("Hello").with_badge(1);

        let report = client.push_all(&devices, &message).await.unwrap();

        assert_eq!(report.outcome, PushOutcome::AllSubmitted);
        assert_eq!(report.submitted, devices);
        assert!(report.rejections.is_empty());
        assert_eq!(client.last_error_code(), 0);
        assert!(!client.is_connected().await);

        let state = connector.state();
        assert!(state.shut_down);
        assert_eq!(state.frames.len(), 2);
        let second = decode_frame(&state.frames[1]).unwrap();
        assert_eq!(second.token.to_hex(), token(2));
        let payload: serde_json::Value = serde_json::from_slice(&second.payload).unwrap();
        assert_eq!(payload["aps"]["badge"], 3);
        assert_eq!(payload["aps"]["alert"], "Hello");
    }

    #[tokio::test]
    async fn write_failure_halts_batch() {
        let connector = ScriptedConnector::shared();
        connector.state().fail_write_at = Some(1);
        let (client, _cert) = client(&connector);
        let devices = vec![
            Device::new(token(1)),
            Device::new(token(2)),
            Device::new(token(3)),
        ];

        let err = client
            .push_all(&devices, &Message::new("Hi"))
            .await
            .unwrap_err();

        assert_matches!(err, PushError::Write { index: 1, .. });
        let report = err.report().unwrap();
        assert_eq!(report.outcome, PushOutcome::FailedAtDevice(1));
        assert_eq!(report.submitted, vec![devices[0].clone()]);

        let state = connector.state();
        assert_eq!(state.frames.len(), 1);
        assert!(state.shut_down);
        drop(state);
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn invalid_token_halts_batch() {
        let connector = ScriptedConnector::shared();
        let (client, _cert) = client(&connector);
        let devices = vec![Device::new(token(1)), Device::new("not-a-token")];

        let err = client
            .push_all(&devices, &Message::new("Hi"))
            .await
            .unwrap_err();

        assert_matches!(err, PushError::Encoding { index: 1, .. });
        assert_eq!(err.report().unwrap().submitted.len(), 1);
        assert!(connector.state().shut_down);
    }

    #[tokio::test]
    async fn rejection_is_correlated_to_device() {
        let connector = ScriptedConnector::shared();
        connector.state().reject_frame = Some((1, 8));
        let (client, _cert) = client(&connector);
        let devices = vec![
            Device::new(token(1)),
            Device::new(token(2)),
            Device::new(token(3)),
        ];

        let (logs, _guard) = pushwire_logging::test_utils::capture_logs();
        let report = client
            .push_all(&devices, &Message::new("Hi"))
            .await
            .unwrap();

        assert_eq!(report.outcome, PushOutcome::AllSubmitted);
        assert_eq!(report.submitted.len(), 3);
        assert_eq!(client.last_error_code(), 8);
        assert!(logs.has_event(tracing::Level::WARN, "gateway rejected notification"));

        let second = decode_frame(&connector.state().frames[1]).unwrap();
        let rejection = &report.rejections[0];
        assert_eq!(rejection.identifier, second.identifier);
        assert_eq!(rejection.status, StatusCode::InvalidToken);
        assert_eq!(rejection.device_index, Some(1));
        assert_eq!(rejection.device_token.as_deref(), Some(token(2).as_str()));
    }

    #[test]
    fn unknown_identifier_has_no_device() {
        let connector = ScriptedConnector::shared();
        let (client, _cert) = client(&connector);
        let devices = [Device::new(token(1))];
        let mut batch = Batch::new(1);
        batch.track(42, 0);

        let response = ErrorResponse {
            status: StatusCode::ProcessingError,
            identifier: 43,
        };
        client.record(response, &devices, &mut batch);

        assert_eq!(client.last_error_code(), 1);
        assert_eq!(batch.rejections[0].device_index, None);
        assert_eq!(batch.rejections[0].device_token, None);
    }

    #[tokio::test]
    async fn error_response_is_recorded_and_batch_continues() {
        let connector = ScriptedConnector::shared();
        connector.state().reads.push_back(vec![8, 7, 0, 0, 0x27, 0x0f]);
        let (client, _cert) = client(&connector);
        let devices = vec![Device::new(token(1)), Device::new(token(2))];

        let report = client
            .push_all(&devices, &Message::new("Hi"))
            .await
            .unwrap();

        assert_eq!(report.outcome, PushOutcome::AllSubmitted);
        assert_eq!(report.submitted.len(), 2);
        assert_eq!(client.last_error_code(), 7);
        assert_eq!(report.rejections.len(), 1);
        assert_eq!(report.rejections[0].identifier, 9999);
        assert_eq!(report.rejections[0].status, StatusCode::InvalidPayloadSize);
    }

    #[tokio::test]
    async fn status_zero_is_not_an_error() {
        let connector = ScriptedConnector::shared();
        connector.state().reads.push_back(vec![8, 0, 0, 0, 0, 1]);
        let (client, _cert) = client(&connector);

        let report = client
            .push_all(&[Device::new(token(1))], &Message::new("Hi"))
            .await
            .unwrap();

        assert!(report.rejections.is_empty());
        assert_eq!(client.last_error_code(), 0);
    }

    #[tokio::test]
    async fn last_error_resets_per_batch() {
        let connector = ScriptedConnector::shared();
        connector.state().reads.push_back(vec![8, 8, 0, 0, 0, 1]);
        let (client, _cert) = client(&connector);
        let devices = [Device::new(token(1))];

        let _ = client.push_all(&devices, &Message::new("a")).await.unwrap();
        assert_eq!(client.last_error_code(), 8);

        let _ = client.push_all(&devices, &Message::new("b")).await.unwrap();
        assert_eq!(client.last_error_code(), 0);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn connection_failure_is_fatal() {
        let connector = Arc::new(ScriptedConnector {
            refuse: true,
            ..ScriptedConnector::default()
        });
        let (client, _cert) = client(&connector);

        let err = client
            .push_all(&[Device::new(token(1))], &Message::new("Hi"))
            .await
            .unwrap_err();
        assert_matches!(err, PushError::Connection(_));
        assert!(err.report().is_none());
    }

    #[tokio::test]
    async fn empty_push_does_not_connect() {
        let connector = ScriptedConnector::shared();
        let (client, _cert) = client(&connector);

        let report = client.push_all(&[], &Message::new("Hi")).await.unwrap();
        assert_eq!(report.outcome, PushOutcome::AllSubmitted);
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn feedback_is_not_supported() {
        let connector = ScriptedConnector::shared();
        let (client, _cert) = client(&connector);
        assert_eq!(client.feedback().await, Err(FeedbackError::NotSupported));
    }

    #[test]
    fn identifiers_are_unique_within_batch() {
        let mut batch = Batch::new(100);
        for index in 0..100 {
            let identifier = batch.next_identifier();
            assert!(!batch.identifiers.contains_key(&identifier));
            batch.track(identifier, index);
        }
        assert_eq!(batch.identifiers.len(), 100);
    }

    #[test]
    fn report_serializes_outcome() {
        let report = PushReport::new(PushOutcome::FailedAtDevice(2));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"]["state"], "failedAtDevice");
        assert_eq!(json["outcome"]["index"], 2);
    }
}
