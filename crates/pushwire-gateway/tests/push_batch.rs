#![allow(missing_docs, unused_results)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pushwire_gateway::frame::{DecodedFrame, ENVELOPE_HEADER_LEN, decode_frame};
use pushwire_gateway::{
    Connector, Device, Endpoint, ErrorResponse, GatewayClient, GatewayConfig, GatewayStream,
    Message, PushOutcome, StatusCode,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

/// In-memory gateway: decodes every frame and optionally rejects one.
#[derive(Default)]
struct FakeGateway {
    reject: Option<(usize, StatusCode)>,
    sessions: Mutex<Vec<JoinHandle<Vec<DecodedFrame>>>>,
}

impl FakeGateway {
    fn rejecting(index: usize, status: StatusCode) -> Arc<Self> {
        Arc::new(Self {
            reject: Some((index, status)),
            ..Self::default()
        })
    }

    async fn sessions(&self) -> Vec<Vec<DecodedFrame>> {
        let handles = std::mem::take(&mut *self.sessions.lock().unwrap());
        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }
        sessions
    }
}

async fn serve(mut stream: DuplexStream, reject: Option<(usize, StatusCode)>) -> Vec<DecodedFrame> {
    let mut frames = Vec::new();
    loop {
        let mut header = [0u8; ENVELOPE_HEADER_LEN];
        if stream.read_exact(&mut header).await.is_err() {
            return frames;
        }
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();

        let mut bytes = header.to_vec();
        bytes.extend_from_slice(&body);
        let frame = decode_frame(&bytes).unwrap();

        if let Some((index, status)) = reject {
            if index == frames.len() {
                let response = ErrorResponse {
                    status,
                    identifier: frame.identifier,
                };
                stream.write_all(&response.to_bytes()).await.unwrap();
            }
        }
        frames.push(frame);
    }
}

#[async_trait]
impl Connector for FakeGateway {
    async fn connect(
        &self,
        _endpoint: &Endpoint,
    ) -> Result<Box<dyn GatewayStream>, pushwire_gateway::ConnectionError> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let handle = tokio::spawn(serve(server, self.reject));
        self.sessions.lock().unwrap().push(handle);
        Ok(Box::new(client))
    }
}

fn token(n: u8) -> String {
    format!("{n:02x}").repeat(32)
}

fn gateway_client(gateway: Arc<FakeGateway>) -> (GatewayClient, tempfile::NamedTempFile) {
    let cert = tempfile::NamedTempFile::new().unwrap();
    let mut config = GatewayConfig::new(cert.path());
    config.response_wait = Duration::from_millis(200);
    let client = GatewayClient::with_connector(config, gateway).unwrap();
    (client, cert)
}

#[tokio::test(start_paused = true)]
async fn batch_reaches_gateway_in_order() {
    let gateway = Arc::new(FakeGateway::default());
    let (client, _cert) = gateway_client(gateway.clone());
    let devices: Vec<Device> = (1..=3).map(|n| Device::new(token(n)).with_badge(1)).collect();
    let message = Message::new("Build finished")
        .with_badge(2)
        .with_custom("build", serde_json::json!(42));

    let report = client.push_all(&devices, &message).await.unwrap();
    assert_eq!(report.outcome, PushOutcome::AllSubmitted);
    assert_eq!(report.submitted, devices);
    assert!(report.rejections.is_empty());

    let sessions = gateway.sessions().await;
    assert_eq!(sessions.len(), 1);
    let frames = &sessions[0];
    assert_eq!(frames.len(), 3);
    for (n, frame) in frames.iter().enumerate() {
        assert_eq!(frame.token.to_hex(), devices[n].token);
        assert_eq!(frame.priority, 10);
        let payload: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(payload["aps"]["alert"], "Build finished");
        assert_eq!(payload["aps"]["badge"], 3);
        assert_eq!(payload["aps"]["sound"], "default");
        assert_eq!(payload["build"], 42);
    }
}

#[tokio::test(start_paused = true)]
async fn rejection_names_the_device() {
    let gateway = FakeGateway::rejecting(0, StatusCode::InvalidToken);
    let (client, _cert) = gateway_client(gateway.clone());
    let devices = vec![Device::new(token(7)), Device::new(token(8))];

    let report = client
        .push_all(&devices, &Message::new("Hi"))
        .await
        .unwrap();

    assert_eq!(report.submitted.len(), 2);
    assert_eq!(client.last_error_code(), 8);
    assert_eq!(report.rejections.len(), 1);
    assert_eq!(report.rejections[0].device_index, Some(0));
    assert_eq!(
        report.rejections[0].device_token.as_deref(),
        Some(token(7).as_str())
    );

    let sessions = gateway.sessions().await;
    assert_eq!(sessions[0][0].identifier, report.rejections[0].identifier);
}

#[tokio::test(start_paused = true)]
async fn each_batch_uses_a_fresh_connection() {
    let gateway = Arc::new(FakeGateway::default());
    let (client, _cert) = gateway_client(gateway.clone());
    let devices = [Device::new(token(1))];

    client.push_all(&devices, &Message::new("one")).await.unwrap();
    client.push_all(&devices, &Message::new("two")).await.unwrap();

    let sessions = gateway.sessions().await;
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|frames| frames.len() == 1));
}

#[tokio::test(start_paused = true)]
async fn concurrent_batches_do_not_interleave() {
    let gateway = Arc::new(FakeGateway::default());
    let (client, _cert) = gateway_client(gateway.clone());
    let client = Arc::new(client);

    let first: Vec<Device> = (1..=3).map(|n| Device::new(token(n))).collect();
    let second: Vec<Device> = (4..=6).map(|n| Device::new(token(n))).collect();

    let a = {
        let client = client.clone();
        let devices = first.clone();
        tokio::spawn(async move { client.push_all(&devices, &Message::new("a")).await })
    };
    let b = {
        let client = client.clone();
        let devices = second.clone();
        tokio::spawn(async move { client.push_all(&devices, &Message::new("b")).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    for frames in gateway.sessions().await {
        assert_eq!(frames.len(), 3);
        let tokens: Vec<String> = frames.iter().map(|f| f.token.to_hex()).collect();
        let expected_first: Vec<String> = first.iter().map(|d| d.token.clone()).collect();
        let expected_second: Vec<String> = second.iter().map(|d| d.token.clone()).collect();
        assert!(tokens == expected_first || tokens == expected_second);
    }
}
