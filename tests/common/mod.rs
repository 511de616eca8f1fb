//! In-process stub service for integration tests.
//!
//! Speaks the real wire protocol (frames, acks, RPC) over the in-memory
//! pipe transport, so every test exercises the full stack on both sides.
//! Calls from the host are recorded as [`ServiceEvent`]s and answered
//! with canned success replies.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use opshub::host::Connector;
use opshub::rpc::methods::{
    ActionResult, CloseTransaction, CloseTransactionInputs, HostAck, InitializeHostInputs,
    IoResponse, IoResponseCall, IoResponseInputs, IoResponseKind, PageLayout, RenderInstruction,
    SendIoCallInputs, SendLoadingCallInputs, SendLogInputs, SendPageInputs, SendRedirectInputs,
    StartTransaction, StartTransactionInputs, UserInfo,
};
use opshub::rpc::{DuplexRpc, RpcConfig, RpcResponder};
use opshub::socket::{MessageSocket, SocketConfig};
use opshub::ws::{self, Pipe, WireReader, WireWriter};
use opshub::Config;

/// Everything the host sent us, decoded.
#[derive(Debug)]
#[allow(dead_code)] // Not every test consumes every variant's fields.
pub enum ServiceEvent {
    Initialize(InitializeHostInputs),
    Declare(InitializeHostInputs),
    IoCall {
        transaction_id: String,
        raw: String,
        instruction: RenderInstruction,
    },
    Page {
        page_key: String,
        layout: PageLayout,
    },
    Loading(SendLoadingCallInputs),
    Log(SendLogInputs),
    Redirect(SendRedirectInputs),
    Complete {
        transaction_id: String,
        result: ActionResult,
    },
    Shutdown,
}

/// Connector that hands the service side of each dialed pipe to the test.
pub struct PipeConnector {
    tx: mpsc::UnboundedSender<Pipe>,
}

impl PipeConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Pipe>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Connector for PipeConnector {
    async fn connect(
        &self,
        _endpoint: &str,
        _headers: &[(String, String)],
    ) -> anyhow::Result<(Box<dyn WireWriter>, Box<dyn WireReader>)> {
        let (host_end, service_end) = ws::pipe();
        self.tx
            .send(service_end)
            .map_err(|_| anyhow::anyhow!("stub service gone"))?;
        Ok((host_end.writer, host_end.reader))
    }
}

/// Records host calls and answers them with canned replies.
struct RecorderResponder {
    events: mpsc::UnboundedSender<ServiceEvent>,
}

#[async_trait]
impl RpcResponder for RecorderResponder {
    async fn respond(&self, method_name: &str, data: Value) -> Value {
        match method_name {
            "INITIALIZE_HOST" => {
                if let Ok(inputs) = serde_json::from_value::<InitializeHostInputs>(data) {
                    let _ = self.events.send(ServiceEvent::Initialize(inputs));
                }
                json!({
                    "type": "SUCCESS",
                    "environment": "production",
                    "organization": {"name": "Test Org", "slug": "test-org"},
                    "dashboardUrl": "https://dashboard.test/test-org",
                    "invalidSlugs": [],
                    "warnings": [],
                })
            }
            "DECLARE_HOST" => {
                if let Ok(inputs) = serde_json::from_value::<InitializeHostInputs>(data) {
                    let _ = self.events.send(ServiceEvent::Declare(inputs));
                }
                json!({"type": "SUCCESS", "invalidSlugs": []})
            }
            "SEND_IO_CALL" => {
                if let Ok(inputs) = serde_json::from_value::<SendIoCallInputs>(data) {
                    if let Ok(instruction) =
                        serde_json::from_str::<RenderInstruction>(&inputs.io_call)
                    {
                        let _ = self.events.send(ServiceEvent::IoCall {
                            transaction_id: inputs.transaction_id,
                            raw: inputs.io_call,
                            instruction,
                        });
                    }
                }
                json!(true)
            }
            "SEND_PAGE" => {
                if let Ok(inputs) = serde_json::from_value::<SendPageInputs>(data) {
                    if let Ok(layout) = serde_json::from_str::<PageLayout>(&inputs.page) {
                        let _ = self.events.send(ServiceEvent::Page {
                            page_key: inputs.page_key,
                            layout,
                        });
                    }
                }
                json!(true)
            }
            "SEND_LOADING_CALL" => {
                if let Ok(inputs) = serde_json::from_value::<SendLoadingCallInputs>(data) {
                    let _ = self.events.send(ServiceEvent::Loading(inputs));
                }
                json!(true)
            }
            "SEND_LOG" => {
                if let Ok(inputs) = serde_json::from_value::<SendLogInputs>(data) {
                    let _ = self.events.send(ServiceEvent::Log(inputs));
                }
                json!(true)
            }
            "SEND_REDIRECT" => {
                if let Ok(inputs) = serde_json::from_value::<SendRedirectInputs>(data) {
                    let _ = self.events.send(ServiceEvent::Redirect(inputs));
                }
                json!(true)
            }
            "MARK_TRANSACTION_COMPLETE" => {
                if let Ok(inputs) =
                    serde_json::from_value::<opshub::rpc::methods::MarkTransactionCompleteInputs>(
                        data,
                    )
                {
                    if let Ok(result) = serde_json::from_str::<ActionResult>(&inputs.result) {
                        let _ = self.events.send(ServiceEvent::Complete {
                            transaction_id: inputs.transaction_id,
                            result,
                        });
                    }
                }
                json!(true)
            }
            "BEGIN_HOST_SHUTDOWN" => {
                let _ = self.events.send(ServiceEvent::Shutdown);
                json!(true)
            }
            other => {
                panic!("stub service got unexpected method {other}");
            }
        }
    }
}

/// One accepted connection from the host.
pub struct ServiceConn {
    pub rpc: Arc<DuplexRpc>,
    pub socket: Arc<MessageSocket>,
    events: mpsc::UnboundedReceiver<ServiceEvent>,
}

impl ServiceConn {
    /// Accept the next connection the host dials.
    pub async fn accept(incoming: &mut mpsc::UnboundedReceiver<Pipe>) -> Self {
        let pipe = tokio::time::timeout(Duration::from_secs(5), incoming.recv())
            .await
            .expect("timed out waiting for the host to dial")
            .expect("connector dropped");

        let (socket, inbound_rx, _closed_rx) = MessageSocket::connect(
            pipe.writer,
            pipe.reader,
            SocketConfig {
                instance_id: "stub-service".to_string(),
                connect_timeout: Duration::from_secs(5),
                send_timeout: Duration::from_millis(500),
                ping_timeout: Duration::from_millis(500),
                retry_chunk_interval: Duration::from_millis(100),
                verbose_logs: false,
            },
        )
        .await
        .expect("service-side socket handshake failed");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let rpc = DuplexRpc::new(
            Arc::clone(&socket),
            inbound_rx,
            Arc::new(RecorderResponder { events: event_tx }),
            RpcConfig {
                response_timeout: Duration::from_secs(5),
                verbose_logs: false,
            },
        );

        Self {
            rpc,
            socket,
            events: event_rx,
        }
    }

    /// Next event, failing the test after a bounded wait.
    pub async fn next_event(&mut self) -> ServiceEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for a service event")
            .expect("event stream ended")
    }

    /// Next render instruction, skipping unrelated events.
    pub async fn expect_io_call(&mut self) -> (String, String, RenderInstruction) {
        loop {
            if let ServiceEvent::IoCall {
                transaction_id,
                raw,
                instruction,
            } = self.next_event().await
            {
                return (transaction_id, raw, instruction);
            }
        }
    }

    /// Next completion report, skipping unrelated events.
    pub async fn expect_complete(&mut self) -> (String, ActionResult) {
        loop {
            if let ServiceEvent::Complete {
                transaction_id,
                result,
            } = self.next_event().await
            {
                return (transaction_id, result);
            }
        }
    }

    /// Next initialization announcement, skipping unrelated events.
    pub async fn expect_initialize(&mut self) -> InitializeHostInputs {
        loop {
            if let ServiceEvent::Initialize(inputs) = self.next_event().await {
                return inputs;
            }
        }
    }

    /// Dispatch a transaction to the host.
    pub async fn start_transaction(&self, transaction_id: &str, slug: &str) -> HostAck {
        self.start_transaction_with_params(transaction_id, slug, json!({}))
            .await
    }

    /// Dispatch a transaction with params.
    pub async fn start_transaction_with_params(
        &self,
        transaction_id: &str,
        slug: &str,
        params: Value,
    ) -> HostAck {
        self.rpc
            .call::<StartTransaction>(StartTransactionInputs {
                transaction_id: transaction_id.to_string(),
                action: opshub::rpc::methods::ActionInfo {
                    slug: slug.to_string(),
                    url: None,
                },
                environment: "production".to_string(),
                user: test_user(),
                params,
                params_meta: None,
                display_resolves_immediately: false,
            })
            .await
            .expect("START_TRANSACTION call failed")
    }

    /// Deliver a component response to the host.
    pub async fn send_io_response(
        &self,
        transaction_id: &str,
        generation: &str,
        kind: IoResponseKind,
        values: Vec<Value>,
        choice: Option<String>,
    ) -> HostAck {
        let body = IoResponse {
            id: generation.to_string(),
            transaction_id: transaction_id.to_string(),
            kind,
            values,
            choice,
        };
        self.rpc
            .call::<IoResponseCall>(IoResponseInputs {
                transaction_id: transaction_id.to_string(),
                value: serde_json::to_string(&body).expect("serializable response"),
            })
            .await
            .expect("IO_RESPONSE call failed")
    }

    /// Close a transaction from the service side.
    pub async fn close_transaction(&self, transaction_id: &str) -> HostAck {
        self.rpc
            .call::<CloseTransaction>(CloseTransactionInputs {
                transaction_id: transaction_id.to_string(),
            })
            .await
            .expect("CLOSE_TRANSACTION call failed")
    }

    /// Drop the connection, as if the network died.
    pub fn sever(&self) {
        self.socket.close();
    }
}

/// The invoking user every test transaction runs as.
pub fn test_user() -> UserInfo {
    UserInfo {
        email: "ada@example.com".to_string(),
        first_name: Some("Ada".to_string()),
        last_name: Some("Lovelace".to_string()),
        role: None,
        teams: vec![],
    }
}

/// Host config with test-friendly timings.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.api_key = "test-key".to_string();
    config.endpoint = "ws://stub.test/websocket".to_string();
    config.retry_interval = Duration::from_millis(100);
    config.ping_interval = Duration::from_secs(30);
    config.ping_timeout = Duration::from_millis(500);
    config.connect_timeout = Duration::from_secs(2);
    config.send_timeout = Duration::from_millis(500);
    config.retry_chunk_interval = Duration::from_millis(100);
    config.reinitialize_batch_timeout = Duration::from_millis(50);
    config.complete_http_request_delay = Duration::from_millis(50);
    config
}

/// Initialize env_logger once for a test binary.
#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
