//! Duplex RPC multiplexer.
//!
//! Runs a typed request/response protocol over the acknowledged message
//! socket. Either side may call at any time; responses need not arrive in
//! call order. Frames are embedded in `MESSAGE.data`:
//!
//! ```text
//! { "id": string, "kind": "CALL"|"RESPONSE", "methodName": string, "data": any }
//! ```
//!
//! Inbound CALLs are handed to the [`RpcResponder`]; its reply travels
//! back as a RESPONSE with the same id. Inbound RESPONSEs resolve the
//! matching pending call.
//!
//! On reconnection, [`DuplexRpc::set_communicator`] rebinds the socket.
//! In-flight calls on the old socket fail with `NotConnected` and must be
//! re-initiated by the caller.

pub mod methods;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::RpcError;
use crate::socket::MessageSocket;

pub use methods::RpcMethod;

/// RPC frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcKind {
    /// A request expecting a RESPONSE with the same id.
    Call,
    /// The reply to a CALL.
    Response,
}

/// One RPC frame, as embedded in `MESSAGE.data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcFrame {
    /// Call id, unique per caller.
    pub id: String,
    /// CALL or RESPONSE.
    pub kind: RpcKind,
    /// Method being invoked or answered.
    pub method_name: String,
    /// Input (CALL) or output (RESPONSE) payload.
    #[serde(default)]
    pub data: Value,
}

/// Handles inbound CALLs.
///
/// Implementations parse `data` against the method's input shape; a parse
/// failure must not kill the connection: reply `Value::Null` and log.
#[async_trait]
pub trait RpcResponder: Send + Sync {
    /// Produce the response payload for an inbound call.
    async fn respond(&self, method_name: &str, data: Value) -> Value;
}

/// Tunables for the multiplexer.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Base window a call waits for its RESPONSE after the send is acked.
    pub response_timeout: Duration,
    /// Dump frames at debug level.
    pub verbose_logs: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(15),
            verbose_logs: false,
        }
    }
}

type PendingMap = Mutex<HashMap<String, oneshot::Sender<Result<Value, RpcError>>>>;

/// Typed request/response multiplexer over a [`MessageSocket`].
pub struct DuplexRpc {
    next_id: AtomicU64,
    pending: PendingMap,
    socket: Mutex<Arc<MessageSocket>>,
    responder: Arc<dyn RpcResponder>,
    listen_task: Mutex<Option<JoinHandle<()>>>,
    config: RpcConfig,
}

impl std::fmt::Debug for DuplexRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexRpc")
            .field(
                "pending",
                &self.pending.lock().expect("pending lock poisoned").len(),
            )
            .finish_non_exhaustive()
    }
}

impl DuplexRpc {
    /// Bind the multiplexer to a socket and its inbound payload stream.
    pub fn new(
        socket: Arc<MessageSocket>,
        inbound_rx: mpsc::UnboundedReceiver<String>,
        responder: Arc<dyn RpcResponder>,
        config: RpcConfig,
    ) -> Arc<Self> {
        let rpc = Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            socket: Mutex::new(socket),
            responder,
            listen_task: Mutex::new(None),
            config,
        });
        rpc.spawn_listener(inbound_rx);
        rpc
    }

    /// Rebind to a fresh socket after reconnection.
    ///
    /// All in-flight calls on the old socket fail with `NotConnected`; the
    /// callers' retry loops re-initiate them on the new socket.
    pub fn set_communicator(
        self: &Arc<Self>,
        socket: Arc<MessageSocket>,
        inbound_rx: mpsc::UnboundedReceiver<String>,
    ) {
        let stale: Vec<_> = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.drain().collect()
        };
        for (id, tx) in stale {
            log::debug!("[Rpc] Failing in-flight call {id} on socket swap");
            let _ = tx.send(Err(RpcError::NotConnected));
        }

        *self.socket.lock().expect("socket lock poisoned") = socket;

        let old_task = {
            let mut guard = self.listen_task.lock().expect("listen_task lock poisoned");
            guard.take()
        };
        if let Some(task) = old_task {
            task.abort();
        }
        self.spawn_listener(inbound_rx);
    }

    /// Call a method with the default ack window.
    ///
    /// # Errors
    ///
    /// `NotConnected`/`Timeout` from the send layer, `Timeout` if no
    /// RESPONSE arrives in the response window, or `BadResponse` if the
    /// RESPONSE payload does not match the method's output shape.
    pub async fn call<M: RpcMethod>(&self, input: M::Input) -> Result<M::Output, RpcError> {
        self.call_with_factor::<M>(input, 1).await
    }

    /// Call a method, scaling both the ack and response windows.
    pub async fn call_with_factor<M: RpcMethod>(
        &self,
        input: M::Input,
        timeout_factor: u32,
    ) -> Result<M::Output, RpcError> {
        let factor = timeout_factor.max(1);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let data = serde_json::to_value(&input)
            .map_err(|e| RpcError::BadResponse(format!("unserializable input: {e}")))?;

        let frame = RpcFrame {
            id: id.clone(),
            kind: RpcKind::Call,
            method_name: M::NAME.to_string(),
            data,
        };
        let encoded = serde_json::to_string(&frame)
            .map_err(|e| RpcError::BadResponse(format!("unserializable frame: {e}")))?;

        if self.config.verbose_logs {
            log::debug!("[Rpc] -> CALL {} id={id}", M::NAME);
        }

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(id.clone(), tx);

        let socket = Arc::clone(&self.socket.lock().expect("socket lock poisoned"));
        if let Err(e) = socket.send(&encoded, factor).await {
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&id);
            return Err(e.into());
        }

        let window = self.config.response_timeout * factor;
        let outcome = match tokio::time::timeout(window, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::NotConnected),
            Err(_) => {
                self.pending
                    .lock()
                    .expect("pending lock poisoned")
                    .remove(&id);
                Err(RpcError::Timeout)
            }
        }?;

        serde_json::from_value(outcome)
            .map_err(|e| RpcError::BadResponse(format!("{} response: {e}", M::NAME)))
    }

    /// Spawn the task that drains inbound payloads from the socket.
    fn spawn_listener(self: &Arc<Self>, mut inbound_rx: mpsc::UnboundedReceiver<String>) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(payload) = inbound_rx.recv().await {
                let Some(rpc) = weak.upgrade() else { break };
                rpc.handle_inbound(payload);
            }
            log::debug!("[Rpc] Listener task ended");
        });
        *self.listen_task.lock().expect("listen_task lock poisoned") = Some(task);
    }

    /// Dispatch one inbound payload.
    fn handle_inbound(self: &Arc<Self>, payload: String) {
        let frame: RpcFrame = match serde_json::from_str(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("[Rpc] Dropping undecodable payload: {e}");
                return;
            }
        };

        if self.config.verbose_logs {
            log::debug!("[Rpc] <- {:?} {} id={}", frame.kind, frame.method_name, frame.id);
        }

        match frame.kind {
            RpcKind::Response => {
                let waiter = self
                    .pending
                    .lock()
                    .expect("pending lock poisoned")
                    .remove(&frame.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Ok(frame.data));
                    }
                    None => {
                        log::debug!(
                            "[Rpc] Dropping response for unknown call id={}",
                            frame.id
                        );
                    }
                }
            }
            RpcKind::Call => {
                // Respond on a separate task so a slow handler cannot stall
                // the inbound stream.
                let rpc = Arc::clone(self);
                tokio::spawn(async move {
                    let result = rpc.responder.respond(&frame.method_name, frame.data).await;
                    let reply = RpcFrame {
                        id: frame.id,
                        kind: RpcKind::Response,
                        method_name: frame.method_name,
                        data: result,
                    };
                    let encoded = match serde_json::to_string(&reply) {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            log::error!("[Rpc] Unserializable response: {e}");
                            return;
                        }
                    };
                    let socket = Arc::clone(
                        &rpc.socket.lock().expect("socket lock poisoned"),
                    );
                    if let Err(e) = socket.send(&encoded, 1).await {
                        log::warn!(
                            "[Rpc] Failed to send response for {}: {e}",
                            reply.method_name
                        );
                    }
                });
            }
        }
    }
}

impl Drop for DuplexRpc {
    fn drop(&mut self) {
        if let Some(task) = self
            .listen_task
            .lock()
            .expect("listen_task lock poisoned")
            .take()
        {
            task.abort();
        }
    }
}
