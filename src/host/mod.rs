//! Host controller.
//!
//! Owns the persistent connection to the service and everything keyed by
//! it: the initialization handshake, the ping loop, the reconnect loop,
//! inbound dispatch, per-transaction state, and the resend coordinators
//! that replay in-flight state after a reconnect.
//!
//! # Architecture
//!
//! ```text
//! Host
//!   ├── ws transport (tokio-tungstenite or in-memory pipe)
//!   ├── MessageSocket (acks, chunking, ping/pong)
//!   ├── DuplexRpc (typed calls both directions)
//!   ├── dispatch (START_TRANSACTION → transaction task, IO_RESPONSE → IoClient, ...)
//!   ├── channel (send paths: renders, pages, logs, loading, results)
//!   └── resend coordinators (replay after reconnect)
//! ```

// Rust guideline compliant 2026-02

mod channel;
mod dispatch;
mod resend;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{HostError, IoErrorKind, RpcError};
use crate::io::{BuiltinRegistry, ComponentRegistry, IoClient, IoEvent};
use crate::loading::LoadingSnapshot;
use crate::routes::{Route, RouteChange, RouteRegistry};
use crate::rpc::methods::{
    self, DeclareHostReturns, InitializeHost, InitializeHostInputs, InitializeHostReturns,
    OrganizationInfo, RpcMethod, SendIoCallInputs, SendPageInputs,
};
use crate::rpc::{DuplexRpc, RpcConfig};
use crate::socket::{MessageSocket, SocketConfig};
use crate::constants::{SDK_NAME, SDK_VERSION};
use crate::ws::{self, WireReader, WireWriter};

pub use channel::HostChannel;

/// Opens the underlying transport. The default implementation dials the
/// configured WebSocket endpoint; tests substitute an in-memory pipe.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh transport to `endpoint` with the given headers.
    async fn connect(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
    ) -> Result<(Box<dyn WireWriter>, Box<dyn WireReader>)>;
}

/// Production connector: dials the WebSocket endpoint.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
    ) -> Result<(Box<dyn WireWriter>, Box<dyn WireReader>)> {
        let url = ws::http_to_ws_scheme(endpoint);
        let header_refs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        ws::connect(&url, &header_refs).await
    }
}

/// Session details from a successful initialization.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Environment this host serves.
    pub environment: String,
    /// Owning organization.
    pub organization: OrganizationInfo,
    /// Dashboard URL for this host's actions.
    pub dashboard_url: String,
}

/// One live transaction's host-side bookkeeping.
pub(crate) struct TransactionEntry {
    pub(crate) event_tx: mpsc::UnboundedSender<IoEvent>,
    pub(crate) io_client: Arc<IoClient>,
}

/// One open page session's host-side bookkeeping.
pub(crate) struct PageEntry {
    pub(crate) tasks: Vec<JoinHandle<()>>,
    pub(crate) closed: Arc<AtomicBool>,
}

pub(crate) struct HostInner {
    pub(crate) config: Config,
    pub(crate) routes: Arc<RouteRegistry>,
    pub(crate) registry: Arc<dyn ComponentRegistry>,
    connector: Arc<dyn Connector>,
    instance_id: String,

    pub(crate) rpc: Mutex<Option<Arc<DuplexRpc>>>,
    socket: Mutex<Option<Arc<MessageSocket>>>,
    is_initialized: AtomicBool,
    is_closing: AtomicBool,
    pub(crate) shutdown_requested: AtomicBool,
    session: Mutex<Option<SessionInfo>>,

    pub(crate) transactions: Mutex<HashMap<String, TransactionEntry>>,
    pub(crate) pages: Mutex<HashMap<String, PageEntry>>,
    pub(crate) pending_io_calls: Mutex<HashMap<String, SendIoCallInputs>>,
    pub(crate) pending_page_layouts: Mutex<HashMap<String, SendPageInputs>>,
    pub(crate) loading_states: Mutex<HashMap<String, LoadingSnapshot>>,

    last_pong: Mutex<Instant>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) drained: tokio::sync::Notify,
}

impl HostInner {
    /// Current RPC channel, if connected.
    pub(crate) fn rpc_handle(&self) -> Option<Arc<DuplexRpc>> {
        self.rpc.lock().expect("rpc lock poisoned").clone()
    }

    /// Call a method, retrying timeouts and disconnections with linear
    /// backoff (`attempt × retry_interval`).
    ///
    /// `max_resend_attempts = 0` makes exactly one attempt.
    pub(crate) async fn call_with_retries<M>(&self, input: M::Input) -> Result<M::Output, RpcError>
    where
        M: RpcMethod,
        M::Input: Clone,
    {
        let max_attempts = self.config.max_resend_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = match self.rpc_handle() {
                Some(rpc) => rpc.call::<M>(input.clone()).await,
                None => Err(RpcError::NotConnected),
            };
            match outcome {
                Ok(output) => return Ok(output),
                Err(err @ (RpcError::NotConnected | RpcError::Timeout))
                    if attempt < max_attempts =>
                {
                    let backoff = self.config.retry_interval * attempt;
                    log::debug!(
                        "[Host] {} attempt {attempt}/{max_attempts} failed ({err}), retrying in {backoff:?}",
                        M::NAME
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Tear down everything keyed by a transaction id.
    pub(crate) fn close_transaction(&self, transaction_id: &str, kind: IoErrorKind) {
        let entry = self
            .transactions
            .lock()
            .expect("transactions lock poisoned")
            .remove(transaction_id);

        if let Some(entry) = entry {
            entry.io_client.mark_closed(kind);
            // Wake the render loop so a pending await observes the cancel.
            let _ = entry.event_tx.send(IoEvent {
                response: methods::IoResponse {
                    id: String::new(),
                    transaction_id: transaction_id.to_string(),
                    kind: methods::IoResponseKind::Canceled,
                    values: vec![],
                    choice: None,
                },
                verdict: None,
            });
        }

        self.pending_io_calls
            .lock()
            .expect("pending_io_calls lock poisoned")
            .remove(transaction_id);
        self.loading_states
            .lock()
            .expect("loading_states lock poisoned")
            .remove(transaction_id);

        self.drained.notify_waiters();
    }

    /// Tear down everything keyed by a page key.
    pub(crate) fn close_page(&self, page_key: &str) {
        let entry = self
            .pages
            .lock()
            .expect("pages lock poisoned")
            .remove(page_key);
        if let Some(entry) = entry {
            entry.closed.store(true, Ordering::SeqCst);
            for task in entry.tasks {
                task.abort();
            }
        }
        self.pending_page_layouts
            .lock()
            .expect("pending_page_layouts lock poisoned")
            .remove(page_key);
    }

    fn note_pong(&self) {
        *self.last_pong.lock().expect("last_pong lock poisoned") = Instant::now();
    }

    fn pong_age(&self) -> Duration {
        self.last_pong
            .lock()
            .expect("last_pong lock poisoned")
            .elapsed()
    }

    fn current_socket(&self) -> Option<Arc<MessageSocket>> {
        self.socket.lock().expect("socket lock poisoned").clone()
    }
}

/// The host controller. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("initialized", &self.inner.is_initialized.load(Ordering::SeqCst))
            .field(
                "transactions",
                &self
                    .inner
                    .transactions
                    .lock()
                    .expect("transactions lock poisoned")
                    .len(),
            )
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Build a host over the production WebSocket connector and the
    /// builtin component registry.
    pub fn new(config: Config, routes: Vec<Route>) -> Self {
        Self::with_parts(
            config,
            routes,
            Arc::new(WsConnector),
            Arc::new(BuiltinRegistry::new()),
        )
    }

    /// Build a host with explicit transport and component-registry seams.
    pub fn with_parts(
        config: Config,
        routes: Vec<Route>,
        connector: Arc<dyn Connector>,
        registry: Arc<dyn ComponentRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(HostInner {
                config,
                routes: Arc::new(RouteRegistry::new(routes)),
                registry,
                connector,
                instance_id: uuid::Uuid::new_v4().to_string(),
                rpc: Mutex::new(None),
                socket: Mutex::new(None),
                is_initialized: AtomicBool::new(false),
                is_closing: AtomicBool::new(false),
                shutdown_requested: AtomicBool::new(false),
                session: Mutex::new(None),
                transactions: Mutex::new(HashMap::new()),
                pages: Mutex::new(HashMap::new()),
                pending_io_calls: Mutex::new(HashMap::new()),
                pending_page_layouts: Mutex::new(HashMap::new()),
                loading_states: Mutex::new(HashMap::new()),
                last_pong: Mutex::new(Instant::now()),
                background_tasks: Mutex::new(Vec::new()),
                drained: tokio::sync::Notify::new(),
            }),
        }
    }

    /// The route registry; mutations re-announce automatically once
    /// listening.
    pub fn routes(&self) -> Arc<RouteRegistry> {
        Arc::clone(&self.inner.routes)
    }

    /// Whether the initialization handshake has completed.
    pub fn is_initialized(&self) -> bool {
        self.inner.is_initialized.load(Ordering::SeqCst)
    }

    /// Session details once initialized.
    pub fn session(&self) -> Option<SessionInfo> {
        self.inner.session.lock().expect("session lock poisoned").clone()
    }

    /// Number of in-flight transactions.
    pub fn transaction_count(&self) -> usize {
        self.inner
            .transactions
            .lock()
            .expect("transactions lock poisoned")
            .len()
    }

    /// Number of render instructions held for replay.
    pub fn pending_render_count(&self) -> usize {
        self.inner
            .pending_io_calls
            .lock()
            .expect("pending_io_calls lock poisoned")
            .len()
    }

    /// Connect, initialize, and start serving.
    ///
    /// Resolves once the host is registered with the service; the
    /// connection then maintains itself (pings, reconnects, route
    /// re-announcements) until closed.
    ///
    /// # Errors
    ///
    /// Fails if the first connection or the initialization handshake
    /// fails; after that, failures feed the reconnect loop instead.
    pub async fn listen(&self) -> Result<SessionInfo> {
        let inner = &self.inner;

        let (socket, inbound_rx, closed_rx) = open_socket(inner).await?;

        let responder = Arc::new(dispatch::HostResponder {
            inner: Arc::downgrade(inner),
        });
        let rpc = DuplexRpc::new(
            socket.clone(),
            inbound_rx,
            responder,
            RpcConfig {
                response_timeout: inner.config.send_timeout * 3,
                verbose_logs: inner.config.verbose_message_logs,
            },
        );
        *inner.rpc.lock().expect("rpc lock poisoned") = Some(rpc);
        *inner.socket.lock().expect("socket lock poisoned") = Some(socket);

        let session = initialize_host(inner).await?;
        inner.is_initialized.store(true, Ordering::SeqCst);
        inner.note_pong();

        if inner.config.log_level.info_enabled() {
            log::info!(
                "[Host] Connected to {} ({} actions), dashboard: {}",
                session.organization.slug,
                inner.routes.action_count(),
                session.dashboard_url
            );
        }

        spawn_ping_loop(inner);
        spawn_close_watcher(inner, closed_rx);
        spawn_route_watcher(inner);

        Ok(session)
    }

    /// Graceful shutdown: stop accepting transactions, let in-flight ones
    /// drain, then close.
    pub async fn safely_close(&self) -> Result<()> {
        let inner = &self.inner;
        inner.shutdown_requested.store(true, Ordering::SeqCst);

        if let Some(rpc) = inner.rpc_handle() {
            match rpc
                .call::<methods::BeginHostShutdown>(methods::BeginHostShutdownInputs {})
                .await
            {
                Ok(_) => log::debug!("[Host] Service acknowledged shutdown"),
                Err(e) => log::warn!("[Host] BEGIN_HOST_SHUTDOWN failed: {e}"),
            }
        }

        // Wait for the in-flight transaction set to drain.
        loop {
            if inner
                .transactions
                .lock()
                .expect("transactions lock poisoned")
                .is_empty()
            {
                break;
            }
            let notified = inner.drained.notified();
            let _ = tokio::time::timeout(Duration::from_millis(200), notified).await;
        }

        tokio::time::sleep(inner.config.complete_http_request_delay).await;
        self.immediately_close();
        Ok(())
    }

    /// Abort without draining.
    pub fn immediately_close(&self) {
        let inner = &self.inner;
        inner.is_closing.store(true, Ordering::SeqCst);
        inner.is_initialized.store(false, Ordering::SeqCst);

        if let Some(socket) = inner.current_socket() {
            socket.close();
        }
        *inner.socket.lock().expect("socket lock poisoned") = None;
        *inner.rpc.lock().expect("rpc lock poisoned") = None;

        let tasks: Vec<JoinHandle<()>> = inner
            .background_tasks
            .lock()
            .expect("background_tasks lock poisoned")
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        let transaction_ids: Vec<String> = inner
            .transactions
            .lock()
            .expect("transactions lock poisoned")
            .keys()
            .cloned()
            .collect();
        for transaction_id in transaction_ids {
            inner.close_transaction(&transaction_id, IoErrorKind::TransactionClosed);
        }

        let page_keys: Vec<String> = inner
            .pages
            .lock()
            .expect("pages lock poisoned")
            .keys()
            .cloned()
            .collect();
        for page_key in page_keys {
            inner.close_page(&page_key);
        }

        if inner.config.log_level.info_enabled() {
            log::info!("[Host] Closed");
        }
    }
}

/// Open a fresh socket through the connector.
async fn open_socket(
    inner: &Arc<HostInner>,
) -> Result<(
    Arc<MessageSocket>,
    mpsc::UnboundedReceiver<String>,
    watch::Receiver<bool>,
)> {
    let mut headers = vec![("x-instance-id".to_string(), inner.instance_id.clone())];
    if !inner.config.api_key.is_empty() {
        headers.push(("x-api-key".to_string(), inner.config.api_key.clone()));
    }

    let (writer, reader) = inner
        .connector
        .connect(&inner.config.endpoint, &headers)
        .await
        .context("transport connect failed")?;

    let (socket, inbound_rx, closed_rx) = MessageSocket::connect(
        writer,
        reader,
        SocketConfig {
            instance_id: inner.instance_id.clone(),
            connect_timeout: inner.config.connect_timeout,
            send_timeout: inner.config.send_timeout,
            ping_timeout: inner.config.ping_timeout,
            retry_chunk_interval: inner.config.retry_chunk_interval,
            verbose_logs: inner.config.verbose_message_logs,
        },
    )
    .await
    .context("socket handshake failed")?;

    Ok((socket, inbound_rx, closed_rx))
}

/// Run the initialization handshake on the current RPC channel.
async fn initialize_host(inner: &Arc<HostInner>) -> Result<SessionInfo> {
    let (actions, pages) = inner.routes.announcements();
    let rpc = inner
        .rpc_handle()
        .ok_or(HostError::NotInitialized)
        .context("no RPC channel")?;

    let reply = rpc
        .call::<InitializeHost>(InitializeHostInputs {
            sdk_name: SDK_NAME.to_string(),
            sdk_version: SDK_VERSION.to_string(),
            actions,
            pages,
        })
        .await
        .context("INITIALIZE_HOST failed")?;

    match reply {
        InitializeHostReturns::Success {
            environment,
            organization,
            dashboard_url,
            invalid_slugs,
            warnings,
            sdk_alert,
        } => {
            if !invalid_slugs.is_empty() {
                log::warn!(
                    "[Host] The service refused these route slugs: {}",
                    invalid_slugs.join(", ")
                );
            }
            for warning in &warnings {
                log::warn!("[Host] {warning}");
            }
            if let Some(alert) = sdk_alert {
                log::warn!(
                    "[Host] SDK alert ({}): {}",
                    alert.severity.as_deref().unwrap_or("INFO"),
                    alert.message.as_deref().unwrap_or("update recommended")
                );
            }

            let session = SessionInfo {
                environment,
                organization,
                dashboard_url,
            };
            *inner.session.lock().expect("session lock poisoned") = Some(session.clone());
            Ok(session)
        }
        InitializeHostReturns::Error { message } => {
            if message.to_ascii_lowercase().contains("api key") {
                Err(HostError::InvalidApiKey).context(message)
            } else {
                Err(HostError::Internal(message.clone())).context("initialization rejected")
            }
        }
    }
}

/// Liveness: ping on an interval; force-close after too long without a
/// pong so the reconnect loop takes over.
fn spawn_ping_loop(inner: &Arc<HostInner>) {
    let weak = Arc::downgrade(inner);
    let task = tokio::spawn(async move {
        loop {
            let Some(inner) = weak.upgrade() else { break };
            let interval = inner.config.ping_interval;
            drop(inner);
            tokio::time::sleep(interval).await;

            let Some(inner) = weak.upgrade() else { break };
            if inner.is_closing.load(Ordering::SeqCst) {
                break;
            }
            let Some(socket) = inner.current_socket() else { continue };

            match socket.ping().await {
                Ok(()) => inner.note_pong(),
                Err(e) => {
                    log::debug!("[Host] Ping failed: {e}");
                    if inner.pong_age() > inner.config.close_unresponsive_connection_timeout {
                        log::debug!(
                            "[Host] No pong for {:?}, force-closing unresponsive connection",
                            inner.pong_age()
                        );
                        socket.close();
                    }
                }
            }
        }
    });
    inner
        .background_tasks
        .lock()
        .expect("background_tasks lock poisoned")
        .push(task);
}

/// Watch the socket's close signal and drive the reconnect loop.
fn spawn_close_watcher(inner: &Arc<HostInner>, mut closed_rx: watch::Receiver<bool>) {
    let weak = Arc::downgrade(inner);
    let task = tokio::spawn(async move {
        // Wait for the close signal.
        while !*closed_rx.borrow() {
            if closed_rx.changed().await.is_err() {
                break;
            }
        }

        let Some(inner) = weak.upgrade() else { return };
        if inner.is_closing.load(Ordering::SeqCst)
            || !inner.is_initialized.load(Ordering::SeqCst)
        {
            return;
        }

        if inner.config.log_level.info_enabled() {
            log::warn!(
                "[Host] Connection lost, reconnecting every {:?}",
                inner.config.retry_interval
            );
        }
        drop(inner);

        loop {
            let Some(inner) = weak.upgrade() else { return };
            if inner.is_closing.load(Ordering::SeqCst) {
                return;
            }
            let retry_interval = inner.config.retry_interval;
            drop(inner);
            tokio::time::sleep(retry_interval).await;

            let Some(inner) = weak.upgrade() else { return };
            match reconnect_once(&inner).await {
                Ok(closed_rx) => {
                    if inner.config.log_level.info_enabled() {
                        log::info!("[Host] Reconnected");
                    }
                    spawn_close_watcher(&inner, closed_rx);
                    resend::resend_all(&inner).await;
                    return;
                }
                Err(e) => {
                    log::warn!("[Host] Reconnect attempt failed: {e}");
                }
            }
        }
    });
    inner
        .background_tasks
        .lock()
        .expect("background_tasks lock poisoned")
        .push(task);
}

/// One reconnect attempt: fresh socket, rebind the RPC channel,
/// re-initialize.
async fn reconnect_once(inner: &Arc<HostInner>) -> Result<watch::Receiver<bool>> {
    let (socket, inbound_rx, closed_rx) = open_socket(inner).await?;

    let rpc = inner
        .rpc_handle()
        .ok_or(HostError::NotInitialized)
        .context("no RPC channel to rebind")?;
    rpc.set_communicator(socket.clone(), inbound_rx);
    *inner.socket.lock().expect("socket lock poisoned") = Some(socket);

    initialize_host(inner).await?;
    inner.note_pong();
    Ok(closed_rx)
}

/// Coalesce route-change events and re-announce the route set.
fn spawn_route_watcher(inner: &Arc<HostInner>) {
    let (_token, mut rx) = inner.routes.observe();
    let weak: Weak<HostInner> = Arc::downgrade(inner);
    let task = tokio::spawn(async move {
        while let Some(RouteChange::Updated) = rx.recv().await {
            let Some(inner) = weak.upgrade() else { break };
            let window = inner.config.reinitialize_batch_timeout;
            drop(inner);

            // Swallow further events inside the batch window.
            loop {
                match tokio::time::timeout(window, rx.recv()).await {
                    Ok(Some(RouteChange::Updated)) => continue,
                    Ok(None) => return,
                    Err(_) => break,
                }
            }

            let Some(inner) = weak.upgrade() else { break };
            if !inner.is_initialized.load(Ordering::SeqCst) {
                continue;
            }

            let (actions, pages) = inner.routes.announcements();
            let input = InitializeHostInputs {
                sdk_name: SDK_NAME.to_string(),
                sdk_version: SDK_VERSION.to_string(),
                actions,
                pages,
            };
            match inner.call_with_retries::<methods::DeclareHost>(input).await {
                Ok(DeclareHostReturns::Success { invalid_slugs }) => {
                    if !invalid_slugs.is_empty() {
                        log::warn!(
                            "[Host] The service refused these route slugs: {}",
                            invalid_slugs.join(", ")
                        );
                    }
                }
                Ok(DeclareHostReturns::Error { message }) => {
                    log::warn!("[Host] Route re-announcement rejected: {message}");
                }
                Err(e) => {
                    log::warn!("[Host] Route re-announcement failed: {e}");
                }
            }
        }
    });
    inner
        .background_tasks
        .lock()
        .expect("background_tasks lock poisoned")
        .push(task);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Connector that should never be dialed in these tests.
    struct UnreachableConnector;

    #[async_trait]
    impl Connector for UnreachableConnector {
        async fn connect(
            &self,
            _endpoint: &str,
            _headers: &[(String, String)],
        ) -> Result<(Box<dyn WireWriter>, Box<dyn WireReader>)> {
            anyhow::bail!("not dialed in this test")
        }
    }

    fn offline_host(max_resend_attempts: u32) -> Host {
        let mut config = Config::default();
        config.retry_interval = Duration::from_millis(200);
        config.max_resend_attempts = max_resend_attempts;
        Host::with_parts(
            config,
            vec![],
            Arc::new(UnreachableConnector),
            Arc::new(BuiltinRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_zero_resend_attempts_makes_exactly_one_attempt() {
        let host = offline_host(0);

        // No RPC channel: the single attempt fails immediately, with no
        // backoff sleep.
        let started = Instant::now();
        let result = host
            .inner
            .call_with_retries::<methods::BeginHostShutdown>(
                methods::BeginHostShutdownInputs {},
            )
            .await;
        assert_eq!(result.unwrap_err(), RpcError::NotConnected);
        assert!(
            started.elapsed() < Duration::from_millis(150),
            "a zero-attempt config must not back off"
        );
    }

    #[tokio::test]
    async fn test_retries_back_off_linearly() {
        let host = offline_host(3);

        let started = Instant::now();
        let result = host
            .inner
            .call_with_retries::<methods::BeginHostShutdown>(
                methods::BeginHostShutdownInputs {},
            )
            .await;
        assert_eq!(result.unwrap_err(), RpcError::NotConnected);
        // Attempts 1 and 2 back off by 1x and 2x the retry interval.
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_close_transaction_erases_all_keyed_state() {
        let host = offline_host(1);
        host.inner.pending_io_calls.lock().unwrap().insert(
            "txn-z".to_string(),
            SendIoCallInputs {
                transaction_id: "txn-z".to_string(),
                id: "1".to_string(),
                io_call: "{}".to_string(),
            },
        );
        host.inner
            .loading_states
            .lock()
            .unwrap()
            .insert("txn-z".to_string(), LoadingSnapshot::default());

        host.inner
            .close_transaction("txn-z", IoErrorKind::Canceled);

        assert_eq!(host.pending_render_count(), 0);
        assert!(host.inner.loading_states.lock().unwrap().is_empty());
    }
}
