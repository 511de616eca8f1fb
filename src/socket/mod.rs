//! Acknowledged message socket.
//!
//! Provides guaranteed-acknowledged message exchange over any duplex text
//! transport. Every MESSAGE frame is acked by the peer; senders block until
//! the ack arrives or a timeout fires. Oversized payloads are split into
//! separately-acked chunks and reassembled on the receiving side.
//!
//! # Protocol
//!
//! ```text
//! Host                                Service
//!   │  OPEN { id, data: instanceId }      │
//!   │────────────────────────────────────>│
//!   │  OPEN { id, data: instanceId }      │
//!   │<────────────────────────────────────│
//!   │                                     │
//!   │  MESSAGE { id: 1, data }            │
//!   │────────────────────────────────────>│
//!   │  ACK { id: 1 }                      │
//!   │<────────────────────────────────────│
//!   │                                     │
//!   │  PING { id: 2 }                     │
//!   │────────────────────────────────────>│
//!   │  PONG { id: 2 }                     │
//!   │<────────────────────────────────────│
//! ```
//!
//! # Concurrency
//!
//! One writer task serializes all outbound frames; one reader task
//! dispatches acks, pongs, and payload delivery. [`MessageSocket::send`]
//! may be called concurrently from any number of tasks.

// Rust guideline compliant 2026-02

pub mod frame;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::constants::{CHUNK_THRESHOLD_BYTES, MAX_CHUNK_RETRIES};
use crate::error::SocketError;
use crate::ws::{WireReader, WireWriter};

pub use frame::{ChunkMarker, Frame, FrameKind, Reassembler};

/// Tunables for one socket instance.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Instance id announced in the OPEN handshake.
    pub instance_id: String,
    /// Time to wait for the peer's OPEN.
    pub connect_timeout: Duration,
    /// Base ack wait for a framed send.
    pub send_timeout: Duration,
    /// Time to wait for a PONG.
    pub ping_timeout: Duration,
    /// Ack wait per chunk attempt before retransmit.
    pub retry_chunk_interval: Duration,
    /// Dump raw frames at debug level.
    pub verbose_logs: bool,
}

/// Command for the writer task.
enum WriterCmd {
    Frame(String),
    Close,
}

/// State shared between the socket handle and its reader task.
struct Shared {
    next_id: AtomicU64,
    connected: AtomicBool,
    pending_acks: Mutex<HashMap<String, oneshot::Sender<()>>>,
    pending_pongs: Mutex<HashMap<String, oneshot::Sender<()>>>,
    peer_instance_id: Mutex<Option<String>>,
}

impl Shared {
    /// Wake every in-flight send and ping with a hangup.
    fn fail_all_pending(&self) {
        self.pending_acks
            .lock()
            .expect("pending_acks lock poisoned")
            .clear();
        self.pending_pongs
            .lock()
            .expect("pending_pongs lock poisoned")
            .clear();
    }
}

/// An acknowledged message socket over a duplex text transport.
///
/// Created via [`MessageSocket::connect`], which also returns the inbound
/// payload stream and a close-notification watch.
pub struct MessageSocket {
    cmd_tx: mpsc::UnboundedSender<WriterCmd>,
    shared: Arc<Shared>,
    config: SocketConfig,
}

impl std::fmt::Debug for MessageSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSocket")
            .field("instance_id", &self.config.instance_id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl MessageSocket {
    /// Open a socket over the given transport halves.
    ///
    /// Spawns the writer and reader tasks, sends our OPEN, and waits for
    /// the peer's OPEN. Returns the socket handle, the stream of complete
    /// inbound payloads, and a watch that flips to `true` when the socket
    /// closes for any reason.
    ///
    /// # Errors
    ///
    /// Returns `SocketError::ConnectTimeout` if the peer's OPEN does not
    /// arrive within `config.connect_timeout`.
    pub async fn connect(
        mut writer: Box<dyn WireWriter>,
        mut reader: Box<dyn WireReader>,
        config: SocketConfig,
    ) -> Result<
        (
            Arc<MessageSocket>,
            mpsc::UnboundedReceiver<String>,
            watch::Receiver<bool>,
        ),
        SocketError,
    > {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<WriterCmd>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let (closed_tx, closed_rx) = watch::channel(false);
        let (open_tx, open_rx) = oneshot::channel::<String>();

        let shared = Arc::new(Shared {
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            pending_acks: Mutex::new(HashMap::new()),
            pending_pongs: Mutex::new(HashMap::new()),
            peer_instance_id: Mutex::new(None),
        });

        // Writer task: sole owner of the transport write half.
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    WriterCmd::Frame(text) => {
                        if let Err(e) = writer.send_text(&text).await {
                            log::warn!("[Socket] Write failed: {e}");
                            break;
                        }
                    }
                    WriterCmd::Close => {
                        let _ = writer.close().await;
                        break;
                    }
                }
            }
        });

        // Reader task: dispatches acks/pongs and delivers payloads.
        let reader_shared = Arc::clone(&shared);
        let reader_cmd_tx = cmd_tx.clone();
        let verbose = config.verbose_logs;
        tokio::spawn(async move {
            let mut reassembler = Reassembler::new();
            let mut open_tx = Some(open_tx);

            while let Some(result) = reader.recv().await {
                let text = match result {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!("[Socket] Read error: {e}");
                        break;
                    }
                };

                if verbose {
                    log::debug!("[Socket] <- {text}");
                }

                let frame = match Frame::decode(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("[Socket] Dropping undecodable frame: {e}");
                        continue;
                    }
                };

                match frame.kind {
                    FrameKind::Open => {
                        let peer = frame.data.clone().unwrap_or_default();
                        *reader_shared
                            .peer_instance_id
                            .lock()
                            .expect("peer_instance_id lock poisoned") = Some(peer.clone());
                        if let Some(tx) = open_tx.take() {
                            let _ = tx.send(peer);
                        }
                    }
                    FrameKind::Message => {
                        // Ack first so the sender unblocks even if delivery
                        // stalls upstream.
                        let ack = Frame::ack_for(&frame);
                        let _ = reader_cmd_tx.send(WriterCmd::Frame(ack.encode()));

                        if let Some(payload) = reassembler.feed(&frame) {
                            if inbound_tx.send(payload).is_err() {
                                log::warn!("[Socket] Inbound consumer gone, closing");
                                break;
                            }
                        }
                    }
                    FrameKind::Ack => {
                        let key = frame.ack_key();
                        let waiter = reader_shared
                            .pending_acks
                            .lock()
                            .expect("pending_acks lock poisoned")
                            .remove(&key);
                        if let Some(tx) = waiter {
                            let _ = tx.send(());
                        }
                    }
                    FrameKind::Ping => {
                        let pong = Frame::pong_for(&frame);
                        let _ = reader_cmd_tx.send(WriterCmd::Frame(pong.encode()));
                    }
                    FrameKind::Pong => {
                        let waiter = reader_shared
                            .pending_pongs
                            .lock()
                            .expect("pending_pongs lock poisoned")
                            .remove(&frame.id);
                        if let Some(tx) = waiter {
                            let _ = tx.send(());
                        }
                    }
                }
            }

            reader_shared.connected.store(false, Ordering::SeqCst);
            reader_shared.fail_all_pending();
            let _ = reader_cmd_tx.send(WriterCmd::Close);
            let _ = closed_tx.send(true);
            log::debug!("[Socket] Reader task ended");
        });

        let socket = MessageSocket {
            cmd_tx,
            shared,
            config,
        };

        // Announce ourselves, then wait for the peer's OPEN.
        let open_id = socket.fresh_id();
        socket.enqueue(Frame::open(open_id, socket.config.instance_id.clone()))?;

        match tokio::time::timeout(socket.config.connect_timeout, open_rx).await {
            Ok(Ok(peer)) => {
                log::debug!("[Socket] Open handshake complete (peer={peer})");
            }
            Ok(Err(_)) => {
                socket.close();
                return Err(SocketError::NotConnected);
            }
            Err(_) => {
                socket.close();
                return Err(SocketError::ConnectTimeout);
            }
        }

        Ok((Arc::new(socket), inbound_rx, closed_rx))
    }

    /// Whether the socket is still open.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Instance id announced by the peer during the handshake.
    pub fn peer_instance_id(&self) -> Option<String> {
        self.shared
            .peer_instance_id
            .lock()
            .expect("peer_instance_id lock poisoned")
            .clone()
    }

    /// Send a payload and wait for every piece to be acknowledged.
    ///
    /// Payloads above the chunk threshold are split; each chunk is acked
    /// separately and retried up to [`MAX_CHUNK_RETRIES`] times before the
    /// whole send fails. The overall wait is bounded by
    /// `send_timeout × timeout_factor`.
    ///
    /// # Errors
    ///
    /// `NotConnected` if the socket is (or becomes) closed, `Timeout` if
    /// acknowledgement does not arrive in time.
    pub async fn send(&self, payload: &str, timeout_factor: u32) -> Result<(), SocketError> {
        if !self.is_connected() {
            return Err(SocketError::NotConnected);
        }

        let factor = timeout_factor.max(1);
        let overall = self.config.send_timeout * factor;
        let id = self.fresh_id();
        let pieces = frame::split_payload(payload, CHUNK_THRESHOLD_BYTES);

        if self.config.verbose_logs {
            log::debug!(
                "[Socket] -> MESSAGE id={id} bytes={} pieces={}",
                payload.len(),
                pieces.len()
            );
        }

        if pieces.len() == 1 {
            let frame = Frame::message(id, pieces.into_iter().next().unwrap_or_default());
            return self.send_and_await_ack(frame, overall).await;
        }

        let total = pieces.len() as u32;
        let sends = pieces.into_iter().enumerate().map(|(i, piece)| {
            let marker = ChunkMarker {
                index: (i + 1) as u32,
                total,
            };
            self.send_chunk_with_retries(Frame::chunk(id.clone(), marker, piece))
        });

        match tokio::time::timeout(overall, futures_util::future::try_join_all(sends)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SocketError::Timeout),
        }
    }

    /// Probe the peer; resolves on the matching PONG.
    ///
    /// # Errors
    ///
    /// `NotConnected` if the socket is closed, `Timeout` if no PONG arrives
    /// within `config.ping_timeout`.
    pub async fn ping(&self) -> Result<(), SocketError> {
        if !self.is_connected() {
            return Err(SocketError::NotConnected);
        }

        let id = self.fresh_id();
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending_pongs
            .lock()
            .expect("pending_pongs lock poisoned")
            .insert(id.clone(), tx);

        self.enqueue(Frame::ping(id.clone()))?;

        match tokio::time::timeout(self.config.ping_timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SocketError::NotConnected),
            Err(_) => {
                self.shared
                    .pending_pongs
                    .lock()
                    .expect("pending_pongs lock poisoned")
                    .remove(&id);
                Err(SocketError::Timeout)
            }
        }
    }

    /// Close the socket. In-flight sends fail with `NotConnected`.
    pub fn close(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.fail_all_pending();
        let _ = self.cmd_tx.send(WriterCmd::Close);
    }

    /// Allocate a fresh monotonically-increasing frame id.
    fn fresh_id(&self) -> String {
        self.shared.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Queue a frame for the writer task.
    fn enqueue(&self, frame: Frame) -> Result<(), SocketError> {
        self.cmd_tx
            .send(WriterCmd::Frame(frame.encode()))
            .map_err(|_| SocketError::NotConnected)
    }

    /// Send one frame and wait for its ack within `wait`.
    async fn send_and_await_ack(&self, frame: Frame, wait: Duration) -> Result<(), SocketError> {
        let key = frame.ack_key();
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending_acks
            .lock()
            .expect("pending_acks lock poisoned")
            .insert(key.clone(), tx);

        self.enqueue(frame)?;

        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SocketError::NotConnected),
            Err(_) => {
                self.shared
                    .pending_acks
                    .lock()
                    .expect("pending_acks lock poisoned")
                    .remove(&key);
                Err(SocketError::Timeout)
            }
        }
    }

    /// Send one chunk, retrying on ack timeout.
    async fn send_chunk_with_retries(&self, frame: Frame) -> Result<(), SocketError> {
        let mut attempt = 0;
        loop {
            match self
                .send_and_await_ack(frame.clone(), self.config.retry_chunk_interval)
                .await
            {
                Ok(()) => return Ok(()),
                Err(SocketError::Timeout) if attempt < MAX_CHUNK_RETRIES => {
                    attempt += 1;
                    log::debug!(
                        "[Socket] Chunk {} unacked, retry {attempt}/{MAX_CHUNK_RETRIES}",
                        frame.ack_key()
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for MessageSocket {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WriterCmd::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::pipe;

    fn test_config(instance_id: &str) -> SocketConfig {
        SocketConfig {
            instance_id: instance_id.to_string(),
            connect_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_millis(500),
            ping_timeout: Duration::from_millis(500),
            retry_chunk_interval: Duration::from_millis(100),
            verbose_logs: false,
        }
    }

    /// Connect both ends of an in-memory pipe as sockets.
    async fn socket_pair() -> (
        (
            Arc<MessageSocket>,
            mpsc::UnboundedReceiver<String>,
            watch::Receiver<bool>,
        ),
        (
            Arc<MessageSocket>,
            mpsc::UnboundedReceiver<String>,
            watch::Receiver<bool>,
        ),
    ) {
        let (a, b) = pipe();
        let (left, right) = tokio::join!(
            MessageSocket::connect(a.writer, a.reader, test_config("left")),
            MessageSocket::connect(b.writer, b.reader, test_config("right")),
        );
        (left.unwrap(), right.unwrap())
    }

    #[tokio::test]
    async fn test_handshake_exchanges_instance_ids() {
        let ((left, _l_rx, _), (right, _r_rx, _)) = socket_pair().await;
        assert_eq!(left.peer_instance_id().as_deref(), Some("right"));
        assert_eq!(right.peer_instance_id().as_deref(), Some("left"));
    }

    #[tokio::test]
    async fn test_send_delivers_and_acks() {
        let ((left, _l_rx, _), (_right, mut r_rx, _)) = socket_pair().await;

        left.send("hello there", 1).await.unwrap();
        let got = r_rx.recv().await.unwrap();
        assert_eq!(got, "hello there");
    }

    #[tokio::test]
    async fn test_concurrent_sends_all_ack() {
        let ((left, _l_rx, _), (_right, mut r_rx, _)) = socket_pair().await;

        let sends = (0..20).map(|i| {
            let left = Arc::clone(&left);
            tokio::spawn(async move { left.send(&format!("msg-{i}"), 1).await })
        });
        for handle in sends {
            handle.await.unwrap().unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..20 {
            seen.push(r_rx.recv().await.unwrap());
        }
        seen.sort();
        assert_eq!(seen.len(), 20);
        assert!(seen.contains(&"msg-0".to_string()));
        assert!(seen.contains(&"msg-19".to_string()));
    }

    #[tokio::test]
    async fn test_oversized_payload_chunks_and_reassembles() {
        let ((left, _l_rx, _), (_right, mut r_rx, _)) = socket_pair().await;

        let big = "z".repeat(CHUNK_THRESHOLD_BYTES * 2 + 17);
        left.send(&big, 2).await.unwrap();
        let got = r_rx.recv().await.unwrap();
        assert_eq!(got, big);
    }

    #[tokio::test]
    async fn test_payload_at_threshold_is_single_frame() {
        // Indirect check via frame splitting; the socket path is covered by
        // the reassembly test above.
        let exact = "q".repeat(CHUNK_THRESHOLD_BYTES);
        assert_eq!(frame::split_payload(&exact, CHUNK_THRESHOLD_BYTES).len(), 1);
        let over = "q".repeat(CHUNK_THRESHOLD_BYTES + 1);
        assert_eq!(frame::split_payload(&over, CHUNK_THRESHOLD_BYTES).len(), 2);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let ((left, _l_rx, _), (_right, _r_rx, _)) = socket_pair().await;
        left.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_close_fails_not_connected() {
        let ((left, _l_rx, _), (_right, _r_rx, _)) = socket_pair().await;
        left.close();
        let err = left.send("too late", 1).await.unwrap_err();
        assert_eq!(err, SocketError::NotConnected);
    }

    #[tokio::test]
    async fn test_peer_close_fires_close_watch() {
        let ((left, _l_rx, _), (right, _r_rx, mut r_closed)) = socket_pair().await;
        drop(left); // Drops the writer command channel → transport close.
        let _ = tokio::time::timeout(Duration::from_secs(2), r_closed.changed()).await;
        assert!(*r_closed.borrow());
        assert!(!right.is_connected() || *r_closed.borrow());
    }

    #[tokio::test]
    async fn test_send_times_out_without_acks() {
        let (a, b) = pipe();

        // Fake peer: answers the handshake, then swallows everything
        // without acking.
        tokio::spawn(async move {
            let mut writer = b.writer;
            let mut reader = b.reader;
            let _ = writer
                .send_text(&Frame::open("1", "mute-peer").encode())
                .await;
            while reader.recv().await.is_some() {}
        });

        let (socket, _rx, _closed) =
            MessageSocket::connect(a.writer, a.reader, test_config("timeout-test"))
                .await
                .unwrap();

        let err = socket.send("never acked", 1).await.unwrap_err();
        assert_eq!(err, SocketError::Timeout);
    }

    #[tokio::test]
    async fn test_connect_timeout_without_peer_open() {
        let (a, _b_unused) = pipe();
        let mut config = test_config("lonely");
        config.connect_timeout = Duration::from_millis(100);

        let result = MessageSocket::connect(a.writer, a.reader, config).await;
        assert!(matches!(result, Err(SocketError::ConnectTimeout)));
    }
}
