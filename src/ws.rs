//! Shared WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. All WebSocket consumers in the crate should
//! use this module rather than `tokio-tungstenite` directly.
//!
//! # Architecture
//!
//! A single [`connect`] function handles URL→request building, header
//! insertion, and TLS negotiation. It returns a boxed
//! ([`WireWriter`], [`WireReader`]) pair ready for use in
//! `tokio::select!` loops. The same traits are implemented by an
//! in-memory [`pipe`] so the full protocol stack can run against itself
//! in tests.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Write half of a duplex text transport.
#[async_trait]
pub trait WireWriter: Send {
    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Flush pending writes and close the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a duplex text transport.
#[async_trait]
pub trait WireReader: Send {
    /// Receive the next text frame, `None` when the stream ends.
    async fn recv(&mut self) -> Option<Result<String>>;
}

/// Write half of a WebSocket connection.
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

#[async_trait]
impl WireWriter for WsWriter {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

#[async_trait]
impl WireReader for WsReader {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(text.to_string()));
                }
                Some(Ok(tungstenite::Message::Close(_))) => return None,
                Some(Ok(_)) => {
                    // Binary and transport-level ping frames; the protocol
                    // above carries its own liveness frames.
                    continue;
                }
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Connect to a WebSocket URL with optional headers.
///
/// Builds an HTTP request from `url`, inserts each `(name, value)` header,
/// then performs the WebSocket handshake. Returns boxed (writer, reader)
/// halves for independent use in `tokio::select!` loops.
///
/// # Errors
///
/// Returns an error if the URL is invalid, header values are malformed,
/// or the WebSocket handshake fails.
pub async fn connect(
    url: &str,
    headers: &[(&str, &str)],
) -> Result<(Box<dyn WireWriter>, Box<dyn WireReader>)> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    for &(name, value) in headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for {name}"))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    let (sink, stream) = ws_stream.split();

    Ok((
        Box::new(WsWriter { sink }),
        Box::new(WsReader { stream }),
    ))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://").replace("http://", "ws://")
    }
}

/// Derive the HTTP sibling of a WS(S) endpoint: swap the scheme and strip
/// the path.
#[must_use]
pub fn ws_to_http_origin(url: &str) -> String {
    let swapped = url
        .replacen("wss://", "https://", 1)
        .replacen("ws://", "http://", 1);
    match swapped.find("://") {
        Some(scheme_end) => {
            let after = scheme_end + 3;
            match swapped[after..].find('/') {
                Some(path_start) => swapped[..after + path_start].to_string(),
                None => swapped,
            }
        }
        None => swapped,
    }
}

// ============================================================================
// In-memory pipe
// ============================================================================

/// One endpoint of an in-memory duplex pipe.
pub struct Pipe {
    /// Writer half.
    pub writer: Box<dyn WireWriter>,
    /// Reader half.
    pub reader: Box<dyn WireReader>,
}

/// Writer half of an in-memory pipe endpoint.
struct PipeWriter {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl WireWriter for PipeWriter {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("pipe closed"))?;
        tx.send(text.to_string())
            .map_err(|_| anyhow::anyhow!("pipe peer hung up"))
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the sender ends the peer's read stream.
        self.tx.take();
        Ok(())
    }
}

/// Reader half of an in-memory pipe endpoint.
struct PipeReader {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl WireReader for PipeReader {
    async fn recv(&mut self) -> Option<Result<String>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Create a connected pair of in-memory duplex endpoints.
///
/// Everything written to one endpoint's writer appears on the other
/// endpoint's reader. Closing a writer ends the peer's read stream,
/// mimicking a dropped connection.
pub fn pipe() -> (Pipe, Pipe) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();

    (
        Pipe {
            writer: Box::new(PipeWriter { tx: Some(a_tx) }),
            reader: Box::new(PipeReader { rx: a_rx }),
        },
        Pipe {
            writer: Box::new(PipeWriter { tx: Some(b_tx) }),
            reader: Box::new(PipeReader { rx: b_rx }),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_scheme_https() {
        assert_eq!(http_to_ws_scheme("https://example.com"), "wss://example.com");
    }

    #[test]
    fn test_http_to_ws_scheme_http() {
        assert_eq!(
            http_to_ws_scheme("http://localhost:3000"),
            "ws://localhost:3000"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_wss_passthrough() {
        assert_eq!(
            http_to_ws_scheme("wss://example.com/websocket"),
            "wss://example.com/websocket"
        );
    }

    #[test]
    fn test_ws_to_http_origin_strips_path() {
        assert_eq!(
            ws_to_http_origin("wss://app.opshub.dev/websocket"),
            "https://app.opshub.dev"
        );
    }

    #[test]
    fn test_ws_to_http_origin_no_path() {
        assert_eq!(ws_to_http_origin("ws://localhost:3000"), "http://localhost:3000");
    }

    #[tokio::test]
    async fn test_pipe_round_trip() {
        let (mut a, mut b) = pipe();

        a.writer.send_text("hello").await.unwrap();
        let got = b.reader.recv().await.unwrap().unwrap();
        assert_eq!(got, "hello");

        b.writer.send_text("world").await.unwrap();
        let got = a.reader.recv().await.unwrap().unwrap();
        assert_eq!(got, "world");
    }

    #[tokio::test]
    async fn test_pipe_close_ends_peer_stream() {
        let (mut a, mut b) = pipe();
        a.writer.close().await.unwrap();
        assert!(b.reader.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_invalid_url_returns_error() {
        let result = connect("not-a-url", &[]).await;
        assert!(result.is_err());
    }
}
