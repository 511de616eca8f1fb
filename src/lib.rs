//! opshub: host-side SDK for the OpsHub dashboard.
//!
//! Developer code defines *actions* (async handlers) and *pages*
//! (dynamic directories); the SDK holds a persistent connection to the
//! OpsHub service, which renders each handler's I/O requests to end
//! users in a web UI and streams their responses back.
//!
//! # Quick start
//!
//! ```ignore
//! use opshub::{Config, Host, Route};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let host = Host::new(
//!         Config::new(std::env::var("OPSHUB_API_KEY")?, "wss://app.opshub.dev/websocket"),
//!         vec![Route::action("hello", |io, _ctx| async move {
//!             let name = io.input.text("Name").await?;
//!             Ok(json!(format!("Hi, {name}")))
//!         })],
//!     );
//!     host.listen().await?;
//!     tokio::signal::ctrl_c().await?;
//!     host.safely_close().await
//! }
//! ```
//!
//! # Architecture
//!
//! - [`ws`]: transport halves (WebSocket or in-memory pipe)
//! - [`socket`]: acknowledged, chunked message exchange
//! - [`rpc`]: typed duplex RPC multiplexer
//! - [`routes`]: route tree and runtime registry
//! - [`io`]: per-transaction render loop, components, builders
//! - [`transaction`]: transaction/page lifecycle and contexts
//! - [`loading`]: coalesced progress reports
//! - [`host`]: connection lifecycle, dispatch, resend coordinators

pub mod config;
pub mod constants;
pub mod error;
pub mod host;
pub mod io;
pub mod loading;
pub mod routes;
pub mod rpc;
pub mod socket;
pub mod transaction;
pub mod ws;

// Re-export the surface most embedders touch.
pub use config::{Config, ErrorReport, LogLevel};
pub use error::{HostError, IoError, IoErrorKind, SocketError, ValidationError};
pub use host::{Connector, Host, SessionInfo, WsConnector};
pub use io::{BuiltinRegistry, ComponentRegistry, GroupResult, Io, SelectOption};
pub use loading::{LoadingHandle, LoadingOptions};
pub use routes::{Layout, LayoutField, Route, RouteRegistry};
pub use rpc::methods::ChoiceButton;
pub use transaction::{current_ctx, current_io, ActionCtx, PageCtx, RedirectTarget};
