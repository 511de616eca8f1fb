//! Application-wide constants for the opshub SDK.
//!
//! This module centralizes all magic numbers and protocol constants
//! to improve maintainability and discoverability. Constants are grouped
//! by domain with documentation explaining their purpose.
//!
//! # Categories
//!
//! - **Identity**: SDK name/version reported to the service
//! - **Timeouts**: Network and operation timeouts
//! - **Protocol**: Wire-level thresholds and caps

use std::time::Duration;

// ============================================================================
// Identity
// ============================================================================

/// SDK name reported in the initialization handshake.
pub const SDK_NAME: &str = "opshub-rs";

/// SDK version reported in the initialization handshake.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Timeouts
// ============================================================================

/// Default interval between liveness pings on an open connection.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default time to wait for a PONG before a ping fails.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time to wait for the peer's OPEN during the connect handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default time a framed send waits for its acknowledgement.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between reconnection attempts after an unexpected close.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Default interval between retries of an unacknowledged chunk.
pub const DEFAULT_RETRY_CHUNK_INTERVAL: Duration = Duration::from_millis(1500);

/// How long a connection may go without a successful pong before it is
/// force-closed to trigger reconnection.
pub const DEFAULT_CLOSE_UNRESPONSIVE_TIMEOUT: Duration = Duration::from_secs(180);

/// Window over which runtime route changes are coalesced before the host
/// re-announces its route set.
pub const DEFAULT_REINITIALIZE_BATCH_TIMEOUT: Duration = Duration::from_millis(200);

/// Extra delay after the in-flight transaction set drains during a graceful
/// shutdown, letting final acknowledgements land.
pub const DEFAULT_COMPLETE_REQUEST_DELAY: Duration = Duration::from_secs(3);

// ============================================================================
// Protocol
// ============================================================================

/// Payloads strictly larger than this are split into separately-acked chunks.
///
/// A payload of exactly this size travels as a single MESSAGE frame.
pub const CHUNK_THRESHOLD_BYTES: usize = 64 * 1024;

/// Maximum retries for a single unacknowledged chunk before the whole send
/// fails.
pub const MAX_CHUNK_RETRIES: u32 = 3;

/// Default cap on resend attempts made by the resend coordinators.
pub const DEFAULT_MAX_RESEND_ATTEMPTS: u32 = 10;

/// Transaction log payloads are capped at this many bytes; longer payloads
/// are truncated with [`LOG_TRUNCATION_MARKER`] appended.
pub const MAX_LOG_BYTES: usize = 10_000;

/// Marker appended to a truncated log payload.
pub const LOG_TRUNCATION_MARKER: &str = " (truncated)";

/// Trailing window over which loading-state mutations are coalesced into a
/// single outbound call.
pub const LOADING_COALESCE_WINDOW: Duration = Duration::from_millis(100);
