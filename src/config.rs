//! SDK configuration.
//!
//! All tunables recognized by the host controller live here. Values come
//! from three places, in priority order: explicit builder calls,
//! environment variables (`OPSHUB_*`), then defaults.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;

/// How chatty the SDK's own logging is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only.
    Quiet,
    /// Connection lifecycle and warnings.
    #[default]
    Info,
    /// Everything, including per-message traces.
    Debug,
}

impl LogLevel {
    /// Whether info-level SDK messages should be emitted.
    pub fn info_enabled(&self) -> bool {
        !matches!(self, Self::Quiet)
    }

    /// Whether debug-level SDK messages should be emitted.
    pub fn debug_enabled(&self) -> bool {
        matches!(self, Self::Debug)
    }
}

/// Metadata handed to the `on_error` callback when a handler fails.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    /// Slug path of the failing route.
    pub route: String,
    /// Serialized params the handler was invoked with.
    pub params: serde_json::Value,
    /// Email of the invoking user, when known.
    pub user_email: Option<String>,
    /// Organization slug, when known.
    pub organization_slug: Option<String>,
    /// Error name (type) reported by the handler.
    pub error: String,
    /// Error message reported by the handler.
    pub message: String,
}

/// Callback invoked when a transaction handler fails.
pub type OnErrorFn = Arc<dyn Fn(ErrorReport) + Send + Sync>;

/// SDK configuration.
///
/// `api_key` and `endpoint` are required for a live connection; everything
/// else has a production default.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// API key identifying this host to the service.
    pub api_key: String,
    /// WebSocket endpoint of the service.
    pub endpoint: String,
    /// Interval between reconnection attempts (and the resend backoff unit).
    #[serde(with = "duration_ms")]
    pub retry_interval: Duration,
    /// Interval between liveness pings.
    #[serde(with = "duration_ms")]
    pub ping_interval: Duration,
    /// Time to wait for a PONG before a ping fails.
    #[serde(with = "duration_ms")]
    pub ping_timeout: Duration,
    /// Time to wait for the peer's OPEN during connect.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Base time a framed send waits for its acknowledgement.
    #[serde(with = "duration_ms")]
    pub send_timeout: Duration,
    /// How long the connection may go without a pong before force-close.
    #[serde(with = "duration_ms")]
    pub close_unresponsive_connection_timeout: Duration,
    /// Window over which runtime route changes are coalesced.
    #[serde(with = "duration_ms")]
    pub reinitialize_batch_timeout: Duration,
    /// Interval between retries of an unacknowledged chunk.
    #[serde(with = "duration_ms")]
    pub retry_chunk_interval: Duration,
    /// Cap on resend-coordinator attempts. Zero means exactly one attempt.
    pub max_resend_attempts: u32,
    /// Extra delay after transactions drain during graceful shutdown.
    #[serde(with = "duration_ms")]
    pub complete_http_request_delay: Duration,
    /// SDK log verbosity.
    pub log_level: LogLevel,
    /// Dump raw frames at debug level. Diagnostic only.
    pub verbose_message_logs: bool,
    /// Callback invoked when a transaction handler fails.
    #[serde(skip)]
    pub on_error: Option<OnErrorFn>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("retry_interval", &self.retry_interval)
            .field("ping_interval", &self.ping_interval)
            .field("log_level", &self.log_level)
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "wss://app.opshub.dev/websocket".to_string(),
            retry_interval: constants::DEFAULT_RETRY_INTERVAL,
            ping_interval: constants::DEFAULT_PING_INTERVAL,
            ping_timeout: constants::DEFAULT_PING_TIMEOUT,
            connect_timeout: constants::DEFAULT_CONNECT_TIMEOUT,
            send_timeout: constants::DEFAULT_SEND_TIMEOUT,
            close_unresponsive_connection_timeout:
                constants::DEFAULT_CLOSE_UNRESPONSIVE_TIMEOUT,
            reinitialize_batch_timeout: constants::DEFAULT_REINITIALIZE_BATCH_TIMEOUT,
            retry_chunk_interval: constants::DEFAULT_RETRY_CHUNK_INTERVAL,
            max_resend_attempts: constants::DEFAULT_MAX_RESEND_ATTEMPTS,
            complete_http_request_delay: constants::DEFAULT_COMPLETE_REQUEST_DELAY,
            log_level: LogLevel::default(),
            verbose_message_logs: false,
            on_error: None,
        }
    }
}

impl Config {
    /// Build a config with the required fields set and env overrides applied.
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let mut config = Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            ..Self::default()
        };
        config.apply_env_overrides();
        config
    }

    /// Override fields from `OPSHUB_*` environment variables, if present.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(api_key) = std::env::var("OPSHUB_API_KEY") {
            self.api_key = api_key;
        }

        if let Ok(endpoint) = std::env::var("OPSHUB_ENDPOINT") {
            self.endpoint = endpoint;
        }

        if let Ok(interval) = std::env::var("OPSHUB_RETRY_INTERVAL_MS") {
            if let Ok(ms) = interval.parse::<u64>() {
                self.retry_interval = Duration::from_millis(ms);
            }
        }

        if let Ok(interval) = std::env::var("OPSHUB_PING_INTERVAL_MS") {
            if let Ok(ms) = interval.parse::<u64>() {
                self.ping_interval = Duration::from_millis(ms);
            }
        }

        if let Ok(level) = std::env::var("OPSHUB_LOG_LEVEL") {
            match level.to_ascii_lowercase().as_str() {
                "quiet" => self.log_level = LogLevel::Quiet,
                "info" => self.log_level = LogLevel::Info,
                "debug" => self.log_level = LogLevel::Debug,
                other => log::warn!("Unknown OPSHUB_LOG_LEVEL value: {other}"),
            }
        }

        if let Ok(val) = std::env::var("OPSHUB_VERBOSE_MESSAGE_LOGS") {
            self.verbose_message_logs = val.eq_ignore_ascii_case("true") || val == "1";
        }
    }

    /// HTTP sibling of the configured endpoint: scheme swapped, path
    /// stripped.
    pub fn http_origin(&self) -> String {
        crate::ws::ws_to_http_origin(&self.endpoint)
    }

    /// Builder-style log level override.
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Builder-style handler-failure callback.
    pub fn with_on_error(mut self, f: impl Fn(ErrorReport) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Builder-style resend-attempt cap.
    pub fn with_max_resend_attempts(mut self, attempts: u32) -> Self {
        self.max_resend_attempts = attempts;
        self
    }
}

/// Serialize `Duration` fields as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
