//! Endpoint facade: path, behavior and transport binding.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::connections::ConnectionRegistry;
use crate::dispatcher::{Dispatcher, SocketEvents};
use crate::errors::{BehaviorError, EndpointError, PathError};
use crate::registry::HandlerRegistry;

/// Default `maxPayloadLength`: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD_LENGTH: usize = 16 * 1024 * 1024;

/// Default `maxBackpressure`: 64 KiB.
pub const DEFAULT_MAX_BACKPRESSURE: usize = 64 * 1024;

static SEPARATOR_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/{2,}").unwrap());
static LEADING_RELATIVE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[./]+").unwrap());
static VALID_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_/]+$").unwrap());

// ─────────────────────────────────────────────────────────────────────────────
// Path
// ─────────────────────────────────────────────────────────────────────────────

/// Normalise an endpoint path.
///
/// Trims whitespace, turns `\` into `/`, collapses separator runs, strips any
/// leading `.`/`/` sequence and one trailing `/`. The result must be non-empty
/// and match `[A-Za-z0-9_/]+`. Normalising a normalised path returns it
/// unchanged.
pub fn normalize_path(raw: &str) -> Result<String, PathError> {
    let path = raw.trim().replace('\\', "/");
    let path = SEPARATOR_RUN.replace_all(&path, "/");
    let path = LEADING_RELATIVE.replace(&path, "");
    let path = path.strip_suffix('/').unwrap_or(&*path);

    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if !VALID_PATH.is_match(path) {
        return Err(PathError::InvalidCharacters(path.to_owned()));
    }
    Ok(path.to_owned())
}

// ─────────────────────────────────────────────────────────────────────────────
// Behavior
// ─────────────────────────────────────────────────────────────────────────────

/// Per-message compression mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression.
    #[default]
    Disabled,
    /// One compressor shared by all connections.
    Shared,
    /// One compressor per connection.
    Dedicated,
}

impl Compression {
    /// Parse the lowercase name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" => Some(Self::Disabled),
            "shared" => Some(Self::Shared),
            "dedicated" => Some(Self::Dedicated),
            _ => None,
        }
    }
}

/// User-facing endpoint behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Behavior {
    /// Compression mode.
    pub compression: Compression,
    /// Largest accepted inbound message, in bytes.
    pub max_payload_length: usize,
    /// Seconds without inbound traffic before the connection is closed.
    /// `None` or `0` disables the timeout.
    pub idle_timeout: Option<u64>,
    /// Buffered outbound bytes above which sends report backpressure.
    pub max_backpressure: usize,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            compression: Compression::Disabled,
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            idle_timeout: None,
            max_backpressure: DEFAULT_MAX_BACKPRESSURE,
        }
    }
}

impl Behavior {
    /// Check the limits are usable.
    pub fn validate(&self) -> Result<(), BehaviorError> {
        if self.max_payload_length == 0 {
            return Err(BehaviorError::ZeroPayloadLength);
        }
        if self.max_backpressure == 0 {
            return Err(BehaviorError::ZeroBackpressure);
        }
        Ok(())
    }

    /// Idle timeout, if enabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Everything a transport needs to serve one endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// Compression mode.
    pub compression: Compression,
    /// Largest accepted inbound message, in bytes.
    pub max_payload_length: usize,
    /// Idle timeout, if enabled.
    pub idle_timeout: Option<Duration>,
    /// Backpressure threshold, in bytes.
    pub max_backpressure: usize,
    /// Send keep-alive pings without application involvement.
    pub send_pings_automatically: bool,
    /// Hard cap on connection age; `None` is unlimited.
    pub max_lifetime: Option<Duration>,
    /// Close instead of buffering once the backpressure limit is hit.
    pub close_on_backpressure_limit: bool,
    /// Whether outbound frames restart the idle timer.
    pub reset_idle_timeout_on_send: bool,
}

impl From<&Behavior> for TransportConfig {
    fn from(behavior: &Behavior) -> Self {
        Self {
            compression: behavior.compression,
            max_payload_length: behavior.max_payload_length,
            idle_timeout: behavior.idle_timeout(),
            max_backpressure: behavior.max_backpressure,
            send_pings_automatically: true,
            max_lifetime: None,
            close_on_backpressure_limit: false,
            reset_idle_timeout_on_send: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint
// ─────────────────────────────────────────────────────────────────────────────

/// A WebSocket server able to host endpoints.
pub trait Transport {
    /// Serve `path` with `config`, delivering lifecycle callbacks to `events`.
    fn register(&mut self, path: &str, config: TransportConfig, events: Arc<dyn SocketEvents>);
}

/// One WebSocket path bound to its own handlers and connections.
#[derive(Debug)]
pub struct Endpoint {
    path: String,
    config: TransportConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Endpoint {
    /// Validate `path` and `behavior` and take ownership of `handlers`.
    pub fn new(
        path: &str,
        behavior: &Behavior,
        handlers: HandlerRegistry,
    ) -> Result<Self, EndpointError> {
        let path = normalize_path(path)?;
        behavior.validate()?;
        Ok(Self {
            path,
            config: TransportConfig::from(behavior),
            dispatcher: Arc::new(Dispatcher::new(Arc::new(handlers))),
        })
    }

    /// Register this endpoint with a transport.
    pub fn bind<T: Transport + ?Sized>(&self, transport: &mut T) {
        info!(
            path = %self.path,
            actions = self.handlers().action_names().len(),
            events = self.handlers().event_names().len(),
            "binding endpoint"
        );
        transport.register(
            &self.path,
            self.config.clone(),
            Arc::clone(&self.dispatcher) as Arc<dyn SocketEvents>,
        );
    }

    /// Normalised path, without a leading `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Handler tables.
    pub fn handlers(&self) -> &HandlerRegistry {
        self.dispatcher.handlers()
    }

    /// Open connections.
    pub fn connections(&self) -> &ConnectionRegistry {
        self.dispatcher.connections()
    }

    /// The dispatcher behind this endpoint.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}
