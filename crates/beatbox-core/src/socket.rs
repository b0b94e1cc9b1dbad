//! Transport-facing connection handle and lifecycle payloads.
//!
//! The core never owns a network connection. The transport hands it a
//! [`SocketRef`] at open time and the core only uses the capabilities on the
//! [`Socket`] trait.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::envelope::{Envelope, encode};
use crate::ids::ConnectionId;

/// Frame sent to a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl OutboundFrame {
    /// Text frame carrying an encoded envelope.
    pub fn envelope(envelope: &Envelope) -> Self {
        Self::Text(encode(envelope))
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for OutboundFrame {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for OutboundFrame {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<Bytes> for OutboundFrame {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

/// Outcome of [`Socket::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// Queued with room to spare.
    Sent,
    /// Queued, but buffered bytes now exceed the backpressure limit.
    Backpressure,
    /// Not queued (queue full or connection closed).
    Dropped,
}

impl SendStatus {
    /// Whether the frame was queued.
    pub fn is_accepted(self) -> bool {
        !matches!(self, Self::Dropped)
    }
}

/// Opaque per-connection key/value context created at upgrade time.
#[derive(Debug, Default)]
pub struct UserData(Mutex<Map<String, Value>>);

impl UserData {
    /// Wrap an initial map.
    pub fn new(values: Map<String, Value>) -> Self {
        Self(Mutex::new(values))
    }

    /// Clone of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.lock().get(key).cloned()
    }

    /// Store a value, returning the previous one.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.lock().insert(key.into(), value)
    }

    /// Remove a value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.lock().remove(key)
    }

    /// Whether no values are stored.
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// A live connection as seen by the core.
pub trait Socket: Send + Sync {
    /// Stable identity assigned by the transport at open.
    fn id(&self) -> &ConnectionId;

    /// Queue a frame for the peer. Never blocks.
    fn send(&self, frame: OutboundFrame) -> SendStatus;

    /// Ask the transport to close the connection.
    fn close(&self, code: u16, reason: &str);

    /// Context populated during the upgrade.
    fn user_data(&self) -> &UserData;

    /// Bytes queued but not yet written.
    fn buffered_amount(&self) -> usize {
        0
    }

    /// Subscribe to a pub/sub topic. Returns `false` if unsupported or
    /// already subscribed.
    fn subscribe(&self, _topic: &str) -> bool {
        false
    }

    /// Unsubscribe from a topic. Returns `false` if unsupported or not
    /// subscribed.
    fn unsubscribe(&self, _topic: &str) -> bool {
        false
    }
}

/// Shared handle to a live connection.
pub type SocketRef = Arc<dyn Socket>;

impl fmt::Debug for dyn Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket").field("id", self.id()).finish_non_exhaustive()
    }
}

/// Handshake request as seen before the connection exists.
#[derive(Clone, Debug, Default)]
pub struct UpgradeRequest {
    /// Request path.
    pub path: String,
    /// `sec-websocket-key`.
    pub key: Option<String>,
    /// `sec-websocket-protocol`.
    pub protocol: Option<String>,
    /// `sec-websocket-extensions`.
    pub extensions: Option<String>,
    /// Peer address, when the transport knows it.
    pub remote_addr: Option<SocketAddr>,
}

/// Negotiated handshake values handed back to the transport.
///
/// Upgrade handlers may edit the values before the transport completes the
/// handshake.
#[derive(Debug, Default)]
pub struct UpgradeResponse {
    /// Echoed `sec-websocket-key`.
    pub key: Option<String>,
    /// Selected sub-protocol.
    pub protocol: Option<String>,
    /// Negotiated extensions.
    pub extensions: Option<String>,
    /// Fresh per-connection context.
    pub user_data: UserData,
}

/// Topic subscription transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionChange {
    /// Topic name.
    pub topic: String,
    /// Subscriber count before the change.
    pub subscribers_before: usize,
    /// Subscriber count after the change.
    pub subscribers_after: usize,
}

impl SubscriptionChange {
    /// Whether the change added a subscriber.
    pub fn is_subscribe(&self) -> bool {
        self.subscribers_after > self.subscribers_before
    }
}
