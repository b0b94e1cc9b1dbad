//! Connection lifecycle and per-frame dispatch.
//!
//! The transport drives a [`SocketEvents`] implementation with one call per
//! lifecycle transition. [`Dispatcher`] is the only implementation in the
//! core: it keeps the [`ConnectionRegistry`] in step with open/close, fans
//! lifecycle events out to the registered handlers in order, and routes each
//! decoded envelope to exactly one action or event handler.
//!
//! Per-message failures are logged, counted, handed to the registry's error
//! reporters and returned to the transport. They never close the connection.
//! A panicking handler counts as a handler failure.
//!
//! Drain and subscription notifications for identities that are not open are
//! ignored, so nothing fires for a connection after its close.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use tracing::{debug, warn};

use crate::connections::ConnectionRegistry;
use crate::envelope::{FrameKind, MessageType, decode};
use crate::errors::{DispatchError, HandlerError};
use crate::registry::{HandlerCategory, HandlerRegistry, Invocation};
use crate::socket::{SocketRef, SubscriptionChange, UpgradeRequest, UpgradeResponse};

/// Transport callback seam.
///
/// A transport calls `on_upgrade` before the handshake completes, `on_open`
/// once the connection has an identity, `on_message` for every inbound data
/// frame (awaiting each call before reading the next frame), and `on_close`
/// exactly once when the connection ends for any reason.
#[async_trait]
pub trait SocketEvents: Send + Sync {
    /// Handshake request; returns the negotiated values.
    fn on_upgrade(&self, request: &UpgradeRequest) -> UpgradeResponse;

    /// Connection opened.
    fn on_open(&self, socket: SocketRef);

    /// Inbound frame.
    async fn on_message(
        &self,
        socket: &SocketRef,
        payload: &[u8],
        kind: FrameKind,
    ) -> Result<Routed, DispatchError>;

    /// Buffered bytes dropped back under the backpressure limit.
    fn on_drain(&self, socket: &SocketRef);

    /// A topic subscription changed.
    fn on_subscription(&self, socket: &SocketRef, change: &SubscriptionChange);

    /// Connection closed.
    fn on_close(&self, socket: &SocketRef, code: u16, reason: &str);
}

/// Where a frame was delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Routed {
    /// Action or event.
    pub category: HandlerCategory,
    /// Handler name.
    pub name: String,
    /// Envelope message id.
    pub message_id: Option<String>,
}

/// Per-endpoint dispatcher.
#[derive(Debug)]
pub struct Dispatcher {
    handlers: Arc<HandlerRegistry>,
    connections: ConnectionRegistry,
}

impl Dispatcher {
    /// Create a dispatcher over a populated registry.
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            handlers,
            connections: ConnectionRegistry::new(),
        }
    }

    /// Handler tables.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Open connections.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    async fn route(
        &self,
        socket: &SocketRef,
        payload: &[u8],
        kind: FrameKind,
    ) -> Result<Routed, DispatchError> {
        let envelope = decode(payload, kind)?;

        let (category, found) = match envelope.kind {
            MessageType::Action => (HandlerCategory::Action, self.handlers.action(&envelope.name)),
            MessageType::Event => (HandlerCategory::Event, self.handlers.event(&envelope.name)),
            MessageType::Unknown(value) => return Err(DispatchError::InvalidType(value)),
        };
        let Some(record) = found else {
            return Err(match category {
                HandlerCategory::Action => DispatchError::UnknownAction(envelope.name),
                HandlerCategory::Event => DispatchError::UnknownEvent(envelope.name),
            });
        };
        let handler = Arc::clone(&record.handler);

        counter!("beatbox_dispatch_total", "kind" => category.as_str(), "name" => envelope.name.clone())
            .increment(1);
        debug!(
            conn_id = %socket.id(),
            %category,
            name = %envelope.name,
            message_id = ?envelope.message_id,
            "dispatching"
        );

        let start = Instant::now();
        let invocation = Invocation {
            socket: Arc::clone(socket),
            message_id: envelope.message_id.clone(),
            data: envelope.data,
        };
        let result = AssertUnwindSafe(handler.handle(invocation))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(&*panic))));
        histogram!("beatbox_dispatch_duration_seconds", "kind" => category.as_str())
            .record(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => Ok(Routed {
                category,
                name: envelope.name,
                message_id: envelope.message_id,
            }),
            Err(source) => Err(DispatchError::Handler {
                category,
                name: envelope.name,
                source,
            }),
        }
    }

    fn report(&self, socket: &SocketRef, err: &DispatchError) {
        counter!("beatbox_dispatch_errors_total", "error_type" => err.kind()).increment(1);
        warn!(conn_id = %socket.id(), error_type = err.kind(), error = %err, "dispatch failed");
        for reporter in self.handlers.error_reporters() {
            reporter(socket, err);
        }
    }
}

/// Text of a panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[async_trait]
impl SocketEvents for Dispatcher {
    fn on_upgrade(&self, request: &UpgradeRequest) -> UpgradeResponse {
        let mut response = UpgradeResponse {
            key: request.key.clone(),
            protocol: request.protocol.clone(),
            extensions: request.extensions.clone(),
            ..UpgradeResponse::default()
        };
        for handler in &self.handlers.lifecycle().upgrade {
            handler(request, &mut response);
        }
        debug!(path = %request.path, protocol = ?response.protocol, "upgrade");
        response
    }

    fn on_open(&self, socket: SocketRef) {
        if self.connections.insert(Arc::clone(&socket)) {
            gauge!("beatbox_connections_active").increment(1.0);
        }
        debug!(conn_id = %socket.id(), "connection opened");
        for handler in &self.handlers.lifecycle().open {
            handler(&socket);
        }
    }

    async fn on_message(
        &self,
        socket: &SocketRef,
        payload: &[u8],
        kind: FrameKind,
    ) -> Result<Routed, DispatchError> {
        counter!("beatbox_frames_total", "kind" => kind.as_str()).increment(1);

        if !self.connections.contains(socket.id()) {
            let err = DispatchError::NotOpen(socket.id().clone());
            self.report(socket, &err);
            return Err(err);
        }

        for observer in &self.handlers.lifecycle().message {
            observer(socket, payload, kind);
        }

        let result = self.route(socket, payload, kind).await;
        if let Err(err) = &result {
            self.report(socket, err);
        }
        result
    }

    fn on_drain(&self, socket: &SocketRef) {
        if !self.connections.contains(socket.id()) {
            return;
        }
        debug!(conn_id = %socket.id(), "drain");
        for handler in &self.handlers.lifecycle().drain {
            handler(socket);
        }
    }

    fn on_subscription(&self, socket: &SocketRef, change: &SubscriptionChange) {
        if !self.connections.contains(socket.id()) {
            return;
        }
        debug!(
            conn_id = %socket.id(),
            topic = %change.topic,
            before = change.subscribers_before,
            after = change.subscribers_after,
            "subscription changed"
        );
        for handler in &self.handlers.lifecycle().subscription {
            handler(socket, change);
        }
    }

    fn on_close(&self, socket: &SocketRef, code: u16, reason: &str) {
        if self.connections.remove(socket.id()).is_none() {
            return;
        }
        gauge!("beatbox_connections_active").decrement(1.0);
        debug!(conn_id = %socket.id(), code, reason, "connection closed");
        for handler in &self.handlers.lifecycle().close {
            handler(socket, code, reason);
        }
    }
}
