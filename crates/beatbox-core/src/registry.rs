//! Handler registry.
//!
//! One [`HandlerRegistry`] belongs to one endpoint. It is filled during setup
//! through `&mut self` and then shared read-only behind an `Arc`, so the
//! dispatch path needs no locking.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::envelope::FrameKind;
use crate::errors::{DispatchError, HandlerError, RegistrationError};
use crate::schema::{SchemaDescription, Signature, reflect};
use crate::socket::{SocketRef, SubscriptionChange, UpgradeRequest, UpgradeResponse};

// ─────────────────────────────────────────────────────────────────────────────
// Action / event handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Which name-keyed map a handler lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerCategory {
    /// Client-invoked, carries a message id.
    Action,
    /// Fire-and-forget.
    Event,
}

impl HandlerCategory {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for HandlerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments passed to an action or event handler.
#[derive(Debug)]
pub struct Invocation<T = Value> {
    /// Connection the message arrived on. Replies go through `socket.send`.
    pub socket: SocketRef,
    /// Envelope `messageId` (always set for actions).
    pub message_id: Option<String>,
    /// Envelope `data`.
    pub data: T,
}

/// An action or event handler.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one routed message.
    async fn handle(&self, invocation: Invocation) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, invocation: Invocation) -> Result<(), HandlerError> {
        (self)(invocation).await
    }
}

/// Handler whose `data` is deserialised into `T` before the call.
///
/// A payload that does not deserialise yields [`HandlerError::InvalidData`]
/// and the wrapped closure is not called.
pub struct Typed<T, F> {
    f: F,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F, Fut> Typed<T, F>
where
    F: Fn(Invocation<T>) -> Fut,
    Fut: Future<Output = Result<(), HandlerError>>,
{
    /// Wrap a closure taking a typed invocation.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> MessageHandler for Typed<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(Invocation<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, invocation: Invocation) -> Result<(), HandlerError> {
        let data: T = serde_json::from_value(invocation.data)
            .map_err(|e| HandlerError::InvalidData(e.to_string()))?;
        (self.f)(Invocation {
            socket: invocation.socket,
            message_id: invocation.message_id,
            data,
        })
        .await
    }
}

/// Stored action or event.
#[derive(Clone)]
pub struct RegisteredHandler {
    /// Registered name.
    pub name: String,
    /// Documentation, empty when none was given.
    pub doc: String,
    /// Reflected parameter schema.
    pub schema: SchemaDescription,
    /// The callable.
    pub handler: Arc<dyn MessageHandler>,
}

impl fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("name", &self.name)
            .field("doc", &self.doc)
            .finish_non_exhaustive()
    }
}

/// Introspection entry for one handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandlerDescription {
    /// Documentation string.
    pub doc: String,
    /// Parameter schema.
    pub fullargspec: SchemaDescription,
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle hooks
// ─────────────────────────────────────────────────────────────────────────────

/// Observer of upgrade requests; may edit the response.
pub type UpgradeHandler = Arc<dyn Fn(&UpgradeRequest, &mut UpgradeResponse) + Send + Sync>;
/// Observer of open and drain transitions.
pub type SocketHandler = Arc<dyn Fn(&SocketRef) + Send + Sync>;
/// Observer of close transitions: socket, code, reason.
pub type CloseHandler = Arc<dyn Fn(&SocketRef, u16, &str) + Send + Sync>;
/// Observer of every raw inbound frame.
pub type MessageObserver = Arc<dyn Fn(&SocketRef, &[u8], FrameKind) + Send + Sync>;
/// Observer of topic subscription changes.
pub type SubscriptionHandler = Arc<dyn Fn(&SocketRef, &SubscriptionChange) + Send + Sync>;
/// Reporter for per-message dispatch failures.
pub type ErrorReporter = Arc<dyn Fn(&SocketRef, &DispatchError) + Send + Sync>;

/// Lifecycle hook kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    /// Handshake, before the connection exists.
    Upgrade,
    /// Connection opened.
    Open,
    /// Connection closed.
    Close,
    /// Any inbound frame.
    Message,
    /// Backpressure relieved.
    Drain,
    /// Topic subscription changed.
    Subscription,
}

impl LifecycleKind {
    /// Every kind, in callback order.
    pub const ALL: [Self; 6] = [
        Self::Upgrade,
        Self::Open,
        Self::Close,
        Self::Message,
        Self::Drain,
        Self::Subscription,
    ];

    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upgrade => "upgrade",
            Self::Open => "open",
            Self::Close => "close",
            Self::Message => "message",
            Self::Drain => "drain",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle handler tagged with its kind.
#[derive(Clone)]
pub enum LifecycleHook {
    /// See [`LifecycleKind::Upgrade`].
    Upgrade(UpgradeHandler),
    /// See [`LifecycleKind::Open`].
    Open(SocketHandler),
    /// See [`LifecycleKind::Close`].
    Close(CloseHandler),
    /// See [`LifecycleKind::Message`].
    Message(MessageObserver),
    /// See [`LifecycleKind::Drain`].
    Drain(SocketHandler),
    /// See [`LifecycleKind::Subscription`].
    Subscription(SubscriptionHandler),
}

impl LifecycleHook {
    /// Kind of this hook.
    pub fn kind(&self) -> LifecycleKind {
        match self {
            Self::Upgrade(_) => LifecycleKind::Upgrade,
            Self::Open(_) => LifecycleKind::Open,
            Self::Close(_) => LifecycleKind::Close,
            Self::Message(_) => LifecycleKind::Message,
            Self::Drain(_) => LifecycleKind::Drain,
            Self::Subscription(_) => LifecycleKind::Subscription,
        }
    }
}

/// Lifecycle lists, one per kind, each in registration order.
#[derive(Clone, Default)]
pub(crate) struct LifecycleHandlers {
    pub(crate) upgrade: Vec<UpgradeHandler>,
    pub(crate) open: Vec<SocketHandler>,
    pub(crate) close: Vec<CloseHandler>,
    pub(crate) message: Vec<MessageObserver>,
    pub(crate) drain: Vec<SocketHandler>,
    pub(crate) subscription: Vec<SubscriptionHandler>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Per-endpoint handler tables.
#[derive(Default)]
pub struct HandlerRegistry {
    actions: HashMap<String, RegisteredHandler>,
    events: HashMap<String, RegisteredHandler>,
    lifecycle: LifecycleHandlers,
    error_reporters: Vec<ErrorReporter>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. A previous action with the same name is replaced.
    ///
    /// Returns the same handler so the caller can keep using it directly.
    pub fn register_action<H: MessageHandler>(
        &mut self,
        name: &str,
        doc: &str,
        signature: &Signature,
        handler: H,
    ) -> Result<Arc<H>, RegistrationError> {
        self.register(HandlerCategory::Action, name, doc, signature, handler)
    }

    /// Register an event. A previous event with the same name is replaced.
    pub fn register_event<H: MessageHandler>(
        &mut self,
        name: &str,
        doc: &str,
        signature: &Signature,
        handler: H,
    ) -> Result<Arc<H>, RegistrationError> {
        self.register(HandlerCategory::Event, name, doc, signature, handler)
    }

    fn register<H: MessageHandler>(
        &mut self,
        category: HandlerCategory,
        name: &str,
        doc: &str,
        signature: &Signature,
        handler: H,
    ) -> Result<Arc<H>, RegistrationError> {
        if name.trim().is_empty() {
            return Err(RegistrationError::EmptyName { category });
        }
        let handler = Arc::new(handler);
        let record = RegisteredHandler {
            name: name.to_owned(),
            doc: doc.to_owned(),
            schema: reflect(signature),
            handler: Arc::clone(&handler) as Arc<dyn MessageHandler>,
        };
        let map = match category {
            HandlerCategory::Action => &mut self.actions,
            HandlerCategory::Event => &mut self.events,
        };
        if map.insert(name.to_owned(), record).is_some() {
            debug!(%category, name, "replaced previously registered handler");
        }
        Ok(handler)
    }

    /// Append a lifecycle handler to the list for its kind.
    pub fn register_lifecycle_handler(&mut self, hook: LifecycleHook) {
        match hook {
            LifecycleHook::Upgrade(h) => self.lifecycle.upgrade.push(h),
            LifecycleHook::Open(h) => self.lifecycle.open.push(h),
            LifecycleHook::Close(h) => self.lifecycle.close.push(h),
            LifecycleHook::Message(h) => self.lifecycle.message.push(h),
            LifecycleHook::Drain(h) => self.lifecycle.drain.push(h),
            LifecycleHook::Subscription(h) => self.lifecycle.subscription.push(h),
        }
    }

    /// Register an upgrade handler.
    pub fn on_upgrade<F>(&mut self, f: F) -> Arc<F>
    where
        F: Fn(&UpgradeRequest, &mut UpgradeResponse) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.register_lifecycle_handler(LifecycleHook::Upgrade(Arc::clone(&f) as UpgradeHandler));
        f
    }

    /// Register an open handler.
    pub fn on_open<F>(&mut self, f: F) -> Arc<F>
    where
        F: Fn(&SocketRef) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.register_lifecycle_handler(LifecycleHook::Open(Arc::clone(&f) as SocketHandler));
        f
    }

    /// Register a close handler.
    pub fn on_close<F>(&mut self, f: F) -> Arc<F>
    where
        F: Fn(&SocketRef, u16, &str) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.register_lifecycle_handler(LifecycleHook::Close(Arc::clone(&f) as CloseHandler));
        f
    }

    /// Register a raw message observer.
    pub fn on_message<F>(&mut self, f: F) -> Arc<F>
    where
        F: Fn(&SocketRef, &[u8], FrameKind) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.register_lifecycle_handler(LifecycleHook::Message(Arc::clone(&f) as MessageObserver));
        f
    }

    /// Register a drain handler.
    pub fn on_drain<F>(&mut self, f: F) -> Arc<F>
    where
        F: Fn(&SocketRef) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.register_lifecycle_handler(LifecycleHook::Drain(Arc::clone(&f) as SocketHandler));
        f
    }

    /// Register a subscription handler.
    pub fn on_subscription<F>(&mut self, f: F) -> Arc<F>
    where
        F: Fn(&SocketRef, &SubscriptionChange) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.register_lifecycle_handler(LifecycleHook::Subscription(
            Arc::clone(&f) as SubscriptionHandler
        ));
        f
    }

    /// Register a reporter for per-message dispatch failures.
    pub fn on_error<F>(&mut self, f: F) -> Arc<F>
    where
        F: Fn(&SocketRef, &DispatchError) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.error_reporters.push(Arc::clone(&f) as ErrorReporter);
        f
    }

    /// Look up an action.
    pub fn action(&self, name: &str) -> Option<&RegisteredHandler> {
        self.actions.get(name)
    }

    /// Look up an event.
    pub fn event(&self, name: &str) -> Option<&RegisteredHandler> {
        self.events.get(name)
    }

    /// Registered action names, sorted.
    pub fn action_names(&self) -> Vec<String> {
        sorted_keys(&self.actions)
    }

    /// Registered event names, sorted.
    pub fn event_names(&self) -> Vec<String> {
        sorted_keys(&self.events)
    }

    /// Number of handlers registered for a lifecycle kind.
    pub fn lifecycle_count(&self, kind: LifecycleKind) -> usize {
        let l = &self.lifecycle;
        match kind {
            LifecycleKind::Upgrade => l.upgrade.len(),
            LifecycleKind::Open => l.open.len(),
            LifecycleKind::Close => l.close.len(),
            LifecycleKind::Message => l.message.len(),
            LifecycleKind::Drain => l.drain.len(),
            LifecycleKind::Subscription => l.subscription.len(),
        }
    }

    /// Introspection listing of every action.
    pub fn describe_actions(&self) -> BTreeMap<String, Vec<HandlerDescription>> {
        describe(&self.actions)
    }

    /// Introspection listing of every event.
    pub fn describe_events(&self) -> BTreeMap<String, Vec<HandlerDescription>> {
        describe(&self.events)
    }

    pub(crate) fn lifecycle(&self) -> &LifecycleHandlers {
        &self.lifecycle
    }

    pub(crate) fn error_reporters(&self) -> &[ErrorReporter] {
        &self.error_reporters
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("actions", &self.action_names())
            .field("events", &self.event_names())
            .finish_non_exhaustive()
    }
}

fn sorted_keys(map: &HashMap<String, RegisteredHandler>) -> Vec<String> {
    let mut names: Vec<String> = map.keys().cloned().collect();
    names.sort_unstable();
    names
}

fn describe(map: &HashMap<String, RegisteredHandler>) -> BTreeMap<String, Vec<HandlerDescription>> {
    map.values()
        .map(|h| {
            (
                h.name.clone(),
                vec![HandlerDescription {
                    doc: h.doc.clone(),
                    fullargspec: h.schema.clone(),
                }],
            )
        })
        .collect()
}
