//! # beatbox-core
//!
//! Endpoint protocol core for multiplexing one WebSocket into named actions
//! and events.
//!
//! - [`schema`]: handler parameter schemas and the [`reflect_struct!`] macro
//! - [`envelope`]: JSON envelope codec
//! - [`registry`]: per-endpoint action, event and lifecycle handler tables
//! - [`connections`]: open-connection registry
//! - [`dispatcher`]: lifecycle state machine and frame routing
//! - [`endpoint`]: path normalisation, behavior and transport binding
//!
//! The core never touches the network. A transport implements
//! [`endpoint::Transport`] and drives [`dispatcher::SocketEvents`].

#![deny(unsafe_code)]

pub mod connections;
pub mod dispatcher;
pub mod endpoint;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod registry;
pub mod schema;
pub mod socket;
pub mod testing;

pub use connections::ConnectionRegistry;
pub use dispatcher::{Dispatcher, Routed, SocketEvents};
pub use endpoint::{Behavior, Compression, Endpoint, Transport, TransportConfig, normalize_path};
pub use envelope::{Envelope, FrameKind, MessageType, decode, encode};
pub use errors::{
    BehaviorError, DecodeError, DispatchError, EndpointError, HandlerError, PathError,
    RegistrationError,
};
pub use ids::ConnectionId;
pub use registry::{
    HandlerCategory, HandlerDescription, HandlerRegistry, Invocation, LifecycleHook,
    LifecycleKind, MessageHandler, Typed,
};
pub use schema::{Reflect, SchemaDescription, Signature, reflect};
pub use socket::{
    OutboundFrame, SendStatus, Socket, SocketRef, SubscriptionChange, UpgradeRequest,
    UpgradeResponse, UserData,
};
