//! # beatbox-server
//!
//! axum transport for beatbox endpoints.
//!
//! - [`transport::AxumTransport`]: the core `Transport`, one `GET /{path}`
//!   WebSocket route per bound endpoint
//! - [`websocket`]: session loop, backpressure-aware socket, topic pub/sub
//! - HTTP endpoints: `/introspect`, `/introspect/events`, `/count`, `/health`,
//!   `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod transport;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::BeatboxServer;
pub use shutdown::ShutdownCoordinator;
pub use transport::AxumTransport;
pub use websocket::topics::TopicHub;
