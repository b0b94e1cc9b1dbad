//! WebSocket sessions, the adapter socket and topic pub/sub.

pub mod session;
pub mod socket;
pub mod topics;
