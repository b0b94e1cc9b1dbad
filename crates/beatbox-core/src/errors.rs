//! Error types for endpoint setup and per-message dispatch.
//!
//! Setup-time errors ([`PathError`], [`BehaviorError`], [`RegistrationError`]) are
//! returned to whoever is configuring the endpoint. Per-message errors
//! ([`DecodeError`], [`DispatchError`]) are caught at the dispatch boundary and
//! never close the connection.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::FrameKind;
use crate::ids::ConnectionId;
use crate::registry::HandlerCategory;

// ─────────────────────────────────────────────────────────────────────────────
// Setup errors
// ─────────────────────────────────────────────────────────────────────────────

/// Invalid endpoint path.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// Nothing remained after normalisation.
    #[error("endpoint path cannot be empty")]
    Empty,
    /// The normalised path contains characters outside `[A-Za-z0-9_/]`.
    #[error("endpoint path contains invalid characters: {0:?}")]
    InvalidCharacters(String),
}

/// Invalid behavior configuration.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BehaviorError {
    /// `maxPayloadLength` was zero.
    #[error("maxPayloadLength must be greater than zero")]
    ZeroPayloadLength,
    /// `maxBackpressure` was zero.
    #[error("maxBackpressure must be greater than zero")]
    ZeroBackpressure,
}

/// Failure to construct an [`Endpoint`](crate::endpoint::Endpoint).
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The path failed validation.
    #[error(transparent)]
    Path(#[from] PathError),
    /// The behavior failed validation.
    #[error(transparent)]
    Behavior(#[from] BehaviorError),
}

/// Rejected handler registration.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    /// Action and event names must be non-blank.
    #[error("{category} name cannot be empty")]
    EmptyName {
        /// Which map the registration targeted.
        category: HandlerCategory,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-message errors
// ─────────────────────────────────────────────────────────────────────────────

/// Envelope could not be decoded from an inbound frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Only text and binary frames carry envelopes.
    #[error("unsupported frame kind: {0}")]
    UnsupportedFrameKind(FrameKind),
    /// Binary frame payload was not UTF-8.
    #[error("binary frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    /// Payload was not JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// Payload parsed, but not to an object.
    #[error("invalid message format")]
    InvalidFormat,
    /// No `type` field.
    #[error("missing message type")]
    MissingType,
    /// `type` is ACTION but there is no `messageId`.
    #[error("action message missing identifier")]
    MissingMessageId,
    /// `messageId` present but not a string.
    #[error("message identifier must be a string")]
    InvalidMessageId,
    /// No string `name` field.
    #[error("missing message name")]
    MissingName,
}

impl DecodeError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedFrameKind(_) => "unsupported_frame_kind",
            Self::InvalidUtf8(_) => "invalid_utf8",
            Self::InvalidJson(_) => "invalid_json",
            Self::InvalidFormat => "invalid_format",
            Self::MissingType => "missing_type",
            Self::MissingMessageId => "missing_message_id",
            Self::InvalidMessageId => "invalid_message_id",
            Self::MissingName => "missing_name",
        }
    }
}

/// Error returned by an application action or event handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The envelope `data` did not match what the handler expects.
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// The handler failed for its own reasons.
    #[error("{0}")]
    Failed(String),
    /// The handler panicked. The panic is contained to this message.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A single inbound frame could not be routed.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Envelope decoding failed.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// No action registered under this name.
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    /// No event registered under this name.
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    /// Envelope `type` was neither ACTION nor EVENT.
    #[error("invalid message type: {0}")]
    InvalidType(Value),
    /// The connection is not (or no longer) registered as open.
    #[error("connection {0} is not open")]
    NotOpen(ConnectionId),
    /// The matched handler returned an error.
    #[error("{category} '{name}' failed: {source}")]
    Handler {
        /// Action or event.
        category: HandlerCategory,
        /// Registered name.
        name: String,
        /// What the handler reported.
        #[source]
        source: HandlerError,
    },
}

impl DispatchError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(e) => e.kind(),
            Self::UnknownAction(_) => "unknown_action",
            Self::UnknownEvent(_) => "unknown_event",
            Self::InvalidType(_) => "invalid_type",
            Self::NotOpen(_) => "not_open",
            Self::Handler { .. } => "handler_failed",
        }
    }

    /// Whether the envelope named a handler that does not exist.
    pub fn is_unknown_handler(&self) -> bool {
        matches!(self, Self::UnknownAction(_) | Self::UnknownEvent(_))
    }
}
