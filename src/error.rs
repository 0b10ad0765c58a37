//! Error types for the call session.
//!
//! Three families:
//! - [`SessionError`]: lifecycle failures returned by `open()`.
//! - [`CallError`]: the failure side of a call's outcome.
//! - [`FrameFault`]: inbound frames that could not be routed. These are
//!   logged and dropped by the dispatch loop; they never reach a caller.

use std::time::Duration;

use serde_json::Value;

/// Boxed transport-level cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The transport failed to open.
    #[error("connection to {url} failed: {source}")]
    Connection {
        url: String,
        #[source]
        source: BoxError,
    },
    /// `open()` was called while the session was connecting or open.
    #[error("session is already open")]
    AlreadyOpen,
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The call was attempted while the session was not open. Nothing was sent.
    #[error("session not ready")]
    NotReady,
    /// The remote side answered with an `error` payload.
    #[error("remote error: {0}")]
    Remote(Value),
    /// The session was torn down before a response arrived.
    #[error("session closed before a response arrived")]
    Closed,
    /// No response arrived within the configured call timeout.
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("failed to encode call: {0}")]
    Encode(#[from] frames::CodecError),
}

impl CallError {
    /// Remote error payload, if this is a remote failure.
    #[must_use]
    pub fn remote(&self) -> Option<&Value> {
        match self {
            Self::Remote(payload) => Some(payload),
            _ => None,
        }
    }
}

/// An inbound frame the demultiplexer could not route.
#[derive(Debug, thiserror::Error)]
pub enum FrameFault {
    /// Text frame that is not a reply envelope.
    #[error("malformed frame: {0}")]
    Malformed(#[source] frames::CodecError),
    /// Reply whose id matches no pending call.
    #[error("orphan response for id {0}")]
    Orphan(String),
    /// Reply with neither `result` nor `error`; its call is abandoned.
    #[error("unknown envelope for id {0}: neither result nor error")]
    Unknown(String),
}
