//! Transport adapters.
//!
//! A [`Connector`] opens one stream connection and hands back a [`Link`]: an
//! outbound command channel and an inbound event channel. The session never
//! touches the socket itself; it only consumes events from the link in its
//! dispatch loop. Events queue in the channel from the moment the connection
//! exists, so nothing is lost between connect and the session going ready.

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use frames::Frame;
use tokio::sync::mpsc;

use crate::error::SessionError;

pub use memory::{MemoryConnector, MemoryPeer};
pub use ws::WsConnector;

/// Command from the session to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    /// Start a normal shutdown with this close code and reason.
    Close { code: u16, reason: String },
}

/// Notification from the transport to the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(Frame),
    /// The connection closed. No further events follow.
    Closed { code: u16, reason: String },
    /// The connection failed. No further events follow.
    Error(String),
}

/// Both ends of an open connection, as seen from the session.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`, returning once it is ready for traffic.
    async fn connect(&self, url: &str) -> Result<Link, SessionError>;
}
