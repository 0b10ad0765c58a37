//! In-process transport whose far end is driven by hand.
//!
//! [`pair`] returns a connector for the session and a [`MemoryPeer`] playing
//! the remote side: it reads what the session sent and pushes frames, close
//! and error events back. The connector accepts one connection per peer,
//! handed out in order; [`pairs`] prepares several for re-open scenarios.

use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use frames::{CallEnvelope, Frame};
use tokio::sync::mpsc;

use super::{Connector, Link, Outbound, TransportEvent};
use crate::error::SessionError;

type Ends = (mpsc::UnboundedSender<Outbound>, mpsc::UnboundedReceiver<TransportEvent>);

pub struct MemoryConnector {
    ends: Mutex<VecDeque<Ends>>,
}

impl MemoryConnector {
    /// A connector that refuses every connection.
    #[must_use]
    pub fn refusing() -> Self {
        Self { ends: Mutex::new(VecDeque::new()) }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Link, SessionError> {
        let ends = self
            .ends
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        let Some((outbound, inbound)) = ends else {
            return Err(SessionError::Connection {
                url: url.to_owned(),
                source: Box::new(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "memory transport unavailable",
                )),
            });
        };
        Ok(Link { outbound, inbound })
    }
}

/// The remote end of a memory connection.
pub struct MemoryPeer {
    sent: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

/// Create a connected connector/peer pair.
#[must_use]
pub fn pair() -> (MemoryConnector, MemoryPeer) {
    let (connector, mut peers) = pairs(1);
    let peer = peers.remove(0);
    (connector, peer)
}

/// A connector accepting `count` connections; peer `i` serves connect `i`.
#[must_use]
pub fn pairs(count: usize) -> (MemoryConnector, Vec<MemoryPeer>) {
    let mut ends = VecDeque::with_capacity(count);
    let mut peers = Vec::with_capacity(count);
    for _ in 0..count {
        let (outbound, sent) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        ends.push_back((outbound, inbound));
        peers.push(MemoryPeer { sent, events });
    }
    (MemoryConnector { ends: Mutex::new(ends) }, peers)
}

impl MemoryPeer {
    /// Deliver a text frame to the session. Returns `false` once the session side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Frame(Frame::Text(text.into())))
    }

    pub fn send_binary(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.emit(TransportEvent::Frame(Frame::Binary(bytes.into())))
    }

    /// Report the connection as closed.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Closed { code, reason: reason.into() })
    }

    /// Report the connection as failed.
    pub fn fail(&self, cause: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(cause.into()))
    }

    /// Next command the session sent, waiting for it.
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.sent.recv().await
    }

    /// Next command the session sent, if one is already queued.
    pub fn try_next_outbound(&mut self) -> Option<Outbound> {
        self.sent.try_recv().ok()
    }

    /// Next call envelope the session sent. Skips anything that is not a
    /// text frame holding a call.
    pub async fn next_call(&mut self) -> Option<CallEnvelope> {
        while let Some(outbound) = self.sent.recv().await {
            if let Outbound::Frame(Frame::Text(text)) = outbound {
                if let Ok(call) = frames::decode_call(&text) {
                    return Some(call);
                }
            }
        }
        None
    }

    fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }
}
