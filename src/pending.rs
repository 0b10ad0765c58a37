//! Pending-call table and inbound frame demultiplexer.
//!
//! DESIGN
//! ======
//! `PendingCalls` is the single unit of mutable protocol state: the id
//! counter, the table of calls awaiting a reply, and the buffer of binary
//! attachments received since the last routed envelope. The session keeps it
//! behind one mutex so that an envelope always consumes exactly the
//! attachments that arrived before it.
//!
//! ROUTING
//! =======
//! - Binary frame → appended to the attachment buffer.
//! - Text frame that does not parse → `FrameFault::Malformed`, buffer kept.
//! - Envelope without an id → ignored, buffer kept.
//! - Otherwise the buffer is taken, the id is removed from the table and the
//!   call is settled from `error` (failure) or `result` (success).
//! - Unknown id → `FrameFault::Orphan`; attachments are dropped.
//! - Neither `result` nor `error` → `FrameFault::Unknown`; the call is moved
//!   aside and never settled by routing.

use std::collections::HashMap;

use frames::Frame;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::{AttachmentOrder, TeardownPolicy};
use crate::error::{CallError, FrameFault};

/// Final result of one call.
pub type Outcome = Result<Reply, CallError>;

type Settle = oneshot::Sender<Outcome>;

/// Successful reply: the remote result plus the binary frames that preceded it.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub result: Value,
    pub attachments: Vec<Vec<u8>>,
}

/// One element of a reply flattened as `[result, attachment...]`.
#[derive(Clone, Debug, PartialEq)]
pub enum Part {
    Result(Value),
    Attachment(Vec<u8>),
}

impl Reply {
    /// Flatten into `[result, attachment...]`, attachments in delivery order.
    #[must_use]
    pub fn into_sequence(self) -> Vec<Part> {
        let mut parts = Vec::with_capacity(1 + self.attachments.len());
        parts.push(Part::Result(self.result));
        parts.extend(self.attachments.into_iter().map(Part::Attachment));
        parts
    }
}

/// What routing one inbound frame did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Routed {
    /// Binary frame buffered; the count of attachments now waiting.
    Buffered(usize),
    /// Text envelope without an id.
    Ignored,
    /// The call with this id received its outcome.
    Settled(String),
}

pub struct PendingCalls {
    next_id: u64,
    calls: HashMap<String, Settle>,
    abandoned: HashMap<String, Settle>,
    attachments: Vec<Vec<u8>>,
    order: AttachmentOrder,
}

impl PendingCalls {
    #[must_use]
    pub fn new(order: AttachmentOrder) -> Self {
        Self {
            next_id: 1,
            calls: HashMap::new(),
            abandoned: HashMap::new(),
            attachments: Vec::new(),
            order,
        }
    }

    /// Allocate the next correlation id and register a pending call under it.
    pub fn register(&mut self) -> (String, oneshot::Receiver<Outcome>) {
        let id = self.next_id.to_string();
        self.next_id += 1;
        let (settle, receiver) = oneshot::channel();
        self.calls.insert(id.clone(), settle);
        (id, receiver)
    }

    /// Route one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameFault`] when the frame cannot be matched to a pending
    /// call. Faults never disturb other pending calls.
    pub fn route(&mut self, frame: Frame) -> Result<Routed, FrameFault> {
        let text = match frame {
            Frame::Binary(bytes) => {
                self.attachments.push(bytes);
                return Ok(Routed::Buffered(self.attachments.len()));
            }
            Frame::Text(text) => text,
        };

        let mut envelope = frames::decode_reply(&text).map_err(FrameFault::Malformed)?;
        let Some(id) = envelope.id.take() else {
            return Ok(Routed::Ignored);
        };

        let attachments = self.take_attachments();
        let Some(settle) = self.calls.remove(&id) else {
            return Err(FrameFault::Orphan(id));
        };

        let outcome = match envelope.into_settlement() {
            Some(Ok(result)) => Ok(Reply { result, attachments }),
            Some(Err(error)) => Err(CallError::Remote(error)),
            None => {
                self.abandoned.insert(id.clone(), settle);
                return Err(FrameFault::Unknown(id));
            }
        };

        if settle.send(outcome).is_err() {
            debug!(%id, "pending: caller went away before settlement");
        }
        Ok(Routed::Settled(id))
    }

    /// Drop the entry for `id` without settling it. Returns `false` if the
    /// call was already settled or never existed.
    pub fn forget(&mut self, id: &str) -> bool {
        self.calls.remove(id).is_some() || self.abandoned.remove(id).is_some()
    }

    /// Apply the teardown policy after the transport went away. Buffered
    /// attachments are discarded. Returns how many calls were rejected.
    pub fn teardown(&mut self, policy: TeardownPolicy) -> usize {
        self.attachments.clear();
        if policy == TeardownPolicy::Abandon {
            return 0;
        }

        let mut rejected = 0;
        for (_, settle) in self.calls.drain().chain(self.abandoned.drain()) {
            // A dropped receiver just means nobody is waiting any more.
            let _ = settle.send(Err(CallError::Closed));
            rejected += 1;
        }
        rejected
    }

    /// Number of calls awaiting a reply.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.calls.contains_key(id)
    }

    /// Calls whose reply carried neither result nor error.
    #[must_use]
    pub fn abandoned(&self) -> usize {
        self.abandoned.len()
    }

    /// Attachments waiting for the next envelope.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.attachments.len()
    }

    fn take_attachments(&mut self) -> Vec<Vec<u8>> {
        let mut attachments = std::mem::take(&mut self.attachments);
        if self.order == AttachmentOrder::Reversed {
            attachments.reverse();
        }
        attachments
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new(AttachmentOrder::default())
    }
}

#[cfg(test)]
#[path = "pending_test.rs"]
mod tests;
