//! Call session that correlates remote calls with their replies.
//!
//! LIFECYCLE
//! =========
//! `Idle → Connecting → Open → Closed`. A failed connect lands in `Closed`;
//! a closed session may be opened again. Correlation ids keep counting across
//! re-opens, so an id is never reused for the lifetime of the session.
//!
//! CONCURRENCY
//! ===========
//! All protocol state lives in one mutex: lifecycle state, the pending-call
//! table with its attachment buffer, and the outbound sender. Issuing a call
//! allocates the id, registers it and queues the envelope inside a single
//! critical section, so wire order always matches id order. One dispatch task
//! per connection routes inbound frames under the same lock.
//!
//! TEARDOWN
//! ========
//! When the transport reports close or error the dispatch task marks the
//! session `Closed` and applies the configured [`TeardownPolicy`] to calls
//! still in flight. `close()` only requests the shutdown; replies that arrive
//! before the transport confirms it are still routed; [`Session::closed`]
//! waits for that confirmation.
//!
//! Re-opening starts a new connection epoch before connecting: calls left
//! from the previous connection get the teardown policy, the attachment
//! buffer is emptied, and the previous dispatch task stops routing at its
//! next frame. Only one stream ever feeds the pending table.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use frames::{CallEnvelope, Frame};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::{SessionConfig, TeardownPolicy};
use crate::error::{CallError, SessionError};
use crate::pending::{Outcome, PendingCalls, Routed};
use crate::transport::{Connector, Outbound, TransportEvent, WsConnector};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

struct Shared {
    state: SessionState,
    /// Bumped at the start of every open. A dispatch task only routes and
    /// tears down for the epoch it was started with.
    epoch: u64,
    calls: PendingCalls,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Session {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Mutex<Shared>>,
    /// Latest epoch whose transport has shut down.
    finished: Arc<watch::Sender<u64>>,
}

impl Session {
    /// Idle session that will connect over WebSocket to `config.url`.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Idle session using a custom transport.
    #[must_use]
    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let shared = Shared {
            state: SessionState::Idle,
            epoch: 0,
            calls: PendingCalls::new(config.attachment_order),
            outbound: None,
        };
        let (finished, _) = watch::channel(0);
        Self {
            config,
            connector,
            shared: Arc::new(Mutex::new(shared)),
            finished: Arc::new(finished),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        lock(&self.shared).state
    }

    /// Calls currently awaiting a reply. Abandoned calls are not included;
    /// see [`Session::abandoned_count`].
    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.shared).calls.len()
    }

    /// Calls whose reply carried neither `result` nor `error`. They are never
    /// settled by a reply, but teardown under [`TeardownPolicy::Reject`]
    /// still fails them with [`CallError::Closed`].
    #[must_use]
    pub fn abandoned_count(&self) -> usize {
        lock(&self.shared).calls.abandoned()
    }

    /// Connect the transport and start routing inbound frames.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyOpen`] if the session is connecting or
    /// open, and [`SessionError::Connection`] if the transport fails to open.
    pub async fn open(&self) -> Result<(), SessionError> {
        let epoch = {
            let mut shared = lock(&self.shared);
            if matches!(shared.state, SessionState::Connecting | SessionState::Open) {
                return Err(SessionError::AlreadyOpen);
            }
            shared.state = SessionState::Connecting;
            shared.epoch += 1;
            shared.outbound = None;
            let settled = shared.calls.teardown(self.config.teardown);
            if settled > 0 {
                info!(settled, "session: calls from previous connection torn down");
            }
            shared.epoch
        };

        let url = self.config.url.as_str();
        debug!(%url, epoch, "session: connecting");
        let link = match self.connector.connect(url).await {
            Ok(link) => link,
            Err(e) => {
                lock(&self.shared).state = SessionState::Closed;
                mark_finished(&self.finished, epoch);
                warn!(%url, error = %e, "session: connect failed");
                return Err(e);
            }
        };

        {
            let mut shared = lock(&self.shared);
            shared.outbound = Some(link.outbound);
            shared.state = SessionState::Open;
        }
        tokio::spawn(dispatch(
            Arc::clone(&self.shared),
            Arc::clone(&self.finished),
            link.inbound,
            epoch,
            self.config.teardown,
        ));

        info!(%url, "session: connected");
        Ok(())
    }

    /// Send a call and return a handle for its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::NotReady`] without sending anything if the
    /// session is not open.
    pub fn issue(&self, method: &str, params: Value) -> Result<PendingReply, CallError> {
        let mut shared = lock(&self.shared);
        if shared.state != SessionState::Open {
            return Err(CallError::NotReady);
        }
        let Some(outbound) = shared.outbound.clone() else {
            return Err(CallError::NotReady);
        };

        let (id, receiver) = shared.calls.register();
        let text = match frames::encode_call(&CallEnvelope::new(id.as_str(), method, params)) {
            Ok(text) => text,
            Err(e) => {
                shared.calls.forget(&id);
                return Err(e.into());
            }
        };
        if outbound.send(Outbound::Frame(Frame::Text(text))).is_err() {
            shared.calls.forget(&id);
            return Err(CallError::NotReady);
        }
        drop(shared);

        debug!(%id, method, "session: call sent");
        Ok(PendingReply {
            id,
            receiver,
            shared: Arc::clone(&self.shared),
            timeout: self.config.call_timeout,
            finished: false,
        })
    }

    /// Send a call and wait for its outcome.
    ///
    /// # Errors
    ///
    /// [`CallError::NotReady`] if the session is not open, otherwise the
    /// failure side of the call's outcome.
    pub async fn call(&self, method: &str, params: Value) -> Outcome {
        self.issue(method, params)?.wait().await
    }

    /// [`Session::call`] with empty object params.
    ///
    /// # Errors
    ///
    /// Same as [`Session::call`].
    pub async fn call_empty(&self, method: &str) -> Outcome {
        self.call(method, Value::Object(Map::new())).await
    }

    /// Request a normal shutdown. No-op unless the session is open.
    pub fn close(&self) {
        self.shutdown();
    }

    /// Wait until the most recent connection's transport has shut down and
    /// its teardown ran. Returns at once for a session that never connected.
    pub async fn closed(&self) {
        let epoch = lock(&self.shared).epoch;
        let mut finished = self.finished.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = finished.wait_for(|done| *done >= epoch).await;
    }

    fn shutdown(&self) {
        let mut shared = lock(&self.shared);
        if shared.state != SessionState::Open {
            return;
        }
        shared.state = SessionState::Closed;
        if let Some(outbound) = shared.outbound.take() {
            info!(url = %self.config.url, "session: disconnecting");
            let _ = outbound.send(Outbound::Close {
                code: self.config.close_code,
                reason: self.config.close_reason.clone(),
            });
        }
    }
}

impl Drop for Session {
    /// An open session closes its transport; the dispatch task then ends once
    /// the peer confirms.
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle for one issued call.
///
/// Dropping the handle before the outcome arrives removes the call from the
/// pending table; a reply that shows up later is reported as an orphan.
pub struct PendingReply {
    id: String,
    receiver: oneshot::Receiver<Outcome>,
    shared: Arc<Mutex<Shared>>,
    timeout: Option<Duration>,
    finished: bool,
}

impl PendingReply {
    /// Correlation id assigned to the call.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the call's outcome.
    ///
    /// # Errors
    ///
    /// [`CallError::Remote`] for a remote failure, [`CallError::Timeout`]
    /// when the configured call timeout elapses first, [`CallError::Closed`]
    /// when the session was torn down underneath the call.
    pub async fn wait(mut self) -> Outcome {
        let outcome = self.receive().await;
        self.finished = true;
        outcome
    }

    async fn receive(&mut self) -> Outcome {
        let received = match self.timeout {
            None => (&mut self.receiver).await.ok(),
            Some(limit) => match tokio::time::timeout(limit, &mut self.receiver).await {
                Ok(received) => received.ok(),
                Err(_) => {
                    let forgotten = lock(&self.shared).calls.forget(&self.id);
                    if forgotten {
                        warn!(id = %self.id, ?limit, "session: call timed out");
                        return Err(CallError::Timeout(limit));
                    }
                    // Settled between the deadline and taking the lock.
                    self.receiver.try_recv().ok()
                }
            },
        };
        received.unwrap_or(Err(CallError::Closed))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if !self.finished && lock(&self.shared).calls.forget(&self.id) {
            debug!(id = %self.id, "session: call dropped before reply");
        }
    }
}

async fn dispatch(
    shared: Arc<Mutex<Shared>>,
    finished: Arc<watch::Sender<u64>>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    epoch: u64,
    teardown: TeardownPolicy,
) {
    route_until_closed(&shared, inbound, epoch, teardown).await;
    mark_finished(&finished, epoch);
}

fn mark_finished(finished: &watch::Sender<u64>, epoch: u64) {
    finished.send_if_modified(|done| {
        let advanced = *done < epoch;
        if advanced {
            *done = epoch;
        }
        advanced
    });
}

async fn route_until_closed(
    shared: &Mutex<Shared>,
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    epoch: u64,
    teardown: TeardownPolicy,
) {
    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Frame(frame) => {
                let routed = {
                    let mut shared = lock(shared);
                    if shared.epoch != epoch {
                        debug!(epoch, "session: connection superseded, no longer routing");
                        return;
                    }
                    shared.calls.route(frame)
                };
                match routed {
                    Ok(Routed::Buffered(count)) => debug!(count, "session: attachment buffered"),
                    Ok(Routed::Ignored) => debug!("session: envelope without id ignored"),
                    Ok(Routed::Settled(id)) => debug!(%id, "session: call settled"),
                    Err(fault) => warn!(error = %fault, "session: inbound frame dropped"),
                }
            }
            TransportEvent::Closed { code, reason } => {
                info!(code, %reason, "session: transport closed");
                break;
            }
            TransportEvent::Error(cause) => {
                error!(%cause, "session: transport error");
                break;
            }
        }
    }

    let mut shared = lock(shared);
    if shared.epoch != epoch {
        return;
    }
    shared.state = SessionState::Closed;
    shared.outbound = None;
    let rejected = shared.calls.teardown(teardown);
    let remaining = shared.calls.len();
    drop(shared);
    if rejected > 0 || remaining > 0 {
        info!(rejected, remaining, ?teardown, "session: in-flight calls at teardown");
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
