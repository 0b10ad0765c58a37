//! WebSocket handler: call envelopes in, replies out.
//!
//! DESIGN
//! ======
//! On upgrade, builds the connection's `App` and enters a `select!` loop:
//! - Incoming text frames → run the call on the blocking pool
//! - Finished replies → write attachments, then the reply envelope
//!
//! Calls run concurrently, so replies leave in completion order rather than
//! request order. Only the loop writes to the socket, which keeps each
//! reply's binary frames directly ahead of its text frame.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → connection counted (cancels any idle shutdown)
//! 2. Text frame → `App::process` on `spawn_blocking` → reply channel
//! 3. Close or error → loop exits, replies still in flight are dropped

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::{App, Outgoing};
use crate::state::AppState;

/// Largest accepted inbound message.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let _counted = state.connections.open();
    let app = Arc::new((state.factory)());

    // Replies finished by blocking tasks, written back by this loop only.
    let (reply_tx, mut reply_rx) = mpsc::channel::<Outgoing>(256);

    info!(live = state.connections.live(), "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = %e, "ws: receive failed");
                        break;
                    }
                };
                match msg {
                    Message::Text(text) => dispatch_call(&app, &reply_tx, text.as_str().to_owned()),
                    Message::Binary(bytes) => {
                        warn!(len = bytes.len(), "ws: binary frames from clients are not supported");
                    }
                    Message::Close(frame) => {
                        debug!(?frame, "ws: client sent close");
                        break;
                    }
                    _ => {}
                }
            }
            Some(outgoing) = reply_rx.recv() => {
                if let Err(e) = send_reply(&mut socket, outgoing).await {
                    warn!(error = %e, "ws: send failed");
                    break;
                }
            }
        }
    }

    info!(live = state.connections.live().saturating_sub(1), "ws: client disconnected");
}

// =============================================================================
// CALL DISPATCH
// =============================================================================

/// Run one call off the connection task and queue its reply.
fn dispatch_call(app: &Arc<App>, replies: &mpsc::Sender<Outgoing>, text: String) {
    let app = Arc::clone(app);
    let replies = replies.clone();
    tokio::spawn(async move {
        let outgoing = match tokio::task::spawn_blocking(move || app.process(&text)).await {
            Ok(outgoing) => outgoing,
            Err(e) => {
                error!(error = %e, "ws: call task failed");
                return;
            }
        };
        if replies.send(outgoing).await.is_err() {
            debug!("ws: connection gone, reply dropped");
        }
    });
}

async fn send_reply(socket: &mut WebSocket, outgoing: Outgoing) -> Result<(), axum::Error> {
    let Outgoing { attachments, text } = outgoing;
    debug!(attachments = attachments.len(), bytes = text.len(), "ws: sending reply");
    for attachment in attachments {
        socket.send(Message::Binary(attachment.into())).await?;
    }
    socket.send(Message::Text(text.into())).await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
