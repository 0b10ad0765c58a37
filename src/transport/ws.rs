//! WebSocket transport over `tokio-tungstenite`.
//!
//! `connect` performs the handshake and spawns one pump task per connection.
//! The pump owns the socket and shuttles between the socket and the link
//! channels until either side goes away.

use async_trait::async_trait;
use frames::Frame;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use super::{Connector, Link, Outbound, TransportEvent};
use crate::error::SessionError;

/// Close code reported when the peer closes without sending a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported when a close frame carries no status.
const NO_STATUS: u16 = 1005;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects to `ws://` / `wss://` URLs.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, SessionError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| SessionError::Connection {
                url: url.to_owned(),
                source: Box::new(e),
            })?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        tokio::spawn(pump(stream, outbound_rx, inbound_tx));

        Ok(Link { outbound, inbound })
    }
}

async fn pump(
    stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut sink, mut source) = stream.split();
    // Cleared once a close frame went out; only reads continue after that.
    let mut writable = true;

    loop {
        tokio::select! {
            command = outbound.recv(), if writable => {
                let sent = match command {
                    Some(Outbound::Frame(frame)) => sink.send(into_message(frame)).await,
                    Some(Outbound::Close { code, reason }) => {
                        writable = false;
                        debug!(code, %reason, "ws: sending close");
                        let close = CloseFrame { code: CloseCode::from(code), reason: reason.into() };
                        sink.send(Message::Close(Some(close))).await
                    }
                    None => {
                        writable = false;
                        sink.close().await
                    }
                };
                if let Err(e) = sent {
                    warn!(error = %e, "ws: send failed");
                    let _ = inbound.send(TransportEvent::Error(e.to_string()));
                    return;
                }
            }
            message = source.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => TransportEvent::Frame(Frame::Text(text.as_str().to_owned())),
                    Some(Ok(Message::Binary(bytes))) => TransportEvent::Frame(Frame::Binary(bytes.to_vec())),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((NO_STATUS, String::new()), |f| {
                            (u16::from(f.code), f.reason.as_str().to_owned())
                        });
                        let _ = inbound.send(TransportEvent::Closed { code, reason });
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = inbound.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                    None => {
                        let _ = inbound.send(TransportEvent::Closed { code: ABNORMAL_CLOSURE, reason: String::new() });
                        return;
                    }
                };
                if inbound.send(event).is_err() {
                    debug!("ws: session gone, dropping connection");
                    return;
                }
            }
        }
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
    }
}
