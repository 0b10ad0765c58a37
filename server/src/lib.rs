//! Reference server for the `frames` wire protocol.
//!
//! Every WebSocket connection gets its own [`App`] from the configured
//! factory. Text frames carry call envelopes; each call runs on the blocking
//! pool and its reply goes back as the package's attachments (binary frames)
//! followed by the reply envelope.

pub mod app;
pub mod config;
pub mod connections;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

pub use app::{App, Outgoing, Package};
pub use config::ServerConfig;
pub use state::{AppFactory, AppState};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// Bind `config.host:config.port` and serve until idle shutdown.
///
/// # Errors
///
/// [`ServerError::Bind`] when the address cannot be bound,
/// [`ServerError::Serve`] when the accept loop fails.
pub async fn serve(config: ServerConfig, factory: AppFactory) -> Result<(), ServerError> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|source| ServerError::Bind { addr: config.addr(), source })?;
    serve_on(listener, config.idle_timeout, factory).await
}

/// Serve on an already bound listener.
///
/// With an idle timeout the server exits once it has had no connections for
/// that long, counting from startup and from every moment the last
/// connection closed.
///
/// # Errors
///
/// [`ServerError::Serve`] when the accept loop fails.
pub async fn serve_on(
    listener: TcpListener,
    idle_timeout: Option<Duration>,
    factory: AppFactory,
) -> Result<(), ServerError> {
    let state = AppState::new(factory);
    let connections = state.connections.clone();
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    info!(?addr, "wsrpc server listening");

    let shutdown = async move {
        match idle_timeout {
            Some(timeout) => connections.idle_for(timeout).await,
            None => std::future::pending::<()>().await,
        }
        info!("server: idle timeout reached, shutting down");
    };

    axum::serve(listener, routes::app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)
}
