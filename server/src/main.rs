use std::sync::Arc;

use wsrpc_server::{App, ServerConfig, ServerError};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();
    tracing::info!(addr = %config.addr(), idle_timeout = ?config.idle_timeout, "starting");
    wsrpc_server::serve(config, Arc::new(App::new)).await
}
