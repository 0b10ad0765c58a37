use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use wsrpc::{CallError, Reply, Session, SessionConfig, SessionError};

const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("health check failed with HTTP {0}")]
    Unhealthy(u16),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("call `{method}` failed: {source}")]
    Call {
        method: String,
        #[source]
        source: CallError,
    },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "wsrpc-cli", about = "Issue remote calls against a wsrpc server")]
struct Cli {
    #[arg(long, env = "WSRPC_URL", default_value = "ws://127.0.0.1:8080/")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the server's `/healthz` endpoint.
    Ping,
    /// Call one method and print the reply.
    Call {
        method: String,
        /// JSON params for the call.
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, env = "WSRPC_CALL_TIMEOUT_MS")]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ping => run_ping(&cli.url).await,
        Command::Call { method, params, timeout_ms } => run_call(&cli.url, &method, &params, timeout_ms).await,
    }
}

async fn run_ping(url: &str) -> Result<(), CliError> {
    let response = reqwest::get(health_url(url)?).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn run_call(url: &str, method: &str, params: &str, timeout_ms: Option<u64>) -> Result<(), CliError> {
    let params: Value = serde_json::from_str(params)?;

    // Teardown and attachment order still come from WSRPC_* variables.
    let mut config = SessionConfig::from_env();
    config.url = url.to_owned();
    config.call_timeout = timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis);

    let session = Session::new(config);
    session.open().await?;
    let outcome = session.call(method, params).await;
    session.close();
    // Let the close frame flush before the runtime goes away.
    if tokio::time::timeout(CLOSE_GRACE, session.closed()).await.is_err() {
        tracing::debug!("server did not confirm close in time");
    }

    let reply = outcome.map_err(|source| CliError::Call { method: method.to_owned(), source })?;
    println!("{}", render_reply(&reply)?);
    Ok(())
}

/// Pretty JSON result followed by one line per attachment.
fn render_reply(reply: &Reply) -> Result<String, CliError> {
    let mut rendered = serde_json::to_string_pretty(&reply.result)?;
    for (index, attachment) in reply.attachments.iter().enumerate() {
        rendered.push_str(&format!("\nattachment[{index}]: {} bytes", attachment.len()));
    }
    Ok(rendered)
}

/// `ws://host:port/any/path` → `http://host:port/healthz`.
fn health_url(url: &str) -> Result<String, CliError> {
    let (scheme, rest) = if let Some(rest) = url.strip_prefix("ws://") {
        ("http", rest)
    } else if let Some(rest) = url.strip_prefix("wss://") {
        ("https", rest)
    } else {
        return Err(CliError::InvalidUrl(url.to_owned()));
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if authority.is_empty() {
        return Err(CliError::InvalidUrl(url.to_owned()));
    }
    Ok(format!("{scheme}://{authority}/healthz"))
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
