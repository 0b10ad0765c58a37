//! Request/response multiplexing over a single WebSocket connection.
//!
//! A [`Session`] issues named remote calls as JSON text frames, each tagged
//! with a correlation id, and settles every call exactly once from the reply
//! carrying that id. Binary frames that arrive ahead of a reply are handed to
//! it as attachments.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use wsrpc::{Session, SessionConfig};
//!
//! let session = Session::new(SessionConfig::new("ws://127.0.0.1:8080/"));
//! session.open().await?;
//! let reply = session.call("echo", serde_json::json!({"text": "hi"})).await?;
//! println!("{} (+{} attachments)", reply.result, reply.attachments.len());
//! session.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod pending;
pub mod session;
pub mod transport;

pub use config::{AttachmentOrder, SessionConfig, TeardownPolicy};
pub use error::{CallError, FrameFault, SessionError};
pub use pending::{Outcome, Part, Reply};
pub use session::{PendingReply, Session, SessionState};
