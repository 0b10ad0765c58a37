//! Method registry.
//!
//! Handlers are synchronous closures from params to a [`Package`]; they run
//! on the blocking pool, never on the connection's task. [`App::process`]
//! turns one raw call envelope into the frames that answer it.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use frames::{CallEnvelope, ReplyEnvelope, reason};
use serde_json::Value;
use tracing::{debug, error, warn};

/// A handler's successful result plus any binary attachments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Package {
    pub result: Value,
    pub attachments: Vec<Vec<u8>>,
}

impl Package {
    #[must_use]
    pub fn new(result: Value) -> Self {
        Self { result, attachments: Vec::new() }
    }

    #[must_use]
    pub fn with_attachment(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.attachments.push(bytes.into());
        self
    }
}

pub type HandlerResult = Result<Package, String>;

type Handler = dyn Fn(Value) -> HandlerResult + Send + Sync;

/// What goes back on the wire for one call: attachments first, then text.
#[derive(Clone, Debug, PartialEq)]
pub struct Outgoing {
    pub attachments: Vec<Vec<u8>>,
    pub text: String,
}

pub struct App {
    handlers: RwLock<HashMap<String, Arc<Handler>>>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// Registry with the built-in `echo` method.
    #[must_use]
    pub fn new() -> Self {
        let app = Self::empty();
        app.register("echo", |params| Ok(Package::new(params)));
        app
    }

    #[must_use]
    pub fn empty() -> Self {
        Self { handlers: RwLock::new(HashMap::new()) }
    }

    /// Add or replace the handler for `method`.
    pub fn register<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.into(), Arc::new(handler));
    }

    /// Returns whether a handler was removed.
    pub fn unregister(&self, method: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(method)
            .is_some()
    }

    /// Registered method names, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        methods.sort();
        methods
    }

    /// Run the handler for `method`.
    ///
    /// # Errors
    ///
    /// The handler's own error string, `Method Unavailable` for an unknown
    /// method, `Internal Error` when the handler panics.
    pub fn handle(&self, method: &str, params: Value) -> HandlerResult {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned();
        let Some(handler) = handler else {
            return Err(frames::format_error(reason::METHOD_UNAVAILABLE, &quoted(method)));
        };

        catch_unwind(AssertUnwindSafe(|| handler(params))).unwrap_or_else(|_| {
            error!(method, "app: handler panicked");
            Err(frames::format_error(reason::INTERNAL_ERROR, &quoted(method)))
        })
    }

    /// Answer one raw call envelope.
    ///
    /// Requests that cannot be decoded are answered with an `Invalid Request`
    /// error carrying whatever id could be recovered, or `""`.
    #[must_use]
    pub fn process(&self, raw: &str) -> Outgoing {
        let call = match frames::decode_call(raw) {
            Ok(call) => call,
            Err(e) => {
                let id = frames::peek_id(raw).unwrap_or_default();
                warn!(%id, error = %e, "app: invalid request");
                let detail = frames::format_error(reason::INVALID_REQUEST, &e.to_string());
                return reply(ReplyEnvelope::failure(id, detail), Vec::new());
            }
        };

        let CallEnvelope { id, method, params } = call;
        debug!(%id, %method, "app: handling call");
        match self.handle(&method, params) {
            Ok(Package { result, attachments }) => reply(ReplyEnvelope::success(id, result), attachments),
            Err(message) => {
                debug!(%id, %method, error = %message, "app: call failed");
                reply(ReplyEnvelope::failure(id, message), Vec::new())
            }
        }
    }
}

fn quoted(method: &str) -> String {
    format!("\"{method}\"")
}

fn reply(envelope: ReplyEnvelope, attachments: Vec<Vec<u8>>) -> Outgoing {
    match frames::encode_reply(&envelope) {
        Ok(text) => Outgoing { attachments, text },
        Err(e) => {
            error!(error = %e, "app: reply encoding failed");
            let id = envelope.id.unwrap_or_default();
            let detail = frames::format_error(reason::INVALID_RESPONSE, &e.to_string());
            // A failure envelope holds only strings and always encodes.
            let text = frames::encode_reply(&ReplyEnvelope::failure(id, detail)).unwrap_or_default();
            Outgoing { attachments: Vec::new(), text }
        }
    }
}

#[cfg(test)]
#[path = "app_test.rs"]
mod tests;
