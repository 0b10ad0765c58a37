//! Session configuration.
//!
//! Values come from code (`SessionConfig::default()` plus field updates) or
//! from `WSRPC_*` environment variables via [`SessionConfig::from_env`].
//! Unparsable variables fall back to their defaults.

use std::str::FromStr;
use std::time::Duration;

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/";
const DEFAULT_CLOSE_CODE: u16 = 1000;
const DEFAULT_CLOSE_REASON: &str = "manual";

/// What happens to calls still pending when the transport goes away.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TeardownPolicy {
    /// Settle every outstanding call with [`crate::CallError::Closed`].
    #[default]
    Reject,
    /// Leave outstanding calls unsettled; callers wait until their own
    /// timeout or until they drop the handle.
    Abandon,
}

impl FromStr for TeardownPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "abandon" => Ok(Self::Abandon),
            other => Err(format!("unknown teardown policy: {other}")),
        }
    }
}

/// Order in which buffered attachments are handed to the next reply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AttachmentOrder {
    /// Attachments are exposed in the order their frames arrived.
    #[default]
    Arrival,
    /// Attachments are exposed last-arrived first, for peers that write an
    /// attachment list back to front.
    Reversed,
}

impl FromStr for AttachmentOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arrival" => Ok(Self::Arrival),
            "reversed" => Ok(Self::Reversed),
            other => Err(format!("unknown attachment order: {other}")),
        }
    }
}

/// Runtime configuration for a [`crate::Session`].
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// WebSocket URL the session connects to.
    pub url: String,
    /// Give up on a call after this long. `None` waits forever.
    pub call_timeout: Option<Duration>,
    pub teardown: TeardownPolicy,
    pub attachment_order: AttachmentOrder,
    /// Close code sent by [`crate::Session::close`].
    pub close_code: u16,
    /// Close reason sent by [`crate::Session::close`].
    pub close_reason: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_owned(),
            call_timeout: None,
            teardown: TeardownPolicy::default(),
            attachment_order: AttachmentOrder::default(),
            close_code: DEFAULT_CLOSE_CODE,
            close_reason: DEFAULT_CLOSE_REASON.to_owned(),
        }
    }
}

impl SessionConfig {
    /// Config pointing at `url`, everything else default.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }

    /// Load config from environment with sane defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let call_timeout = get("WSRPC_CALL_TIMEOUT_MS")
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Self {
            url: get("WSRPC_URL").unwrap_or(defaults.url),
            call_timeout,
            teardown: parse_or(get("WSRPC_TEARDOWN"), defaults.teardown),
            attachment_order: parse_or(get("WSRPC_ATTACHMENT_ORDER"), defaults.attachment_order),
            close_code: parse_or(get("WSRPC_CLOSE_CODE"), defaults.close_code),
            close_reason: get("WSRPC_CLOSE_REASON").unwrap_or(defaults.close_reason),
        }
    }

    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_teardown(mut self, teardown: TeardownPolicy) -> Self {
        self.teardown = teardown;
        self
    }

    #[must_use]
    pub fn with_attachment_order(mut self, order: AttachmentOrder) -> Self {
        self.attachment_order = order;
        self
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|value| value.trim().parse::<T>().ok()).unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
