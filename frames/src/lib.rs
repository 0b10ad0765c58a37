//! Shared envelope model and JSON codec for the wsrpc wire protocol.
//!
//! This crate owns the wire representation used by both the `wsrpc` client
//! session and the reference `server`. Calls and replies travel as JSON text
//! frames; attachments travel as raw binary frames sent ahead of the reply
//! they belong to, and carry no routing information of their own.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Error returned by the envelope codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text could not be parsed (or written) as the expected JSON shape.
    #[error("invalid envelope json: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON parsed but a required field was missing or empty.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    /// The JSON parsed but is not an object.
    #[error("envelope is not a json object")]
    NotObject,
}

// =============================================================================
// FRAMES
// =============================================================================

/// One message as delivered by the underlying stream connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A JSON envelope.
    Text(String),
    /// An opaque attachment payload.
    Binary(Vec<u8>),
}

impl Frame {
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// ENVELOPES
// =============================================================================

/// Outgoing call: `{"id": "...", "method": "...", "params": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub id: String,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

impl CallEnvelope {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self { id: id.into(), method: method.into(), params }
    }
}

/// Incoming reply: `{"id": "...", "result": ...}` or `{"id": "...", "error": ...}`.
///
/// Decoding is lenient about the id: strings and integers are accepted, while
/// a missing, `null` or empty id decodes to `None`. A `result` key that is
/// present with a `null` value decodes to `Some(Value::Null)`, so a null
/// result can be told apart from an absent one. A `null` error counts as no
/// error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ReplyEnvelope {
    /// Successful reply carrying `result`.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self { id: Some(id.into()), result: Some(result), error: None }
    }

    /// Failed reply carrying a plain error message.
    pub fn failure(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { id: Some(id.into()), result: None, error: Some(Value::String(message.into())) }
    }

    /// Classify the reply. The error wins when both fields are set; `None`
    /// means the envelope carries neither.
    #[must_use]
    pub fn into_settlement(self) -> Option<Result<Value, Value>> {
        if let Some(error) = self.error {
            return Some(Err(error));
        }
        self.result.map(Ok)
    }
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(id)) if !id.is_empty() => Some(id),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

// =============================================================================
// CODEC
// =============================================================================

/// Serialize a call envelope into its text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the params cannot be serialized.
pub fn encode_call(call: &CallEnvelope) -> Result<String, CodecError> {
    Ok(serde_json::to_string(call)?)
}

/// Parse a call envelope, requiring a non-empty id and method.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for unparsable text,
/// [`CodecError::NotObject`] for JSON that is not an object and
/// [`CodecError::MissingField`] when `id` or `method` is empty.
pub fn decode_call(text: &str) -> Result<CallEnvelope, CodecError> {
    let call: CallEnvelope = serde_json::from_value(parse_object(text)?)?;
    if call.id.is_empty() {
        return Err(CodecError::MissingField("id"));
    }
    if call.method.is_empty() {
        return Err(CodecError::MissingField("method"));
    }
    Ok(call)
}

/// Serialize a reply envelope into its text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the payload cannot be serialized.
pub fn encode_reply(reply: &ReplyEnvelope) -> Result<String, CodecError> {
    Ok(serde_json::to_string(reply)?)
}

/// Parse a reply envelope.
///
/// # Errors
///
/// Returns [`CodecError::NotObject`] for JSON that is not an object and
/// [`CodecError::Json`] for anything else that is not of the reply shape.
pub fn decode_reply(text: &str) -> Result<ReplyEnvelope, CodecError> {
    Ok(serde_json::from_value(parse_object(text)?)?)
}

/// Derived struct decoding would also take a JSON array as positional
/// fields; envelopes are objects only.
fn parse_object(text: &str) -> Result<Value, CodecError> {
    match serde_json::from_str(text)? {
        object @ Value::Object(_) => Ok(object),
        _ => Err(CodecError::NotObject),
    }
}

/// Best-effort id extraction from text that failed full validation.
#[must_use]
pub fn peek_id(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    match value.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

// =============================================================================
// ERROR MESSAGES
// =============================================================================

/// Error kinds reported by servers in the `error` field.
pub mod reason {
    pub const INVALID_REQUEST: &str = "Invalid Request";
    pub const INVALID_RESPONSE: &str = "Invalid Response";
    pub const METHOD_UNAVAILABLE: &str = "Method Unavailable";
    pub const INVALID_PARAMS: &str = "Invalid Params";
    pub const INTERNAL_ERROR: &str = "Internal Error";
}

/// Render an error message as `"<kind> : <detail>"`.
#[must_use]
pub fn format_error(kind: &str, detail: &str) -> String {
    format!("{kind} : {detail}")
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
