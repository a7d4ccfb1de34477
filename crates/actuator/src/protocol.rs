//! Wire format: one newline-terminated JSON request per connection, framed by
//! the client half-closing its write side; one JSON response.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::actions::{Action, ActionTable};

/// Requests above this size are rejected without being parsed.
pub(crate) const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Why a payload was refused before any action ran.
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum Rejection {
    #[error("payload exceeds {MAX_REQUEST_BYTES} bytes")]
    TooLarge,
    #[error("not terminated with a newline")]
    MissingNewline,
    #[error("bad json: {0}")]
    BadJson(String),
    #[error("unknown request {0:?}")]
    UnknownRequest(Option<String>),
    #[error("missing args")]
    MissingArgs,
}

/// A validated request, ready for dispatch.
#[derive(Debug)]
pub(crate) struct Request {
    pub(crate) action: Action,
    pub(crate) args: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Response {
    pub(crate) success: bool,
}

impl Response {
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        // A struct with one bool field always serialises.
        serde_json::to_vec(self).unwrap_or_else(|_| b"{\"success\":false}".to_vec())
    }
}

/// Validate a raw payload in order: framing, JSON, action name, args.
pub(crate) fn parse_request(payload: &[u8], actions: &ActionTable) -> Result<Request, Rejection> {
    if payload.len() > MAX_REQUEST_BYTES {
        return Err(Rejection::TooLarge);
    }
    if payload.last() != Some(&b'\n') {
        return Err(Rejection::MissingNewline);
    }

    let mut doc = match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(doc)) => doc,
        Ok(other) => {
            return Err(Rejection::BadJson(format!(
                "expected an object, got {}",
                type_name(&other)
            )))
        }
        Err(e) => return Err(Rejection::BadJson(e.to_string())),
    };

    let name = doc.get("request").and_then(Value::as_str);
    let action = match name.and_then(|n| actions.lookup(n)) {
        Some(a) => a,
        None => {
            return Err(Rejection::UnknownRequest(
                doc.get("request").map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string)),
            ))
        }
    };

    match doc.remove("args") {
        Some(Value::Object(args)) => Ok(Request { action, args }),
        _ => Err(Rejection::MissingArgs),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ===========================================================================
// Tests
// ===========================================================================
