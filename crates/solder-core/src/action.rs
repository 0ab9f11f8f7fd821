//! Outbound actions and their echo responses.
//!
//! An [`Action`] is one command for the endpoint: an action type name, a
//! parameter record, and an optional echo id. When an echo id is attached
//! the endpoint reflects it verbatim on the response frame, which lets the
//! responder route the [`EchoResponse`] back to the waiting handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};

use crate::error::{ProtocolError, ProtocolResult};
use crate::event::Event;

// ============================================================================
// Echo id generation
// ============================================================================

static NEXT_ECHO: AtomicU64 = AtomicU64::new(1);

/// Issues a fresh process-unique echo id.
///
/// Ids are decimal strings from a monotonic counter; two ids issued within
/// one process lifetime are never equal.
pub fn next_echo_id() -> String {
    NEXT_ECHO.fetch_add(1, Ordering::Relaxed).to_string()
}

// ============================================================================
// Action
// ============================================================================

/// An outbound command for the endpoint.
#[derive(Debug, Clone)]
pub struct Action {
    /// Action type name, e.g. `send_msg`.
    pub ty: String,
    /// Parameter record.
    pub params: Value,
    /// Echo id; present iff a response is expected.
    pub echo: Option<String>,
    /// The event that triggered this action, when one was in scope.
    pub trigger: Option<Arc<Event>>,
}

impl Action {
    /// Creates a fire-and-forget action.
    pub fn new(ty: impl Into<String>, params: Value) -> Self {
        Self {
            ty: ty.into(),
            params,
            echo: None,
            trigger: None,
        }
    }

    /// Attaches a fresh echo id, marking the action as expecting a response.
    ///
    /// A no-op when an echo id is already attached.
    pub fn want_echo(mut self) -> Self {
        if self.echo.is_none() {
            self.echo = Some(next_echo_id());
        }
        self
    }

    /// Whether a response is expected.
    pub fn needs_echo(&self) -> bool {
        self.echo.is_some()
    }

    /// Records the event that triggered this action.
    ///
    /// The first recording wins; later calls are ignored so the original
    /// provenance is never overwritten.
    pub fn fill_trigger(&mut self, event: Arc<Event>) {
        if self.trigger.is_none() {
            self.trigger = Some(event);
        }
    }

    /// Extracts the wire object: `{"action", "params"}` plus `"echo"` when
    /// a response is expected.
    pub fn extract(&self) -> Value {
        let mut obj = json!({
            "action": self.ty,
            "params": self.params,
        });
        if let Some(echo) = &self.echo {
            obj["echo"] = Value::String(echo.clone());
        }
        obj
    }

    /// Serializes the wire object to a JSON string.
    pub fn flatten(&self) -> String {
        self.extract().to_string()
    }
}

// ============================================================================
// Echo responses
// ============================================================================

/// An inbound response frame correlated to a previously sent action.
#[derive(Debug, Clone)]
pub struct EchoResponse {
    /// The raw response frame.
    pub raw: Value,
    /// The reflected echo id, when present.
    pub id: Option<String>,
    /// The endpoint return code.
    pub retcode: i64,
    /// The response data payload.
    pub data: Value,
    /// When this response was received.
    pub time: i64,
}

impl EchoResponse {
    /// Builds a response from a raw frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::BadField`] when `retcode` is missing.
    pub fn parse(raw: Value) -> ProtocolResult<EchoResponse> {
        let retcode = raw
            .get("retcode")
            .and_then(Value::as_i64)
            .ok_or(ProtocolError::BadField("retcode"))?;
        let id = raw.get("echo").map(echo_key);
        let data = raw.get("data").cloned().unwrap_or(Value::Null);
        Ok(EchoResponse {
            raw,
            id,
            retcode,
            data,
            time: unix_now(),
        })
    }

    /// Whether the endpoint reported success.
    pub fn is_ok(&self) -> bool {
        self.raw.get("status").and_then(Value::as_str) == Some("ok")
    }

    /// Whether the endpoint reported failure.
    pub fn is_failed(&self) -> bool {
        !self.is_ok() && !self.is_processing()
    }

    /// Whether the action is still being processed asynchronously.
    pub fn is_processing(&self) -> bool {
        self.retcode == 202
    }
}

/// Normalizes an inbound echo field to the string key used by the pending
/// table. Numeric echoes and string echoes compare equal to the ids this
/// process issues.
pub fn echo_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_echo_ids_distinct() {
        let ids: HashSet<String> = (0..1000).map(|_| next_echo_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_extract_wire_form() {
        let action = Action::new("send_msg", json!({"user_id": 1, "message": "hi"}));
        let wire = action.extract();
        assert_eq!(wire["action"], "send_msg");
        assert_eq!(wire["params"]["user_id"], 1);
        assert!(wire.get("echo").is_none());

        let action = action.want_echo();
        let wire = action.extract();
        assert!(wire["echo"].is_string());
    }

    #[test]
    fn test_want_echo_idempotent() {
        let action = Action::new("get_login_info", json!({})).want_echo();
        let first = action.echo.clone();
        let action = action.want_echo();
        assert_eq!(action.echo, first);
    }

    #[test]
    fn test_echo_response_parse() {
        let resp = EchoResponse::parse(json!({
            "status": "ok",
            "retcode": 0,
            "echo": "abc",
            "data": {"message_id": 42}
        }))
        .unwrap();
        assert!(resp.is_ok());
        assert!(!resp.is_failed());
        assert_eq!(resp.id.as_deref(), Some("abc"));
        assert_eq!(resp.data["message_id"], 42);
    }

    #[test]
    fn test_echo_key_numeric() {
        assert_eq!(echo_key(&json!(7)), "7");
        assert_eq!(echo_key(&json!("7")), "7");
    }

    #[test]
    fn test_processing_response() {
        let resp = EchoResponse::parse(json!({"status": "async", "retcode": 202})).unwrap();
        assert!(resp.is_processing());
        assert!(!resp.is_failed());
    }
}
