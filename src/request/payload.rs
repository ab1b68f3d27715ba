//! Decoded response units and the capability interface that interprets them.
//!
//! A [`ResponsePayload`] is opaque to the state machine.  Everything the
//! machine needs to know about it (does it carry a service error, is it a
//! partial-capable kind, did it change, is it self-declared final) is asked
//! through a [`ResponseKind`] injected at request construction.  Text, audio
//! and NLP requests therefore share one concrete state machine.

use serde_json::Value;

use crate::error::RuntimeError;

// ---------------------------------------------------------------------------
// ResponsePayload
// ---------------------------------------------------------------------------

/// One decoded response unit as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePayload {
    body: Value,
}

impl ResponsePayload {
    pub fn new(body: Value) -> Self {
        Self { body }
    }

    /// Decode a JSON document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RuntimeError> {
        serde_json::from_slice(bytes)
            .map(Self::new)
            .map_err(|e| RuntimeError::DecodeFailure(e.to_string()))
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn into_body(self) -> Value {
        self.body
    }

    /// The recognised / understood text, when the payload carries one.
    pub fn text(&self) -> Option<&str> {
        self.body.get("text").and_then(Value::as_str)
    }
}

impl From<Value> for ResponsePayload {
    fn from(body: Value) -> Self {
        Self::new(body)
    }
}

// ---------------------------------------------------------------------------
// ResponseKind
// ---------------------------------------------------------------------------

/// Capability interface the request state machine uses to interpret payloads.
///
/// Implementors must be `Send + Sync`; one instance is shared by every request
/// of that kind.
pub trait ResponseKind: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// A service-reported error carried inside the payload, if any.
    fn decode_error(&self, payload: &ResponsePayload) -> Option<RuntimeError>;

    /// Whether the payload is a partial-capable kind.  Kinds that never mark
    /// partials receive a single partial callback right before the full one.
    fn has_partial(&self, payload: &ResponsePayload) -> bool;

    /// Semantic equality used to drop no-op updates.
    fn same_response(&self, previous: &ResponsePayload, next: &ResponsePayload) -> bool {
        previous == next
    }

    /// Whether the service itself declared this payload final.
    fn is_final(&self, _payload: &ResponsePayload) -> bool {
        false
    }
}

/// Reads `{"error": "...", "code": ..., "status": ...}` style error bodies.
fn service_error(body: &Value) -> Option<RuntimeError> {
    let message = body.get("error")?;
    let message = match message {
        Value::String(s) => s.clone(),
        Value::Null => return None,
        other => other.to_string(),
    };

    let status = body
        .get("status")
        .and_then(Value::as_u64)
        .or_else(|| body.get("code").and_then(Value::as_u64))
        .and_then(|s| u16::try_from(s).ok())
        .unwrap_or(400);

    let message = match body.get("code").and_then(Value::as_str) {
        Some(code) => format!("{message} ({code})"),
        None => message,
    };

    Some(RuntimeError::ServerError { status, message })
}

// ---------------------------------------------------------------------------
// NlpResponseKind
// ---------------------------------------------------------------------------

/// Understanding / transcription responses.
///
/// Partial frames are marked with `"is_final": false` or a `"type"` of
/// `PARTIAL_TRANSCRIPTION` / `PARTIAL_UNDERSTANDING`.  Plain one-shot
/// responses carry neither marker.
#[derive(Debug, Default, Clone, Copy)]
pub struct NlpResponseKind;

impl NlpResponseKind {
    const COMPARED_FIELDS: [&'static str; 5] = ["text", "intents", "entities", "traits", "type"];

    fn response_type(payload: &ResponsePayload) -> Option<&str> {
        payload.body().get("type").and_then(Value::as_str)
    }
}

impl ResponseKind for NlpResponseKind {
    fn name(&self) -> &'static str {
        "nlp"
    }

    fn decode_error(&self, payload: &ResponsePayload) -> Option<RuntimeError> {
        service_error(payload.body())
    }

    fn has_partial(&self, payload: &ResponsePayload) -> bool {
        if payload.body().get("is_final").and_then(Value::as_bool) == Some(false) {
            return true;
        }
        Self::response_type(payload).is_some_and(|t| t.starts_with("PARTIAL_"))
    }

    fn same_response(&self, previous: &ResponsePayload, next: &ResponsePayload) -> bool {
        Self::COMPARED_FIELDS
            .iter()
            .all(|field| previous.body().get(field) == next.body().get(field))
    }

    fn is_final(&self, payload: &ResponsePayload) -> bool {
        if payload.body().get("is_final").and_then(Value::as_bool) == Some(true) {
            return true;
        }
        Self::response_type(payload).is_some_and(|t| t.starts_with("FINAL_"))
    }
}

// ---------------------------------------------------------------------------
// AudioResponseKind
// ---------------------------------------------------------------------------

/// Synthesis responses.  The payload summarises the clip decoded so far:
/// `{"total_samples": n, "sample_rate": hz, "channels": c}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AudioResponseKind;

impl AudioResponseKind {
    /// Build the clip summary payload.
    pub fn summary(total_samples: usize, sample_rate: u32, channels: u16) -> ResponsePayload {
        ResponsePayload::new(serde_json::json!({
            "total_samples": total_samples,
            "sample_rate": sample_rate,
            "channels": channels,
        }))
    }
}

impl ResponseKind for AudioResponseKind {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn decode_error(&self, payload: &ResponsePayload) -> Option<RuntimeError> {
        service_error(payload.body())
    }

    fn has_partial(&self, _payload: &ResponsePayload) -> bool {
        true
    }

    fn same_response(&self, previous: &ResponsePayload, next: &ResponsePayload) -> bool {
        previous.body().get("total_samples") == next.body().get("total_samples")
    }
}

// ---------------------------------------------------------------------------
// FakeKind  (test-only)
// ---------------------------------------------------------------------------

/// Test double: `{"v": n}` payloads, `{"partial": true}` marks partials,
/// `{"err": "..."}` carries an error.
#[cfg(test)]
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeKind;

#[cfg(test)]
impl FakeKind {
    pub fn partial(v: i64) -> ResponsePayload {
        ResponsePayload::new(serde_json::json!({ "v": v, "partial": true }))
    }

    pub fn plain(v: i64) -> ResponsePayload {
        ResponsePayload::new(serde_json::json!({ "v": v }))
    }

    pub fn error(message: &str) -> ResponsePayload {
        ResponsePayload::new(serde_json::json!({ "err": message }))
    }
}

#[cfg(test)]
impl ResponseKind for FakeKind {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn decode_error(&self, payload: &ResponsePayload) -> Option<RuntimeError> {
        payload
            .body()
            .get("err")
            .and_then(Value::as_str)
            .map(|m| RuntimeError::ServerError {
                status: 500,
                message: m.to_string(),
            })
    }

    fn has_partial(&self, payload: &ResponsePayload) -> bool {
        payload.body().get("partial").and_then(Value::as_bool) == Some(true)
    }

    fn same_response(&self, previous: &ResponsePayload, next: &ResponsePayload) -> bool {
        previous.body().get("v") == next.body().get("v")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
