//! Network exchange with the speech service.
//!
//! * [`Transport`]: async trait performing one request/response exchange.
//! * [`HttpTransport`]: `reqwest` implementation (JSON or streamed audio
//!   upload, streamed response body).
//! * [`TransportRequest`]: a fully formed request description.
//! * [`TransportEvent`]: what the transport surfaces while the exchange runs.
//! * [`JsonStreamSplitter`]: splits a body of concatenated JSON documents.
//! * [`ClientInfo`]: ingredients of the `User-Agent` header.
//!
//! A transport never touches the request state machine.  It pushes events
//! into a channel and returns the terminal outcome; the service layer's
//! `ResponseApplier` turns both into transitions.

pub mod http;
pub mod json_stream;
pub mod user_agent;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::audio::AudioEncoding;
use crate::error::RuntimeError;
use crate::request::ResponsePayload;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use http::HttpTransport;
pub use json_stream::JsonStreamSplitter;
pub use user_agent::ClientInfo;

// ---------------------------------------------------------------------------
// Request description
// ---------------------------------------------------------------------------

/// Body of an outbound request.
#[derive(Debug)]
pub enum RequestBody {
    /// `Content-Type: application/json`.
    Json(Value),
    /// Audio streamed to the service as it is captured.  The upload ends when
    /// every sender of `chunks` is dropped.
    AudioStream {
        content_type: String,
        chunks: mpsc::Receiver<Bytes>,
    },
}

/// What the caller expects back; drives the `Accept` header and how the
/// body is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Encoded audio, surfaced as raw [`TransportEvent::Chunk`]s.
    Audio(AudioEncoding),
    /// Concatenated JSON documents, surfaced as [`TransportEvent::Response`]s.
    Json,
}

impl ResponseFormat {
    pub fn accept(&self) -> &'static str {
        match self {
            ResponseFormat::Audio(encoding) => encoding.mime_type(),
            ResponseFormat::Json => "application/json",
        }
    }
}

/// A fully formed request.  Connection details (base URL, token, version,
/// User-Agent) are added by the transport.
#[derive(Debug)]
pub struct TransportRequest {
    /// Endpoint path relative to the service base URL.
    pub endpoint: String,
    /// Extra query parameters.
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub format: ResponseFormat,
    /// Prefix for log lines.
    pub correlation_id: String,
}

impl TransportRequest {
    pub fn json(
        endpoint: impl Into<String>,
        body: Value,
        format: ResponseFormat,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            query: Vec::new(),
            body: RequestBody::Json(body),
            format,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn audio_upload(
        endpoint: impl Into<String>,
        content_type: impl Into<String>,
        chunks: mpsc::Receiver<Bytes>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            query: Vec::new(),
            body: RequestBody::AudioStream {
                content_type: content_type.into(),
                chunks,
            },
            format: ResponseFormat::Json,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn with_query<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

/// Build the `{"q": "<text>", ...params}` body.  `q` always wins over a
/// parameter of the same name.
pub fn query_body<'a, I>(text: &str, params: I) -> Value
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut map = Map::new();
    for (key, value) in params {
        map.insert(key.clone(), Value::String(value.clone()));
    }
    map.insert("q".into(), Value::String(text.to_string()));
    Value::Object(map)
}

// ---------------------------------------------------------------------------
// TransportEvent
// ---------------------------------------------------------------------------

/// Surfaced while an exchange is running.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Transfer progress in `0.0..=1.0`, `None` when the size is unknown.
    Progress(Option<f32>),
    /// Bytes of a streamed upload handed to the connection.  Keeps the
    /// exchange alive while the caller is still sending.
    Uploaded(usize),
    /// Raw body bytes of an audio response.
    Chunk(Bytes),
    /// One decoded JSON document; `None` for a document that failed to
    /// decode.
    Response(Option<ResponsePayload>),
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Performs one network exchange.
///
/// Implementors push [`TransportEvent`]s into `events` while the exchange
/// runs and return the terminal outcome.  They must abort in-flight I/O
/// promptly once `cancel` fires and return `RuntimeError::Cancelled`.
/// A closed `events` channel means nobody is listening any more and is
/// treated the same way.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        request: TransportRequest,
        events: mpsc::Sender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<(), RuntimeError>;
}

/// Push one event, mapping a closed channel to `Cancelled`.
pub(crate) async fn emit(
    events: &mpsc::Sender<TransportEvent>,
    event: TransportEvent,
) -> Result<(), RuntimeError> {
    events
        .send(event)
        .await
        .map_err(|_| RuntimeError::Cancelled("response consumer went away".into()))
}

// ---------------------------------------------------------------------------
// ScriptedTransport  (test-only)
// ---------------------------------------------------------------------------

/// What a [`ScriptedTransport`] was asked to do.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct RecordedExchange {
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
    pub uploaded: Vec<u8>,
    pub format: ResponseFormat,
}

/// Test double replaying a fixed list of events, then a fixed outcome.
#[cfg(test)]
#[derive(Debug)]
pub struct ScriptedTransport {
    events: Vec<TransportEvent>,
    outcome: Result<(), RuntimeError>,
    delay: std::time::Duration,
    hang: bool,
    exchanges: std::sync::Mutex<Vec<RecordedExchange>>,
}

#[cfg(test)]
impl ScriptedTransport {
    pub fn new(events: Vec<TransportEvent>) -> Self {
        Self {
            events,
            outcome: Ok(()),
            delay: std::time::Duration::ZERO,
            hang: false,
            exchanges: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, error: RuntimeError) -> Self {
        self.outcome = Err(error);
        self
    }

    /// Sleep this long before each event.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    /// After the script, stay silent until cancelled.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn exchanges(&self) -> Vec<RecordedExchange> {
        self.exchanges.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        request: TransportRequest,
        events: mpsc::Sender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<(), RuntimeError> {
        let (json, uploaded) = match request.body {
            RequestBody::Json(value) => (Some(value), Vec::new()),
            RequestBody::AudioStream { mut chunks, .. } => {
                let mut all = Vec::new();
                while let Some(chunk) = chunks.recv().await {
                    all.extend_from_slice(&chunk);
                    emit(&events, TransportEvent::Uploaded(chunk.len())).await?;
                }
                (None, all)
            }
        };
        self.exchanges.lock().unwrap().push(RecordedExchange {
            endpoint: request.endpoint,
            query: request.query,
            json,
            uploaded,
            format: request.format,
        });

        for event in self.events.clone() {
            if !self.delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(RuntimeError::Cancelled("cancelled".into()));
                    }
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
            emit(&events, event).await?;
        }

        if self.hang {
            cancel.cancelled().await;
            return Err(RuntimeError::Cancelled("cancelled".into()));
        }
        self.outcome.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
