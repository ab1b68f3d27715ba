//! Bridges a [`Transport`] exchange to a [`Request`].
//!
//! ```text
//! transport.execute ──▶ TransportEvent channel ──▶ ResponseApplier
//!   Progress(f)          └─▶ request.report_progress(f)
//!   Uploaded(n)          └─▶ (keeps the exchange alive)
//!   Chunk(bytes)         └─▶ sink.on_chunk  ──▶ apply_response(partial)
//!   Response(p)          └─▶ apply_response(p, kind says final?)
//! outcome Ok             └─▶ sink.finish   ──▶ apply_response(last, final)
//! outcome Err / silence  └─▶ request.fail(error)
//! ```
//!
//! The silent timeout restarts on every event, upload activity included.  A cancelled request stops
//! the loop at once; the transport sees the same cancellation token and
//! aborts its own I/O.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::RuntimeError;
use crate::request::{Request, RequestState, ResponsePayload};
use crate::transport::{Transport, TransportEvent, TransportRequest};

/// Events buffered between the transport and the applier.
const EVENT_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// ChunkSink
// ---------------------------------------------------------------------------

/// Consumer of raw response bytes (decoder, file writer).
pub trait ChunkSink: Send {
    /// Handle one chunk.  A returned payload is applied as a partial
    /// response; an error fails the request.
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<Option<ResponsePayload>, RuntimeError>;

    /// The transport finished successfully.  A returned payload replaces the
    /// last received one as the final response.
    fn finish(&mut self) -> Result<Option<ResponsePayload>, RuntimeError> {
        Ok(None)
    }
}

/// Sink for JSON-only exchanges; stray bytes are logged and dropped.
#[derive(Debug, Default)]
pub struct DiscardChunks;

impl ChunkSink for DiscardChunks {
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<Option<ResponsePayload>, RuntimeError> {
        log::debug!(target: "transport", "discarding {} unexpected body bytes", chunk.len());
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// ResponseApplier
// ---------------------------------------------------------------------------

/// Drives one exchange for one request.
pub struct ResponseApplier {
    request: Arc<Request>,
    timeout: Duration,
}

impl ResponseApplier {
    /// `timeout` is used unless the request's options carry their own.
    pub fn new(request: Arc<Request>, default_timeout: Duration) -> Self {
        let timeout = request.options().timeout.unwrap_or(default_timeout);
        Self { request, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the exchange to its end.  Returns `Ok` when the request
    /// completed, otherwise the failure or cancellation.
    pub async fn run(
        &self,
        transport: Arc<dyn Transport>,
        exchange: TransportRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<(), RuntimeError> {
        let cid = exchange.correlation_id.clone();
        let cancel = self.request.cancellation_token();
        let (tx, mut rx) = mpsc::channel(EVENT_CAPACITY);

        let execute = transport.execute(exchange, tx, cancel.clone());
        tokio::pin!(execute);

        let mut last: Option<ResponsePayload> = None;
        let mut outcome: Option<Result<(), RuntimeError>> = None;
        let mut closed = false;

        let result = loop {
            if closed {
                if let Some(result) = outcome.take() {
                    break result;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    break Err(RuntimeError::Cancelled("request cancelled".into()));
                }
                event = rx.recv(), if !closed => match event {
                    Some(event) => {
                        if let Err(e) = self.handle(event, sink, &mut last) {
                            break Err(e);
                        }
                    }
                    None => closed = true,
                },
                result = &mut execute, if outcome.is_none() => outcome = Some(result),
                _ = tokio::time::sleep(self.timeout) => {
                    log::warn!(
                        target: "transport",
                        "[{cid}] no data for {:?}",
                        self.timeout
                    );
                    break Err(RuntimeError::Timeout);
                }
            }
        };

        match result {
            Ok(()) => match sink.finish() {
                Ok(Some(summary)) => {
                    self.request.apply_response(Some(summary), true);
                }
                Ok(None) => {
                    self.request.apply_response(last, true);
                }
                Err(e) => {
                    self.request.fail(e);
                }
            },
            Err(e) => {
                if !self.request.fail(e.clone()) {
                    log::debug!(target: "transport", "[{cid}] ended after finalization: {e}");
                }
            }
        }

        self.outcome()
    }

    fn handle(
        &self,
        event: TransportEvent,
        sink: &mut dyn ChunkSink,
        last: &mut Option<ResponsePayload>,
    ) -> Result<(), RuntimeError> {
        match event {
            TransportEvent::Progress(fraction) => self.request.report_progress(fraction),
            TransportEvent::Uploaded(bytes) => {
                log::trace!(target: "transport", "uploaded {bytes} bytes");
            }
            TransportEvent::Chunk(chunk) => self.on_chunk(chunk, sink, last)?,
            TransportEvent::Response(Some(payload)) => {
                let is_final = self.request.is_final_payload(&payload);
                *last = Some(payload.clone());
                self.request.apply_response(Some(payload), is_final);
            }
            TransportEvent::Response(None) => {
                *last = None;
                self.request.apply_response(None, false);
            }
        }
        Ok(())
    }

    fn on_chunk(
        &self,
        chunk: Bytes,
        sink: &mut dyn ChunkSink,
        last: &mut Option<ResponsePayload>,
    ) -> Result<(), RuntimeError> {
        if let Some(payload) = sink.on_chunk(&chunk)? {
            *last = Some(payload.clone());
            self.request.apply_response(Some(payload), false);
        }
        Ok(())
    }

    fn outcome(&self) -> Result<(), RuntimeError> {
        let snapshot = self.request.snapshot();
        match snapshot.state {
            RequestState::Completed => Ok(()),
            RequestState::Cancelled => Err(RuntimeError::Cancelled(
                snapshot.cancel_reason.unwrap_or_default(),
            )),
            state => Err(snapshot
                .failure
                .unwrap_or(RuntimeError::InvalidStateTransition {
                    from: state,
                    operation: "finish",
                })),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::observer::{Recorded, RecordingObserver};
    use crate::request::{NlpResponseKind, RequestOptions};
    use crate::transport::{ResponseFormat, ScriptedTransport};
    use serde_json::json;

    fn nlp_request(observer: Arc<RecordingObserver>) -> Arc<Request> {
        let request = Arc::new(Request::new(Arc::new(NlpResponseKind), observer));
        request.initialize(RequestOptions::text()).unwrap();
        request.send().unwrap();
        request
    }

    fn exchange() -> TransportRequest {
        TransportRequest::json("message", json!({"q": "hi"}), ResponseFormat::Json, "t")
    }

    fn response(value: serde_json::Value) -> TransportEvent {
        TransportEvent::Response(Some(ResponsePayload::new(value)))
    }

    /// Counts bytes, reports a summary every chunk.
    #[derive(Default)]
    struct CountingSink {
        bytes: usize,
        fail_finish: bool,
    }

    impl ChunkSink for CountingSink {
        fn on_chunk(&mut self, chunk: &[u8]) -> Result<Option<ResponsePayload>, RuntimeError> {
            self.bytes += chunk.len();
            Ok(Some(ResponsePayload::new(json!({"text": self.bytes.to_string()}))))
        }

        fn finish(&mut self) -> Result<Option<ResponsePayload>, RuntimeError> {
            if self.fail_finish {
                Err(RuntimeError::DecodeFailure("nothing decoded".into()))
            } else {
                Ok(None)
            }
        }
    }

    // ---- success paths ----

    #[tokio::test]
    async fn partials_then_success_promotes_last() {
        let obs = RecordingObserver::new();
        let request = nlp_request(obs.clone());
        let transport = Arc::new(ScriptedTransport::new(vec![
            TransportEvent::Progress(Some(0.5)),
            response(json!({"text": "turn", "is_final": false})),
            response(json!({"text": "turn on", "is_final": false})),
        ]));

        let applier = ResponseApplier::new(request.clone(), Duration::from_secs(5));
        applier
            .run(transport, exchange(), &mut DiscardChunks)
            .await
            .unwrap();

        assert_eq!(request.state(), RequestState::Completed);
        assert_eq!(request.results().unwrap().text(), Some("turn on"));
        assert!(obs.events().contains(&Recorded::Progress(Some(0.5))));
        assert_eq!(obs.count(|e| matches!(e, Recorded::Full(_))), 1);
    }

    #[tokio::test]
    async fn self_declared_final_completes_immediately() {
        let obs = RecordingObserver::new();
        let request = nlp_request(obs.clone());
        let transport = Arc::new(ScriptedTransport::new(vec![
            response(json!({"text": "lights on", "type": "FINAL_UNDERSTANDING"})),
            response(json!({"text": "late", "is_final": false})),
        ]));

        ResponseApplier::new(request.clone(), Duration::from_secs(5))
            .run(transport, exchange(), &mut DiscardChunks)
            .await
            .unwrap();

        assert_eq!(request.results().unwrap().text(), Some("lights on"));
        assert_eq!(obs.count(|e| matches!(e, Recorded::Completed)), 1);
    }

    #[tokio::test]
    async fn chunk_sink_summaries_become_partials() {
        let obs = RecordingObserver::new();
        let request = nlp_request(obs.clone());
        let transport = Arc::new(ScriptedTransport::new(vec![
            TransportEvent::Chunk(Bytes::from_static(b"abcd")),
            TransportEvent::Chunk(Bytes::from_static(b"ef")),
        ]));

        let mut sink = CountingSink::default();
        ResponseApplier::new(request.clone(), Duration::from_secs(5))
            .run(transport, exchange(), &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.bytes, 6);
        assert_eq!(request.results().unwrap().text(), Some("6"));
    }

    // ---- failure paths ----

    #[tokio::test]
    async fn transport_error_fails_request() {
        let obs = RecordingObserver::new();
        let request = nlp_request(obs.clone());
        let transport = Arc::new(
            ScriptedTransport::new(vec![response(json!({"text": "par", "is_final": false}))])
                .failing(RuntimeError::ServerError {
                    status: 503,
                    message: "busy".into(),
                }),
        );

        let outcome = ResponseApplier::new(request.clone(), Duration::from_secs(5))
            .run(transport, exchange(), &mut DiscardChunks)
            .await;

        assert!(matches!(outcome, Err(RuntimeError::ServerError { status: 503, .. })));
        assert_eq!(request.state(), RequestState::Failed);
        assert_eq!(obs.count(|e| matches!(e, Recorded::Error(503, _))), 1);
    }

    #[tokio::test]
    async fn undecodable_final_document_is_decode_failure() {
        let request = nlp_request(RecordingObserver::new());
        let transport = Arc::new(ScriptedTransport::new(vec![
            response(json!({"text": "par", "is_final": false})),
            TransportEvent::Response(None),
        ]));

        let outcome = ResponseApplier::new(request.clone(), Duration::from_secs(5))
            .run(transport, exchange(), &mut DiscardChunks)
            .await;

        assert!(matches!(outcome, Err(RuntimeError::DecodeFailure(_))));
    }

    #[tokio::test]
    async fn sink_finish_error_fails_request() {
        let request = nlp_request(RecordingObserver::new());
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let mut sink = CountingSink {
            fail_finish: true,
            ..CountingSink::default()
        };

        let outcome = ResponseApplier::new(request.clone(), Duration::from_secs(5))
            .run(transport, exchange(), &mut sink)
            .await;

        assert!(matches!(outcome, Err(RuntimeError::DecodeFailure(_))));
        assert_eq!(request.state(), RequestState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_transport_times_out() {
        let request = nlp_request(RecordingObserver::new());
        let transport = Arc::new(ScriptedTransport::new(vec![]).hanging());

        let outcome = ResponseApplier::new(request.clone(), Duration::from_millis(200))
            .run(transport, exchange(), &mut DiscardChunks)
            .await;

        assert_eq!(outcome, Err(RuntimeError::Timeout));
        assert_eq!(request.state(), RequestState::Failed);
        assert!(request.cancellation_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn per_request_timeout_overrides_default() {
        let request = Arc::new(Request::new(
            Arc::new(NlpResponseKind),
            RecordingObserver::new(),
        ));
        request
            .initialize(RequestOptions::text().with_timeout(Duration::from_millis(50)))
            .unwrap();
        request.send().unwrap();

        let applier = ResponseApplier::new(request, Duration::from_secs(60));
        assert_eq!(applier.timeout(), Duration::from_millis(50));
    }

    // ---- cancellation ----

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_flight_wins_over_late_response() {
        let obs = RecordingObserver::new();
        let request = nlp_request(obs.clone());
        let transport = Arc::new(
            ScriptedTransport::new(vec![
                response(json!({"text": "a", "is_final": false})),
                response(json!({"text": "late", "is_final": true})),
            ])
            .with_delay(Duration::from_millis(100)),
        );

        let task = {
            let request = request.clone();
            tokio::spawn(async move {
                ResponseApplier::new(request, Duration::from_secs(5))
                    .run(transport, exchange(), &mut DiscardChunks)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(request.cancel("user stop"));

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, Err(RuntimeError::Cancelled(ref r)) if r == "user stop"));
        assert_eq!(request.state(), RequestState::Cancelled);
        assert!(!request.apply_response(
            Some(ResponsePayload::new(json!({"text": "late", "is_final": true}))),
            true
        ));
        assert_eq!(obs.count(|e| matches!(e, Recorded::Full(_))), 0);
        assert_eq!(request.results().unwrap().text(), Some("a"));
    }
}
