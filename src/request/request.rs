//! The request state machine.
//!
//! [`Request`] is one concrete type shared by text, audio and NLP requests.
//! Response interpretation is delegated to an injected [`ResponseKind`];
//! notifications go to an injected [`RequestObserver`].
//!
//! All mutating operations take the request's internal mutex, compute the
//! transition and the callbacks it produces, release the lock and only then
//! dispatch the callbacks.  Transitions for one request are therefore
//! serialized, and observers may call back into the request without
//! deadlocking.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::RuntimeError;

use super::observer::RequestObserver;
use super::payload::{ResponseKind, ResponsePayload};
use super::state::{InputType, RequestState};

/// Reason recorded when [`Request::complete_early`] finds nothing to promote.
pub const NO_DATA_TO_FINALIZE: &str = "no data to finalize early";

// ---------------------------------------------------------------------------
// RequestOptions
// ---------------------------------------------------------------------------

/// Caller-supplied description of a request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Text query or streamed audio upload.
    pub input_type: InputType,
    /// Service parameters, forwarded as string key/values.
    pub parameters: BTreeMap<String, String>,
    /// Silent-transport timeout.  `None` uses the configured default.
    pub timeout: Option<Duration>,
    /// Identifier propagated through logs.  Defaults to the request id.
    pub correlation_id: Option<String>,
}

impl RequestOptions {
    pub fn text() -> Self {
        Self::default()
    }

    pub fn audio() -> Self {
        Self {
            input_type: InputType::Audio,
            ..Self::default()
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

// ---------------------------------------------------------------------------
// RequestSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time copy of a request's observable data.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub id: Uuid,
    pub correlation_id: String,
    pub state: RequestState,
    pub input_type: InputType,
    pub results: Option<ResponsePayload>,
    pub failure: Option<RuntimeError>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct Inner {
    state: RequestState,
    options: RequestOptions,
    correlation_id: String,
    results: Option<ResponsePayload>,
    /// Latched on the first final response or failure.
    finalized: bool,
    failure: Option<RuntimeError>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    activated_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// A callback produced under the lock and delivered after it is released.
enum Event {
    State(RequestState, RequestState),
    Partial(ResponsePayload),
    Full(ResponsePayload),
    Error(i32, String),
    Progress(Option<f32>),
    Cancelled(String),
    Completed,
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One outbound request and its lifecycle.
pub struct Request {
    id: Uuid,
    kind: Arc<dyn ResponseKind>,
    observer: Arc<dyn RequestObserver>,
    cancel: CancellationToken,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("kind", &self.kind.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Request {
    /// Create a request in the `Created` state.
    pub fn new(kind: Arc<dyn ResponseKind>, observer: Arc<dyn RequestObserver>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            kind,
            observer,
            cancel: CancellationToken::new(),
            inner: Mutex::new(Inner {
                state: RequestState::Created,
                options: RequestOptions::default(),
                correlation_id: id.to_string(),
                results: None,
                finalized: false,
                failure: None,
                cancel_reason: None,
                created_at: Utc::now(),
                activated_at: None,
                completed_at: None,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn correlation_id(&self) -> String {
        self.lock().correlation_id.clone()
    }

    pub fn state(&self) -> RequestState {
        self.lock().state
    }

    pub fn input_type(&self) -> InputType {
        self.lock().options.input_type
    }

    pub fn options(&self) -> RequestOptions {
        self.lock().options.clone()
    }

    /// Latest applied response (partial or final).
    pub fn results(&self) -> Option<ResponsePayload> {
        self.lock().results.clone()
    }

    pub fn failure(&self) -> Option<RuntimeError> {
        self.lock().failure.clone()
    }

    pub fn is_finalized(&self) -> bool {
        self.lock().finalized
    }

    /// Whether the service declared `payload` final on its own.
    pub fn is_final_payload(&self, payload: &ResponsePayload) -> bool {
        self.kind.is_final(payload)
    }

    /// Cancelled when the request is cancelled or fails; transports select on
    /// it to abort in-flight I/O.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        let inner = self.lock();
        RequestSnapshot {
            id: self.id,
            correlation_id: inner.correlation_id.clone(),
            state: inner.state,
            input_type: inner.options.input_type,
            results: inner.results.clone(),
            failure: inner.failure.clone(),
            cancel_reason: inner.cancel_reason.clone(),
            created_at: inner.created_at,
            activated_at: inner.activated_at,
            completed_at: inner.completed_at,
        }
    }

    // -----------------------------------------------------------------------
    // Setup transitions
    // -----------------------------------------------------------------------

    /// `Created → Initialized`; records the input type and options.
    pub fn initialize(&self, options: RequestOptions) -> Result<(), RuntimeError> {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            if inner.state != RequestState::Created {
                return Err(RuntimeError::InvalidStateTransition {
                    from: inner.state,
                    operation: "initialize",
                });
            }
            if let Some(cid) = options.correlation_id.clone() {
                inner.correlation_id = cid;
            }
            inner.options = options;
            Self::transition(&mut inner, RequestState::Initialized, &mut events);
            log::debug!(
                target: "request",
                "[{}] initialized ({} / {:?})",
                inner.correlation_id,
                self.kind.name(),
                inner.options.input_type
            );
        }
        self.dispatch(events);
        Ok(())
    }

    /// `Initialized → Activating` for audio requests.
    pub fn activate_audio(&self) -> Result<(), RuntimeError> {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            if inner.options.input_type == InputType::Text {
                return Err(RuntimeError::InvalidInput(
                    "text requests cannot activate audio".into(),
                ));
            }
            if inner.state != RequestState::Initialized {
                return Err(RuntimeError::InvalidStateTransition {
                    from: inner.state,
                    operation: "activate audio",
                });
            }
            inner.activated_at = Some(Utc::now());
            Self::transition(&mut inner, RequestState::Activating, &mut events);
        }
        self.dispatch(events);
        Ok(())
    }

    /// Start transmitting.  Text: `Initialized → Transmitting`.
    /// Audio: `Activating → Transmitting`; sending before activation fails.
    pub fn send(&self) -> Result<(), RuntimeError> {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            match (inner.options.input_type, inner.state) {
                (InputType::Text, RequestState::Initialized) => {
                    inner.activated_at = Some(Utc::now());
                }
                (InputType::Audio, RequestState::Activating) => {}
                (InputType::Audio, RequestState::Initialized) => {
                    return Err(RuntimeError::InvalidInput(
                        "audio request must be activated before send".into(),
                    ));
                }
                (_, from) => {
                    return Err(RuntimeError::InvalidStateTransition {
                        from,
                        operation: "send",
                    });
                }
            }
            Self::transition(&mut inner, RequestState::Transmitting, &mut events);
        }
        self.dispatch(events);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Response application
    // -----------------------------------------------------------------------

    /// Apply a decoded response.  `None` stands for an undecodable payload.
    ///
    /// Returns `true` when the call changed the request (results or state).
    pub fn apply_response(&self, payload: Option<ResponsePayload>, is_final: bool) -> bool {
        let mut events = Vec::new();
        let applied = {
            let mut inner = self.lock();
            self.apply_locked(&mut inner, payload, is_final, &mut events)
        };
        self.dispatch(events);
        applied
    }

    /// Promote the latest partial to final.  Without any received data the
    /// request is cancelled instead.
    pub fn complete_early(&self) -> Result<(), RuntimeError> {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            if !inner.state.is_active() || inner.finalized {
                return Err(RuntimeError::InvalidStateTransition {
                    from: inner.state,
                    operation: "complete early",
                });
            }
            match inner.results.clone() {
                Some(latest) => {
                    self.apply_locked(&mut inner, Some(latest), true, &mut events);
                }
                None => {
                    self.cancel_locked(&mut inner, NO_DATA_TO_FINALIZE, &mut events);
                }
            }
        }
        self.dispatch(events);
        Ok(())
    }

    /// Cancel from any non-terminal state.  Aborts in-flight transport work
    /// through the cancellation token.  Returns `false` when already terminal.
    pub fn cancel(&self, reason: &str) -> bool {
        let mut events = Vec::new();
        let cancelled = {
            let mut inner = self.lock();
            self.cancel_locked(&mut inner, reason, &mut events)
        };
        self.dispatch(events);
        cancelled
    }

    /// Fail the request with a transport or server error.  Same path as a
    /// final response carrying an error.
    pub fn fail(&self, error: RuntimeError) -> bool {
        let mut events = Vec::new();
        let failed = {
            let mut inner = self.lock();
            if inner.state.is_terminal() || inner.finalized {
                false
            } else {
                self.fail_locked(&mut inner, error, &mut events);
                true
            }
        };
        self.dispatch(events);
        failed
    }

    /// Forward transfer progress while the request is active.
    pub fn report_progress(&self, fraction: Option<f32>) {
        let active = self.lock().state.is_active();
        if active {
            self.dispatch(vec![Event::Progress(fraction.map(|f| f.clamp(0.0, 1.0)))]);
        }
    }

    // -----------------------------------------------------------------------
    // Locked helpers
    // -----------------------------------------------------------------------

    fn apply_locked(
        &self,
        inner: &mut Inner,
        payload: Option<ResponsePayload>,
        is_final: bool,
        events: &mut Vec<Event>,
    ) -> bool {
        if !inner.state.is_active() {
            log::debug!(
                target: "request",
                "[{}] response ignored in state {}",
                inner.correlation_id,
                inner.state
            );
            return false;
        }
        if is_final && inner.finalized {
            return false;
        }

        let Some(payload) = payload else {
            if is_final {
                self.fail_locked(
                    inner,
                    RuntimeError::DecodeFailure("final response could not be decoded".into()),
                    events,
                );
                return true;
            }
            log::debug!(target: "request", "[{}] undecodable partial skipped", inner.correlation_id);
            return false;
        };

        if let Some(error) = self.kind.decode_error(&payload) {
            if is_final {
                self.fail_locked(inner, error, events);
                return true;
            }
            log::debug!(
                target: "request",
                "[{}] error on partial frame ignored: {error}",
                inner.correlation_id
            );
            return false;
        }

        let changed = match &inner.results {
            Some(previous) => !self.kind.same_response(previous, &payload),
            None => true,
        };
        if !changed && !is_final {
            return false;
        }
        if changed {
            inner.results = Some(payload.clone());
        }

        let has_partial = self.kind.has_partial(&payload);
        let emit_partial = (changed && has_partial) || (is_final && !has_partial);

        if is_final {
            inner.finalized = true;
            Self::transition(inner, RequestState::Finalizing, events);
            if emit_partial {
                events.push(Event::Partial(payload.clone()));
            }
            let full = inner.results.clone().unwrap_or(payload);
            events.push(Event::Full(full));
            inner.completed_at = Some(Utc::now());
            Self::transition(inner, RequestState::Completed, events);
            events.push(Event::Completed);
            log::info!(target: "request", "[{}] completed", inner.correlation_id);
        } else if emit_partial {
            if inner.state != RequestState::PartialReceived {
                Self::transition(inner, RequestState::PartialReceived, events);
            }
            events.push(Event::Partial(payload));
        }
        true
    }

    fn fail_locked(&self, inner: &mut Inner, error: RuntimeError, events: &mut Vec<Event>) {
        log::warn!(target: "request", "[{}] failed: {error}", inner.correlation_id);
        inner.finalized = true;
        inner.completed_at = Some(Utc::now());
        events.push(Event::Error(error.code(), error.to_string()));
        inner.failure = Some(error);
        Self::transition(inner, RequestState::Failed, events);
        self.cancel.cancel();
    }

    fn cancel_locked(&self, inner: &mut Inner, reason: &str, events: &mut Vec<Event>) -> bool {
        if inner.state.is_terminal() {
            return false;
        }
        log::info!(target: "request", "[{}] cancelled: {reason}", inner.correlation_id);
        inner.cancel_reason = Some(reason.to_string());
        inner.completed_at = Some(Utc::now());
        Self::transition(inner, RequestState::Cancelled, events);
        events.push(Event::Cancelled(reason.to_string()));
        self.cancel.cancel();
        true
    }

    fn transition(inner: &mut Inner, next: RequestState, events: &mut Vec<Event>) {
        let from = inner.state;
        debug_assert!(from.can_transition_to(next), "{from} -> {next}");
        inner.state = next;
        events.push(Event::State(from, next));
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `events` in order.  A cancel that lands while a batch is being
    /// delivered (from an observer or another thread) silences the rest of it.
    fn dispatch(&self, events: Vec<Event>) {
        let cancels = events.iter().any(|e| matches!(e, Event::Cancelled(_)));
        for event in events {
            if !cancels && self.lock().state == RequestState::Cancelled {
                log::debug!(
                    target: "request",
                    "[{}] dropping callbacks after cancel",
                    self.correlation_id()
                );
                break;
            }
            match event {
                Event::State(from, to) => self.observer.on_state_changed(from, to),
                Event::Partial(p) => self.observer.on_partial_response(&p),
                Event::Full(p) => self.observer.on_full_response(&p),
                Event::Error(code, message) => self.observer.on_error(code, &message),
                Event::Progress(f) => self.observer.on_progress(f),
                Event::Cancelled(reason) => self.observer.on_cancelled(&reason),
                Event::Completed => self.observer.on_completed(),
            }
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
    use crate::request::payload::FakeKind;
    use serde_json::json;

    fn transmitting(observer: Arc<RecordingObserver>) -> Request {
        let req = Request::new(Arc::new(FakeKind), observer);
        req.initialize(RequestOptions::text()).unwrap();
        req.send().unwrap();
        req
    }

    fn is_partial(e: &Recorded) -> bool {
        matches!(e, Recorded::Partial(_))
    }

    fn is_full(e: &Recorded) -> bool {
        matches!(e, Recorded::Full(_))
    }

    // ---- setup transitions ----

    #[test]
    fn initialize_only_from_created() {
        let req = Request::new(Arc::new(FakeKind), RecordingObserver::new());
        req.initialize(RequestOptions::text()).unwrap();
        assert_eq!(req.state(), RequestState::Initialized);

        let err = req.initialize(RequestOptions::text()).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidStateTransition { .. }));
    }

    #[test]
    fn correlation_id_defaults_to_request_id() {
        let req = Request::new(Arc::new(FakeKind), RecordingObserver::new());
        assert_eq!(req.correlation_id(), req.id().to_string());

        req.initialize(RequestOptions::text().with_correlation_id("trace-7"))
            .unwrap();
        assert_eq!(req.correlation_id(), "trace-7");
    }

    #[test]
    fn text_request_cannot_activate_audio() {
        let req = Request::new(Arc::new(FakeKind), RecordingObserver::new());
        req.initialize(RequestOptions::text()).unwrap();
        let err = req.activate_audio().unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidInput(_)));
        assert_eq!(req.state(), RequestState::Initialized);
    }

    #[test]
    fn audio_request_must_activate_before_send() {
        let req = Request::new(Arc::new(FakeKind), RecordingObserver::new());
        req.initialize(RequestOptions::audio()).unwrap();
        assert!(matches!(req.send().unwrap_err(), RuntimeError::InvalidInput(_)));

        req.activate_audio().unwrap();
        assert_eq!(req.state(), RequestState::Activating);
        assert!(req.snapshot().activated_at.is_some());

        req.send().unwrap();
        assert_eq!(req.state(), RequestState::Transmitting);
    }

    #[test]
    fn send_twice_is_invalid() {
        let req = transmitting(RecordingObserver::new());
        assert!(matches!(
            req.send().unwrap_err(),
            RuntimeError::InvalidStateTransition { from: RequestState::Transmitting, .. }
        ));
    }

    // ---- apply_response: partials ----

    #[test]
    fn identical_partial_twice_emits_once() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());

        assert!(req.apply_response(Some(FakeKind::partial(1)), false));
        assert!(!req.apply_response(Some(FakeKind::partial(1)), false));

        assert_eq!(obs.count(is_partial), 1);
        assert_eq!(req.state(), RequestState::PartialReceived);
    }

    #[test]
    fn changed_partials_each_emit() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());

        req.apply_response(Some(FakeKind::partial(1)), false);
        req.apply_response(Some(FakeKind::partial(2)), false);
        req.apply_response(Some(FakeKind::partial(3)), false);

        assert_eq!(obs.count(is_partial), 3);
        assert_eq!(req.results().unwrap().body()["v"], 3);
    }

    #[test]
    fn response_before_send_is_ignored() {
        let obs = RecordingObserver::new();
        let req = Request::new(Arc::new(FakeKind), obs.clone());
        req.initialize(RequestOptions::text()).unwrap();

        assert!(!req.apply_response(Some(FakeKind::partial(1)), false));
        assert!(!req.apply_response(Some(FakeKind::partial(1)), true));
        assert_eq!(req.state(), RequestState::Initialized);
        assert!(obs.responses().is_empty());
    }

    #[test]
    fn undecodable_partial_is_silently_skipped() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());

        assert!(!req.apply_response(None, false));
        assert_eq!(req.state(), RequestState::Transmitting);
        assert!(obs.responses().is_empty());
    }

    #[test]
    fn error_on_partial_frame_is_not_authoritative() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());

        assert!(!req.apply_response(Some(FakeKind::error("flaky")), false));
        assert_eq!(req.state(), RequestState::Transmitting);
        assert!(req.failure().is_none());
    }

    #[test]
    fn changed_plain_partial_is_stored_without_callback() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());

        assert!(req.apply_response(Some(FakeKind::plain(1)), false));
        assert!(req.apply_response(Some(FakeKind::plain(2)), false));

        assert_eq!(obs.count(is_partial), 0);
        assert_eq!(req.results().unwrap().body()["v"], 2);
        assert_eq!(req.state(), RequestState::Transmitting);
    }

    // ---- apply_response: final ----

    #[test]
    fn final_twice_completes_once() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());

        assert!(req.apply_response(Some(FakeKind::partial(1)), true));
        assert!(!req.apply_response(Some(FakeKind::partial(2)), true));

        assert_eq!(obs.count(is_full), 1);
        assert_eq!(obs.count(|e| matches!(e, Recorded::Completed)), 1);
        assert_eq!(req.state(), RequestState::Completed);
        assert_eq!(req.results().unwrap().body()["v"], 1);
    }

    #[test]
    fn non_partial_kind_gets_partial_right_before_full() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());

        req.apply_response(Some(FakeKind::plain(1)), false);
        req.apply_response(Some(FakeKind::plain(2)), false);
        req.apply_response(Some(FakeKind::plain(2)), true);

        assert_eq!(
            obs.responses(),
            vec![
                Recorded::Partial(json!({"v": 2})),
                Recorded::Full(json!({"v": 2})),
                Recorded::Completed,
            ]
        );
    }

    #[test]
    fn unchanged_partial_kind_final_emits_only_full() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());

        req.apply_response(Some(FakeKind::partial(5)), false);
        req.apply_response(Some(FakeKind::partial(5)), true);

        assert_eq!(obs.count(is_partial), 1);
        assert_eq!(obs.count(is_full), 1);
    }

    #[test]
    fn final_walks_through_finalizing() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());
        req.apply_response(Some(FakeKind::plain(1)), true);

        let states: Vec<_> = obs
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::State(_, to) => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                RequestState::Initialized,
                RequestState::Transmitting,
                RequestState::Finalizing,
                RequestState::Completed,
            ]
        );
        assert!(req.snapshot().completed_at.is_some());
    }

    #[test]
    fn undecodable_final_fails_with_decode_failure() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());

        assert!(req.apply_response(None, true));
        assert_eq!(req.state(), RequestState::Failed);
        assert!(matches!(req.failure(), Some(RuntimeError::DecodeFailure(_))));
        assert_eq!(obs.count(|e| matches!(e, Recorded::Error(-6, _))), 1);
    }

    #[test]
    fn final_error_fails_with_status_and_message() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());

        req.apply_response(Some(FakeKind::error("boom")), true);
        assert_eq!(req.state(), RequestState::Failed);
        assert_eq!(
            obs.responses(),
            vec![Recorded::Error(500, "server error (500): boom".into())]
        );
        assert!(req.cancellation_token().is_cancelled());
    }

    // ---- complete_early ----

    #[test]
    fn complete_early_without_data_cancels() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());

        req.complete_early().unwrap();
        assert_eq!(req.state(), RequestState::Cancelled);
        assert_eq!(
            req.snapshot().cancel_reason.as_deref(),
            Some(NO_DATA_TO_FINALIZE)
        );
        assert_eq!(obs.count(is_full), 0);
    }

    #[test]
    fn complete_early_promotes_latest_partial() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());

        req.apply_response(Some(FakeKind::partial(1)), false);
        req.apply_response(Some(FakeKind::partial(2)), false);
        req.complete_early().unwrap();

        assert_eq!(req.state(), RequestState::Completed);
        assert_eq!(obs.count(is_full), 1);
        assert_eq!(req.results().unwrap().body()["v"], 2);
    }

    #[test]
    fn complete_early_after_completion_is_rejected() {
        let req = transmitting(RecordingObserver::new());
        req.apply_response(Some(FakeKind::plain(1)), true);
        assert!(req.complete_early().is_err());
        assert_eq!(req.state(), RequestState::Completed);
    }

    // ---- cancel ----

    #[test]
    fn late_response_after_cancel_is_noop() {
        let obs = RecordingObserver::new();
        let req = transmitting(obs.clone());

        assert!(req.cancel("user aborted"));
        assert!(req.cancellation_token().is_cancelled());

        assert!(!req.apply_response(Some(FakeKind::partial(1)), false));
        assert!(!req.apply_response(Some(FakeKind::partial(1)), true));
        assert!(!req.fail(RuntimeError::Timeout));

        assert_eq!(req.state(), RequestState::Cancelled);
        assert_eq!(
            obs.responses(),
            vec![Recorded::Cancelled("user aborted".into())]
        );
    }

    #[test]
    fn cancel_is_idempotent() {
        let req = transmitting(RecordingObserver::new());
        assert!(req.cancel("first"));
        assert!(!req.cancel("second"));
        assert_eq!(req.snapshot().cancel_reason.as_deref(), Some("first"));
    }

    #[test]
    fn cancel_allowed_before_send() {
        let req = Request::new(Arc::new(FakeKind), RecordingObserver::new());
        assert!(req.cancel("never mind"));
        assert_eq!(req.state(), RequestState::Cancelled);
        assert!(req.initialize(RequestOptions::text()).is_err());
    }

    // ---- progress ----

    #[test]
    fn progress_only_while_active_and_clamped() {
        let obs = RecordingObserver::new();
        let req = Request::new(Arc::new(FakeKind), obs.clone());
        req.report_progress(Some(0.5));
        req.initialize(RequestOptions::text()).unwrap();
        req.send().unwrap();
        req.report_progress(Some(1.7));
        req.report_progress(None);

        let progress: Vec<_> = obs
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Progress(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![Some(1.0), None]);
    }

    // ---- reentrancy ----

    struct CancelOnPartial(std::sync::OnceLock<Arc<Request>>);

    impl RequestObserver for CancelOnPartial {
        fn on_partial_response(&self, _payload: &ResponsePayload) {
            if let Some(req) = self.0.get() {
                req.cancel("observer stop");
            }
        }
    }

    #[test]
    fn observer_may_call_back_into_request() {
        let observer = Arc::new(CancelOnPartial(std::sync::OnceLock::new()));
        let req = Arc::new(Request::new(Arc::new(FakeKind), observer.clone()));
        let _ = observer.0.set(Arc::clone(&req));

        req.initialize(RequestOptions::text()).unwrap();
        req.send().unwrap();
        req.apply_response(Some(FakeKind::partial(1)), false);

        assert_eq!(req.state(), RequestState::Cancelled);
    }

    /// Records like `RecordingObserver`, and cancels once the request
    /// enters `PartialReceived`.
    struct CancelOnFirstPartialState {
        request: std::sync::OnceLock<Arc<Request>>,
        log: Arc<RecordingObserver>,
    }

    impl RequestObserver for CancelOnFirstPartialState {
        fn on_state_changed(&self, from: RequestState, to: RequestState) {
            self.log.on_state_changed(from, to);
            if to == RequestState::PartialReceived {
                if let Some(req) = self.request.get() {
                    req.cancel("stopped on state change");
                }
            }
        }

        fn on_partial_response(&self, payload: &ResponsePayload) {
            self.log.on_partial_response(payload);
        }

        fn on_cancelled(&self, reason: &str) {
            self.log.on_cancelled(reason);
        }
    }

    #[test]
    fn cancel_during_dispatch_silences_rest_of_batch() {
        let log = RecordingObserver::new();
        let observer = Arc::new(CancelOnFirstPartialState {
            request: std::sync::OnceLock::new(),
            log: log.clone(),
        });
        let req = Arc::new(Request::new(Arc::new(FakeKind), observer.clone()));
        let _ = observer.request.set(Arc::clone(&req));

        req.initialize(RequestOptions::text()).unwrap();
        req.send().unwrap();
        assert!(req.apply_response(Some(FakeKind::partial(1)), false));

        assert_eq!(req.state(), RequestState::Cancelled);
        assert_eq!(
            log.responses(),
            vec![Recorded::Cancelled("stopped on state change".into())]
        );
        assert_eq!(log.count(is_partial), 0);
    }

    #[test]
    fn request_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Request>();
    }
}
