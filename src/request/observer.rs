//! Outbound callbacks for a request.
//!
//! Every method has a no-op default so observers implement only what they
//! need.  Callbacks are delivered after the request's internal lock has been
//! released, on whichever thread applied the transition.

use std::sync::Arc;

use super::payload::ResponsePayload;
use super::state::RequestState;

/// Receives lifecycle notifications for one request.
pub trait RequestObserver: Send + Sync {
    fn on_state_changed(&self, _from: RequestState, _to: RequestState) {}

    fn on_partial_response(&self, _payload: &ResponsePayload) {}

    fn on_full_response(&self, _payload: &ResponsePayload) {}

    fn on_error(&self, _code: i32, _message: &str) {}

    /// `None` means indeterminate progress.
    fn on_progress(&self, _fraction: Option<f32>) {}

    fn on_cancelled(&self, _reason: &str) {}

    fn on_completed(&self) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RequestObserver for NoopObserver {}

impl NoopObserver {
    pub fn shared() -> Arc<dyn RequestObserver> {
        Arc::new(NoopObserver)
    }
}

// ---------------------------------------------------------------------------
// RecordingObserver  (test-only)
// ---------------------------------------------------------------------------

/// What a [`RecordingObserver`] saw, in delivery order.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    State(RequestState, RequestState),
    Partial(serde_json::Value),
    Full(serde_json::Value),
    Error(i32, String),
    Progress(Option<f32>),
    Cancelled(String),
    Completed,
}

/// Test double that records every callback.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<Recorded>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    /// Events without state changes or progress; easier to assert on.
    pub fn responses(&self) -> Vec<Recorded> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, Recorded::State(..) | Recorded::Progress(_)))
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Recorded) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    fn push(&self, e: Recorded) {
        self.events.lock().unwrap().push(e);
    }
}

#[cfg(test)]
impl RequestObserver for RecordingObserver {
    fn on_state_changed(&self, from: RequestState, to: RequestState) {
        self.push(Recorded::State(from, to));
    }

    fn on_partial_response(&self, payload: &ResponsePayload) {
        self.push(Recorded::Partial(payload.body().clone()));
    }

    fn on_full_response(&self, payload: &ResponsePayload) {
        self.push(Recorded::Full(payload.body().clone()));
    }

    fn on_error(&self, code: i32, message: &str) {
        self.push(Recorded::Error(code, message.to_string()));
    }

    fn on_progress(&self, fraction: Option<f32>) {
        self.push(Recorded::Progress(fraction));
    }

    fn on_cancelled(&self, reason: &str) {
        self.push(Recorded::Cancelled(reason.to_string()));
    }

    fn on_completed(&self) {
        self.push(Recorded::Completed);
    }
}
