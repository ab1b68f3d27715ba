//! Request lifecycle core.
//!
//! * [`Request`]: the state machine shared by text, audio and NLP requests.
//! * [`RequestState`] / [`InputType`]: lifecycle states and input kinds.
//! * [`ResponsePayload`] / [`ResponseKind`]: decoded responses and the
//!   capability interface used to interpret them.
//! * [`RequestObserver`]: outbound callbacks.
//! * [`validate_text`]: synchronous input validation.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use speech_runtime::request::{
//!     NlpResponseKind, NoopObserver, Request, RequestOptions, RequestState, ResponsePayload,
//! };
//!
//! let request = Request::new(Arc::new(NlpResponseKind), NoopObserver::shared());
//! request.initialize(RequestOptions::text()).unwrap();
//! request.send().unwrap();
//!
//! let partial = ResponsePayload::new(json!({"text": "turn on", "is_final": false}));
//! request.apply_response(Some(partial), false);
//! assert_eq!(request.state(), RequestState::PartialReceived);
//!
//! let last = ResponsePayload::new(json!({"text": "turn on the lights", "is_final": true}));
//! request.apply_response(Some(last), true);
//! assert_eq!(request.state(), RequestState::Completed);
//! ```

pub mod observer;
pub mod payload;
#[allow(clippy::module_inception)]
pub mod request;
pub mod state;
pub mod validation;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use observer::{NoopObserver, RequestObserver};
pub use payload::{AudioResponseKind, NlpResponseKind, ResponseKind, ResponsePayload};
pub use request::{Request, RequestOptions, RequestSnapshot, NO_DATA_TO_FINALIZE};
pub use state::{InputType, RequestState};
pub use validation::{validate_text, MAX_TEXT_LENGTH};
