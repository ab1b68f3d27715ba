//! Request orchestration on top of the transport and the audio pipeline.
//!
//! * [`TtsService`]: synthesis to a playable [`AudioClipStream`] or to a
//!   file on disk.
//! * [`NlpService`]: understanding requests from text or streamed audio.
//! * [`ResponseApplier`]: turns transport events into request transitions.
//!
//! Every operation validates its input synchronously, then runs the
//! exchange on a spawned tokio task and returns a handle at once.  Results
//! reach the caller through the request observer and, for synthesis,
//! [`TtsEvents`].  Must be called from within a tokio runtime.
//!
//! [`AudioClipStream`]: crate::audio::AudioClipStream

pub mod applier;
pub mod download;
pub mod nlp;
pub mod tts;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::RuntimeError;
use crate::request::{Request, RequestState};

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use applier::{ChunkSink, DiscardChunks, ResponseApplier};
pub use download::{temp_path, FileSink};
pub use nlp::NlpService;
pub use tts::{NoTtsEvents, TtsEvents, TtsHandle, TtsService};

// ---------------------------------------------------------------------------
// RequestHandle
// ---------------------------------------------------------------------------

/// A running request and the task driving it.
pub struct RequestHandle {
    request: Arc<Request>,
    task: JoinHandle<Result<(), RuntimeError>>,
}

impl RequestHandle {
    pub(crate) fn new(request: Arc<Request>, task: JoinHandle<Result<(), RuntimeError>>) -> Self {
        Self { request, task }
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn state(&self) -> RequestState {
        self.request.state()
    }

    /// Cancel the request; in-flight I/O is aborted.
    pub fn cancel(&self, reason: &str) -> bool {
        self.request.cancel(reason)
    }

    /// Wait for the exchange to end.  `Ok` means the request completed.
    pub async fn wait(self) -> Result<(), RuntimeError> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = RuntimeError::Cancelled(format!("request task ended: {e}"));
                self.request.fail(error.clone());
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("request", &self.request)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}
