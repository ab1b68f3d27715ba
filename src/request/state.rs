//! Request lifecycle states and the transition graph between them.
//!
//! ```text
//! Created ──initialize──▶ Initialized
//!   Initialized ──activate_audio──▶ Activating ──send──▶ Transmitting   (audio input)
//!   Initialized ──send──────────────────────────────────▶ Transmitting   (text input)
//! Transmitting ──changed partial──▶ PartialReceived
//! Transmitting / PartialReceived ──final──▶ Finalizing ──▶ Completed
//! any non-terminal ──cancel──▶ Cancelled
//! any non-terminal ──error───▶ Failed
//! ```
//!
//! `Completed`, `Cancelled` and `Failed` are terminal: once reached, every
//! further operation is an idempotent no-op.

use std::fmt;

// ---------------------------------------------------------------------------
// InputType
// ---------------------------------------------------------------------------

/// What the caller sends to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputType {
    /// A text query (NLP understanding or speech synthesis).
    #[default]
    Text,
    /// A streamed microphone upload that must be activated before sending.
    Audio,
}

// ---------------------------------------------------------------------------
// RequestState
// ---------------------------------------------------------------------------

/// States of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    /// Constructed, no options applied yet.
    #[default]
    Created,
    /// Options and input type are set; nothing has been sent.
    Initialized,
    /// Audio input is being activated (microphone / upload stream opening).
    Activating,
    /// The request is on the wire; no changed response has arrived yet.
    Transmitting,
    /// At least one changed partial response has been applied.
    PartialReceived,
    /// The final response is being applied.  Entered at most once.
    Finalizing,
    /// The final response was applied successfully.
    Completed,
    /// The caller cancelled the request.
    Cancelled,
    /// The request failed (transport, server or decode error).
    Failed,
}

impl RequestState {
    /// Returns `true` for `Completed`, `Cancelled` and `Failed`.
    ///
    /// ```
    /// use speech_runtime::request::RequestState;
    ///
    /// assert!(RequestState::Completed.is_terminal());
    /// assert!(RequestState::Cancelled.is_terminal());
    /// assert!(RequestState::Failed.is_terminal());
    /// assert!(!RequestState::Transmitting.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Cancelled | RequestState::Failed
        )
    }

    /// Returns `true` while responses may still be applied to the request.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RequestState::Activating
                | RequestState::Transmitting
                | RequestState::PartialReceived
                | RequestState::Finalizing
        )
    }

    /// Whether the graph has an edge from `self` to `next`.
    ///
    /// Staying in the same non-terminal state is allowed (a repeated partial
    /// keeps `PartialReceived`).
    pub fn can_transition_to(&self, next: RequestState) -> bool {
        use RequestState::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Cancelled | Failed) {
            return true;
        }
        match (self, next) {
            (Created, Initialized) => true,
            (Initialized, Activating) | (Initialized, Transmitting) => true,
            (Activating, Transmitting) => true,
            (Activating, PartialReceived) | (Transmitting, PartialReceived) => true,
            (PartialReceived, PartialReceived) => true,
            (Activating, Finalizing) | (Transmitting, Finalizing) | (PartialReceived, Finalizing) => {
                true
            }
            (Finalizing, Completed) => true,
            _ => false,
        }
    }

    /// A short human-readable label used in logs and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            RequestState::Created => "Created",
            RequestState::Initialized => "Initialized",
            RequestState::Activating => "Activating",
            RequestState::Transmitting => "Transmitting",
            RequestState::PartialReceived => "PartialReceived",
            RequestState::Finalizing => "Finalizing",
            RequestState::Completed => "Completed",
            RequestState::Cancelled => "Cancelled",
            RequestState::Failed => "Failed",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
