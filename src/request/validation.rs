//! Synchronous input validation, performed before any network call.

use crate::error::RuntimeError;

/// Longest text (in characters) the service accepts for one request.
pub const MAX_TEXT_LENGTH: usize = 140;

/// Check that `text` can be sent: non-empty and at most
/// [`MAX_TEXT_LENGTH`] characters.
///
/// ```
/// use speech_runtime::request::validate_text;
///
/// assert!(validate_text("hello world").is_ok());
/// assert!(validate_text("").is_err());
/// ```
pub fn validate_text(text: &str) -> Result<(), RuntimeError> {
    if text.is_empty() {
        return Err(RuntimeError::InvalidInput("no text provided".into()));
    }
    let len = text.chars().count();
    if len > MAX_TEXT_LENGTH {
        return Err(RuntimeError::InvalidInput(format!(
            "text is too long: {len} characters (maximum {MAX_TEXT_LENGTH})"
        )));
    }
    Ok(())
}
