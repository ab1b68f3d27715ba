//! Splits a streamed body of concatenated JSON documents.
//!
//! Streaming understanding endpoints send one JSON object per update,
//! separated by whitespace or newlines, with no framing that lines up with
//! network chunks.  [`JsonStreamSplitter`] buffers bytes and yields each
//! document as soon as it is complete.  A malformed document is reported
//! and skipped up to the next newline so later updates still get through.

use serde_json::Value;

use crate::error::RuntimeError;

#[derive(Debug, Default)]
pub struct JsonStreamSplitter {
    buf: Vec<u8>,
}

impl JsonStreamSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk`; return every document completed by it, in order.
    /// Malformed documents appear as `Err(DecodeFailure)`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Value, RuntimeError>> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut consumed = 0;

        loop {
            let rest = &self.buf[consumed..];
            let mut docs = serde_json::Deserializer::from_slice(rest).into_iter::<Value>();
            match docs.next() {
                Some(Ok(value)) => {
                    consumed += docs.byte_offset();
                    out.push(Ok(value));
                }
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(e)) => {
                    let start = rest
                        .iter()
                        .position(|b| !b.is_ascii_whitespace())
                        .unwrap_or(rest.len());
                    let skip = rest[start..]
                        .iter()
                        .position(|&b| b == b'\n')
                        .map(|p| start + p + 1)
                        .unwrap_or(rest.len());
                    consumed += skip;
                    out.push(Err(RuntimeError::DecodeFailure(e.to_string())));
                }
                None => {
                    consumed = self.buf.len();
                    break;
                }
            }
        }

        self.buf.drain(..consumed);
        out
    }

    /// Check the end of the body: leftover non-whitespace is a truncated
    /// document.
    pub fn finish(&mut self) -> Result<(), RuntimeError> {
        let leftover = std::mem::take(&mut self.buf);
        if leftover.iter().all(u8::is_ascii_whitespace) {
            Ok(())
        } else {
            Err(RuntimeError::DecodeFailure(format!(
                "truncated JSON document ({} bytes)",
                leftover.len()
            )))
        }
    }
}
