//! Download-to-disk for synthesized audio.
//!
//! Bytes go to `<path>.tmp` as they arrive.  On success the temp file is
//! flushed and renamed over the final path; on any failure it is removed.
//! A reader of `path` never sees a partial clip.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use super::applier::ChunkSink;
use crate::error::RuntimeError;
use crate::request::{ResponseKind, ResponsePayload};

/// `<path>.tmp`, keeping the original extension: `clip.mp3` → `clip.mp3.tmp`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

// ---------------------------------------------------------------------------
// DownloadResponseKind
// ---------------------------------------------------------------------------

/// Download summaries: `{"bytes": n, "path": "..."}`.  Service errors arrive
/// as HTTP statuses, never inside the body.
#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadResponseKind;

impl DownloadResponseKind {
    pub fn summary(bytes: u64, path: &Path) -> ResponsePayload {
        ResponsePayload::new(json!({
            "bytes": bytes,
            "path": path.display().to_string(),
        }))
    }
}

impl ResponseKind for DownloadResponseKind {
    fn name(&self) -> &'static str {
        "download"
    }

    fn decode_error(&self, _payload: &ResponsePayload) -> Option<RuntimeError> {
        None
    }

    fn has_partial(&self, _payload: &ResponsePayload) -> bool {
        false
    }

    fn same_response(&self, previous: &ResponsePayload, next: &ResponsePayload) -> bool {
        previous.body().get("bytes").and_then(Value::as_u64)
            == next.body().get("bytes").and_then(Value::as_u64)
    }
}

// ---------------------------------------------------------------------------
// FileSink
// ---------------------------------------------------------------------------

/// Writes response bytes to a temp file and commits it on `finish`.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    temp: PathBuf,
    file: Option<BufWriter<File>>,
    bytes: u64,
    committed: bool,
}

impl FileSink {
    /// Create the temp file (and missing parent directories).
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, RuntimeError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let temp = temp_path(&path);
        let file = File::create(&temp)?;
        Ok(Self {
            path,
            temp,
            file: Some(BufWriter::new(file)),
            bytes: 0,
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn temp(&self) -> &Path {
        &self.temp
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Drop the temp file.  No-op after a successful commit.
    pub fn discard(&mut self) {
        if self.committed {
            return;
        }
        self.file = None;
        match std::fs::remove_file(&self.temp) {
            Ok(()) => log::debug!(target: "tts", "removed {}", self.temp.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                target: "tts",
                "could not remove {}: {e}",
                self.temp.display()
            ),
        }
    }

    fn commit(&mut self) -> Result<(), RuntimeError> {
        let Some(writer) = self.file.take() else {
            return Err(RuntimeError::Io("download already closed".into()));
        };
        let file = writer
            .into_inner()
            .map_err(|e| RuntimeError::Io(e.error().to_string()))?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&self.temp, &self.path).map_err(|e| {
            RuntimeError::Io(format!(
                "cannot move {} to {}: {e}",
                self.temp.display(),
                self.path.display()
            ))
        })?;
        self.committed = true;
        Ok(())
    }
}

impl ChunkSink for FileSink {
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<Option<ResponsePayload>, RuntimeError> {
        let Some(file) = self.file.as_mut() else {
            return Err(RuntimeError::Io("download already closed".into()));
        };
        file.write_all(chunk)?;
        self.bytes += chunk.len() as u64;
        Ok(None)
    }

    fn finish(&mut self) -> Result<Option<ResponsePayload>, RuntimeError> {
        if self.bytes == 0 {
            return Err(RuntimeError::DecodeFailure("response contained no audio".into()));
        }
        self.commit()?;
        log::info!(
            target: "tts",
            "saved {} bytes to {}",
            self.bytes,
            self.path.display()
        );
        Ok(Some(DownloadResponseKind::summary(self.bytes, &self.path)))
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        self.discard();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
