//! Text-to-speech service.
//!
//! ```text
//! speak("hello world")
//!   └─▶ validate_text            (sync, no network on failure)
//!   └─▶ Request(AudioResponseKind) Initialized → Transmitting
//!   └─▶ spawn: transport chunks ─▶ AudioDecoder ─▶ AudioClipStream
//!                 ├─ partial per decoded chunk (clip summary)
//!                 ├─ on_clip_ready(stream, None) once buffered ≥ ready_secs
//!                 └─ success: set_complete, full response, Completed
//! ```
//!
//! `download` streams the encoded bytes to disk instead of decoding them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::{decoder_for, AudioClipStream, AudioDecoder, ClipStreamPool};
use crate::config::{AudioConfig, RuntimeConfig, ServiceConfig, TtsConfig};
use crate::error::RuntimeError;
use crate::request::{
    validate_text, AudioResponseKind, Request, RequestObserver, RequestOptions, ResponsePayload,
};
use crate::transport::{query_body, ResponseFormat, Transport, TransportRequest};

use super::applier::{ChunkSink, ResponseApplier};
use super::download::{DownloadResponseKind, FileSink};
use super::RequestHandle;

// ---------------------------------------------------------------------------
// TtsEvents
// ---------------------------------------------------------------------------

/// Synthesis-specific callbacks.  Both default to no-ops.
pub trait TtsEvents: Send + Sync {
    /// Fired once per `speak`: with no error when the clip is ready to play,
    /// or with the error that prevented it from ever becoming ready.
    fn on_clip_ready(&self, _stream: &Arc<AudioClipStream>, _error: Option<&RuntimeError>) {}

    /// Fired once per `download` after the file was committed or discarded.
    fn on_download_complete(&self, _path: &Path, _error: Option<&str>) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoTtsEvents;

impl TtsEvents for NoTtsEvents {}

/// Makes sure `on_clip_ready` fires at most once.
struct ClipReport {
    sent: AtomicBool,
    events: Arc<dyn TtsEvents>,
}

impl ClipReport {
    fn send(&self, stream: &Arc<AudioClipStream>, error: Option<&RuntimeError>) {
        if !self.sent.swap(true, Ordering::AcqRel) {
            self.events.on_clip_ready(stream, error);
        }
    }
}

// ---------------------------------------------------------------------------
// ClipSink
// ---------------------------------------------------------------------------

/// Decodes response chunks into a clip stream.
struct ClipSink {
    decoder: Box<dyn AudioDecoder>,
    stream: Arc<AudioClipStream>,
}

impl ClipSink {
    fn summary(&self) -> ResponsePayload {
        AudioResponseKind::summary(
            self.stream.total_samples() as usize,
            self.stream.sample_rate(),
            self.stream.channels(),
        )
    }
}

impl ChunkSink for ClipSink {
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<Option<ResponsePayload>, RuntimeError> {
        let samples = self.decoder.decode(chunk);
        if samples.is_empty() {
            return Ok(None);
        }
        self.stream.add_samples(&samples);
        Ok(Some(self.summary()))
    }

    fn finish(&mut self) -> Result<Option<ResponsePayload>, RuntimeError> {
        if self.stream.total_samples() == 0 {
            return Err(RuntimeError::DecodeFailure(format!(
                "no playable {:?} audio in response",
                self.decoder.encoding()
            )));
        }
        self.stream.set_complete();
        Ok(Some(self.summary()))
    }
}

// ---------------------------------------------------------------------------
// TtsHandle
// ---------------------------------------------------------------------------

/// A running synthesis: the request plus the stream it fills.
#[derive(Debug)]
pub struct TtsHandle {
    handle: RequestHandle,
    stream: Arc<AudioClipStream>,
}

impl TtsHandle {
    pub fn request(&self) -> &Arc<Request> {
        self.handle.request()
    }

    pub fn stream(&self) -> &Arc<AudioClipStream> {
        &self.stream
    }

    pub fn cancel(&self, reason: &str) -> bool {
        self.handle.cancel(reason)
    }

    /// Wait for the exchange to end.  The stream stays usable afterwards.
    pub async fn wait(self) -> Result<Arc<AudioClipStream>, RuntimeError> {
        self.handle.wait().await.map(|()| self.stream)
    }
}

// ---------------------------------------------------------------------------
// TtsService
// ---------------------------------------------------------------------------

/// Synthesizes speech through a [`Transport`].
pub struct TtsService {
    transport: Arc<dyn Transport>,
    service: ServiceConfig,
    audio: AudioConfig,
    tts: TtsConfig,
    pool: ClipStreamPool,
    events: Arc<dyn TtsEvents>,
}

impl TtsService {
    pub fn new(config: &RuntimeConfig, transport: Arc<dyn Transport>) -> Self {
        let pool = ClipStreamPool::for_config(&config.audio.clip_stream(), config.audio.pool_size);
        Self {
            transport,
            service: config.service.clone(),
            audio: config.audio.clone(),
            tts: config.tts.clone(),
            pool,
            events: Arc::new(NoTtsEvents),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn TtsEvents>) -> Self {
        self.events = events;
        self
    }

    pub fn pool(&self) -> &ClipStreamPool {
        &self.pool
    }

    /// Synthesize `text` with the configured voice.
    pub fn speak(
        &self,
        text: &str,
        observer: Arc<dyn RequestObserver>,
    ) -> Result<TtsHandle, RuntimeError> {
        self.speak_with(text, RequestOptions::text(), observer)
    }

    /// Synthesize `text`; parameters in `options` override the configured
    /// voice settings.
    pub fn speak_with(
        &self,
        text: &str,
        options: RequestOptions,
        observer: Arc<dyn RequestObserver>,
    ) -> Result<TtsHandle, RuntimeError> {
        validate_text(text)?;

        let request = Arc::new(Request::new(Arc::new(AudioResponseKind), observer));
        let exchange = self.prepare(&request, text, options)?;

        let stream = Arc::new(self.pool.stream(self.audio.clip_stream()));
        let report = Arc::new(ClipReport {
            sent: AtomicBool::new(false),
            events: Arc::clone(&self.events),
        });
        {
            let weak = Arc::downgrade(&stream);
            let report = Arc::clone(&report);
            stream.on_ready(move || {
                if let Some(stream) = weak.upgrade() {
                    report.send(&stream, None);
                }
            });
        }

        let decoder = decoder_for(self.audio.encoding, self.audio.pcm_bit_depth);
        decoder.setup(self.audio.channels, self.audio.sample_rate);

        request.send()?;
        log::info!(
            target: "tts",
            "[{}] synthesizing {} characters as {:?}",
            exchange.correlation_id,
            text.chars().count(),
            self.audio.encoding
        );

        let task = {
            let request = Arc::clone(&request);
            let stream = Arc::clone(&stream);
            let transport = Arc::clone(&self.transport);
            let timeout = self.service.timeout();
            tokio::spawn(async move {
                let mut sink = ClipSink {
                    decoder,
                    stream: Arc::clone(&stream),
                };
                let outcome = ResponseApplier::new(request, timeout)
                    .run(transport, exchange, &mut sink)
                    .await;
                if let Err(e) = &outcome {
                    report.send(&stream, Some(e));
                }
                stream.set_complete();
                outcome
            })
        };

        Ok(TtsHandle {
            handle: RequestHandle::new(request, task),
            stream,
        })
    }

    /// Synthesize `text` straight to `path`.  The file appears only once the
    /// whole clip has arrived.
    pub fn download(
        &self,
        text: &str,
        path: impl Into<PathBuf>,
        observer: Arc<dyn RequestObserver>,
    ) -> Result<RequestHandle, RuntimeError> {
        validate_text(text)?;
        let path = path.into();

        let request = Arc::new(Request::new(Arc::new(DownloadResponseKind), observer));
        let exchange = self.prepare(&request, text, RequestOptions::text())?;
        request.send()?;
        log::info!(
            target: "tts",
            "[{}] downloading to {}",
            exchange.correlation_id,
            path.display()
        );

        let task = {
            let request = Arc::clone(&request);
            let transport = Arc::clone(&self.transport);
            let events = Arc::clone(&self.events);
            let timeout = self.service.timeout();
            tokio::spawn(async move {
                let outcome = match FileSink::create(&path) {
                    Ok(mut sink) => {
                        ResponseApplier::new(Arc::clone(&request), timeout)
                            .run(transport, exchange, &mut sink)
                            .await
                    }
                    Err(e) => {
                        request.fail(e.clone());
                        Err(e)
                    }
                };
                if let Err(e) = &outcome {
                    log::warn!(target: "tts", "download to {} failed: {e}", path.display());
                }
                let message = outcome.as_ref().err().map(ToString::to_string);
                events.on_download_complete(&path, message.as_deref());
                outcome
            })
        };

        Ok(RequestHandle::new(request, task))
    }

    /// Initialize `request` and build its exchange.
    fn prepare(
        &self,
        request: &Request,
        text: &str,
        options: RequestOptions,
    ) -> Result<TransportRequest, RuntimeError> {
        let mut merged = options;
        for (key, value) in self.tts.parameters() {
            merged.parameters.entry(key).or_insert(value);
        }
        request.initialize(merged)?;

        let body = query_body(text, &request.options().parameters);
        Ok(TransportRequest::json(
            self.service.tts_path.clone(),
            body,
            ResponseFormat::Audio(self.audio.encoding),
            request.correlation_id(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
