//! Natural-language understanding service.
//!
//! Text requests go out as one JSON body.  Audio requests are two-step:
//! [`NlpService::activate_audio`] prepares the request while the caller
//! starts capturing, then [`NlpService::send_audio`] streams the captured
//! chunks as the request body.  Either way the service answers with a
//! stream of JSON documents: partial transcriptions first, the final
//! understanding last.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::audio::AudioEncoding;
use crate::config::{AudioConfig, RuntimeConfig, ServiceConfig};
use crate::error::RuntimeError;
use crate::request::{
    validate_text, InputType, NlpResponseKind, Request, RequestObserver, RequestOptions,
};
use crate::transport::{query_body, ResponseFormat, Transport, TransportRequest};

use super::applier::{DiscardChunks, ResponseApplier};
use super::RequestHandle;

/// `Content-Type` of an audio upload in the given format.
pub fn upload_content_type(audio: &AudioConfig) -> String {
    match audio.encoding {
        AudioEncoding::Pcm => format!(
            "audio/raw;encoding=signed-integer;bits={};rate={};channels={};endian=little",
            audio.pcm_bit_depth, audio.sample_rate, audio.channels
        ),
        other => other.mime_type().to_string(),
    }
}

/// Sends understanding requests through a [`Transport`].
pub struct NlpService {
    transport: Arc<dyn Transport>,
    service: ServiceConfig,
    audio: AudioConfig,
}

impl NlpService {
    pub fn new(config: &RuntimeConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            service: config.service.clone(),
            audio: config.audio.clone(),
        }
    }

    /// Understand `text`.  `options.parameters` are merged into the body.
    pub fn send_text(
        &self,
        text: &str,
        options: RequestOptions,
        observer: Arc<dyn RequestObserver>,
    ) -> Result<RequestHandle, RuntimeError> {
        validate_text(text)?;

        let request = Arc::new(Request::new(Arc::new(NlpResponseKind), observer));
        request.initialize(RequestOptions {
            input_type: InputType::Text,
            ..options
        })?;

        let exchange = TransportRequest::json(
            self.service.nlp_path.clone(),
            query_body(text, &request.options().parameters),
            ResponseFormat::Json,
            request.correlation_id(),
        );
        request.send()?;
        log::info!(
            target: "nlp",
            "[{}] understanding {} characters",
            exchange.correlation_id,
            text.chars().count()
        );

        Ok(self.spawn(request, exchange))
    }

    /// Create an audio request and move it to `Activating`.
    pub fn activate_audio(
        &self,
        options: RequestOptions,
        observer: Arc<dyn RequestObserver>,
    ) -> Result<Arc<Request>, RuntimeError> {
        let request = Arc::new(Request::new(Arc::new(NlpResponseKind), observer));
        request.initialize(RequestOptions {
            input_type: InputType::Audio,
            ..options
        })?;
        request.activate_audio()?;
        log::debug!(target: "nlp", "[{}] audio activated", request.correlation_id());
        Ok(request)
    }

    /// Stream `chunks` as the body of an activated audio request.  The
    /// upload ends when the sender side is dropped.
    pub fn send_audio(
        &self,
        request: &Arc<Request>,
        chunks: mpsc::Receiver<Bytes>,
    ) -> Result<RequestHandle, RuntimeError> {
        if request.input_type() != InputType::Audio {
            return Err(RuntimeError::InvalidInput(
                "send_audio needs an audio request".into(),
            ));
        }
        request.send()?;

        let exchange = TransportRequest::audio_upload(
            self.service.nlp_path.clone(),
            upload_content_type(&self.audio),
            chunks,
            request.correlation_id(),
        )
        .with_query(request.options().parameters);
        log::info!(target: "nlp", "[{}] streaming audio", exchange.correlation_id);

        Ok(self.spawn(Arc::clone(request), exchange))
    }

    fn spawn(&self, request: Arc<Request>, exchange: TransportRequest) -> RequestHandle {
        let transport = Arc::clone(&self.transport);
        let timeout = self.service.timeout();
        let task = {
            let request = Arc::clone(&request);
            tokio::spawn(async move {
                let cid = exchange.correlation_id.clone();
                let outcome = ResponseApplier::new(request, timeout)
                    .run(transport, exchange, &mut DiscardChunks)
                    .await;
                match &outcome {
                    Ok(()) => log::debug!(target: "nlp", "[{cid}] done"),
                    Err(e) => log::debug!(target: "nlp", "[{cid}] ended: {e}"),
                }
                outcome
            })
        };
        RequestHandle::new(request, task)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
