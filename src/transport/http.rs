//! `reqwest`-backed [`Transport`].
//!
//! Every request is a `POST {base_url}/{endpoint}?v={api_version}` with a
//! bearer token, an `Accept` header matching the expected response format
//! and a descriptive `User-Agent`.  The response body is streamed: audio is
//! forwarded chunk by chunk, JSON is split into documents as they complete.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::json_stream::JsonStreamSplitter;
use super::user_agent::ClientInfo;
use super::{emit, RequestBody, ResponseFormat, Transport, TransportEvent, TransportRequest};
use crate::config::{RuntimeConfig, ServiceConfig};
use crate::error::RuntimeError;
use crate::request::ResponsePayload;

/// Longest server error body quoted in an error message.
const MAX_ERROR_BODY: usize = 200;

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// Talks to the configured speech service over HTTP(S).
///
/// The client only carries a connect timeout.  The silent-transport timeout
/// is enforced by whoever consumes the events, so long streamed bodies are
/// never cut off while data keeps arriving.
pub struct HttpTransport {
    client: reqwest::Client,
    service: ServiceConfig,
    user_agent: String,
}

impl HttpTransport {
    /// Build an `HttpTransport` from runtime config.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(config.service.timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            service: config.service.clone(),
            user_agent: ClientInfo::from_config(&config.client, &config.service).user_agent(),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// `{base_url}/{endpoint}` with exactly one slash between the two.
    fn url(&self, endpoint: &str) -> Result<String, RuntimeError> {
        let base = self.service.base_url.trim().trim_end_matches('/');
        let endpoint = endpoint.trim().trim_start_matches('/');
        if base.is_empty() || endpoint.is_empty() {
            return Err(RuntimeError::NoConfiguration);
        }
        Ok(format!("{base}/{endpoint}"))
    }

    fn token(&self) -> Result<&str, RuntimeError> {
        match self.service.access_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(RuntimeError::NoCredential),
        }
    }

    fn query(&self, extra: Vec<(String, String)>) -> Vec<(String, String)> {
        let mut query = vec![("v".to_string(), self.service.api_version.clone())];
        query.extend(extra.into_iter().filter(|(k, _)| k != "v"));
        query
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        request: TransportRequest,
        events: mpsc::Sender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<(), RuntimeError> {
        let url = self.url(&request.endpoint)?;
        let token = self.token()?;
        let cid = request.correlation_id;
        let format = request.format;

        let mut builder = self
            .client
            .post(&url)
            .query(&self.query(request.query))
            .bearer_auth(token)
            .header(ACCEPT, format.accept())
            .header(USER_AGENT, &self.user_agent);

        builder = match request.body {
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::AudioStream {
                content_type,
                chunks,
            } => {
                // Weak, so a body still held by the connection never keeps
                // the event channel open.
                let activity = events.downgrade();
                let upload = futures_util::stream::unfold(
                    (chunks, activity),
                    |(mut rx, activity)| async move {
                        let chunk = rx.recv().await?;
                        if let Some(events) = activity.upgrade() {
                            let _ = events.try_send(TransportEvent::Uploaded(chunk.len()));
                        }
                        Some((Ok::<_, std::io::Error>(chunk), (rx, activity)))
                    },
                );
                builder
                    .header(CONTENT_TYPE, content_type)
                    .body(reqwest::Body::wrap_stream(upload))
            }
        };

        log::debug!(target: "transport", "[{cid}] POST {url} (accept {})", format.accept());

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RuntimeError::Cancelled("cancelled before response".into()));
            }
            response = builder.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = server_error(status.as_u16(), &body);
            log::warn!(target: "transport", "[{cid}] {error}");
            return Err(error);
        }

        let total = response.content_length().filter(|n| *n > 0);
        emit(&events, TransportEvent::Progress(progress(0, total))).await?;

        let mut body = response.bytes_stream();
        let mut splitter = JsonStreamSplitter::new();
        let mut received: u64 = 0;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!(target: "transport", "[{cid}] aborted after {received} bytes");
                    return Err(RuntimeError::Cancelled("cancelled while receiving".into()));
                }
                next = body.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            received += chunk.len() as u64;
            emit(&events, TransportEvent::Progress(progress(received, total))).await?;

            match format {
                ResponseFormat::Audio(_) => emit(&events, TransportEvent::Chunk(chunk)).await?,
                ResponseFormat::Json => {
                    for doc in splitter.push(&chunk) {
                        let payload = match doc {
                            Ok(value) => Some(ResponsePayload::new(value)),
                            Err(e) => {
                                log::warn!(target: "transport", "[{cid}] {e}");
                                None
                            }
                        };
                        emit(&events, TransportEvent::Response(payload)).await?;
                    }
                }
            }
        }

        if format == ResponseFormat::Json {
            if let Err(e) = splitter.finish() {
                log::warn!(target: "transport", "[{cid}] {e}");
                emit(&events, TransportEvent::Response(None)).await?;
            }
        }

        log::debug!(target: "transport", "[{cid}] received {received} bytes");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn progress(received: u64, total: Option<u64>) -> Option<f32> {
    total.map(|t| (received as f64 / t as f64).min(1.0) as f32)
}

/// Turn a non-success response into `ServerError`, preferring the service's
/// own `error` message over the raw body.
fn server_error(status: u16, body: &str) -> RuntimeError {
    let from_json = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| match v.get("error") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Object(o)) => o.get("message").and_then(Value::as_str).map(String::from),
            _ => None,
        });

    let message = match from_json {
        Some(m) => m,
        None => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                reqwest::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                trimmed.chars().take(MAX_ERROR_BODY).collect()
            }
        }
    };

    RuntimeError::ServerError { status, message }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_config(base_url: &str, token: Option<&str>) -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.service.base_url = base_url.into();
        config.service.access_token = token.map(String::from);
        config
    }

    fn request() -> TransportRequest {
        TransportRequest::json("message", json!({"q": "hi"}), ResponseFormat::Json, "t")
    }

    #[test]
    fn url_joins_with_single_slash() {
        let t = HttpTransport::from_config(&make_config("https://api.example.com/", Some("k")));
        assert_eq!(
            t.url("/synthesize").unwrap(),
            "https://api.example.com/synthesize"
        );
        assert_eq!(t.url("message").unwrap(), "https://api.example.com/message");
    }

    #[test]
    fn query_starts_with_version() {
        let t = HttpTransport::from_config(&make_config("https://x", Some("k")));
        let q = t.query(vec![("v".into(), "bogus".into()), ("lang".into(), "en".into())]);
        assert_eq!(
            q,
            vec![
                ("v".to_string(), "20240601".to_string()),
                ("lang".to_string(), "en".to_string())
            ]
        );
    }

    #[test]
    fn user_agent_is_built_from_config() {
        let t = HttpTransport::from_config(&make_config("https://x", Some("k")));
        assert!(t.user_agent().starts_with("speech-runtime/"));
        assert!(t.user_agent().contains("; default;"));
    }

    #[tokio::test]
    async fn missing_base_url_is_no_configuration() {
        let t = HttpTransport::from_config(&make_config("", Some("k")));
        let (tx, _rx) = mpsc::channel(1);
        let outcome = t.execute(request(), tx, CancellationToken::new()).await;
        assert_eq!(outcome, Err(RuntimeError::NoConfiguration));
    }

    #[tokio::test]
    async fn missing_or_blank_token_is_no_credential() {
        for token in [None, Some(""), Some("   ")] {
            let t = HttpTransport::from_config(&make_config("https://x", token));
            let (tx, _rx) = mpsc::channel(1);
            let outcome = t.execute(request(), tx, CancellationToken::new()).await;
            assert_eq!(outcome, Err(RuntimeError::NoCredential));
        }
    }

    // ---- error bodies ----

    #[test]
    fn server_error_prefers_json_message() {
        let e = server_error(401, r#"{"error":"Bad auth","code":"no-auth"}"#);
        assert_eq!(
            e,
            RuntimeError::ServerError {
                status: 401,
                message: "Bad auth".into()
            }
        );

        let nested = server_error(429, r#"{"error":{"message":"slow down"}}"#);
        assert!(nested.to_string().contains("slow down"));
    }

    #[test]
    fn server_error_falls_back_to_body_or_reason() {
        let plain = server_error(502, "  upstream unavailable \n");
        assert!(plain.to_string().contains("upstream unavailable"));

        let empty = server_error(503, "");
        assert!(empty.to_string().contains("Service Unavailable"));
        assert_eq!(empty.code(), 503);

        let long = server_error(500, &"x".repeat(1000));
        match long {
            RuntimeError::ServerError { message, .. } => assert_eq!(message.len(), MAX_ERROR_BODY),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn progress_is_indeterminate_without_length() {
        assert_eq!(progress(10, None), None);
        assert_eq!(progress(50, Some(100)), Some(0.5));
        assert_eq!(progress(150, Some(100)), Some(1.0));
    }
}
