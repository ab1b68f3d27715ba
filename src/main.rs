//! Command-line front-end for the speech runtime.
//!
//! ```text
//! speech-runtime speak <text>               synthesize and play
//! speech-runtime download <text> <path>     synthesize to a file
//! speech-runtime understand <text>          print the understanding JSON
//! ```
//!
//! # Startup sequence
//!
//! 1. Initialise logging and parse the command line.
//! 2. Load [`RuntimeConfig`] from disk (returns default on first run).
//! 3. Create the [`tokio`] runtime.
//! 4. Build the [`HttpTransport`] from config.
//! 5. Run the requested command to completion.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use speech_runtime::{
    audio::{AudioClipStream, AudioPlayer, NullSink},
    config::{RuntimeConfig, RuntimePaths},
    request::{NoopObserver, RequestObserver, RequestOptions, RequestState, ResponsePayload},
    service::{NlpService, TtsEvents, TtsService},
    transport::{HttpTransport, Transport},
    RuntimeError,
};

// ---------------------------------------------------------------------------
// Console observers
// ---------------------------------------------------------------------------

/// Logs request progress to the console.
struct ConsoleObserver;

impl RequestObserver for ConsoleObserver {
    fn on_state_changed(&self, from: RequestState, to: RequestState) {
        log::debug!("{from} -> {to}");
    }

    fn on_error(&self, code: i32, message: &str) {
        log::error!("request failed ({code}): {message}");
    }

    fn on_progress(&self, fraction: Option<f32>) {
        if let Some(f) = fraction {
            log::debug!("progress {:.0}%", f * 100.0);
        }
    }

    fn on_cancelled(&self, reason: &str) {
        log::warn!("request cancelled: {reason}");
    }
}

struct ConsoleTtsEvents;

impl TtsEvents for ConsoleTtsEvents {
    fn on_clip_ready(&self, stream: &Arc<AudioClipStream>, error: Option<&RuntimeError>) {
        match error {
            None => log::info!("clip ready ({:.2}s buffered)", stream.buffered_secs()),
            Some(e) => log::error!("clip failed: {e}"),
        }
    }

    fn on_download_complete(&self, path: &Path, error: Option<&str>) {
        match error {
            None => log::info!("saved {}", path.display()),
            Some(e) => log::error!("download to {} failed: {e}", path.display()),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Speech runtime command-line client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Synthesize text and play it
    Speak {
        /// Text to synthesize (at most 140 characters)
        text: String,
    },

    /// Synthesize text into an audio file
    Download {
        /// Text to synthesize (at most 140 characters)
        text: String,

        /// Output file; relative paths land in the downloads directory
        path: String,
    },

    /// Print the understanding of a text as JSON
    Understand {
        /// Text to understand
        text: String,
    },
}

async fn speak(config: &RuntimeConfig, transport: Arc<dyn Transport>, text: &str) -> Result<()> {
    let tts = TtsService::new(config, transport).with_events(Arc::new(ConsoleTtsEvents));
    let handle = tts.speak(text, Arc::new(ConsoleObserver))?;

    let player = AudioPlayer::new(Arc::new(NullSink), config.audio.playback_period());
    player.bind(Arc::clone(handle.stream()));
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    player.on_playback_complete(move || {
        let _ = done_tx.send(());
    });
    player.play();

    let stream = handle.wait().await.context("synthesis failed")?;
    done_rx.await.context("player stopped before completion")?;
    log::info!("played {:.2}s of audio", stream.duration_secs());
    Ok(())
}

async fn download(
    config: &RuntimeConfig,
    transport: Arc<dyn Transport>,
    text: &str,
    path: &str,
) -> Result<()> {
    let target = RuntimePaths::new().download_path(path);
    let tts = TtsService::new(config, transport).with_events(Arc::new(ConsoleTtsEvents));
    tts.download(text, target, Arc::new(ConsoleObserver))?
        .wait()
        .await
        .context("download failed")?;
    Ok(())
}

async fn understand(
    config: &RuntimeConfig,
    transport: Arc<dyn Transport>,
    text: &str,
) -> Result<()> {
    let nlp = NlpService::new(config, transport);
    let observer: Arc<dyn RequestObserver> = if log::log_enabled!(log::Level::Debug) {
        Arc::new(ConsoleObserver)
    } else {
        NoopObserver::shared()
    };
    let handle = nlp.send_text(text, RequestOptions::text(), observer)?;
    let request = Arc::clone(handle.request());
    handle.wait().await.context("understanding failed")?;

    let body = request
        .results()
        .map(ResponsePayload::into_body)
        .unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // 2. Configuration
    let config = RuntimeConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        RuntimeConfig::default()
    });

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 4. Transport
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::from_config(&config));

    // 5. Command
    rt.block_on(async {
        match cli.command {
            Command::Speak { text } => speak(&config, transport, &text).await,
            Command::Download { text, path } => download(&config, transport, &text, &path).await,
            Command::Understand { text } => understand(&config, transport, &text).await,
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
