//! Runtime settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every section is `#[serde(default)]`: a file only needs the keys it
//! changes.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::RuntimePaths;
use crate::audio::{AudioEncoding, ClipStreamConfig, OverflowPolicy};

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// Where and how to reach the speech service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the service, e.g. `https://speech.example.com`.  Empty
    /// means "not configured"; every request then fails with
    /// `NoConfiguration`.
    pub base_url: String,
    /// Value of the `v` query parameter.
    pub api_version: String,
    /// Bearer token.  `None` (or empty) fails requests with `NoCredential`.
    pub access_token: Option<String>,
    /// Identifier of the client configuration, reported in the User-Agent.
    pub configuration_id: String,
    /// A request with no data and no progress for this long fails with
    /// `Timeout`.
    pub timeout_secs: u64,
    /// Path of the synthesis endpoint, relative to `base_url`.
    pub tts_path: String,
    /// Path of the understanding endpoint, relative to `base_url`.
    pub nlp_path: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_version: "20240601".into(),
            access_token: None,
            configuration_id: "default".into(),
            timeout_secs: 10,
            tts_path: "synthesize".into(),
            nlp_path: "message".into(),
        }
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Decoding, buffering and playback settings for synthesized audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Encoding requested from the service (`Accept: audio/<type>`).
    pub encoding: AudioEncoding,
    /// Output channel count of the clip stream.
    pub channels: u16,
    /// Output sample rate of the clip stream in Hz.
    pub sample_rate: u32,
    /// Bit depth of raw PCM responses.
    pub pcm_bit_depth: u16,
    /// Buffered seconds required before playback starts.
    pub ready_secs: f32,
    /// Ring buffer length in seconds.
    pub buffer_secs: f32,
    /// What to drop when the ring buffer is full.
    pub overflow: OverflowPolicy,
    /// Length of one playback period in milliseconds.
    pub playback_period_ms: u64,
    /// Number of preallocated clip buffers.
    pub pool_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            encoding: AudioEncoding::Pcm,
            channels: 1,
            sample_rate: 24_000,
            pcm_bit_depth: 16,
            ready_secs: 0.5,
            buffer_secs: 30.0,
            overflow: OverflowPolicy::DropOldest,
            playback_period_ms: 20,
            pool_size: 2,
        }
    }
}

impl AudioConfig {
    pub fn clip_stream(&self) -> ClipStreamConfig {
        ClipStreamConfig {
            channels: self.channels,
            sample_rate: self.sample_rate,
            ready_secs: self.ready_secs,
            buffer_secs: self.buffer_secs,
            overflow: self.overflow,
        }
    }

    pub fn playback_period(&self) -> Duration {
        Duration::from_millis(self.playback_period_ms)
    }
}

// ---------------------------------------------------------------------------
// TtsConfig
// ---------------------------------------------------------------------------

/// Voice parameters merged into every synthesis request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub voice: String,
    pub style: Option<String>,
    /// Speaking rate in percent (100 = normal).
    pub speed: u32,
    /// Pitch in percent (100 = normal).
    pub pitch: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice: "default".into(),
            style: None,
            speed: 100,
            pitch: 100,
        }
    }
}

impl TtsConfig {
    /// String parameters for the request body.
    pub fn parameters(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("voice".to_string(), self.voice.clone()),
            ("speed".to_string(), self.speed.to_string()),
            ("pitch".to_string(), self.pitch.to_string()),
        ];
        if let Some(style) = self.style.as_ref().filter(|s| !s.is_empty()) {
            params.push(("style".to_string(), style.clone()));
        }
        params
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Client identity reported in the User-Agent header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub sdk_version: String,
    pub device_model: String,
    pub device_name: String,
    /// Build context, e.g. `"release"` or `"editor"`.
    pub build_context: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            sdk_version: env!("CARGO_PKG_VERSION").into(),
            device_model: "unknown".into(),
            device_name: "unknown".into(),
            build_context: if cfg!(debug_assertions) {
                "debug".into()
            } else {
                "release".into()
            },
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level runtime configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use speech_runtime::config::RuntimeConfig;
///
/// // Load (returns Default when file is missing)
/// let config = RuntimeConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub tts: TtsConfig,
    pub client: ClientConfig,
}

impl RuntimeConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(RuntimeConfig::default())` when the file does not exist
    /// yet, so callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&RuntimePaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&RuntimePaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_preserves_changes() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let mut original = RuntimeConfig::default();
        original.service.base_url = "https://speech.example.com".into();
        original.service.access_token = Some("secret".into());
        original.audio.encoding = AudioEncoding::Mpeg;
        original.audio.overflow = OverflowPolicy::DropNewest;
        original.tts.style = Some("soft".into());
        original.save_to(&path).expect("save");

        let loaded = RuntimeConfig::load_from(&path).expect("load");
        assert_eq!(loaded, original);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = RuntimeConfig::load_from(&path).expect("should not error");
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[service]\nbase_url = \"http://localhost:8080\"\n\n[audio]\nencoding = \"wav\"\n",
        )
        .unwrap();

        let config = RuntimeConfig::load_from(&path).expect("load");
        assert_eq!(config.service.base_url, "http://localhost:8080");
        assert_eq!(config.service.timeout_secs, 10);
        assert_eq!(config.audio.encoding, AudioEncoding::Wav);
        assert_eq!(config.audio.sample_rate, 24_000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[service\nbase_url = ").unwrap();
        assert!(RuntimeConfig::load_from(&path).is_err());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("deeper").join("settings.toml");
        RuntimeConfig::default().save_to(&path).expect("save");
        assert!(path.exists());
    }

    // ---- derived values ----

    #[test]
    fn clip_stream_config_mirrors_audio_section() {
        let audio = AudioConfig::default();
        let clip = audio.clip_stream();
        assert_eq!(clip.channels, 1);
        assert_eq!(clip.sample_rate, 24_000);
        assert_eq!(clip.capacity(), 24_000 * 30);
        assert_eq!(audio.playback_period(), Duration::from_millis(20));
    }

    #[test]
    fn tts_parameters_skip_empty_style() {
        let mut tts = TtsConfig::default();
        assert!(!tts.parameters().iter().any(|(k, _)| k == "style"));
        tts.style = Some("whisper".into());
        assert!(tts
            .parameters()
            .contains(&("style".to_string(), "whisper".to_string())));
    }
}
