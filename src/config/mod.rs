//! Configuration for the speech runtime.
//!
//! Provides `RuntimeConfig` (top-level settings), sub-configs for the
//! service connection, audio pipeline, voice and client identity,
//! `RuntimePaths` for cross-platform directories, and TOML persistence via
//! `RuntimeConfig::load` / `RuntimeConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::RuntimePaths;
pub use settings::{AudioConfig, ClientConfig, RuntimeConfig, ServiceConfig, TtsConfig};
