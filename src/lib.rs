//! Client-side speech runtime.
//!
//! Drives text-to-speech and natural-language-understanding requests
//! against a remote speech service: a per-request state machine, a
//! streaming transport, chunked audio decoding into a buffered clip stream,
//! and a playback driver.
//!
//! | Module        | Contents                                               |
//! |---------------|--------------------------------------------------------|
//! | [`request`]   | request state machine, response kinds, validation      |
//! | [`audio`]     | decoders, ring buffer, clip stream, pool, player       |
//! | [`transport`] | transport trait, HTTP transport, JSON stream splitting |
//! | [`service`]   | TTS, download and NLP orchestration                    |
//! | [`config`]    | TOML settings and platform paths                       |
//! | [`error`]     | `RuntimeError` and its numeric codes                   |

pub mod audio;
pub mod config;
pub mod error;
pub mod request;
pub mod service;
pub mod transport;

pub use error::RuntimeError;
