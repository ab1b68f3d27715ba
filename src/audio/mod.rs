//! Streaming audio pipeline: encoded chunks → samples → clip stream → player.
//!
//! # Pipeline
//!
//! ```text
//! transport chunk → AudioDecoder (pcm / wav / mp3) → FormatConverter
//!                 → AudioClipStream (RingBuffer) → AudioPlayer → AudioSink
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use speech_runtime::audio::{
//!     decoder_for, AudioClipStream, AudioEncoding, AudioPlayer, ClipStreamConfig, NullSink,
//! };
//!
//! let config = ClipStreamConfig { sample_rate: 16_000, ..Default::default() };
//! let decoder = decoder_for(AudioEncoding::Pcm, 16);
//! decoder.setup(config.channels, config.sample_rate);
//!
//! let stream = Arc::new(AudioClipStream::new(config));
//! stream.add_samples(&decoder.decode(&[0x00, 0x40, 0x00, 0xC0]));
//! stream.set_complete();
//!
//! let player = AudioPlayer::new(Arc::new(NullSink), Duration::from_millis(20));
//! player.bind(Arc::clone(&stream));
//! player.play();
//! player.tick();
//! assert!(player.is_complete());
//! ```

pub mod buffer;
pub mod clip_stream;
pub mod convert;
pub mod decoder;
pub mod mp3;
pub mod pcm;
pub mod player;
pub mod pool;
pub mod wav;

pub use buffer::{OverflowPolicy, RingBuffer};
pub use clip_stream::{AudioClipStream, ClipStreamConfig};
pub use convert::{remix_channels, FormatConverter, StreamResampler};
pub use decoder::{decoder_for, AudioDecoder, AudioEncoding};
pub use mp3::Mp3Decoder;
pub use pcm::PcmDecoder;
pub use player::{AudioPlayer, AudioSink, NullSink, PlayerState};
pub use pool::{ClipStreamPool, PooledBuffer};
pub use wav::WavDecoder;
