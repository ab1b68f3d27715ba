//! Chunked audio decoder abstraction.
//!
//! A decoder is configured once with the output layout via
//! [`AudioDecoder::setup`], then fed arbitrary byte chunks as they arrive
//! from the network.  Each call returns the interleaved `f32` samples that
//! could be fully decoded from everything seen so far; incomplete trailing
//! data is carried over to the next call.

use serde::{Deserialize, Serialize};

use super::mp3::Mp3Decoder;
use super::pcm::PcmDecoder;
use super::wav::WavDecoder;

// ---------------------------------------------------------------------------
// AudioEncoding
// ---------------------------------------------------------------------------

/// Wire encodings the synthesis service can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// Raw little-endian PCM with no header.
    #[default]
    Pcm,
    /// MPEG-1/2/2.5 Layer III.
    Mpeg,
    /// RIFF/WAVE container with PCM data.
    Wav,
}

impl AudioEncoding {
    /// Value for the `Accept` header.
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioEncoding::Pcm => "audio/raw",
            AudioEncoding::Mpeg => "audio/mpeg",
            AudioEncoding::Wav => "audio/wav",
        }
    }

    /// File extension used for downloads.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioEncoding::Pcm => "raw",
            AudioEncoding::Mpeg => "mp3",
            AudioEncoding::Wav => "wav",
        }
    }
}

// ---------------------------------------------------------------------------
// AudioDecoder trait
// ---------------------------------------------------------------------------

/// Incremental decoder from encoded bytes to interleaved `f32` samples.
///
/// Implementations keep their own carry-over state behind interior
/// mutability so one decoder can be shared between the transport task and
/// the code that owns the clip stream.  Decoding never fails outright:
/// undecodable data is skipped and logged.
pub trait AudioDecoder: Send + Sync {
    /// Reset all state and set the output layout.
    fn setup(&self, channels: u16, sample_rate: u32);

    /// Decode the next chunk.  Output is in the layout given to `setup`.
    fn decode(&self, chunk: &[u8]) -> Vec<f32>;

    fn encoding(&self) -> AudioEncoding;
}

/// Build the decoder for `encoding`.
///
/// `bit_depth` only applies to raw PCM; WAV reads it from its header and
/// MPEG always decodes to float.
pub fn decoder_for(encoding: AudioEncoding, bit_depth: u16) -> Box<dyn AudioDecoder> {
    match encoding {
        AudioEncoding::Pcm => Box::new(PcmDecoder::new(bit_depth)),
        AudioEncoding::Mpeg => Box::new(Mp3Decoder::new()),
        AudioEncoding::Wav => Box::new(WavDecoder::new()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_picks_matching_decoder() {
        for enc in [AudioEncoding::Pcm, AudioEncoding::Mpeg, AudioEncoding::Wav] {
            assert_eq!(decoder_for(enc, 16).encoding(), enc);
        }
    }

    #[test]
    fn mime_types() {
        assert_eq!(AudioEncoding::Pcm.mime_type(), "audio/raw");
        assert_eq!(AudioEncoding::Mpeg.mime_type(), "audio/mpeg");
        assert_eq!(AudioEncoding::Wav.mime_type(), "audio/wav");
        assert_eq!(AudioEncoding::Mpeg.extension(), "mp3");
    }

    #[test]
    fn encoding_serde_is_lowercase() {
        #[derive(Deserialize)]
        struct W {
            e: AudioEncoding,
        }
        let w: W = toml::from_str(r#"e = "mpeg""#).unwrap();
        assert_eq!(w.e, AudioEncoding::Mpeg);
    }
}
