//! Raw little-endian PCM decoding.
//!
//! Supported widths: 8-bit unsigned, 16/24/32-bit signed, plus 32-bit float
//! for WAV files that declare it.  A frame split across two chunks is carried
//! over and completed by the next call, so the output is identical however
//! the bytes are chunked.

use std::sync::{Mutex, PoisonError};

use super::decoder::{AudioDecoder, AudioEncoding};

// ---------------------------------------------------------------------------
// Sample conversion
// ---------------------------------------------------------------------------

/// Convert one little-endian sample of `bytes.len()` bytes to `[-1.0, 1.0)`.
pub(crate) fn sample_to_f32(bytes: &[u8]) -> f32 {
    match bytes.len() {
        1 => (bytes[0] as f32 - 128.0) / 128.0,
        2 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32_768.0,
        3 => {
            let v = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
            v as f32 / 8_388_608.0
        }
        4 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 2_147_483_648.0,
        _ => 0.0,
    }
}

/// Normalise an unsupported bit depth to the nearest supported one.
pub(crate) fn bytes_per_sample(bit_depth: u16) -> usize {
    match bit_depth {
        8 => 1,
        24 => 3,
        32 => 4,
        16 => 2,
        other => {
            log::warn!(target: "decoder", "unsupported PCM bit depth {other}, assuming 16");
            2
        }
    }
}

// ---------------------------------------------------------------------------
// PcmFrames (shared with the WAV decoder)
// ---------------------------------------------------------------------------

/// Byte-to-sample converter with carry-over of incomplete frames.
#[derive(Debug, Clone)]
pub(crate) struct PcmFrames {
    width: usize,
    block: usize,
    float: bool,
    carry: Vec<u8>,
}

impl PcmFrames {
    pub(crate) fn new(bit_depth: u16, channels: u16) -> Self {
        let width = bytes_per_sample(bit_depth);
        Self {
            width,
            block: width * channels.max(1) as usize,
            float: false,
            carry: Vec::new(),
        }
    }

    /// 32-bit IEEE float samples.
    pub(crate) fn float32(channels: u16) -> Self {
        Self {
            width: 4,
            block: 4 * channels.max(1) as usize,
            float: true,
            carry: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<f32> {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let whole = bytes.len() - bytes.len() % self.block;
        let out = if self.float {
            bytes[..whole]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        } else {
            bytes[..whole]
                .chunks_exact(self.width)
                .map(sample_to_f32)
                .collect()
        };

        self.carry = bytes[whole..].to_vec();
        out
    }
}

// ---------------------------------------------------------------------------
// PcmDecoder
// ---------------------------------------------------------------------------

/// Decoder for headerless PCM whose format is known up front.
///
/// The stream is assumed to already be in the layout given to `setup`.
pub struct PcmDecoder {
    bit_depth: u16,
    frames: Mutex<PcmFrames>,
}

impl PcmDecoder {
    pub fn new(bit_depth: u16) -> Self {
        Self {
            bit_depth,
            frames: Mutex::new(PcmFrames::new(bit_depth, 1)),
        }
    }

    pub fn bit_depth(&self) -> u16 {
        self.bit_depth
    }
}

impl AudioDecoder for PcmDecoder {
    fn setup(&self, channels: u16, _sample_rate: u32) {
        *self.frames.lock().unwrap_or_else(PoisonError::into_inner) =
            PcmFrames::new(self.bit_depth, channels);
    }

    fn decode(&self, chunk: &[u8]) -> Vec<f32> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(chunk)
    }

    fn encoding(&self) -> AudioEncoding {
        AudioEncoding::Pcm
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn sixteen_bit_scaling() {
        let dec = PcmDecoder::new(16);
        dec.setup(1, 24_000);
        let out = dec.decode(&pcm16(&[0, 16_384, -32_768]));
        assert_eq!(out, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn eight_bit_is_unsigned() {
        let dec = PcmDecoder::new(8);
        let out = dec.decode(&[128, 0, 192]);
        assert_eq!(out, vec![0.0, -1.0, 0.5]);
    }

    #[test]
    fn twenty_four_bit_sign_extends() {
        // 0x800000 = most negative, 0x400000 = +0.5
        assert_eq!(sample_to_f32(&[0x00, 0x00, 0x80]), -1.0);
        assert_eq!(sample_to_f32(&[0x00, 0x00, 0x40]), 0.5);
    }

    #[test]
    fn thirty_two_bit() {
        assert_eq!(sample_to_f32(&i32::MIN.to_le_bytes()), -1.0);
        assert_eq!(sample_to_f32(&(1_i32 << 30).to_le_bytes()), 0.5);
    }

    #[test]
    fn split_sample_is_carried_across_chunks() {
        let bytes = pcm16(&[1_000, -2_000, 3_000]);

        let whole = PcmDecoder::new(16);
        let expected = whole.decode(&bytes);

        let split = PcmDecoder::new(16);
        let mut got = split.decode(&bytes[..3]);
        assert_eq!(got.len(), 1);
        got.extend(split.decode(&bytes[3..5]));
        got.extend(split.decode(&bytes[5..]));

        assert_eq!(got, expected);
    }

    #[test]
    fn setup_discards_carry() {
        let dec = PcmDecoder::new(16);
        dec.decode(&[0x01]);
        dec.setup(1, 16_000);
        assert_eq!(dec.decode(&pcm16(&[0])), vec![0.0]);
    }

    #[test]
    fn stereo_keeps_frames_whole() {
        let dec = PcmDecoder::new(16);
        dec.setup(2, 24_000);
        // One and a half stereo frames: the lone left sample waits.
        assert_eq!(dec.decode(&pcm16(&[16_384, 16_384, 16_384])).len(), 2);
        assert_eq!(dec.decode(&pcm16(&[0])), vec![0.5, 0.0]);
    }

    #[test]
    fn float_frames() {
        let mut frames = PcmFrames::float32(1);
        let bytes: Vec<u8> = [0.25_f32, -0.75].iter().flat_map(|f| f.to_le_bytes()).collect();
        assert_eq!(frames.push(&bytes[..6]), vec![0.25]);
        assert_eq!(frames.push(&bytes[6..]), vec![-0.75]);
    }

    #[test]
    fn unsupported_depth_falls_back_to_sixteen() {
        assert_eq!(bytes_per_sample(12), 2);
    }
}
