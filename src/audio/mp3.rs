//! Chunked MPEG Layer III decoding.
//!
//! Network chunks do not line up with MP3 frames, so decoding happens in
//! two stages:
//!
//! 1. [`FrameSplitter`] accumulates bytes, locates frame sync words and cuts
//!    out complete frames.  Bytes that cannot start a valid header are
//!    skipped; an incomplete frame at the end waits for the next chunk.
//!    ID3v2 tags are skipped even when they span several chunks.
//! 2. Each complete frame is handed to symphonia's MPEG audio decoder as
//!    one packet, and the output is converted to the configured layout.
//!
//! The splitter only ever looks at bytes it has fully received, so the
//! decoded output is the same whatever the chunk boundaries were.

use std::sync::{Mutex, PoisonError};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_MP3};
use symphonia::core::formats::Packet;

use super::convert::FormatConverter;
use super::decoder::{AudioDecoder, AudioEncoding};

// ---------------------------------------------------------------------------
// FrameHeader
// ---------------------------------------------------------------------------

/// MPEG audio version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// Parsed 4-byte Layer III frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub channels: u16,
    /// Total frame length in bytes, header included.
    pub frame_len: usize,
}

const BITRATES_V1: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

impl FrameHeader {
    /// Parse a Layer III header.  Returns `None` for anything that is not a
    /// valid sync word, a reserved version, another layer, a free-format or
    /// invalid bitrate, or a reserved sample rate.
    ///
    /// ```rust
    /// use speech_runtime::audio::mp3::{FrameHeader, MpegVersion};
    ///
    /// let h = FrameHeader::parse([0xFF, 0xFB, 0x90, 0xC4]).unwrap();
    /// assert_eq!(h.version, MpegVersion::Mpeg1);
    /// assert_eq!(h.bitrate_kbps, 128);
    /// assert_eq!(h.sample_rate, 44_100);
    /// assert_eq!(h.channels, 1);
    /// assert_eq!(h.frame_len, 417);
    /// ```
    pub fn parse(h: [u8; 4]) -> Option<Self> {
        if h[0] != 0xFF || h[1] & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (h[1] >> 3) & 0b11 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return None,
        };
        // Layer bits 01 = Layer III.
        if (h[1] >> 1) & 0b11 != 0b01 {
            return None;
        }

        let bitrate_idx = (h[2] >> 4) as usize;
        if bitrate_idx == 0 || bitrate_idx == 15 {
            return None;
        }
        let bitrate_kbps = match version {
            MpegVersion::Mpeg1 => BITRATES_V1[bitrate_idx],
            _ => BITRATES_V2[bitrate_idx],
        };

        let sr_idx = ((h[2] >> 2) & 0b11) as usize;
        if sr_idx == 3 {
            return None;
        }
        let base_rate = [44_100, 48_000, 32_000][sr_idx];
        let sample_rate = match version {
            MpegVersion::Mpeg1 => base_rate,
            MpegVersion::Mpeg2 => base_rate / 2,
            MpegVersion::Mpeg25 => base_rate / 4,
        };

        let padding = (h[2] >> 1) & 1 == 1;
        let channels = if h[3] >> 6 == 0b11 { 1 } else { 2 };

        let coefficient = match version {
            MpegVersion::Mpeg1 => 144,
            _ => 72,
        };
        let frame_len =
            (coefficient * bitrate_kbps * 1000 / sample_rate) as usize + usize::from(padding);

        Some(Self {
            version,
            bitrate_kbps,
            sample_rate,
            padding,
            channels,
            frame_len,
        })
    }

    /// PCM frames produced by one MPEG frame.
    pub fn samples_per_frame(&self) -> usize {
        match self.version {
            MpegVersion::Mpeg1 => 1152,
            _ => 576,
        }
    }
}

// ---------------------------------------------------------------------------
// FrameSplitter
// ---------------------------------------------------------------------------

/// Cuts a byte stream into complete MP3 frames.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    carry: Vec<u8>,
    /// Bytes of an ID3 tag still to skip.
    skip: usize,
    /// Bytes discarded while searching for sync.
    skipped: u64,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every frame that is now complete.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<(FrameHeader, Vec<u8>)> {
        let mut data = chunk;
        if self.skip > 0 {
            let n = self.skip.min(data.len());
            self.skip -= n;
            data = &data[n..];
        }
        self.carry.extend_from_slice(data);

        let buf = &self.carry;
        let len = buf.len();
        let mut frames = Vec::new();
        let mut pos = 0;

        while pos + 4 <= len {
            if &buf[pos..pos + 3] == b"ID3" {
                if pos + 10 > len {
                    break;
                }
                let tag_len = 10 + id3_size(&buf[pos + 6..pos + 10]) + id3_footer(buf[pos + 5]);
                if pos + tag_len <= len {
                    pos += tag_len;
                } else {
                    self.skip = pos + tag_len - len;
                    pos = len;
                }
                continue;
            }

            match FrameHeader::parse([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) {
                Some(header) if pos + header.frame_len <= len => {
                    frames.push((header, buf[pos..pos + header.frame_len].to_vec()));
                    pos += header.frame_len;
                }
                Some(_) => break,
                None => {
                    pos += 1;
                    self.skipped += 1;
                }
            }
        }

        self.carry.drain(..pos);
        frames
    }

    /// Bytes dropped while hunting for a frame sync.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }

    /// Bytes waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

/// ID3v2 sizes are 28-bit "syncsafe" integers.
fn id3_size(b: &[u8]) -> usize {
    b.iter().fold(0usize, |acc, &x| (acc << 7) | (x & 0x7F) as usize)
}

fn id3_footer(flags: u8) -> usize {
    if flags & 0x10 != 0 {
        10
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Mp3Decoder
// ---------------------------------------------------------------------------

struct Mp3State {
    splitter: FrameSplitter,
    codec: Option<Box<dyn Decoder>>,
    converter: FormatConverter,
    frames_decoded: u64,
    frames_failed: u64,
}

impl Mp3State {
    fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            splitter: FrameSplitter::new(),
            codec: None,
            converter: FormatConverter::new(channels, sample_rate),
            frames_decoded: 0,
            frames_failed: 0,
        }
    }

    fn codec(&mut self, header: &FrameHeader) -> Option<&mut Box<dyn Decoder>> {
        if self.codec.is_none() {
            let mut params = CodecParameters::new();
            params
                .for_codec(CODEC_TYPE_MP3)
                .with_sample_rate(header.sample_rate);
            match symphonia::default::get_codecs().make(&params, &DecoderOptions::default()) {
                Ok(codec) => self.codec = Some(codec),
                Err(e) => {
                    log::error!(target: "decoder", "mp3: cannot create decoder: {e}");
                    return None;
                }
            }
        }
        self.codec.as_mut()
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<f32> {
        let mut out = Vec::new();

        for (header, frame) in self.splitter.push(chunk) {
            let ts = self.frames_decoded;
            let Some(codec) = self.codec(&header) else {
                break;
            };
            let packet = Packet::new_from_slice(0, ts, header.samples_per_frame() as u64, &frame);

            let decoded = match codec.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    Ok((buf, spec))
                }
                Err(e) => Err(e),
            };

            match decoded {
                Ok((buf, spec)) => {
                    let samples = self.converter.convert(
                        buf.samples(),
                        spec.channels.count() as u16,
                        spec.rate,
                    );
                    out.extend(samples);
                    self.frames_decoded += 1;
                }
                Err(e) => {
                    self.frames_failed += 1;
                    log::debug!(target: "decoder", "mp3: skipping undecodable frame: {e}");
                }
            }
        }

        out
    }
}

/// Decoder for MPEG Layer III streams.
pub struct Mp3Decoder {
    state: Mutex<Mp3State>,
}

impl Mp3Decoder {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Mp3State::new(1, 24_000)),
        }
    }

    /// `(frames decoded, frames that failed to decode)`.
    pub fn frame_counts(&self) -> (u64, u64) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        (state.frames_decoded, state.frames_failed)
    }
}

impl Default for Mp3Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDecoder for Mp3Decoder {
    fn setup(&self, channels: u16, sample_rate: u32) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) =
            Mp3State::new(channels, sample_rate);
    }

    fn decode(&self, chunk: &[u8]) -> Vec<f32> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(chunk)
    }

    fn encoding(&self) -> AudioEncoding {
        AudioEncoding::Mpeg
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

/// A silent mono MPEG-1 Layer III frame: 128 kbps, 44.1 kHz, no CRC.
#[cfg(test)]
pub(crate) fn silent_frame() -> Vec<u8> {
    let mut frame = vec![0u8; 417];
    frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0xC4]);
    frame
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(frames: usize) -> Vec<u8> {
        (0..frames).flat_map(|_| silent_frame()).collect()
    }

    // ---- FrameHeader -------------------------------------------------------

    #[test]
    fn header_rejects_invalid_fields() {
        assert!(FrameHeader::parse([0x00, 0xFB, 0x90, 0xC4]).is_none()); // no sync
        assert!(FrameHeader::parse([0xFF, 0xEB, 0x90, 0xC4]).is_none()); // reserved version
        assert!(FrameHeader::parse([0xFF, 0xFD, 0x90, 0xC4]).is_none()); // layer II
        assert!(FrameHeader::parse([0xFF, 0xFB, 0x00, 0xC4]).is_none()); // free format
        assert!(FrameHeader::parse([0xFF, 0xFB, 0xF0, 0xC4]).is_none()); // bad bitrate
        assert!(FrameHeader::parse([0xFF, 0xFB, 0x9C, 0xC4]).is_none()); // reserved rate
    }

    #[test]
    fn header_padding_and_mpeg2_lengths() {
        let padded = FrameHeader::parse([0xFF, 0xFB, 0x92, 0x44]).unwrap();
        assert!(padded.padding);
        assert_eq!(padded.channels, 2);
        assert_eq!(padded.frame_len, 418);

        // MPEG-2, 64 kbps, 24 kHz: 72 * 64000 / 24000 = 192
        let v2 = FrameHeader::parse([0xFF, 0xF3, 0x84, 0xC4]).unwrap();
        assert_eq!(v2.version, MpegVersion::Mpeg2);
        assert_eq!(v2.sample_rate, 24_000);
        assert_eq!(v2.frame_len, 192);
        assert_eq!(v2.samples_per_frame(), 576);
    }

    // ---- FrameSplitter -----------------------------------------------------

    #[test]
    fn splitter_waits_for_complete_frames() {
        let bytes = stream(2);
        let mut s = FrameSplitter::new();
        assert!(s.push(&bytes[..100]).is_empty());
        assert_eq!(s.pending(), 100);
        assert_eq!(s.push(&bytes[100..500]).len(), 1);
        assert_eq!(s.push(&bytes[500..]).len(), 1);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn splitter_skips_garbage_between_frames() {
        let mut bytes = silent_frame();
        bytes.extend_from_slice(&[0x00, 0x12, 0x34, 0x56, 0x78]);
        bytes.extend(silent_frame());

        let mut s = FrameSplitter::new();
        let frames = s.push(&bytes);
        assert_eq!(frames.len(), 2);
        assert_eq!(s.skipped_bytes(), 5);
    }

    #[test]
    fn splitter_skips_id3_tag_across_chunks() {
        let mut bytes = b"ID3\x04\x00\x00\x00\x00\x01\x00".to_vec(); // 128-byte body
        bytes.extend(std::iter::repeat(0xFF).take(128));
        bytes.extend(silent_frame());

        let mut s = FrameSplitter::new();
        assert!(s.push(&bytes[..20]).is_empty());
        let frames = s.push(&bytes[20..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1, silent_frame());
    }

    #[test]
    fn splitter_is_chunking_independent() {
        let bytes = stream(3);
        for size in [1, 7, 416, 418, 1000] {
            let mut s = FrameSplitter::new();
            let n: usize = bytes.chunks(size).map(|c| s.push(c).len()).sum();
            assert_eq!(n, 3, "chunk size {size}");
        }
    }

    // ---- Mp3Decoder --------------------------------------------------------

    #[test]
    fn decodes_silent_frames() {
        let dec = Mp3Decoder::new();
        dec.setup(1, 44_100);
        let out = dec.decode(&stream(3));
        assert_eq!(out.len(), 3 * 1152);
        assert!(out.iter().all(|s| s.abs() < 1e-6));
        assert_eq!(dec.frame_counts(), (3, 0));
    }

    #[test]
    fn chunked_decode_matches_whole() {
        let bytes = stream(4);

        let whole = Mp3Decoder::new();
        whole.setup(1, 44_100);
        let expected = whole.decode(&bytes);

        let chunked = Mp3Decoder::new();
        chunked.setup(1, 44_100);
        let mut got = Vec::new();
        for c in bytes.chunks(97) {
            got.extend(chunked.decode(c));
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn output_is_converted_to_configured_layout() {
        let dec = Mp3Decoder::new();
        dec.setup(2, 44_100);
        assert_eq!(dec.decode(&stream(1)).len(), 2 * 1152);
    }

    #[test]
    fn setup_resets_carry() {
        let dec = Mp3Decoder::new();
        dec.setup(1, 44_100);
        dec.decode(&silent_frame()[..200]);
        dec.setup(1, 44_100);
        assert_eq!(dec.decode(&silent_frame()).len(), 1152);
    }
}
