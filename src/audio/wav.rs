//! Streaming RIFF/WAVE decoding.
//!
//! The header is parsed incrementally: bytes are accumulated until the
//! `data` chunk starts, after which everything is treated as PCM in the
//! format the `fmt ` chunk declared.  Streamed WAV often carries a bogus
//! data length (`0xFFFFFFFF` or `0`), so the declared size is ignored and
//! the data runs until the stream ends.
//!
//! If the stream does not start with `RIFF....WAVE` it is decoded as raw
//! 16-bit PCM in the configured layout.

use std::sync::{Mutex, PoisonError};

use super::convert::FormatConverter;
use super::decoder::{AudioDecoder, AudioEncoding};
use super::pcm::PcmFrames;

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// The `data` chunk must start within this many bytes.
const MAX_HEADER_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Header parsing
// ---------------------------------------------------------------------------

/// Contents of the `fmt ` chunk that matter for decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

#[derive(Debug, PartialEq, Eq)]
enum HeaderParse {
    NeedMore,
    NotWav,
    /// RIFF/WAVE, but no `data` chunk within [`MAX_HEADER_BYTES`].
    Corrupt,
    Done { format: WavFormat, data_offset: usize },
}

fn u16_at(buf: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([buf[pos], buf[pos + 1]])
}

fn u32_at(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

fn parse_header(buf: &[u8]) -> HeaderParse {
    let prefix = buf.len().min(4);
    if buf[..prefix] != b"RIFF"[..prefix] {
        return HeaderParse::NotWav;
    }
    if buf.len() < 12 {
        return HeaderParse::NeedMore;
    }
    if &buf[8..12] != b"WAVE" {
        return HeaderParse::NotWav;
    }

    let mut format = None;
    let mut pos = 12;
    loop {
        if pos + 8 > buf.len() {
            return HeaderParse::NeedMore;
        }
        let id = &buf[pos..pos + 4];
        let size = u32_at(buf, pos + 4) as usize;
        let body = pos + 8;

        match id {
            b"data" => {
                return match format {
                    Some(format) => HeaderParse::Done {
                        format,
                        data_offset: body,
                    },
                    None => HeaderParse::NotWav,
                };
            }
            b"fmt " => {
                if size < 16 {
                    return HeaderParse::NotWav;
                }
                if body + 16 > buf.len() {
                    return HeaderParse::NeedMore;
                }
                format = Some(WavFormat {
                    format_tag: u16_at(buf, body),
                    channels: u16_at(buf, body + 2),
                    sample_rate: u32_at(buf, body + 4),
                    bits_per_sample: u16_at(buf, body + 14),
                });
            }
            _ => {}
        }

        // Chunks are word aligned.
        pos = body.saturating_add(size).saturating_add(size & 1);
        if pos > MAX_HEADER_BYTES {
            return HeaderParse::Corrupt;
        }
    }
}

// ---------------------------------------------------------------------------
// WavDecoder
// ---------------------------------------------------------------------------

enum Phase {
    Header(Vec<u8>),
    Data { format: WavFormat, frames: PcmFrames },
    Raw(PcmFrames),
    /// Corrupt header; the rest of the stream is dropped.
    Rejected,
}

struct WavState {
    phase: Phase,
    converter: FormatConverter,
}

impl WavState {
    fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            phase: Phase::Header(Vec::new()),
            converter: FormatConverter::new(channels, sample_rate),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<f32> {
        let header = match &mut self.phase {
            Phase::Header(buf) => {
                buf.extend_from_slice(chunk);
                std::mem::take(buf)
            }
            Phase::Data { format, frames } => {
                let samples = frames.push(chunk);
                return self
                    .converter
                    .convert(&samples, format.channels, format.sample_rate);
            }
            Phase::Raw(frames) => return frames.push(chunk),
            Phase::Rejected => return Vec::new(),
        };

        let parsed = match parse_header(&header) {
            HeaderParse::NeedMore if header.len() > MAX_HEADER_BYTES => HeaderParse::Corrupt,
            parsed => parsed,
        };
        match parsed {
            HeaderParse::Corrupt => {
                log::warn!(
                    target: "decoder",
                    "wav: no data chunk in the first {MAX_HEADER_BYTES} bytes, dropping stream"
                );
                self.phase = Phase::Rejected;
                Vec::new()
            }
            HeaderParse::NeedMore => {
                self.phase = Phase::Header(header);
                Vec::new()
            }
            HeaderParse::NotWav => {
                log::warn!(target: "decoder", "stream has no WAVE header, decoding as raw PCM");
                let (channels, _) = self.converter.target();
                let mut frames = PcmFrames::new(16, channels);
                let out = frames.push(&header);
                self.phase = Phase::Raw(frames);
                out
            }
            HeaderParse::Done { format, data_offset } => {
                log::debug!(
                    target: "decoder",
                    "wav: tag {:#06x}, {}ch @ {} Hz, {} bit",
                    format.format_tag,
                    format.channels,
                    format.sample_rate,
                    format.bits_per_sample
                );
                let mut frames = match format.format_tag {
                    WAVE_FORMAT_IEEE_FLOAT => PcmFrames::float32(format.channels),
                    WAVE_FORMAT_PCM | WAVE_FORMAT_EXTENSIBLE => {
                        PcmFrames::new(format.bits_per_sample, format.channels)
                    }
                    other => {
                        log::warn!(target: "decoder", "wav: unsupported format tag {other:#06x}");
                        PcmFrames::new(format.bits_per_sample, format.channels)
                    }
                };
                let samples = frames.push(&header[data_offset..]);
                self.phase = Phase::Data { format, frames };
                self.converter
                    .convert(&samples, format.channels, format.sample_rate)
            }
        }
    }
}

/// Decoder for WAV streams; converts to the configured layout.
pub struct WavDecoder {
    state: Mutex<WavState>,
}

impl WavDecoder {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WavState::new(1, 24_000)),
        }
    }

    /// Format read from the header, once the `data` chunk has been reached.
    pub fn format(&self) -> Option<WavFormat> {
        match &self.state.lock().unwrap_or_else(PoisonError::into_inner).phase {
            Phase::Data { format, .. } => Some(*format),
            _ => None,
        }
    }
}

impl Default for WavDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDecoder for WavDecoder {
    fn setup(&self, channels: u16, sample_rate: u32) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) =
            WavState::new(channels, sample_rate);
    }

    fn decode(&self, chunk: &[u8]) -> Vec<f32> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(chunk)
    }

    fn encoding(&self) -> AudioEncoding {
        AudioEncoding::Wav
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
