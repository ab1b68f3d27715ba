//! Channel remixing and sample-rate conversion.
//!
//! Decoders emit audio in whatever layout the stream carries; the clip
//! stream expects the layout it was configured with.  This module bridges
//! the two:
//!
//! 1. [`remix_channels`] maps interleaved frames from one channel count to
//!    another (downmix by averaging, upmix by repeating).
//! 2. [`StreamResampler`] converts the sample rate with linear interpolation.
//!    It keeps one frame of history and an exact rational position, so the
//!    output does not depend on how the input was chunked.
//! 3. [`FormatConverter`] combines both and rebuilds its resampler when the
//!    source format changes mid-stream.

// ---------------------------------------------------------------------------
// remix_channels
// ---------------------------------------------------------------------------

/// Map interleaved audio from `from` channels to `to` channels.
///
/// * Equal counts return the input unchanged.
/// * Mono output averages every frame.
/// * Mono input duplicates each sample into every output channel.
/// * Any other combination keeps the first `min(from, to)` channels and
///   fills the rest with the frame average.
///
/// A trailing partial frame is dropped.  Either count being `0` yields an
/// empty vector.
///
/// # Example
///
/// ```rust
/// use speech_runtime::audio::remix_channels;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = remix_channels(&stereo, 2, 1);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
///
/// let back = remix_channels(&[0.1, 0.2], 1, 2);
/// assert_eq!(back, vec![0.1, 0.1, 0.2, 0.2]);
/// ```
pub fn remix_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == 0 || to == 0 {
        return Vec::new();
    }
    if from == to {
        return samples.to_vec();
    }

    let (from, to) = (from as usize, to as usize);
    let mut out = Vec::with_capacity(samples.len() / from * to);

    for frame in samples.chunks_exact(from) {
        let avg = frame.iter().sum::<f32>() / from as f32;
        if to == 1 {
            out.push(avg);
        } else if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            for ch in 0..to {
                out.push(if ch < from { frame[ch] } else { avg });
            }
        }
    }

    out
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

/// Incremental linear-interpolation resampler for interleaved audio.
///
/// Output frame `k` sits at source position `k * from / to`; the integer and
/// fractional parts are computed exactly from 64-bit counters.  The most
/// recent input frame is held back until the next call so the interpolation
/// can cross chunk boundaries.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    channels: usize,
    from_rate: u64,
    to_rate: u64,
    /// Next output frame index.
    next_out: u64,
    /// Absolute source index of `tail[0]`.
    base: u64,
    /// Last input frame from the previous call.
    tail: Vec<f32>,
}

impl StreamResampler {
    pub fn new(channels: u16, from_rate: u32, to_rate: u32) -> Self {
        Self {
            channels: channels.max(1) as usize,
            from_rate: from_rate.max(1) as u64,
            to_rate: to_rate.max(1) as u64,
            next_out: 0,
            base: 0,
            tail: Vec::new(),
        }
    }

    /// Returns `true` when the rates match and the resampler is a pass-through.
    pub fn is_identity(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Resample the next slice of interleaved input.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let ch = self.channels;
        let whole = input.len() - input.len() % ch;
        let input = &input[..whole];

        if self.is_identity() {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        let mut frames = Vec::with_capacity(self.tail.len() + input.len());
        frames.extend_from_slice(&self.tail);
        frames.extend_from_slice(input);
        let n = frames.len() / ch;

        let mut out = Vec::new();
        loop {
            let num = self.next_out * self.from_rate;
            let abs = num / self.to_rate;
            let idx = (abs - self.base) as usize;
            if idx + 1 >= n {
                break;
            }
            let frac = (num % self.to_rate) as f32 / self.to_rate as f32;
            let (a, b) = (&frames[idx * ch..(idx + 1) * ch], &frames[(idx + 1) * ch..(idx + 2) * ch]);
            for c in 0..ch {
                out.push(a[c] * (1.0 - frac) + b[c] * frac);
            }
            self.next_out += 1;
        }

        self.base += (n - 1) as u64;
        self.tail = frames[(n - 1) * ch..].to_vec();
        out
    }
}

// ---------------------------------------------------------------------------
// FormatConverter
// ---------------------------------------------------------------------------

/// Converts decoded audio into a fixed target layout.
#[derive(Debug, Clone)]
pub struct FormatConverter {
    target_channels: u16,
    target_rate: u32,
    source: Option<(u16, u32)>,
    resampler: Option<StreamResampler>,
}

impl FormatConverter {
    pub fn new(target_channels: u16, target_rate: u32) -> Self {
        Self {
            target_channels,
            target_rate,
            source: None,
            resampler: None,
        }
    }

    pub fn target(&self) -> (u16, u32) {
        (self.target_channels, self.target_rate)
    }

    /// Convert `samples` (interleaved, `channels` wide, at `sample_rate`).
    pub fn convert(&mut self, samples: &[f32], channels: u16, sample_rate: u32) -> Vec<f32> {
        if self.source != Some((channels, sample_rate)) {
            if self.source.is_some() {
                log::debug!(
                    target: "decoder",
                    "source format changed to {channels}ch @ {sample_rate} Hz"
                );
            }
            self.source = Some((channels, sample_rate));
            self.resampler = (sample_rate != self.target_rate)
                .then(|| StreamResampler::new(self.target_channels, sample_rate, self.target_rate));
        }

        let remixed = remix_channels(samples, channels, self.target_channels);
        match self.resampler.as_mut() {
            Some(r) => r.process(&remixed),
            None => remixed,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- remix_channels ----------------------------------------------------

    #[test]
    fn remix_same_count_is_noop() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(remix_channels(&input, 1, 1), input);
    }

    #[test]
    fn remix_stereo_to_mono_averages() {
        let out = remix_channels(&[1.0_f32, -1.0, 0.5, 0.5], 2, 1);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn remix_four_to_two_keeps_front_channels() {
        let out = remix_channels(&[0.1_f32, 0.2, 0.3, 0.4], 4, 2);
        assert_eq!(out, vec![0.1, 0.2]);
    }

    #[test]
    fn remix_stereo_to_three_fills_with_average() {
        let out = remix_channels(&[0.2_f32, 0.4], 2, 3);
        assert_eq!(out.len(), 3);
        assert!((out[2] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn remix_drops_partial_frame_and_zero_channels() {
        assert_eq!(remix_channels(&[1.0_f32, 1.0, 1.0], 2, 1), vec![1.0]);
        assert!(remix_channels(&[1.0_f32], 0, 1).is_empty());
        assert!(remix_channels(&[1.0_f32], 1, 0).is_empty());
    }

    // ---- StreamResampler ---------------------------------------------------

    #[test]
    fn identity_rate_passes_through() {
        let mut r = StreamResampler::new(1, 24_000, 24_000);
        assert!(r.is_identity());
        assert_eq!(r.process(&[0.1, 0.2]), vec![0.1, 0.2]);
    }

    #[test]
    fn downsample_48k_to_16k_length() {
        let mut r = StreamResampler::new(1, 48_000, 16_000);
        let out = r.process(&vec![0.5_f32; 480]);
        // Positions 0, 3, ..., 477 have a successor frame.
        assert_eq!(out.len(), 160);
        assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn upsample_interpolates_midpoints() {
        let mut r = StreamResampler::new(1, 8_000, 16_000);
        let out = r.process(&[0.0, 1.0, 0.0]);
        assert_eq!(out.len(), 4);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[2] - 1.0).abs() < 1e-6);
        assert!((out[3] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn output_is_independent_of_chunking() {
        let input: Vec<f32> = (0..2_000).map(|i| ((i as f32) * 0.01).sin()).collect();

        let mut whole = StreamResampler::new(1, 44_100, 24_000);
        let expected = whole.process(&input);

        let mut chunked = StreamResampler::new(1, 44_100, 24_000);
        let mut got = Vec::new();
        for chunk in input.chunks(37) {
            got.extend(chunked.process(chunk));
        }

        assert_eq!(got.len(), expected.len());
        for (a, b) in got.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn stereo_resample_keeps_channels_separate() {
        let mut r = StreamResampler::new(2, 16_000, 8_000);
        let input = [1.0_f32, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let out = r.process(&input);
        assert_eq!(out, vec![1.0, -1.0, 1.0, -1.0]);
    }

    // ---- FormatConverter ---------------------------------------------------

    #[test]
    fn converter_remixes_and_resamples() {
        let mut conv = FormatConverter::new(1, 16_000);
        let stereo_48k = vec![0.25_f32; 960]; // 480 frames
        let out = conv.convert(&stereo_48k, 2, 48_000);
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn converter_matching_format_is_passthrough() {
        let mut conv = FormatConverter::new(1, 24_000);
        assert_eq!(conv.convert(&[0.1, 0.2, 0.3], 1, 24_000), vec![0.1, 0.2, 0.3]);
        assert_eq!(conv.target(), (1, 24_000));
    }
}
