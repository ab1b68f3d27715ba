//! Ring-buffered audio clip fed by a decoder and drained by a player.
//!
//! One producer (the decode task) calls [`AudioClipStream::add_samples`];
//! one consumer (the [`AudioPlayer`](super::AudioPlayer)) calls
//! [`AudioClipStream::read`].  The ring buffer lock is held only for the
//! copy itself; counters are atomics so status queries never contend with
//! either side.
//!
//! # Counters
//!
//! * `total_samples`: samples that made it into the clip.  Samples evicted
//!   before being read (drop-oldest) or rejected (drop-newest) are not
//!   counted, so pushing twice the capacity into a fresh stream leaves
//!   `total_samples == capacity`.
//! * `read_position`: samples handed to the consumer; never exceeds
//!   `total_samples`.
//!
//! # Example
//!
//! ```rust
//! use speech_runtime::audio::{AudioClipStream, ClipStreamConfig, OverflowPolicy};
//!
//! let stream = AudioClipStream::new(ClipStreamConfig {
//!     channels: 1,
//!     sample_rate: 10,
//!     ready_secs: 0.5,
//!     buffer_secs: 1.0,
//!     overflow: OverflowPolicy::DropOldest,
//! });
//!
//! stream.add_samples(&[0.1; 4]);
//! assert!(!stream.is_ready());
//! stream.add_samples(&[0.2; 1]);
//! assert!(stream.is_ready());
//!
//! let mut out = [0.0; 8];
//! assert_eq!(stream.read(&mut out), 5);
//! assert_eq!(stream.read_position(), 5);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use super::buffer::{OverflowPolicy, RingBuffer};
use super::pool::PooledBuffer;

type ReadyCallback = Box<dyn FnOnce() + Send>;

// ---------------------------------------------------------------------------
// ClipStreamConfig
// ---------------------------------------------------------------------------

/// Layout and buffering parameters of a clip stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipStreamConfig {
    pub channels: u16,
    pub sample_rate: u32,
    /// Buffered duration required before playback may start.
    pub ready_secs: f32,
    /// Ring capacity expressed as a duration.
    pub buffer_secs: f32,
    pub overflow: OverflowPolicy,
}

impl Default for ClipStreamConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 24_000,
            ready_secs: 0.5,
            buffer_secs: 30.0,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl ClipStreamConfig {
    fn samples_for(&self, secs: f32) -> usize {
        let per_sec = self.channels.max(1) as f64 * self.sample_rate as f64;
        (per_sec * secs.max(0.0) as f64).ceil() as usize
    }

    /// Ring capacity in samples: `channels × sample_rate × buffer_secs`.
    pub fn capacity(&self) -> usize {
        self.samples_for(self.buffer_secs).max(1)
    }

    /// Samples needed for readiness, clamped to `1..=capacity`.
    pub fn ready_samples(&self) -> usize {
        self.samples_for(self.ready_secs).clamp(1, self.capacity())
    }
}

// ---------------------------------------------------------------------------
// AudioClipStream
// ---------------------------------------------------------------------------

/// A bounded, single-producer / single-consumer stream of decoded samples.
pub struct AudioClipStream {
    config: ClipStreamConfig,
    capacity: usize,
    ready_samples: usize,
    buffer: Mutex<PooledBuffer>,
    total: AtomicU64,
    read: AtomicU64,
    dropped: AtomicU64,
    ready: AtomicBool,
    complete: AtomicBool,
    ready_callbacks: Mutex<Vec<ReadyCallback>>,
}

impl AudioClipStream {
    /// Create a stream with its own freshly allocated ring buffer.
    pub fn new(config: ClipStreamConfig) -> Self {
        let ring = RingBuffer::new(config.capacity(), config.overflow);
        Self::with_buffer(config, PooledBuffer::detached(ring))
    }

    /// Create a stream on top of an existing (usually pooled) buffer.  The
    /// buffer's own capacity wins over the configured one.
    pub fn with_buffer(config: ClipStreamConfig, mut buffer: PooledBuffer) -> Self {
        buffer.clear();
        buffer.set_policy(config.overflow);
        let capacity = buffer.capacity();
        let ready_samples = config.ready_samples().min(capacity);

        log::debug!(
            target: "clip_stream",
            "new clip stream: {}ch @ {} Hz, capacity {capacity}, ready at {ready_samples}",
            config.channels,
            config.sample_rate
        );

        Self {
            config,
            capacity,
            ready_samples,
            buffer: Mutex::new(buffer),
            total: AtomicU64::new(0),
            read: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            complete: AtomicBool::new(false),
            ready_callbacks: Mutex::new(Vec::new()),
        }
    }

    fn lock_buffer(&self) -> MutexGuard<'_, PooledBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- producer ---------------------------------------------------------

    /// Append decoded samples.  Never blocks on the consumer; on overflow the
    /// configured policy decides what is lost.  Returns the number of
    /// samples dropped by this call.
    pub fn add_samples(&self, samples: &[f32]) -> usize {
        if samples.is_empty() {
            return 0;
        }
        if self.is_complete() {
            log::warn!(
                target: "clip_stream",
                "ignoring {} samples added after completion",
                samples.len()
            );
            return 0;
        }

        let (dropped, buffered) = {
            let mut ring = self.lock_buffer();
            let dropped = ring.push_slice(samples);
            self.total
                .fetch_add((samples.len() - dropped) as u64, Ordering::AcqRel);
            (dropped, ring.len())
        };

        if dropped > 0 {
            self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            log::debug!(target: "clip_stream", "overflow: dropped {dropped} samples");
        }

        // Readiness counts what is still buffered, not what was ever stored.
        if buffered >= self.ready_samples {
            self.mark_ready();
        }
        dropped
    }

    /// Signal that no more samples will arrive.  A stream holding at least
    /// one sample becomes ready even below the threshold.
    pub fn set_complete(&self) {
        if self.complete.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!(
            target: "clip_stream",
            "complete with {} samples ({} dropped)",
            self.total_samples(),
            self.dropped_samples()
        );
        if self.total_samples() > 0 {
            self.mark_ready();
        }
    }

    // ---- consumer ---------------------------------------------------------

    /// Move up to `out.len()` buffered samples into `out`.  Returns how many
    /// were written; the rest of `out` is left untouched.
    pub fn read(&self, out: &mut [f32]) -> usize {
        let mut ring = self.lock_buffer();
        let n = ring.pop_into(out);
        self.read.fetch_add(n as u64, Ordering::AcqRel);
        n
    }

    // ---- readiness --------------------------------------------------------

    /// Register a callback fired once, when the stream first becomes ready.
    /// Fires immediately (on the calling thread) if it already is.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut callbacks = self
                .ready_callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !self.ready.load(Ordering::Acquire) {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    fn mark_ready(&self) {
        let callbacks = {
            let mut callbacks = self
                .ready_callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.ready.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *callbacks)
        };
        log::debug!(
            target: "clip_stream",
            "ready after {} samples",
            self.total_samples()
        );
        for callback in callbacks {
            callback();
        }
    }

    // ---- status -----------------------------------------------------------

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Complete and every sample has been read.
    pub fn is_drained(&self) -> bool {
        self.is_complete() && self.read_position() >= self.total_samples()
    }

    pub fn total_samples(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn read_position(&self) -> u64 {
        self.read.load(Ordering::Acquire)
    }

    /// Samples lost to overflow so far.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Samples waiting to be read.
    pub fn buffered(&self) -> usize {
        self.lock_buffer().len()
    }

    pub fn buffered_secs(&self) -> f32 {
        self.buffered() as f32 / self.samples_per_sec() as f32
    }

    pub fn duration_secs(&self) -> f32 {
        self.total_samples() as f32 / self.samples_per_sec() as f32
    }

    fn samples_per_sec(&self) -> u64 {
        (self.config.channels.max(1) as u64 * self.config.sample_rate as u64).max(1)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ready_samples(&self) -> usize {
        self.ready_samples
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn config(&self) -> &ClipStreamConfig {
        &self.config
    }
}

impl std::fmt::Debug for AudioClipStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClipStream")
            .field("channels", &self.config.channels)
            .field("sample_rate", &self.config.sample_rate)
            .field("capacity", &self.capacity)
            .field("total_samples", &self.total_samples())
            .field("read_position", &self.read_position())
            .field("ready", &self.is_ready())
            .field("complete", &self.is_complete())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
