//! Fixed-capacity circular (ring) buffer for decoded audio samples.
//!
//! The producer side ([`push_slice`](RingBuffer::push_slice)) never blocks.
//! When there is not enough free space the configured [`OverflowPolicy`]
//! decides which samples are lost: the oldest unread ones (live streaming)
//! or the incoming ones.
//!
//! # Example
//!
//! ```rust
//! use speech_runtime::audio::{OverflowPolicy, RingBuffer};
//!
//! let mut buf = RingBuffer::new(4, OverflowPolicy::DropOldest);
//! let dropped = buf.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]);
//! assert_eq!(dropped, 1);
//!
//! let mut out = [0.0; 4];
//! assert_eq!(buf.pop_into(&mut out), 4);
//! assert_eq!(out, [2.0, 3.0, 4.0, 5.0]);
//! ```

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OverflowPolicy
// ---------------------------------------------------------------------------

/// What happens when the producer outruns the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Overwrite the oldest unread samples (streaming / live mode).
    #[default]
    DropOldest,
    /// Keep what is buffered and discard the incoming samples.
    DropNewest,
}

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// A fixed-capacity circular buffer.
///
/// Generic over `T: Copy + Default`; the audio path uses `RingBuffer<f32>`.
/// The buffer never allocates beyond its initial capacity.
pub struct RingBuffer<T> {
    buf: Vec<T>,
    capacity: usize,
    /// Index of the oldest unread sample.
    read_pos: usize,
    /// Number of unread samples currently stored (≤ `capacity`).
    len: usize,
    policy: OverflowPolicy,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a new ring buffer with the given `capacity`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            buf: vec![T::default(); capacity],
            capacity,
            read_pos: 0,
            len: 0,
            policy,
        }
    }

    /// Append `data`; returns how many samples were lost to overflow.
    pub fn push_slice(&mut self, data: &[T]) -> usize {
        let mut dropped = 0;
        for &item in data {
            if self.len == self.capacity {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        self.read_pos = (self.read_pos + 1) % self.capacity;
                        self.len -= 1;
                    }
                    OverflowPolicy::DropNewest => {
                        dropped += 1;
                        continue;
                    }
                }
                dropped += 1;
            }
            let write_pos = (self.read_pos + self.len) % self.capacity;
            self.buf[write_pos] = item;
            self.len += 1;
        }
        dropped
    }

    /// Move up to `out.len()` of the oldest samples into `out`, in order.
    /// Returns the number of samples written.
    pub fn pop_into(&mut self, out: &mut [T]) -> usize {
        let n = out.len().min(self.len);
        for slot in out.iter_mut().take(n) {
            *slot = self.buf[self.read_pos];
            self.read_pos = (self.read_pos + 1) % self.capacity;
        }
        self.len -= n;
        n
    }

    /// Drain all stored samples in chronological order and reset the buffer.
    pub fn drain(&mut self) -> Vec<T> {
        let mut result = vec![T::default(); self.len];
        self.pop_into(&mut result);
        self.clear();
        result
    }

    /// Discard all samples.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.len = 0;
    }

    /// Number of unread samples currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when the buffer contains no samples.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of samples the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` when the next push would overflow.
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: OverflowPolicy) {
        self.policy = policy;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
