//! Pool of preallocated sample ring buffers.
//!
//! Synthesis requests are short and frequent; allocating a multi-second ring
//! for every clip churns memory.  The pool hands out buffers under a
//! pool-level lock held only for the acquire/release itself.  A
//! [`PooledBuffer`] returns to its pool when dropped, so a clip stream gives
//! its buffer back as soon as the last reference to it goes away.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

use super::buffer::{OverflowPolicy, RingBuffer};
use super::clip_stream::{AudioClipStream, ClipStreamConfig};

// ---------------------------------------------------------------------------
// ClipStreamPool
// ---------------------------------------------------------------------------

struct PoolShared {
    idle: Mutex<Vec<RingBuffer<f32>>>,
    capacity: usize,
    max_idle: usize,
}

/// Shared, cloneable handle to a buffer pool.
#[derive(Clone)]
pub struct ClipStreamPool {
    shared: Arc<PoolShared>,
}

impl ClipStreamPool {
    /// Preallocate `size` buffers of `capacity` samples each.  At most `size`
    /// buffers are kept idle; extra ones are freed on release.
    pub fn new(capacity: usize, size: usize) -> Self {
        let capacity = capacity.max(1);
        let idle = (0..size)
            .map(|_| RingBuffer::new(capacity, OverflowPolicy::default()))
            .collect();
        Self {
            shared: Arc::new(PoolShared {
                idle: Mutex::new(idle),
                capacity,
                max_idle: size,
            }),
        }
    }

    /// Pool sized for streams built from `config`.
    pub fn for_config(config: &ClipStreamConfig, size: usize) -> Self {
        Self::new(config.capacity(), size)
    }

    /// Take an idle buffer, allocating a new one when the pool is empty.
    pub fn acquire(&self) -> PooledBuffer {
        let reused = self
            .shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let ring = match reused {
            Some(ring) => ring,
            None => {
                log::debug!(target: "clip_stream", "pool empty, allocating a new buffer");
                RingBuffer::new(self.shared.capacity, OverflowPolicy::default())
            }
        };

        PooledBuffer {
            ring,
            home: Some(Arc::clone(&self.shared)),
        }
    }

    /// Build a clip stream on a pooled buffer.  A config whose capacity does
    /// not match the pool gets a dedicated buffer instead.
    pub fn stream(&self, config: ClipStreamConfig) -> AudioClipStream {
        if config.capacity() != self.shared.capacity {
            log::debug!(
                target: "clip_stream",
                "capacity {} does not match pool ({}), not pooling",
                config.capacity(),
                self.shared.capacity
            );
            return AudioClipStream::new(config);
        }
        AudioClipStream::with_buffer(config, self.acquire())
    }

    /// Buffers currently waiting in the pool.
    pub fn idle_count(&self) -> usize {
        self.shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.shared.capacity
    }
}

// ---------------------------------------------------------------------------
// PooledBuffer
// ---------------------------------------------------------------------------

/// A ring buffer that may belong to a pool.  Derefs to [`RingBuffer`].
pub struct PooledBuffer {
    ring: RingBuffer<f32>,
    home: Option<Arc<PoolShared>>,
}

impl PooledBuffer {
    /// Wrap a buffer that is not owned by any pool.
    pub fn detached(ring: RingBuffer<f32>) -> Self {
        Self { ring, home: None }
    }

    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }
}

impl Deref for PooledBuffer {
    type Target = RingBuffer<f32>;

    fn deref(&self) -> &Self::Target {
        &self.ring
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ring
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(home) = self.home.take() else {
            return;
        };
        let mut idle = home.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < home.max_idle {
            let placeholder = RingBuffer::new(1, OverflowPolicy::default());
            let mut ring = std::mem::replace(&mut self.ring, placeholder);
            ring.clear();
            idle.push(ring);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClipStreamConfig {
        ClipStreamConfig {
            channels: 1,
            sample_rate: 100,
            ready_secs: 0.1,
            buffer_secs: 1.0,
            overflow: OverflowPolicy::DropOldest,
        }
    }

    #[test]
    fn preallocates_and_returns_on_drop() {
        let pool = ClipStreamPool::new(16, 2);
        assert_eq!(pool.idle_count(), 2);

        let a = pool.acquire();
        let b = pool.acquire();
        assert!(a.is_pooled());
        assert_eq!(pool.idle_count(), 0);

        drop(a);
        assert_eq!(pool.idle_count(), 1);
        drop(b);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn empty_pool_allocates_and_caps_idle() {
        let pool = ClipStreamPool::new(8, 1);
        let a = pool.acquire();
        let b = pool.acquire(); // allocated on demand
        assert_eq!(b.capacity(), 8);
        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn released_buffer_comes_back_empty() {
        let pool = ClipStreamPool::new(4, 1);
        {
            let mut buf = pool.acquire();
            buf.push_slice(&[1.0, 2.0, 3.0]);
        }
        let buf = pool.acquire();
        assert!(buf.is_empty());
    }

    #[test]
    fn stream_uses_pool_and_gives_buffer_back() {
        let pool = ClipStreamPool::for_config(&config(), 1);
        let stream = pool.stream(config());
        assert_eq!(pool.idle_count(), 0);
        stream.add_samples(&[0.5; 20]);
        assert_eq!(stream.capacity(), 100);
        drop(stream);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn mismatched_capacity_bypasses_pool() {
        let pool = ClipStreamPool::new(10, 1);
        let stream = pool.stream(config());
        assert_eq!(stream.capacity(), 100);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn detached_buffer_is_not_pooled() {
        let buf = PooledBuffer::detached(RingBuffer::new(4, OverflowPolicy::DropNewest));
        assert!(!buf.is_pooled());
        assert_eq!(buf.policy(), OverflowPolicy::DropNewest);
    }
}
