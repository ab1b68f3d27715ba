//! Playback driver for an [`AudioClipStream`].
//!
//! The player is purely a consumer: every playback period it pulls one
//! period's worth of samples from the bound stream and writes them to an
//! [`AudioSink`].  It waits in `Buffering` until the stream reports ready,
//! and signals completion exactly once, when the stream is complete and
//! every sample has been read.
//!
//! [`AudioPlayer::play`] spawns a tokio interval task when called inside a
//! runtime.  Outside one, the caller drives playback with
//! [`AudioPlayer::tick`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::clip_stream::AudioClipStream;

type CompleteCallback = Box<dyn FnOnce() + Send>;

// ---------------------------------------------------------------------------
// AudioSink
// ---------------------------------------------------------------------------

/// Destination for played samples (a device back-end, a file, a test).
pub trait AudioSink: Send + Sync {
    /// Receive one period of interleaved samples.
    fn write(&self, samples: &[f32], channels: u16, sample_rate: u32);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn write(&self, _samples: &[f32], _channels: u16, _sample_rate: u32) {}
}

/// Test sink that keeps every sample it receives.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct CollectingSink {
    samples: Mutex<Vec<f32>>,
}

#[cfg(test)]
impl CollectingSink {
    pub fn samples(&self) -> Vec<f32> {
        self.samples.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl AudioSink for CollectingSink {
    fn write(&self, samples: &[f32], _channels: u16, _sample_rate: u32) {
        self.samples.lock().unwrap().extend_from_slice(samples);
    }
}

// ---------------------------------------------------------------------------
// PlayerState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    /// Not playing; the read position is kept.
    #[default]
    Stopped,
    /// `play` was called but the stream is not ready yet.
    Buffering,
    Playing,
    Paused,
    /// The stream was complete and fully read.
    Finished,
}

// ---------------------------------------------------------------------------
// AudioPlayer
// ---------------------------------------------------------------------------

struct PlayerInner {
    sink: Arc<dyn AudioSink>,
    period: Duration,
    stream: Mutex<Option<Arc<AudioClipStream>>>,
    state: Mutex<PlayerState>,
    completed: AtomicBool,
    callbacks: Mutex<Vec<CompleteCallback>>,
}

impl PlayerInner {
    fn state(&self) -> MutexGuard<'_, PlayerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks(&self) -> MutexGuard<'_, Vec<CompleteCallback>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stream(&self) -> Option<Arc<AudioClipStream>> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn tick(&self) -> usize {
        let Some(stream) = self.stream() else {
            return 0;
        };

        {
            let mut state = self.state();
            match *state {
                PlayerState::Buffering if stream.is_ready() => {
                    log::debug!(target: "player", "buffered, starting playback");
                    *state = PlayerState::Playing;
                }
                // Completed without a single sample: nothing will ever
                // become ready, so go straight to completion.
                PlayerState::Buffering if stream.is_drained() => {
                    log::debug!(target: "player", "stream completed empty");
                    *state = PlayerState::Playing;
                }
                PlayerState::Playing => {}
                _ => return 0,
            }
        }

        let per_period = period_samples(&stream, self.period);
        let mut buf = vec![0.0_f32; per_period];
        let n = stream.read(&mut buf);
        if n > 0 {
            self.sink
                .write(&buf[..n], stream.channels(), stream.sample_rate());
        }

        if stream.is_drained() {
            self.finish();
        }
        n
    }

    fn finish(&self) {
        {
            let mut state = self.state();
            if *state != PlayerState::Playing {
                return;
            }
            *state = PlayerState::Finished;
        }
        let callbacks = {
            let mut callbacks = self.callbacks();
            if self.completed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *callbacks)
        };

        log::info!(target: "player", "playback complete");
        for callback in callbacks {
            callback();
        }
    }
}

/// Samples in one playback period, at least one frame.
fn period_samples(stream: &AudioClipStream, period: Duration) -> usize {
    let channels = stream.channels().max(1) as usize;
    let frames = (stream.sample_rate() as f64 * period.as_secs_f64()).ceil() as usize;
    frames.max(1) * channels
}

/// Plays a bound clip stream into a sink.
pub struct AudioPlayer {
    inner: Arc<PlayerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AudioPlayer {
    pub fn new(sink: Arc<dyn AudioSink>, period: Duration) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                sink,
                period: period.max(Duration::from_millis(1)),
                stream: Mutex::new(None),
                state: Mutex::new(PlayerState::Stopped),
                completed: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
            }),
            task: Mutex::new(None),
        }
    }

    /// Bind a stream.  Stops any current playback and re-arms completion.
    pub fn bind(&self, stream: Arc<AudioClipStream>) {
        self.stop();
        *self
            .inner
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(stream);
        *self.inner.state() = PlayerState::Stopped;
        let _callbacks = self.inner.callbacks();
        self.inner.completed.store(false, Ordering::Release);
    }

    /// Start or resume playback.
    ///
    /// Inside a tokio runtime this spawns the playback loop (once); otherwise
    /// the caller must call [`tick`](Self::tick) itself.
    pub fn play(&self) {
        if self.inner.stream().is_none() {
            log::warn!(target: "player", "play called with no stream bound");
            return;
        }

        {
            let mut state = self.inner.state();
            match *state {
                PlayerState::Playing | PlayerState::Buffering | PlayerState::Finished => return,
                PlayerState::Stopped | PlayerState::Paused => *state = PlayerState::Buffering,
            }
        }

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                *task = Some(handle.spawn(playback_loop(inner)));
            }
            Err(_) => {
                log::debug!(target: "player", "no tokio runtime, playback is driven by tick()");
            }
        }
    }

    /// Pause playback; `play` resumes from the same position.
    pub fn pause(&self) {
        let mut state = self.inner.state();
        if matches!(*state, PlayerState::Playing | PlayerState::Buffering) {
            *state = PlayerState::Paused;
        }
    }

    /// Stop playback and end the playback loop.  Completion is not signalled.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state();
            if *state != PlayerState::Finished {
                *state = PlayerState::Stopped;
            }
        }
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    /// Pull and play one period.  Returns the number of samples played.
    pub fn tick(&self) -> usize {
        self.inner.tick()
    }

    /// Register a callback for the end of playback.  Fires immediately if
    /// playback already completed.
    pub fn on_playback_complete(&self, callback: impl FnOnce() + Send + 'static) {
        {
            // `finish` flips `completed` under this lock, so a registration
            // either lands before the drain or sees the flag.
            let mut callbacks = self.inner.callbacks();
            if !self.inner.completed.load(Ordering::Acquire) {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    pub fn state(&self) -> PlayerState {
        *self.inner.state()
    }

    pub fn is_complete(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Read position of the bound stream.
    pub fn position(&self) -> u64 {
        self.inner
            .stream()
            .map(|s| s.read_position())
            .unwrap_or(0)
    }

    pub fn period(&self) -> Duration {
        self.inner.period
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn playback_loop(inner: Arc<PlayerInner>) {
    let mut interval = tokio::time::interval(inner.period);
    loop {
        interval.tick().await;
        let state = *inner.state();
        match state {
            PlayerState::Stopped | PlayerState::Finished => break,
            PlayerState::Paused => continue,
            PlayerState::Buffering | PlayerState::Playing => {
                inner.tick();
            }
        }
    }
    log::debug!(target: "player", "playback loop ended");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
