//! Playback session: owns the stream source, the buffer pool and every device
//! handle, and moves through `Uninitialized -> Primed -> Playing -> Stopped`.
//!
//! Any failure after the first device resource is acquired tears the session
//! down before the error is returned. Teardown releases the source, the
//! buffers, the context and finally the device, then closes the stream
//! source. A stopped session cannot be restarted.

use std::time::Duration;

use crate::backend::{BufferId, PlaybackDevice, SourceId};
use crate::config::StreamConfig;
use crate::decode::{FrameDecoder, StreamSource, SymphoniaDecoder};
use crate::error::{PoolError, SessionError};
use crate::pool::BufferPool;
use crate::position::{PositionUpdater, Vec3};
use crate::refill::{RefillReport, RefillScheduler, queue_with_retry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    /// Buffers are filled; nothing is queued yet.
    Primed,
    Playing,
    Stopped,
}

/// Outcome of one service tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickReport {
    pub position: Vec3,
    pub refill: RefillReport,
    /// Buffers on the device queue after the refill.
    pub queued: usize,
}

/// Device handles acquired so far, released in reverse order.
#[derive(Debug, Default)]
struct Acquired {
    context: bool,
    buffers: Vec<BufferId>,
    source: Option<SourceId>,
}

pub struct PlaybackSession<D: PlaybackDevice, S: FrameDecoder = SymphoniaDecoder> {
    config: StreamConfig,
    device: D,
    stream: Option<StreamSource<S>>,
    pool: BufferPool,
    refill: RefillScheduler,
    position: PositionUpdater,
    acquired: Acquired,
    device_open: bool,
    state: SessionState,
}

impl<D: PlaybackDevice, S: FrameDecoder> PlaybackSession<D, S> {
    /// Take ownership of an opened device and stream source.
    pub fn new(config: StreamConfig, device: D, stream: StreamSource<S>) -> Self {
        Self {
            refill: RefillScheduler::new(config.end_of_stream),
            position: PositionUpdater::new(config.orbit),
            config,
            device,
            stream: Some(stream),
            pool: BufferPool::allocate(&[], 0),
            acquired: Acquired::default(),
            device_open: true,
            state: SessionState::Uninitialized,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Create the context, allocate the pool and fill every buffer once.
    pub fn prime(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::Uninitialized)?;
        let result = self.try_prime();
        self.fail_closed(result)?;
        self.state = SessionState::Primed;
        Ok(())
    }

    /// Queue the primed buffers in pool order and start playback.
    pub fn start(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::Primed)?;
        let result = self.try_start();
        self.fail_closed(result)?;
        self.state = SessionState::Playing;
        Ok(())
    }

    /// Update the source position, then recycle processed buffers.
    pub fn tick(&mut self, elapsed: Duration) -> Result<TickReport, SessionError> {
        self.expect_state(SessionState::Playing)?;
        let result = self.try_tick(elapsed);
        self.fail_closed(result)
    }

    /// Stop playback and release everything. A no-op once stopped.
    pub fn stop(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        tracing::info!(state = ?self.state, "stopping session");
        self.teardown();
    }

    fn try_prime(&mut self) -> Result<(), SessionError> {
        self.config.validate()?;
        let frames_per_buffer = self.config.frames_per_buffer();

        self.device.create_context()?;
        self.acquired.context = true;

        let ids = self.device.allocate_buffers(self.config.buffer_count)?;
        self.acquired.buffers = ids.clone();
        self.pool = BufferPool::allocate(&ids, frames_per_buffer);
        tracing::info!(
            buffers = ids.len(),
            frames_per_buffer,
            buffer_size_bytes = self.config.bytes_per_buffer(),
            "allocated buffer pool"
        );

        let stream = self.stream.as_mut().ok_or(SessionError::InvalidState {
            expected: SessionState::Uninitialized,
            found: SessionState::Stopped,
        })?;
        for id in ids {
            self.refill
                .fill_buffer(&mut self.device, stream, &mut self.pool, id)?;
        }

        let source = self.device.create_source()?;
        self.acquired.source = Some(source);
        self.device.set_source_gain(source, self.config.gain)?;
        Ok(())
    }

    fn try_start(&mut self) -> Result<(), SessionError> {
        let source = self.source()?;
        self.device.set_listener_position(Vec3::ORIGIN)?;
        self.position
            .update(&mut self.device, source, Duration::ZERO)?;

        let primed: Vec<BufferId> = self
            .pool
            .iter()
            .filter(|b| b.len_frames() > 0)
            .map(|b| b.id())
            .collect();
        if !primed.is_empty() {
            queue_with_retry(&mut self.device, source, &primed)?;
        }
        for id in &primed {
            self.pool.mark_queued(*id)?;
        }

        self.device.play(source)?;
        self.pool.set_playing(true);
        tracing::info!(queued = primed.len(), "playing");
        Ok(())
    }

    fn try_tick(&mut self, elapsed: Duration) -> Result<TickReport, SessionError> {
        let source = self.source()?;
        let position = self.position.update(&mut self.device, source, elapsed)?;
        let stream = self.stream.as_mut().ok_or(SessionError::InvalidState {
            expected: SessionState::Playing,
            found: SessionState::Stopped,
        })?;
        let refill = self
            .refill
            .service(&mut self.device, source, stream, &mut self.pool)?;

        // The pool mirrors the device queue; a drift means buffers were lost.
        let queued = self.device.queued_count(source)?;
        if queued != self.pool.queued_len() {
            return Err(PoolError::QueueMismatch {
                device: queued,
                pool: self.pool.queued_len(),
            }
            .into());
        }
        Ok(TickReport {
            position,
            refill,
            queued,
        })
    }

    fn source(&self) -> Result<SourceId, SessionError> {
        self.acquired.source.ok_or(SessionError::InvalidState {
            expected: SessionState::Primed,
            found: self.state,
        })
    }

    fn expect_state(&self, expected: SessionState) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                expected,
                found: self.state,
            })
        }
    }

    /// Tear down on error so the caller only ever sees a released session.
    fn fail_closed<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(e) = &result {
            tracing::error!(error = %e, state = ?self.state, "session failed; tearing down");
            self.teardown();
        }
        result
    }

    fn teardown(&mut self) {
        if let Some(source) = self.acquired.source.take() {
            if self.state == SessionState::Playing {
                if let Err(e) = self.device.stop(source) {
                    tracing::warn!(error = %e, "stop failed during teardown");
                }
                self.pool.set_playing(false);
            }
            self.device.delete_source(source);
        }
        if !self.acquired.buffers.is_empty() {
            let buffers = std::mem::take(&mut self.acquired.buffers);
            self.device.delete_buffers(&buffers);
        }
        if self.acquired.context {
            self.acquired.context = false;
            self.device.destroy_context();
        }
        if self.device_open {
            self.device_open = false;
            self.device.close();
        }
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        self.state = SessionState::Stopped;
        tracing::debug!("session torn down");
    }
}

impl<D: PlaybackDevice, S: FrameDecoder> Drop for PlaybackSession<D, S> {
    fn drop(&mut self) {
        if self.state != SessionState::Stopped {
            self.teardown();
        }
    }
}
