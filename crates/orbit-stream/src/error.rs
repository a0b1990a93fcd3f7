//! Error types for the streaming engine.
//!
//! Decode and device failures are fatal to a session; the driver tears the
//! session down in order and hands the error back to its caller.
//! End-of-stream is not an error (see [`crate::decode::ReadOutcome`]).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::backend::BufferId;
use crate::pool::BufferState;
use crate::session::SessionState;

/// Invalid [`crate::config::StreamConfig`] values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("buffer count must be at least 2 (got {0})")]
    BufferCount(usize),
    #[error("buffer duration must be a positive number of seconds (got {0})")]
    BufferDuration(f32),
    #[error("buffer of {frames} frames exceeds the {max}-frame limit")]
    BufferTooLarge { frames: usize, max: usize },
    #[error("sample rate must be non-zero (got {0})")]
    SampleRate(u32),
    #[error("tick interval must be in (0, 100ms] (got {0:?})")]
    TickInterval(Duration),
    #[error("orbit {name} must be finite (got {value})")]
    Orbit { name: &'static str, value: f32 },
    #[error("gain must be a non-negative number (got {0})")]
    Gain(f32),
}

/// The source cannot be opened or decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("open {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported format: {0}")]
    Unsupported(String),
    #[error("corrupt stream: {0}")]
    Corrupt(String),
    #[error("resampler: {0}")]
    Resample(String),
}

/// A playback device operation failed.
#[derive(Debug, Error)]
#[error("{op}: {reason}")]
pub struct DeviceError {
    /// Operation that failed, e.g. `"queue buffers"`.
    pub op: &'static str,
    pub reason: String,
}

impl DeviceError {
    pub fn new(op: &'static str, reason: impl Into<String>) -> Self {
        Self {
            op,
            reason: reason.into(),
        }
    }
}

/// Buffer ownership rules were broken.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("buffer {0} does not belong to the pool")]
    UnknownBuffer(BufferId),
    #[error("buffer {id} is {state:?}, expected Free")]
    NotFree { id: BufferId, state: BufferState },
    #[error("device returned buffer {got}, expected queue head {expected:?}")]
    OutOfOrder {
        expected: Option<BufferId>,
        got: BufferId,
    },
    #[error("{len} frames exceed buffer capacity of {capacity}")]
    Overflow { len: usize, capacity: usize },
    #[error("device holds {device} queued buffers, pool expects {pool}")]
    QueueMismatch { device: usize, pool: usize },
}

/// Anything that ends a playback session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("buffer pool: {0}")]
    Pool(#[from] PoolError),
    #[error("session is {found:?}, expected {expected:?}")]
    InvalidState {
        expected: SessionState,
        found: SessionState,
    },
}
