//! Streaming playback engine for a single decoded source on a moving orbit.
//!
//! A small pool of fixed-size PCM buffers is kept queued on a buffer-queue
//! output device. A periodic service tick moves the source along its orbit
//! and refills whatever the device has finished playing.
//!
//! - [`decode`]: media file to mono 16-bit PCM at the engine rate
//! - [`pool`] and [`refill`]: buffer ownership and recycling
//! - [`position`] and [`spatial`]: orbit and how it is heard
//! - [`session`] and [`driver`]: lifecycle and the tick loop
//! - [`backend`], [`playback`] and [`device`]: the output device boundary and its CPAL implementation

pub mod backend;
pub mod config;
pub mod decode;
pub mod device;
pub mod driver;
pub mod error;
pub mod playback;
pub mod pool;
pub mod position;
pub mod refill;
pub mod resample;
pub mod session;
pub mod spatial;

#[cfg(test)]
mod test_support;

pub use backend::{BufferId, PlaybackDevice, SourceId};
pub use config::{EndOfStreamPolicy, OrbitConfig, StreamConfig};
pub use decode::{FrameDecoder, StreamSource, SymphoniaDecoder};
pub use driver::{IntervalTicker, SessionSummary, StopReason, Ticker};
pub use error::{ConfigError, DecodeError, DeviceError, PoolError, SessionError};
pub use playback::CpalDevice;
pub use session::{PlaybackSession, SessionState};
