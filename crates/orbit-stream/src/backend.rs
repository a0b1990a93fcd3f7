//! Playback device boundary.
//!
//! Models a buffer-queue output device: the caller allocates a handful of
//! device buffers, uploads PCM into them, queues them on a source and later
//! unqueues the ones the device reports as processed. The device renders on
//! its own thread, so [`PlaybackDevice::processed_count`] is a snapshot that
//! may change between two calls.

use std::fmt;

use crate::error::DeviceError;
use crate::position::Vec3;

/// Opaque device buffer handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque device source handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src#{}", self.0)
    }
}

/// Operations the streaming engine needs from an output device.
///
/// Release operations (`destroy_context`, `delete_*`, `close`) cannot fail from
/// the caller's point of view; implementations log what they cannot release.
pub trait PlaybackDevice {
    fn create_context(&mut self) -> Result<(), DeviceError>;
    fn destroy_context(&mut self);

    fn create_source(&mut self) -> Result<SourceId, DeviceError>;
    fn delete_source(&mut self, source: SourceId);

    fn allocate_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError>;
    fn delete_buffers(&mut self, buffers: &[BufferId]);

    /// Upload mono 16-bit PCM into `buffer`, replacing its previous contents.
    fn fill_buffer(
        &mut self,
        buffer: BufferId,
        pcm: &[i16],
        sample_rate: u32,
    ) -> Result<(), DeviceError>;

    /// Append `buffers` to the source queue, in order.
    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), DeviceError>;

    /// Remove `count` processed buffers from the head of the source queue.
    fn unqueue_buffers(&mut self, source: SourceId, count: usize)
    -> Result<Vec<BufferId>, DeviceError>;

    /// Buffers the device finished playing and that are waiting to be unqueued.
    fn processed_count(&self, source: SourceId) -> Result<usize, DeviceError>;

    /// Buffers currently on the source queue, processed ones included.
    fn queued_count(&self, source: SourceId) -> Result<usize, DeviceError>;

    fn set_source_gain(&mut self, source: SourceId, gain: f32) -> Result<(), DeviceError>;
    fn set_source_position(&mut self, source: SourceId, position: Vec3) -> Result<(), DeviceError>;
    fn set_listener_position(&mut self, position: Vec3) -> Result<(), DeviceError>;

    fn play(&mut self, source: SourceId) -> Result<(), DeviceError>;
    fn stop(&mut self, source: SourceId) -> Result<(), DeviceError>;

    /// Close the device handle. Called last during teardown.
    fn close(&mut self);
}
