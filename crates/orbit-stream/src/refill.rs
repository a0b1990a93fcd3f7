//! Refill scheduler.
//!
//! Once per service tick: ask the device how many buffers it has finished,
//! then for each one, in the order the device hands them back, unqueue it,
//! decode fresh PCM into it and queue it again. Unqueue, fill and requeue of
//! one buffer happen back to back on the tick thread, so the pool never needs
//! a lock.

use crate::backend::{BufferId, PlaybackDevice, SourceId};
use crate::config::EndOfStreamPolicy;
use crate::decode::{FrameDecoder, StreamSource};
use crate::error::{DeviceError, SessionError};
use crate::pool::BufferPool;

/// What one service tick did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefillReport {
    /// Buffers the device reported as processed.
    pub processed: usize,
    /// Buffers refilled and queued again.
    pub refilled: usize,
    pub frames_decoded: usize,
    /// The source ran out and the policy is [`EndOfStreamPolicy::Stop`].
    pub end_of_stream: bool,
    /// Nothing is left on the device queue and nothing more will be queued.
    pub drained: bool,
}

#[derive(Debug)]
pub struct RefillScheduler {
    policy: EndOfStreamPolicy,
    end_reached: bool,
    rewinds: u64,
}

impl RefillScheduler {
    pub fn new(policy: EndOfStreamPolicy) -> Self {
        Self {
            policy,
            end_reached: false,
            rewinds: 0,
        }
    }

    /// True once the source ran out under [`EndOfStreamPolicy::Stop`].
    pub fn end_reached(&self) -> bool {
        self.end_reached
    }

    /// How many times the source was rewound under [`EndOfStreamPolicy::Loop`].
    pub fn rewinds(&self) -> u64 {
        self.rewinds
    }

    /// Decode into the free buffer `id` and upload it to the device.
    ///
    /// Returns the frames now held by the buffer; zero means there was
    /// nothing left to play and the buffer was not uploaded.
    pub fn fill_buffer<D, S>(
        &mut self,
        device: &mut D,
        stream: &mut StreamSource<S>,
        pool: &mut BufferPool,
        id: BufferId,
    ) -> Result<usize, SessionError>
    where
        D: PlaybackDevice,
        S: FrameDecoder,
    {
        if self.end_reached {
            return Ok(0);
        }
        let policy = self.policy;
        let mut rewinds = 0u64;
        let frames = pool.fill_with(id, |dst| -> Result<usize, SessionError> {
            let mut filled = 0usize;
            let mut just_rewound = false;
            while filled < dst.len() {
                let outcome = stream.read_frames(&mut dst[filled..])?;
                filled += outcome.frames;
                if filled == dst.len() || !outcome.exhausted {
                    continue;
                }
                match policy {
                    EndOfStreamPolicy::Stop => break,
                    EndOfStreamPolicy::SilencePad => {
                        dst[filled..].fill(0);
                        filled = dst.len();
                    }
                    EndOfStreamPolicy::Loop => {
                        if just_rewound && outcome.frames == 0 {
                            tracing::warn!("source is empty; cannot loop");
                            break;
                        }
                        stream.rewind()?;
                        rewinds += 1;
                        just_rewound = true;
                    }
                }
            }
            Ok(filled)
        })?;
        self.rewinds += rewinds;

        if self.policy == EndOfStreamPolicy::Stop && stream.is_exhausted() {
            if !self.end_reached {
                tracing::info!(frames_read = stream.frames_read(), "end of stream reached");
            }
            self.end_reached = true;
        }
        if frames == 0 {
            return Ok(0);
        }

        let pcm = pool.get(id).map(|b| b.pcm()).unwrap_or_default();
        device.fill_buffer(id, pcm, stream.sample_rate())?;
        tracing::debug!(buffer = %id, frames, bytes = frames * 2, "filled buffer");
        Ok(frames)
    }

    /// Service one tick: recycle every buffer the device has finished.
    pub fn service<D, S>(
        &mut self,
        device: &mut D,
        source: SourceId,
        stream: &mut StreamSource<S>,
        pool: &mut BufferPool,
    ) -> Result<RefillReport, SessionError>
    where
        D: PlaybackDevice,
        S: FrameDecoder,
    {
        let mut report = RefillReport {
            processed: device.processed_count(source)?,
            ..RefillReport::default()
        };

        for _ in 0..report.processed {
            let id = unqueue_one(device, source)?;
            pool.release_head(id)?;
            tracing::debug!(buffer = %id, "refilling buffer");

            let frames = self.fill_buffer(device, stream, pool, id)?;
            if frames == 0 {
                continue;
            }
            report.frames_decoded += frames;
            queue_with_retry(device, source, &[id])?;
            pool.mark_queued(id)?;
            report.refilled += 1;
            tracing::debug!(buffer = %id, "re-queued buffer");
        }

        report.end_of_stream = self.end_reached;
        report.drained = self.end_reached && pool.queued_len() == 0;
        Ok(report)
    }
}

/// Queue `buffers`, retrying once before giving up.
pub(crate) fn queue_with_retry<D: PlaybackDevice>(
    device: &mut D,
    source: SourceId,
    buffers: &[BufferId],
) -> Result<(), DeviceError> {
    match device.queue_buffers(source, buffers) {
        Ok(()) => Ok(()),
        Err(first) => {
            tracing::warn!(error = %first, "queue failed; retrying once");
            device.queue_buffers(source, buffers)
        }
    }
}

fn unqueue_one<D: PlaybackDevice>(device: &mut D, source: SourceId) -> Result<BufferId, DeviceError> {
    let ids = device.unqueue_buffers(source, 1)?;
    match ids.as_slice() {
        [id] => Ok(*id),
        other => Err(DeviceError::new(
            "unqueue buffers",
            format!("expected 1 buffer, device returned {}", other.len()),
        )),
    }
}
