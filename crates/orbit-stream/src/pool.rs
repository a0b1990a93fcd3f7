//! Fixed pool of PCM buffers shared with the playback device.
//!
//! Storage is allocated once in [`BufferPool::allocate`] and only ever
//! overwritten afterwards. Each buffer is owned by exactly one side at a time:
//! - `Free`: the refill path may write into it
//! - `Queued` / `Playing`: the device owns it until it is unqueued
//!
//! The pool mirrors the device queue as a FIFO so that buffers coming back
//! from the device can be checked against submission order.

use std::collections::VecDeque;

use crate::backend::BufferId;
use crate::error::PoolError;

/// Ownership tag of a pool buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    Free,
    Queued,
    Playing,
}

/// One fixed-capacity mono 16-bit PCM buffer.
#[derive(Debug)]
pub struct PcmBuffer {
    id: BufferId,
    samples: Box<[i16]>,
    len_frames: usize,
    state: BufferState,
}

impl PcmBuffer {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn capacity_frames(&self) -> usize {
        self.samples.len()
    }

    /// Frames written by the last fill.
    pub fn len_frames(&self) -> usize {
        self.len_frames
    }

    pub fn byte_len(&self) -> usize {
        self.len_frames * std::mem::size_of::<i16>()
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// PCM written by the last fill.
    pub fn pcm(&self) -> &[i16] {
        &self.samples[..self.len_frames]
    }
}

/// Ordered, fixed-cardinality set of [`PcmBuffer`]s.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Vec<PcmBuffer>,
    queued: VecDeque<BufferId>,
    playing: bool,
}

impl BufferPool {
    /// Preallocate one buffer of `frame_capacity` frames per device handle.
    pub fn allocate(ids: &[BufferId], frame_capacity: usize) -> Self {
        let buffers = ids
            .iter()
            .map(|&id| PcmBuffer {
                id,
                samples: vec![0i16; frame_capacity].into_boxed_slice(),
                len_frames: 0,
                state: BufferState::Free,
            })
            .collect();
        Self {
            buffers,
            queued: VecDeque::with_capacity(ids.len()),
            playing: false,
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn frame_capacity(&self) -> usize {
        self.buffers.first().map_or(0, PcmBuffer::capacity_frames)
    }

    /// Handles in pool order.
    pub fn ids(&self) -> Vec<BufferId> {
        self.buffers.iter().map(PcmBuffer::id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PcmBuffer> {
        self.buffers.iter()
    }

    pub fn get(&self, id: BufferId) -> Option<&PcmBuffer> {
        self.buffers.iter().find(|b| b.id == id)
    }

    pub fn state(&self, id: BufferId) -> Option<BufferState> {
        self.get(id).map(PcmBuffer::state)
    }

    pub fn count(&self, state: BufferState) -> usize {
        self.buffers.iter().filter(|b| b.state == state).count()
    }

    /// Buffers currently owned by the device.
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Buffer the device is rendering (or will render next).
    pub fn queue_head(&self) -> Option<BufferId> {
        self.queued.front().copied()
    }

    /// Overwrite `id` with `pcm`.
    pub fn fill(&mut self, id: BufferId, pcm: &[i16]) -> Result<(), PoolError> {
        let capacity = self.frame_capacity();
        if pcm.len() > capacity {
            return Err(PoolError::Overflow {
                len: pcm.len(),
                capacity,
            });
        }
        self.fill_with(id, |dst| {
            dst[..pcm.len()].copy_from_slice(pcm);
            Ok::<_, PoolError>(pcm.len())
        })
        .map(|_| ())
    }

    /// Let `write` fill the storage of `id` in place and record how many
    /// frames it wrote.
    pub fn fill_with<E, F>(&mut self, id: BufferId, write: F) -> Result<usize, E>
    where
        E: From<PoolError>,
        F: FnOnce(&mut [i16]) -> Result<usize, E>,
    {
        let buf = self.free_mut(id)?;
        let written = write(&mut buf.samples[..])?;
        let capacity = buf.samples.len();
        if written > capacity {
            return Err(PoolError::Overflow {
                len: written,
                capacity,
            }
            .into());
        }
        buf.len_frames = written;
        Ok(written)
    }

    /// Hand `id` to the device: `Free` -> `Queued`, appended to the FIFO.
    pub fn mark_queued(&mut self, id: BufferId) -> Result<(), PoolError> {
        self.free_mut(id)?.state = BufferState::Queued;
        self.queued.push_back(id);
        self.refresh_head();
        Ok(())
    }

    /// Take `id` back from the device. It must be the head of the FIFO.
    pub fn release_head(&mut self, id: BufferId) -> Result<(), PoolError> {
        let expected = self.queued.front().copied();
        if expected != Some(id) {
            return Err(PoolError::OutOfOrder { expected, got: id });
        }
        self.queued.pop_front();
        self.buffer_mut(id)?.state = BufferState::Free;
        self.refresh_head();
        Ok(())
    }

    /// Record whether the device is rendering; the queue head becomes `Playing`.
    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
        if !playing {
            let head = self.queued.front().copied();
            if let Some(buf) = head.and_then(|id| self.buffers.iter_mut().find(|b| b.id == id)) {
                buf.state = BufferState::Queued;
            }
        }
        self.refresh_head();
    }

    fn refresh_head(&mut self) {
        if !self.playing {
            return;
        }
        if let Some(head) = self.queued.front().copied() {
            if let Some(buf) = self.buffers.iter_mut().find(|b| b.id == head) {
                buf.state = BufferState::Playing;
            }
        }
    }

    fn buffer_mut(&mut self, id: BufferId) -> Result<&mut PcmBuffer, PoolError> {
        self.buffers
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(PoolError::UnknownBuffer(id))
    }

    fn free_mut(&mut self, id: BufferId) -> Result<&mut PcmBuffer, PoolError> {
        let buf = self.buffer_mut(id)?;
        if buf.state != BufferState::Free {
            return Err(PoolError::NotFree {
                id,
                state: buf.state,
            });
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u32) -> Vec<BufferId> {
        (1..=n).map(BufferId).collect()
    }

    fn assert_exclusive(pool: &BufferPool) {
        let total = pool.count(BufferState::Free)
            + pool.count(BufferState::Queued)
            + pool.count(BufferState::Playing);
        assert_eq!(total, pool.len());
        assert!(pool.count(BufferState::Playing) <= 1);
        assert_eq!(
            pool.queued_len(),
            pool.count(BufferState::Queued) + pool.count(BufferState::Playing)
        );
    }

    #[test]
    fn allocate_preallocates_every_buffer() {
        let pool = BufferPool::allocate(&ids(3), 44_100);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.frame_capacity(), 44_100);
        for buf in pool.iter() {
            assert_eq!(buf.capacity_frames(), 44_100);
            assert_eq!(buf.state(), BufferState::Free);
            assert_eq!(buf.len_frames(), 0);
        }
    }

    #[test]
    fn fill_overwrites_contents_and_length() {
        let mut pool = BufferPool::allocate(&ids(2), 4);
        pool.fill(BufferId(1), &[1, 2, 3, 4]).unwrap();
        pool.fill(BufferId(1), &[9, 8]).unwrap();
        let buf = pool.get(BufferId(1)).unwrap();
        assert_eq!(buf.pcm(), &[9, 8]);
        assert_eq!(buf.byte_len(), 4);
    }

    #[test]
    fn fill_rejects_overflow_and_unknown_ids() {
        let mut pool = BufferPool::allocate(&ids(2), 2);
        assert_eq!(
            pool.fill(BufferId(1), &[1, 2, 3]),
            Err(PoolError::Overflow { len: 3, capacity: 2 })
        );
        assert_eq!(
            pool.fill(BufferId(7), &[1]),
            Err(PoolError::UnknownBuffer(BufferId(7)))
        );
    }

    #[test]
    fn device_owned_buffers_are_not_writable() {
        let mut pool = BufferPool::allocate(&ids(2), 2);
        pool.fill(BufferId(1), &[1, 1]).unwrap();
        pool.mark_queued(BufferId(1)).unwrap();
        assert_eq!(
            pool.fill(BufferId(1), &[2]),
            Err(PoolError::NotFree {
                id: BufferId(1),
                state: BufferState::Queued
            })
        );
        assert!(matches!(
            pool.mark_queued(BufferId(1)),
            Err(PoolError::NotFree { .. })
        ));
    }

    #[test]
    fn head_is_playing_while_device_plays() {
        let mut pool = BufferPool::allocate(&ids(3), 2);
        for id in pool.ids() {
            pool.mark_queued(id).unwrap();
        }
        assert_eq!(pool.count(BufferState::Playing), 0);
        pool.set_playing(true);
        assert_eq!(pool.state(BufferId(1)), Some(BufferState::Playing));
        assert_eq!(pool.state(BufferId(2)), Some(BufferState::Queued));

        pool.release_head(BufferId(1)).unwrap();
        assert_eq!(pool.state(BufferId(1)), Some(BufferState::Free));
        assert_eq!(pool.state(BufferId(2)), Some(BufferState::Playing));
        assert_exclusive(&pool);

        pool.set_playing(false);
        assert_eq!(pool.count(BufferState::Playing), 0);
        assert_exclusive(&pool);
    }

    #[test]
    fn release_must_follow_submission_order() {
        let mut pool = BufferPool::allocate(&ids(3), 2);
        pool.mark_queued(BufferId(3)).unwrap();
        pool.mark_queued(BufferId(1)).unwrap();
        assert_eq!(
            pool.release_head(BufferId(1)),
            Err(PoolError::OutOfOrder {
                expected: Some(BufferId(3)),
                got: BufferId(1)
            })
        );
        pool.release_head(BufferId(3)).unwrap();
        pool.release_head(BufferId(1)).unwrap();
        assert_eq!(
            pool.release_head(BufferId(2)),
            Err(PoolError::OutOfOrder {
                expected: None,
                got: BufferId(2)
            })
        );
    }

    #[test]
    fn cardinality_survives_many_cycles() {
        let mut pool = BufferPool::allocate(&ids(3), 8);
        for id in pool.ids() {
            pool.mark_queued(id).unwrap();
        }
        pool.set_playing(true);
        for cycle in 0..50u32 {
            let head = pool.queue_head().unwrap();
            pool.release_head(head).unwrap();
            assert_exclusive(&pool);
            pool.fill(head, &[cycle as i16; 8]).unwrap();
            pool.mark_queued(head).unwrap();
            assert_exclusive(&pool);
        }
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.queued_len(), 3);
    }
}
