//! In-memory decoder and recording device used by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backend::{BufferId, PlaybackDevice, SourceId};
use crate::decode::FrameDecoder;
use crate::error::{DecodeError, DeviceError};
use crate::position::Vec3;

/// Decoder over a fixed sample vector that hands out at most `chunk` frames per call.
pub struct VecDecoder {
    samples: Vec<i16>,
    pos: usize,
    chunk: usize,
    report_length: bool,
    fail_after: Option<usize>,
    calls: Rc<Cell<usize>>,
}

impl VecDecoder {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples,
            pos: 0,
            chunk: usize::MAX,
            report_length: true,
            fail_after: None,
            calls: Rc::new(Cell::new(0)),
        }
    }

    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    pub fn without_length(mut self) -> Self {
        self.report_length = false;
        self
    }

    /// Fail every decode call after the first `calls` successful ones.
    pub fn failing_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    pub fn calls(&self) -> Rc<Cell<usize>> {
        self.calls.clone()
    }
}

impl FrameDecoder for VecDecoder {
    fn total_frames(&self) -> Option<u64> {
        self.report_length.then_some(self.samples.len() as u64)
    }

    fn decode(&mut self, out: &mut [i16]) -> Result<usize, DecodeError> {
        let calls = self.calls.get();
        self.calls.set(calls + 1);
        if self.fail_after.is_some_and(|limit| calls >= limit) {
            return Err(DecodeError::Corrupt("injected".into()));
        }
        let n = out.len().min(self.chunk).min(self.samples.len() - self.pos);
        out[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.pos = 0;
        Ok(())
    }
}

/// Device call, as recorded by [`FakeDevice`].
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateContext,
    DestroyContext,
    CreateSource,
    DeleteSource,
    AllocateBuffers(usize),
    DeleteBuffers(Vec<BufferId>),
    Fill(BufferId, usize),
    Queue(Vec<BufferId>),
    Unqueue(Vec<BufferId>),
    SourceGain(f32),
    SourcePosition(Vec3),
    ListenerPosition(Vec3),
    Play,
    Stop,
    Close,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    next_id: u32,
    queue: VecDeque<BufferId>,
    processed: usize,
    uploads: HashMap<BufferId, Vec<i16>>,
    failures: HashMap<&'static str, u32>,
    auto_finish: usize,
    source_position: Option<Vec3>,
}

/// Buffer-queue device that records every call.
///
/// Clones share state, so a test can keep a handle after moving the device
/// into a session. Failures are injected per operation name.
#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Rc<RefCell<FakeState>>,
}

impl FakeDevice {
    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    /// Release calls only, in order.
    pub fn teardown_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    Call::Stop
                        | Call::DeleteSource
                        | Call::DeleteBuffers(_)
                        | Call::DestroyContext
                        | Call::Close
                )
            })
            .collect()
    }

    pub fn queued_buffers(&self) -> Vec<BufferId> {
        self.state.borrow().queue.iter().copied().collect()
    }

    pub fn uploaded(&self, id: BufferId) -> Option<Vec<i16>> {
        self.state.borrow().uploads.get(&id).cloned()
    }

    pub fn source_position(&self) -> Option<Vec3> {
        self.state.borrow().source_position
    }

    /// Pretend the render thread finished `n` more buffers.
    pub fn finish(&self, n: usize) {
        let mut st = self.state.borrow_mut();
        st.processed = (st.processed + n).min(st.queue.len());
    }

    /// Finish `n` buffers right before every processed-count query.
    pub fn finish_per_query(&self, n: usize) {
        self.state.borrow_mut().auto_finish = n;
    }

    /// Drop the newest buffer from the source queue without telling anyone.
    pub fn lose_queued_buffer(&self) {
        self.state.borrow_mut().queue.pop_back();
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail(&self, op: &'static str, times: u32) {
        self.state.borrow_mut().failures.insert(op, times);
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }

    fn check(&self, op: &'static str) -> Result<(), DeviceError> {
        let mut st = self.state.borrow_mut();
        if let Some(left) = st.failures.get_mut(op) {
            if *left > 0 {
                *left -= 1;
                return Err(DeviceError::new(op, "injected failure"));
            }
        }
        Ok(())
    }
}

impl PlaybackDevice for FakeDevice {
    fn create_context(&mut self) -> Result<(), DeviceError> {
        self.check("create context")?;
        self.record(Call::CreateContext);
        Ok(())
    }

    fn destroy_context(&mut self) {
        self.record(Call::DestroyContext);
    }

    fn create_source(&mut self) -> Result<SourceId, DeviceError> {
        self.check("create source")?;
        self.record(Call::CreateSource);
        Ok(SourceId(100))
    }

    fn delete_source(&mut self, _source: SourceId) {
        self.record(Call::DeleteSource);
    }

    fn allocate_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError> {
        self.check("allocate buffers")?;
        self.record(Call::AllocateBuffers(count));
        let mut st = self.state.borrow_mut();
        let ids = (0..count)
            .map(|_| {
                st.next_id += 1;
                BufferId(st.next_id)
            })
            .collect();
        Ok(ids)
    }

    fn delete_buffers(&mut self, buffers: &[BufferId]) {
        self.record(Call::DeleteBuffers(buffers.to_vec()));
    }

    fn fill_buffer(
        &mut self,
        buffer: BufferId,
        pcm: &[i16],
        _sample_rate: u32,
    ) -> Result<(), DeviceError> {
        self.check("fill buffer")?;
        self.record(Call::Fill(buffer, pcm.len()));
        self.state.borrow_mut().uploads.insert(buffer, pcm.to_vec());
        Ok(())
    }

    fn queue_buffers(&mut self, _source: SourceId, buffers: &[BufferId]) -> Result<(), DeviceError> {
        self.check("queue buffers")?;
        self.record(Call::Queue(buffers.to_vec()));
        self.state.borrow_mut().queue.extend(buffers.iter().copied());
        Ok(())
    }

    fn unqueue_buffers(
        &mut self,
        _source: SourceId,
        count: usize,
    ) -> Result<Vec<BufferId>, DeviceError> {
        self.check("unqueue buffers")?;
        let ids: Vec<BufferId> = {
            let mut st = self.state.borrow_mut();
            if count > st.processed {
                return Err(DeviceError::new("unqueue buffers", "buffer not processed"));
            }
            st.processed -= count;
            st.queue.drain(..count).collect()
        };
        self.record(Call::Unqueue(ids.clone()));
        Ok(ids)
    }

    fn processed_count(&self, _source: SourceId) -> Result<usize, DeviceError> {
        self.check("processed count")?;
        let mut st = self.state.borrow_mut();
        st.processed = (st.processed + st.auto_finish).min(st.queue.len());
        Ok(st.processed)
    }

    fn queued_count(&self, _source: SourceId) -> Result<usize, DeviceError> {
        self.check("queued count")?;
        Ok(self.state.borrow().queue.len())
    }

    fn set_source_gain(&mut self, _source: SourceId, gain: f32) -> Result<(), DeviceError> {
        self.record(Call::SourceGain(gain));
        Ok(())
    }

    fn set_source_position(&mut self, _source: SourceId, position: Vec3) -> Result<(), DeviceError> {
        self.check("set source position")?;
        self.record(Call::SourcePosition(position));
        self.state.borrow_mut().source_position = Some(position);
        Ok(())
    }

    fn set_listener_position(&mut self, position: Vec3) -> Result<(), DeviceError> {
        self.record(Call::ListenerPosition(position));
        Ok(())
    }

    fn play(&mut self, _source: SourceId) -> Result<(), DeviceError> {
        self.check("play")?;
        self.record(Call::Play);
        Ok(())
    }

    fn stop(&mut self, _source: SourceId) -> Result<(), DeviceError> {
        self.record(Call::Stop);
        let mut st = self.state.borrow_mut();
        st.processed = st.queue.len();
        Ok(())
    }

    fn close(&mut self) {
        self.record(Call::Close);
    }
}

/// Write a 16-bit stereo WAV file into the temp dir and return its path.
pub fn write_test_wav(tag: &str, sample_rate: u32, frames: &[[i16; 2]]) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!(
        "orbit-stream-{tag}-{}-{n}.wav",
        std::process::id()
    ));

    let channels: u16 = 2;
    let block_align = channels * 2;
    let data_len = (frames.len() * block_align as usize) as u32;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for frame in frames {
        for sample in frame {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
    }
    std::fs::write(&path, bytes).expect("write test wav");
    path
}
