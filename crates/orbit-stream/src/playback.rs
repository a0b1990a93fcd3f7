//! Buffer-queue playback device on top of a CPAL output stream.
//!
//! The CPAL callback plays the queued buffers of a single source front to
//! back. State shared with the callback lives in a [`Mixer`] behind a mutex:
//! buffer storage, the source queue, the processed count, positions and
//! gain. A buffer counts as processed once the callback has rendered its
//! last frame; it stays on the queue until the caller unqueues it.
//!
//! When the queue runs dry the callback outputs silence and counts an
//! underrun; playback resumes as soon as another buffer is queued.
//!
//! Uploads are converted to the output rate on the caller's thread before
//! they reach the mixer, so the callback reads samples one to one.

use std::borrow::Cow;
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::backend::{BufferId, PlaybackDevice, SourceId};
use crate::decode::f32_to_i16;
use crate::device;
use crate::error::{DecodeError, DeviceError};
use crate::position::Vec3;
use crate::resample::MonoResampler;
use crate::spatial;

const SOURCE_ID: SourceId = SourceId(1);

/// Render-side state shared between the tick thread and the CPAL callback.
#[derive(Debug)]
pub struct Mixer {
    buffers: HashMap<BufferId, Vec<i16>>,
    queue: VecDeque<BufferId>,
    /// Buffers at the head of `queue` that have been fully rendered.
    processed: usize,
    /// Read position inside `queue[processed]`.
    cursor: usize,
    playing: bool,
    gain: f32,
    source_position: Vec3,
    listener_position: Vec3,
    underruns: u64,
    starved: bool,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            queue: VecDeque::new(),
            processed: 0,
            cursor: 0,
            playing: false,
            gain: 1.0,
            source_position: Vec3::ORIGIN,
            listener_position: Vec3::ORIGIN,
            underruns: 0,
            starved: false,
        }
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    fn add_buffers(&mut self, ids: &[BufferId]) {
        for id in ids {
            self.buffers.insert(*id, Vec::new());
        }
    }

    fn remove_buffers(&mut self, ids: &[BufferId]) {
        for id in ids {
            if self.queue.contains(id) {
                tracing::warn!(buffer = %id, "deleting a buffer that is still queued");
            }
            self.buffers.remove(id);
        }
        self.queue.retain(|id| self.buffers.contains_key(id));
        self.processed = self.processed.min(self.queue.len());
    }

    fn upload(&mut self, id: BufferId, pcm: &[i16]) -> Result<(), DeviceError> {
        if self.queue.contains(&id) {
            return Err(DeviceError::new("fill buffer", format!("buffer {id} is queued")));
        }
        let buffer = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| DeviceError::new("fill buffer", format!("unknown buffer {id}")))?;
        buffer.clear();
        buffer.extend_from_slice(pcm);
        Ok(())
    }

    fn enqueue(&mut self, ids: &[BufferId]) -> Result<(), DeviceError> {
        if let Some(id) = ids.iter().find(|id| !self.buffers.contains_key(id)) {
            return Err(DeviceError::new("queue buffers", format!("unknown buffer {id}")));
        }
        if let Some(id) = ids.iter().find(|id| self.queue.contains(id)) {
            return Err(DeviceError::new("queue buffers", format!("buffer {id} already queued")));
        }
        self.queue.extend(ids.iter().copied());
        Ok(())
    }

    fn dequeue(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError> {
        if count > self.processed {
            return Err(DeviceError::new(
                "unqueue buffers",
                format!("asked for {count}, only {} processed", self.processed),
            ));
        }
        self.processed -= count;
        Ok(self.queue.drain(..count).collect())
    }

    fn halt(&mut self) {
        self.playing = false;
        self.processed = self.queue.len();
        self.cursor = 0;
    }

    /// Fill one callback's worth of interleaved output.
    pub fn render<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
        if !self.playing || channels == 0 {
            data.fill(silence);
            return;
        }

        let (left, right) = if channels == 1 {
            let g = spatial::mono_gain(self.source_position, self.listener_position, self.gain);
            (g, g)
        } else {
            spatial::stereo_gains(self.source_position, self.listener_position, self.gain)
        };

        for frame in data.chunks_mut(channels) {
            let Some(sample) = self.next_sample() else {
                if !self.starved {
                    self.starved = true;
                    self.underruns += 1;
                }
                frame.fill(silence);
                continue;
            };
            self.starved = false;
            for (ch, out) in frame.iter_mut().enumerate() {
                let g = match ch {
                    0 => left,
                    1 => right,
                    _ => 0.0,
                };
                *out = <T as cpal::Sample>::from_sample::<f32>(sample * g);
            }
        }
    }

    /// Next source sample as `f32`; finishing a buffer marks it processed.
    fn next_sample(&mut self) -> Option<f32> {
        loop {
            let id = *self.queue.get(self.processed)?;
            let pcm = self.buffers.get(&id).map(Vec::as_slice).unwrap_or_default();
            if let Some(&sample) = pcm.get(self.cursor) {
                self.cursor += 1;
                if self.cursor >= pcm.len() {
                    self.processed += 1;
                    self.cursor = 0;
                }
                return Some(f32::from(sample) / 32_768.0);
            }
            self.processed += 1;
            self.cursor = 0;
        }
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts uploaded PCM to the output rate with a persistent resampler, so
/// consecutive buffers form one continuous signal.
///
/// A buffer shorter than the longest one seen so far is the end of the
/// source: the resampler tail is flushed into it and the filter is reset.
pub struct RateConverter {
    to_rate: u32,
    active: Option<(u32, MonoResampler)>,
    longest: usize,
    input: Vec<f32>,
    output: Vec<f32>,
}

impl RateConverter {
    pub fn new(to_rate: u32) -> Self {
        Self {
            to_rate,
            active: None,
            longest: 0,
            input: Vec::new(),
            output: Vec::new(),
        }
    }

    pub fn convert<'a>(
        &mut self,
        pcm: &'a [i16],
        from_rate: u32,
    ) -> Result<Cow<'a, [i16]>, DecodeError> {
        if from_rate == self.to_rate || from_rate == 0 {
            return Ok(Cow::Borrowed(pcm));
        }
        if !matches!(&self.active, Some((rate, _)) if *rate == from_rate) {
            tracing::info!(from_hz = from_rate, to_hz = self.to_rate, "resampling uploads");
            self.active = Some((from_rate, MonoResampler::new(from_rate, self.to_rate)?));
            self.longest = 0;
        }
        let Some((_, resampler)) = self.active.as_mut() else {
            return Ok(Cow::Borrowed(pcm));
        };

        self.input.clear();
        self.input
            .extend(pcm.iter().map(|&s| f32::from(s) / f32::from(i16::MAX)));
        self.output.clear();
        resampler.process(&self.input, &mut self.output)?;

        if pcm.len() < self.longest {
            resampler.flush(&mut self.output)?;
            resampler.reset()?;
            self.longest = 0;
        } else {
            self.longest = pcm.len();
        }
        Ok(Cow::Owned(self.output.iter().map(|&s| f32_to_i16(s)).collect()))
    }
}

/// [`PlaybackDevice`] backed by a CPAL output device.
pub struct CpalDevice {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    stream_config: cpal::StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<cpal::Stream>,
    source: Option<SourceId>,
    converter: RateConverter,
    next_buffer: u32,
    reported_underruns: Cell<u64>,
}

impl CpalDevice {
    /// Open the output device matched by `needle` (or the default) and pick
    /// a config for `sample_rate`. No stream runs until the context exists.
    pub fn open(
        host: &cpal::Host,
        needle: Option<&str>,
        sample_rate: u32,
    ) -> Result<Self, DeviceError> {
        let device = device::pick_device(host, needle)?;
        let config = device::pick_output_config(&device, sample_rate)?;
        let mut stream_config: cpal::StreamConfig = config.clone().into();
        if let Some(buf) = device::pick_buffer_size(&config) {
            stream_config.buffer_size = buf;
        }

        let name = device
            .description()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        tracing::info!(
            device = %name,
            rate_hz = stream_config.sample_rate,
            channels = stream_config.channels,
            format = ?config.sample_format(),
            "output device opened"
        );

        Ok(Self {
            mixer: Arc::new(Mutex::new(Mixer::new())),
            converter: RateConverter::new(stream_config.sample_rate),
            device,
            config,
            stream_config,
            stream: None,
            source: None,
            next_buffer: 0,
            reported_underruns: Cell::new(0),
        })
    }

    pub fn output_rate(&self) -> u32 {
        self.stream_config.sample_rate
    }

    fn lock(&self, op: &'static str) -> Result<MutexGuard<'_, Mixer>, DeviceError> {
        self.mixer
            .lock()
            .map_err(|_| DeviceError::new(op, "mixer lock poisoned"))
    }

    fn check_source(&self, op: &'static str, source: SourceId) -> Result<(), DeviceError> {
        if self.source == Some(source) {
            Ok(())
        } else {
            Err(DeviceError::new(op, format!("unknown source {source}")))
        }
    }

    fn report_underruns(&self, total: u64) {
        let seen = self.reported_underruns.replace(total);
        if total > seen {
            tracing::warn!(underruns = total, new = total - seen, "output underrun");
        }
    }
}

impl PlaybackDevice for CpalDevice {
    fn create_context(&mut self) -> Result<(), DeviceError> {
        if self.stream.is_some() {
            return Err(DeviceError::new("create context", "context already exists"));
        }
        let stream = build_output_stream(
            &self.device,
            &self.stream_config,
            self.config.sample_format(),
            &self.mixer,
        )?;
        stream
            .play()
            .map_err(|e| DeviceError::new("create context", e.to_string()))?;
        self.stream = Some(stream);
        tracing::debug!("output stream running");
        Ok(())
    }

    fn destroy_context(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("output stream closed");
        }
    }

    fn create_source(&mut self) -> Result<SourceId, DeviceError> {
        if self.source.is_some() {
            return Err(DeviceError::new("create source", "only one source is supported"));
        }
        self.source = Some(SOURCE_ID);
        Ok(SOURCE_ID)
    }

    fn delete_source(&mut self, source: SourceId) {
        if self.source != Some(source) {
            tracing::warn!(%source, "delete of unknown source");
            return;
        }
        self.source = None;
        match self.mixer.lock() {
            Ok(mut mixer) => {
                mixer.halt();
                mixer.queue.clear();
                mixer.processed = 0;
            }
            Err(_) => tracing::warn!("mixer lock poisoned while deleting source"),
        }
    }

    fn allocate_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError> {
        let ids: Vec<BufferId> = (0..count)
            .map(|_| {
                self.next_buffer += 1;
                BufferId(self.next_buffer)
            })
            .collect();
        self.lock("allocate buffers")?.add_buffers(&ids);
        Ok(ids)
    }

    fn delete_buffers(&mut self, buffers: &[BufferId]) {
        match self.mixer.lock() {
            Ok(mut mixer) => mixer.remove_buffers(buffers),
            Err(_) => tracing::warn!("mixer lock poisoned while deleting buffers"),
        }
    }

    fn fill_buffer(
        &mut self,
        buffer: BufferId,
        pcm: &[i16],
        sample_rate: u32,
    ) -> Result<(), DeviceError> {
        let pcm = self
            .converter
            .convert(pcm, sample_rate)
            .map_err(|e| DeviceError::new("fill buffer", e.to_string()))?;
        self.lock("fill buffer")?.upload(buffer, &pcm)
    }

    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), DeviceError> {
        self.check_source("queue buffers", source)?;
        self.lock("queue buffers")?.enqueue(buffers)
    }

    fn unqueue_buffers(
        &mut self,
        source: SourceId,
        count: usize,
    ) -> Result<Vec<BufferId>, DeviceError> {
        self.check_source("unqueue buffers", source)?;
        self.lock("unqueue buffers")?.dequeue(count)
    }

    fn processed_count(&self, source: SourceId) -> Result<usize, DeviceError> {
        self.check_source("processed count", source)?;
        let (processed, underruns) = {
            let mixer = self.lock("processed count")?;
            (mixer.processed(), mixer.underruns())
        };
        self.report_underruns(underruns);
        Ok(processed)
    }

    fn queued_count(&self, source: SourceId) -> Result<usize, DeviceError> {
        self.check_source("queued count", source)?;
        Ok(self.lock("queued count")?.queued())
    }

    fn set_source_gain(&mut self, source: SourceId, gain: f32) -> Result<(), DeviceError> {
        self.check_source("set source gain", source)?;
        self.lock("set source gain")?.gain = gain.max(0.0);
        Ok(())
    }

    fn set_source_position(&mut self, source: SourceId, position: Vec3) -> Result<(), DeviceError> {
        self.check_source("set source position", source)?;
        self.lock("set source position")?.source_position = position;
        Ok(())
    }

    fn set_listener_position(&mut self, position: Vec3) -> Result<(), DeviceError> {
        self.lock("set listener position")?.listener_position = position;
        Ok(())
    }

    fn play(&mut self, source: SourceId) -> Result<(), DeviceError> {
        self.check_source("play", source)?;
        if self.stream.is_none() {
            return Err(DeviceError::new("play", "no context"));
        }
        self.lock("play")?.playing = true;
        Ok(())
    }

    fn stop(&mut self, source: SourceId) -> Result<(), DeviceError> {
        self.check_source("stop", source)?;
        self.lock("stop")?.halt();
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
        let underruns = self.mixer.lock().map(|m| m.underruns()).unwrap_or_default();
        tracing::info!(underruns, "output device closed");
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    mixer: &Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream, DeviceError> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, mixer),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, mixer),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, mixer),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, mixer),
        other => Err(DeviceError::new(
            "create context",
            format!("unsupported sample format {other:?}"),
        )),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: &Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let mixer = mixer.clone();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| match mixer.lock() {
                Ok(mut mixer) => mixer.render(data, channels),
                Err(_) => data.fill(<T as cpal::Sample>::from_sample::<f32>(0.0)),
            },
            err_fn,
            None,
        )
        .map_err(|e| DeviceError::new("create context", e.to_string()))
}
