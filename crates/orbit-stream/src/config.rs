//! Streaming session parameters.
//!
//! The defaults reproduce the reference setup: three one-second buffers at
//! 44.1 kHz, a 3 x 0.5 x 1.0 orbit at 1 rad/s, 100 ms ticks and a 20 s run.

use std::time::Duration;

use crate::error::ConfigError;

/// Longest tick interval that still services the queue at 10 Hz.
pub const MAX_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Largest buffer we allocate: 2^22 frames (8 MiB of PCM, about 95 s at 44.1 kHz).
pub const MAX_FRAMES_PER_BUFFER: usize = 1 << 22;

/// What the refill path does once the source has no more frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EndOfStreamPolicy {
    /// Queue whatever was decoded last and let the device drain.
    #[default]
    Stop,
    /// Rewind the source to frame 0 and keep decoding.
    Loop,
    /// Pad with silence and keep the queue full until the session is stopped.
    SilencePad,
}

/// Orbit traced by the sound source around the listener.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrbitConfig {
    /// X semi-axis.
    pub radius: f32,
    /// Y amplitude.
    pub height: f32,
    /// Z amplitude.
    pub depth: f32,
    /// Radians per second.
    pub angular_speed: f32,
}

impl Default for OrbitConfig {
    fn default() -> Self {
        Self {
            radius: 3.0,
            height: 0.5,
            depth: 1.0,
            angular_speed: 1.0,
        }
    }
}

/// Streaming tuning parameters shared by decode/pool/refill/driver stages.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Number of PCM buffers cycling between the refill path and the device.
    pub buffer_count: usize,
    /// Length of one buffer in seconds of audio.
    pub buffer_duration_seconds: f32,
    /// Output sample rate in Hz; the decoder converts to this rate.
    pub sample_rate: u32,
    pub orbit: OrbitConfig,
    /// Stop after this much wall-clock time; `None` runs until the stream drains or is cancelled.
    pub run_duration: Option<Duration>,
    /// Service tick cadence.
    pub tick_interval: Duration,
    pub end_of_stream: EndOfStreamPolicy,
    /// Linear source gain (1.0 = unity).
    pub gain: f32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            buffer_duration_seconds: 1.0,
            sample_rate: 44_100,
            orbit: OrbitConfig::default(),
            run_duration: Some(Duration::from_secs(20)),
            tick_interval: Duration::from_millis(100),
            end_of_stream: EndOfStreamPolicy::default(),
            gain: 1.0,
        }
    }
}

impl StreamConfig {
    /// Frames held by one buffer.
    pub fn frames_per_buffer(&self) -> usize {
        (self.buffer_duration_seconds as f64 * self.sample_rate as f64).round() as usize
    }

    /// Bytes held by one full buffer of mono 16-bit PCM.
    pub fn bytes_per_buffer(&self) -> usize {
        self.frames_per_buffer() * std::mem::size_of::<i16>()
    }

    /// Reject configurations that cannot stream without gaps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_count < 2 {
            return Err(ConfigError::BufferCount(self.buffer_count));
        }
        if !self.buffer_duration_seconds.is_finite() || self.buffer_duration_seconds <= 0.0 {
            return Err(ConfigError::BufferDuration(self.buffer_duration_seconds));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        let frames = self.frames_per_buffer();
        if frames == 0 {
            return Err(ConfigError::BufferDuration(self.buffer_duration_seconds));
        }
        if frames > MAX_FRAMES_PER_BUFFER {
            return Err(ConfigError::BufferTooLarge {
                frames,
                max: MAX_FRAMES_PER_BUFFER,
            });
        }
        if self.tick_interval.is_zero() || self.tick_interval > MAX_TICK_INTERVAL {
            return Err(ConfigError::TickInterval(self.tick_interval));
        }
        let orbit = &self.orbit;
        for (name, value) in [
            ("radius", orbit.radius),
            ("height", orbit.height),
            ("depth", orbit.depth),
            ("angular_speed", orbit.angular_speed),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::Orbit { name, value });
            }
        }
        if !self.gain.is_finite() || self.gain < 0.0 {
            return Err(ConfigError::Gain(self.gain));
        }
        Ok(())
    }
}
