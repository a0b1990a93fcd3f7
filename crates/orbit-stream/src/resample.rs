//! Mono sample-rate conversion.
//!
//! Uses Rubato's async sinc resampler in fixed-input mode. Input is collected
//! until a full chunk is available; [`MonoResampler::flush`] pushes the tail
//! through as a partial chunk at end of stream.
//!
//! The filter's lead-in (`output_delay` frames) is dropped after every reset
//! and flushed back out at the end, so the output lines up with the input
//! and holds `round(frames_in * to / from)` frames.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::error::DecodeError;

/// Input chunk size in frames.
const CHUNK_FRAMES: usize = 1024;

pub struct MonoResampler {
    from_rate: u32,
    to_rate: u32,
    resampler: Box<dyn Resampler<f32>>,
    input: Vec<f32>,
    output: Vec<f32>,
    indexing: Indexing,
    /// Lead-in frames still to drop.
    skip: usize,
    frames_in: u64,
    frames_out: u64,
}

impl MonoResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, DecodeError> {
        let resampler = build_resampler(from_rate, to_rate)?;
        let output = vec![0.0f32; resampler.output_frames_max()];
        Ok(Self {
            from_rate,
            to_rate,
            skip: resampler.output_delay(),
            resampler,
            input: Vec::with_capacity(CHUNK_FRAMES * 2),
            output,
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Resample every full chunk of `samples` (plus carried-over input) into `out`.
    pub fn process(&mut self, samples: &[f32], out: &mut Vec<f32>) -> Result<(), DecodeError> {
        self.frames_in += samples.len() as u64;
        self.input.extend_from_slice(samples);
        let mut consumed = 0;
        while self.input.len() - consumed >= CHUNK_FRAMES {
            self.run_chunk(consumed, CHUNK_FRAMES, None, out, usize::MAX)?;
            consumed += CHUNK_FRAMES;
        }
        self.input.drain(..consumed);
        Ok(())
    }

    /// Push the remaining input through as a final partial chunk, then drain
    /// the filter until every expected output frame has been emitted.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<(), DecodeError> {
        let expected = self.expected_output();
        let tail = self.input.len();
        if tail > 0 {
            let left = self.frames_left(expected);
            self.run_chunk(0, tail, Some(tail), out, left)?;
            self.input.clear();
        }
        while self.frames_out < expected {
            let left = self.frames_left(expected);
            if self.run_chunk(0, 0, Some(0), out, left)? == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Drop buffered input and filter state.
    pub fn reset(&mut self) -> Result<(), DecodeError> {
        self.resampler = build_resampler(self.from_rate, self.to_rate)?;
        self.input.clear();
        self.skip = self.resampler.output_delay();
        self.frames_in = 0;
        self.frames_out = 0;
        Ok(())
    }

    fn expected_output(&self) -> u64 {
        (self.frames_in as f64 * self.to_rate as f64 / self.from_rate as f64).round() as u64
    }

    fn frames_left(&self, expected: u64) -> usize {
        usize::try_from(expected.saturating_sub(self.frames_out)).unwrap_or(usize::MAX)
    }

    /// Run one chunk and append at most `limit` frames past the lead-in.
    /// Returns the number of frames the resampler produced.
    fn run_chunk(
        &mut self,
        start: usize,
        frames: usize,
        partial_len: Option<usize>,
        out: &mut Vec<f32>,
        limit: usize,
    ) -> Result<usize, DecodeError> {
        let input = &self.input[start..start + frames];
        let input_adapter = InterleavedSlice::new(input, 1, frames)
            .map_err(|e| DecodeError::Resample(format!("input slice: {e}")))?;
        let capacity = self.output.len();
        let mut output_adapter = InterleavedSlice::new_mut(&mut self.output, 1, capacity)
            .map_err(|e| DecodeError::Resample(format!("output slice: {e}")))?;

        self.indexing.input_offset = 0;
        self.indexing.output_offset = 0;
        self.indexing.partial_len = partial_len;

        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&self.indexing))
            .map_err(|e| DecodeError::Resample(e.to_string()))?;

        let skip = self.skip.min(nbr_out);
        self.skip -= skip;
        let keep = (nbr_out - skip).min(limit);
        out.extend_from_slice(&self.output[skip..skip + keep]);
        self.frames_out += keep as u64;
        Ok(nbr_out)
    }
}

fn build_resampler(from_rate: u32, to_rate: u32) -> Result<Box<dyn Resampler<f32>>, DecodeError> {
    let f_ratio = to_rate as f64 / from_rate as f64;

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let resampler = Async::<f32>::new_sinc(f_ratio, 1.1, &params, CHUNK_FRAMES, 1, FixedAsync::Input)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;
    Ok(Box::new(resampler))
}
