//! Incremental source decode.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode packets and downmix them to mono
//! - convert to the fixed output rate (via [`crate::resample`]) and to `i16`
//!
//! [`StreamSource`] sits on top of any [`FrameDecoder`] and owns the read
//! cursor: it keeps calling the decoder until a request is satisfied or the
//! stream ends, and never reads past the end.

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::DecodeError;
use crate::resample::MonoResampler;

/// Source of mono 16-bit frames at a fixed rate.
///
/// One `decode` call may produce fewer frames than asked for; `Ok(0)` means
/// end of stream.
pub trait FrameDecoder {
    /// Total frames at the output rate, if the container reports it.
    fn total_frames(&self) -> Option<u64>;

    fn decode(&mut self, out: &mut [i16]) -> Result<usize, DecodeError>;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<(), DecodeError>;

    fn close(&mut self) {}
}

/// Result of one [`StreamSource::read_frames`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Frames written to the front of the output slice.
    pub frames: usize,
    /// The source has no frames left.
    pub exhausted: bool,
}

/// Decode cursor over a [`FrameDecoder`].
pub struct StreamSource<D = SymphoniaDecoder> {
    decoder: D,
    sample_rate: u32,
    total_frames: Option<u64>,
    frames_read: u64,
    exhausted: bool,
}

impl StreamSource<SymphoniaDecoder> {
    /// Open `path` for decoding to mono `i16` at `sample_rate`.
    pub fn open(path: &Path, sample_rate: u32) -> Result<Self, DecodeError> {
        let decoder = SymphoniaDecoder::open(path, sample_rate)?;
        let info = decoder.info();
        tracing::info!(
            path = %path.display(),
            codec = info.codec.unwrap_or("unknown"),
            source_rate_hz = info.source_rate,
            source_channels = info.source_channels,
            file_length_frames = ?decoder.total_frames(),
            "opened stream source"
        );
        Ok(Self::new(decoder, sample_rate))
    }
}

impl<D: FrameDecoder> StreamSource<D> {
    pub fn new(decoder: D, sample_rate: u32) -> Self {
        let total_frames = decoder.total_frames();
        Self {
            decoder,
            sample_rate,
            total_frames,
            frames_read: 0,
            exhausted: total_frames == Some(0),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Read up to `out.len()` frames into `out`.
    ///
    /// Loops over the decoder until the request is met or the stream ends.
    /// Once exhausted, returns zero frames without touching the decoder.
    pub fn read_frames(&mut self, out: &mut [i16]) -> Result<ReadOutcome, DecodeError> {
        let mut filled = 0usize;
        while filled < out.len() && !self.exhausted {
            let want = match self.remaining_frames() {
                Some(remaining) => (out.len() - filled).min(remaining),
                None => out.len() - filled,
            };
            if want == 0 {
                self.exhausted = true;
                break;
            }
            let n = self.decoder.decode(&mut out[filled..filled + want])?;
            if n == 0 {
                self.exhausted = true;
                break;
            }
            let n = n.min(want);
            filled += n;
            self.frames_read += n as u64;
            if self.remaining_frames() == Some(0) {
                self.exhausted = true;
            }
        }
        Ok(ReadOutcome {
            frames: filled,
            exhausted: self.exhausted,
        })
    }

    /// Reset the cursor to frame 0.
    pub fn rewind(&mut self) -> Result<(), DecodeError> {
        self.decoder.rewind()?;
        self.frames_read = 0;
        self.exhausted = self.total_frames == Some(0);
        Ok(())
    }

    pub fn close(mut self) {
        self.decoder.close();
        tracing::debug!(frames_read = self.frames_read, "stream source closed");
    }

    fn remaining_frames(&self) -> Option<usize> {
        self.total_frames
            .map(|total| usize::try_from(total.saturating_sub(self.frames_read)).unwrap_or(usize::MAX))
    }
}

/// Metadata captured while probing the source.
#[derive(Clone, Copy, Debug, Default)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<&'static str>,
    pub source_rate: u32,
    pub source_channels: usize,
}

/// [`FrameDecoder`] backed by Symphonia.
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    resampler: Option<MonoResampler>,
    pending: VecDeque<i16>,
    mono: Vec<f32>,
    converted: Vec<f32>,
    total_frames: Option<u64>,
    eof: bool,
    info: SourceInfo,
}

impl SymphoniaDecoder {
    pub fn open(path: &Path, sample_rate: u32) -> Result<Self, DecodeError> {
        let file = File::open(path).map_err(|source| DecodeError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| DecodeError::Unsupported("no default audio track".into()))?;
        let codec_params: CodecParameters = track.codec_params.clone();
        let track_id = track.id;

        let channels = codec_params
            .channels
            .ok_or_else(|| DecodeError::Unsupported("unknown channel layout".into()))?
            .count();
        let source_rate = codec_params
            .sample_rate
            .filter(|r| *r > 0)
            .ok_or_else(|| DecodeError::Unsupported("unknown sample rate".into()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

        let resampler = if source_rate == sample_rate {
            None
        } else {
            tracing::info!(from_hz = source_rate, to_hz = sample_rate, "resampling source");
            Some(MonoResampler::new(source_rate, sample_rate)?)
        };

        let total_frames = codec_params
            .n_frames
            .map(|n| output_frames(n, source_rate, sample_rate));

        Ok(Self {
            format,
            decoder,
            track_id,
            channels,
            resampler,
            pending: VecDeque::new(),
            mono: Vec::new(),
            converted: Vec::new(),
            total_frames,
            eof: false,
            info: SourceInfo {
                codec: codec_name_from_params(&codec_params),
                source_rate,
                source_channels: channels,
            },
        })
    }

    pub fn info(&self) -> SourceInfo {
        self.info
    }

    /// Decode the next packet of our track into `pending`.
    fn decode_next_packet(&mut self) -> Result<(), DecodeError> {
        let packet = match self.format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return self.finish();
            }
            Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
        };
        if packet.track_id() != self.track_id {
            return Ok(());
        }

        let decoded = match self.decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(reason)) => {
                tracing::warn!(reason, "skipping undecodable packet");
                return Ok(());
            }
            Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        downmix_to_mono(sample_buf.samples(), self.channels, &mut self.mono);

        match self.resampler.as_mut() {
            Some(resampler) => {
                self.converted.clear();
                resampler.process(&self.mono, &mut self.converted)?;
                push_i16(&mut self.pending, &self.converted);
            }
            None => push_i16(&mut self.pending, &self.mono),
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), DecodeError> {
        self.eof = true;
        if let Some(resampler) = self.resampler.as_mut() {
            self.converted.clear();
            resampler.flush(&mut self.converted)?;
            push_i16(&mut self.pending, &self.converted);
        }
        Ok(())
    }
}

impl FrameDecoder for SymphoniaDecoder {
    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn decode(&mut self, out: &mut [i16]) -> Result<usize, DecodeError> {
        while self.pending.is_empty() && !self.eof {
            self.decode_next_packet()?;
        }
        let n = out.len().min(self.pending.len());
        for (dst, src) in out.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: 0,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| DecodeError::Corrupt(format!("rewind: {e}")))?;
        self.decoder.reset();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset()?;
        }
        self.pending.clear();
        self.eof = false;
        Ok(())
    }

    fn close(&mut self) {
        self.pending.clear();
        self.eof = true;
    }
}

/// Frame count after converting `frames` from `from_rate` to `to_rate`.
fn output_frames(frames: u64, from_rate: u32, to_rate: u32) -> u64 {
    if from_rate == to_rate {
        return frames;
    }
    ((frames as u128 * to_rate as u128) / from_rate as u128) as u64
}

/// Average interleaved frames down to one channel.
fn downmix_to_mono(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    let scale = 1.0 / channels as f32;
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

fn push_i16(pending: &mut VecDeque<i16>, samples: &[f32]) {
    pending.extend(samples.iter().map(|&s| f32_to_i16(s)));
}

pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Best-effort codec label for logging.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{VecDecoder, write_test_wav};
    use symphonia::core::codecs::*;

    #[test]
    fn read_loops_until_request_is_met() {
        let samples: Vec<i16> = (0..100).collect();
        let mut source = StreamSource::new(VecDecoder::new(samples).with_chunk(7), 44_100);
        let mut out = [0i16; 30];
        let outcome = source.read_frames(&mut out).unwrap();
        assert_eq!(outcome, ReadOutcome { frames: 30, exhausted: false });
        assert_eq!(out.to_vec(), (0..30).collect::<Vec<i16>>());
        assert_eq!(source.frames_read(), 30);
    }

    #[test]
    fn read_to_exhaustion_never_exceeds_total() {
        let k = 10;
        let mut source = StreamSource::new(VecDecoder::new(vec![1; k]).with_chunk(3), 44_100);
        let mut out = [0i16; 4];

        let first = source.read_frames(&mut out).unwrap();
        let second = source.read_frames(&mut out).unwrap();
        let third = source.read_frames(&mut out).unwrap();
        let fourth = source.read_frames(&mut out).unwrap();

        assert_eq!(first, ReadOutcome { frames: 4, exhausted: false });
        assert_eq!(second, ReadOutcome { frames: 4, exhausted: false });
        assert_eq!(third, ReadOutcome { frames: 2, exhausted: true });
        assert_eq!(fourth, ReadOutcome { frames: 0, exhausted: true });
        assert_eq!(source.frames_read(), k as u64);
    }

    #[test]
    fn exhausted_source_does_not_call_decoder_again() {
        let decoder = VecDecoder::new(vec![5; 4]);
        let calls = decoder.calls();
        let mut source = StreamSource::new(decoder, 44_100);
        let mut out = [0i16; 8];
        source.read_frames(&mut out).unwrap();
        let after_end = calls.get();
        source.read_frames(&mut out).unwrap();
        source.read_frames(&mut out).unwrap();
        assert_eq!(calls.get(), after_end);
    }

    #[test]
    fn unknown_length_ends_when_decoder_runs_dry() {
        let decoder = VecDecoder::new(vec![1; 5]).without_length().with_chunk(2);
        let mut source = StreamSource::new(decoder, 44_100);
        assert_eq!(source.total_frames(), None);
        let mut out = [0i16; 8];
        let outcome = source.read_frames(&mut out).unwrap();
        assert_eq!(outcome, ReadOutcome { frames: 5, exhausted: true });
    }

    #[test]
    fn rewind_resets_cursor() {
        let mut source = StreamSource::new(VecDecoder::new(vec![3, 4, 5]), 44_100);
        let mut out = [0i16; 3];
        assert!(source.read_frames(&mut out).unwrap().exhausted);
        source.rewind().unwrap();
        assert!(!source.is_exhausted());
        assert_eq!(source.frames_read(), 0);
        let outcome = source.read_frames(&mut out[..2]).unwrap();
        assert_eq!(outcome.frames, 2);
        assert_eq!(&out[..2], &[3, 4]);
    }

    #[test]
    fn decoder_errors_propagate() {
        let decoder = VecDecoder::new(vec![1; 10]).with_chunk(4).failing_after(1);
        let mut source = StreamSource::new(decoder, 44_100);
        let mut out = [0i16; 10];
        assert!(matches!(source.read_frames(&mut out), Err(DecodeError::Corrupt(_))));
    }

    #[test]
    fn open_missing_file_is_open_error() {
        let err = StreamSource::open(Path::new("/definitely/not/here.wav"), 44_100)
            .err()
            .unwrap();
        assert!(matches!(err, DecodeError::Open { .. }));
    }

    #[test]
    fn open_garbage_is_unsupported() {
        let dir = std::env::temp_dir().join(format!("orbit-stream-garbage-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("noise.bin");
        std::fs::write(&path, b"this is not audio at all").unwrap();
        let err = StreamSource::open(&path, 44_100).err().unwrap();
        assert!(matches!(err, DecodeError::Unsupported(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn decodes_stereo_wav_to_mono() {
        let frames: Vec<[i16; 2]> = (0..1000).map(|i| [i as i16 * 10, i as i16 * 10]).collect();
        let path = write_test_wav("stereo", 44_100, &frames);
        let mut source = StreamSource::open(&path, 44_100).unwrap();
        assert_eq!(source.total_frames(), Some(1000));

        let mut out = vec![0i16; 1500];
        let outcome = source.read_frames(&mut out).unwrap();
        assert_eq!(outcome, ReadOutcome { frames: 1000, exhausted: true });
        for (i, s) in out[..1000].iter().enumerate() {
            assert!((*s as i32 - (i as i32 * 10)).abs() <= 1, "frame {i}: {s}");
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rewinding_a_wav_replays_from_start() {
        let frames: Vec<[i16; 2]> = (0..256).map(|i| [i as i16, i as i16]).collect();
        let path = write_test_wav("rewind", 44_100, &frames);
        let mut source = StreamSource::open(&path, 44_100).unwrap();
        let mut first = vec![0i16; 16];
        source.read_frames(&mut first).unwrap();
        let mut rest = vec![0i16; 512];
        source.read_frames(&mut rest).unwrap();
        source.rewind().unwrap();
        let mut again = vec![0i16; 16];
        source.read_frames(&mut again).unwrap();
        assert_eq!(first, again);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn output_frames_scales_by_rate() {
        assert_eq!(output_frames(48_000, 48_000, 44_100), 44_100);
        assert_eq!(output_frames(22_050, 22_050, 44_100), 44_100);
        assert_eq!(output_frames(10, 44_100, 44_100), 10);
    }

    #[test]
    fn downmix_averages_channels() {
        let mut out = Vec::new();
        downmix_to_mono(&[1.0, 0.0, 0.5, 0.5], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5]);
        downmix_to_mono(&[0.25, -0.25], 1, &mut out);
        assert_eq!(out, vec![0.25, -0.25]);
    }

    #[test]
    fn f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn codec_name_from_params_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name_from_params(&params), Some("FLAC"));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16"));
        assert!(codec_name_from_params(&CodecParameters::new()).is_none());
    }
}
