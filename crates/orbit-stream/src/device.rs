//! Output device discovery and selection.
//!
//! - listing output devices with their supported rates
//! - picking the default device or one matched by name substring
//! - picking a stream config close to the engine's sample rate

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::DeviceError;

/// Largest fixed callback buffer we ask for.
const MAX_CALLBACK_FRAMES: u32 = 4_096;

/// Output device metadata for `--list-devices`.
#[derive(Clone, Debug)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub min_rate: u32,
    pub max_rate: u32,
    pub max_channels: u16,
}

/// Pick the first output device whose name contains `needle`
/// (case-insensitive), or the host default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| DeviceError::new("open device", "no default output device"));
    };

    let devices = host
        .output_devices()
        .map_err(|e| DeviceError::new("open device", e.to_string()))?;
    for device in devices {
        let matched = device
            .description()
            .map(|d| matches_device_name(&d.name(), needle))
            .unwrap_or(false);
        if matched {
            return Ok(device);
        }
    }
    Err(DeviceError::new(
        "open device",
        format!("no output device matched {needle:?}"),
    ))
}

/// Pick the output config that best fits a mono source at `target_rate`.
///
/// Candidates are ranked by: exact rate support, then stereo (needed for
/// panning) over mono over wider layouts, then the smallest rate distance,
/// then sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| DeviceError::new("query output configs", e.to_string()))?;

    let mut best: Option<(ConfigRank, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let rank = ConfigRank {
            exact: rate == target_rate,
            layout: channel_layout_rank(range.channels()),
            distance: rate.abs_diff(target_rate),
            format: sample_format_rank(range.sample_format()),
        };
        let replace = match &best {
            None => true,
            Some((current, _)) => rank.is_better_than(current),
        };
        if replace {
            best = Some((rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, config)| config)
        .ok_or_else(|| DeviceError::new("query output configs", "no supported output configs"))
}

/// Fixed callback buffer size, or `None` to let the host choose.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_callback_frames(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Describe every output device on `host`.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<OutputDeviceInfo>, DeviceError> {
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|d| d.name().to_string());

    let devices = host
        .output_devices()
        .map_err(|e| DeviceError::new("list devices", e.to_string()))?;
    let mut out = Vec::new();
    for device in devices {
        let name = match device.description() {
            Ok(d) => d.name().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "skipping device without a description");
                continue;
            }
        };
        let mut min_rate = u32::MAX;
        let mut max_rate = 0u32;
        let mut max_channels = 0u16;
        if let Ok(ranges) = device.supported_output_configs() {
            for r in ranges {
                min_rate = min_rate.min(r.min_sample_rate());
                max_rate = max_rate.max(r.max_sample_rate());
                max_channels = max_channels.max(r.channels());
            }
        }
        if max_rate == 0 {
            tracing::warn!(device = %name, "skipping device without output configs");
            continue;
        }
        out.push(OutputDeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            min_rate,
            max_rate,
            max_channels,
        });
    }
    Ok(out)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ConfigRank {
    exact: bool,
    layout: u8,
    distance: u32,
    format: u8,
}

impl ConfigRank {
    fn is_better_than(&self, other: &ConfigRank) -> bool {
        if self.exact != other.exact {
            return self.exact;
        }
        (self.layout, self.distance, self.format) < (other.layout, other.distance, other.format)
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn channel_layout_rank(channels: u16) -> u8 {
    match channels {
        2 => 0,
        1 => 1,
        0 => u8::MAX,
        _ => 2,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I16 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn clamp_callback_frames(min: u32, max: u32) -> u32 {
    if min > MAX_CALLBACK_FRAMES {
        min
    } else {
        max.min(MAX_CALLBACK_FRAMES)
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
