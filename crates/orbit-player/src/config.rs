use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use orbit_stream::config::{EndOfStreamPolicy, OrbitConfig, StreamConfig};

use crate::cli::{EndOfStream, PlayArgs};

#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub path: PathBuf,
    pub device: Option<String>,
    pub stream: StreamConfig,
}

impl PlayConfig {
    /// Map command-line arguments onto a validated stream config.
    pub fn from_args(args: &PlayArgs, device: Option<String>) -> Result<Self> {
        let run_duration = if args.run_seconds == 0.0 {
            None
        } else {
            Some(
                Duration::try_from_secs_f64(args.run_seconds)
                    .with_context(|| format!("invalid --run-seconds {}", args.run_seconds))?,
            )
        };

        let stream = StreamConfig {
            buffer_count: args.buffer_count,
            buffer_duration_seconds: args.buffer_seconds,
            sample_rate: args.sample_rate,
            orbit: OrbitConfig {
                radius: args.radius,
                height: args.height,
                depth: args.depth,
                angular_speed: args.angular_speed,
            },
            run_duration,
            tick_interval: Duration::from_millis(args.tick_ms),
            end_of_stream: match args.end_of_stream {
                EndOfStream::Stop => EndOfStreamPolicy::Stop,
                EndOfStream::Loop => EndOfStreamPolicy::Loop,
                EndOfStream::Silence => EndOfStreamPolicy::SilencePad,
            },
            gain: args.gain,
        };
        stream.validate().context("invalid playback settings")?;

        Ok(Self {
            path: args.path.clone(),
            device: normalize_device_name(device),
            stream,
        })
    }
}

/// Treat a blank `--device` as "use the default device".
pub fn normalize_device_name(name: Option<String>) -> Option<String> {
    name.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
