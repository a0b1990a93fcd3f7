//! Player runtime: device listing and one-shot orbit playback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use orbit_stream::driver::{self, IntervalTicker, SessionSummary};
use orbit_stream::{CpalDevice, PlaybackSession, StreamSource, device};

use crate::config::PlayConfig;

/// Print available output devices to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    let devices = device::list_devices(&host).context("list output devices")?;
    for (i, d) in devices.iter().enumerate() {
        let marker = if d.is_default { " (default)" } else { "" };
        println!(
            "#{i}: {}{marker} [{}-{} Hz, up to {} ch]",
            d.name, d.min_rate, d.max_rate, d.max_channels
        );
    }
    Ok(())
}

/// Stream `config.path` on the selected device until a stop condition holds.
///
/// Ctrl-C raises the cancel flag; the driver notices it on the next tick and
/// tears the session down before returning.
pub fn run_play(config: PlayConfig) -> Result<SessionSummary> {
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            if cancel.swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
        })
        .context("install Ctrl-C handler")?;
    }

    let stream = StreamSource::open(&config.path, config.stream.sample_rate)
        .with_context(|| format!("open {}", config.path.display()))?;
    let host = cpal::default_host();
    let device = CpalDevice::open(&host, config.device.as_deref(), config.stream.sample_rate)
        .context("open output device")?;
    if device.output_rate() != config.stream.sample_rate {
        tracing::info!(
            engine_hz = config.stream.sample_rate,
            output_hz = device.output_rate(),
            "output runs at a different rate; resampling uploads"
        );
    }

    let tick_interval = config.stream.tick_interval;
    let mut session = PlaybackSession::new(config.stream, device, stream);
    let mut ticker = IntervalTicker::start();
    tracing::info!(tick_ms = tick_interval.as_millis() as u64, "streaming");
    let summary = driver::run(&mut session, &mut ticker, Some(cancel.as_ref())).context("playback")?;
    Ok(summary)
}
