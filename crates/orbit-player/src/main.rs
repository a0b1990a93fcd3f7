//! Orbit Player: stream an audio file through a small ring of device buffers
//! while the source circles the listener.
//!
//! ## Modes
//! - `play <PATH>`: stream a local file for a fixed time, until it ends, or until Ctrl-C.
//! - `--list-devices`: print the output devices and exit.

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use orbit_player::cli::{Args, Command};
use orbit_player::config::PlayConfig;
use orbit_player::runtime;
use orbit_stream::StopReason;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,orbit_player=info,orbit_stream=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    match args.cmd {
        Some(Command::Play(play)) => {
            let config = PlayConfig::from_args(&play, args.device)?;
            let summary = runtime::run_play(config)?;
            if summary.stop_reason == StopReason::Cancelled {
                tracing::info!("interrupted");
            }
        }
        None => {
            Args::command().print_help()?;
        }
    }

    Ok(())
}
