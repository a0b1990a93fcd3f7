use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "orbit-player", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream a local file while the source orbits the listener
    Play(PlayArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct PlayArgs {
    /// Path to an audio file
    pub path: PathBuf,

    /// Number of streaming buffers kept in rotation
    #[arg(long, default_value_t = 3)]
    pub buffer_count: usize,

    /// Length of each buffer in seconds
    #[arg(long, default_value_t = 1.0)]
    pub buffer_seconds: f32,

    /// Engine sample rate; the source is resampled to it
    #[arg(long, default_value_t = 44_100)]
    pub sample_rate: u32,

    /// Orbit radius along x
    #[arg(long, default_value_t = 3.0, allow_negative_numbers = true)]
    pub radius: f32,

    /// Orbit amplitude along y
    #[arg(long, default_value_t = 0.5, allow_negative_numbers = true)]
    pub height: f32,

    /// Orbit amplitude along z
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    pub depth: f32,

    /// Orbit angular speed in rad/s
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    pub angular_speed: f32,

    /// Stop after this many seconds (0 = until the stream ends or Ctrl-C)
    #[arg(long, default_value_t = 20.0)]
    pub run_seconds: f64,

    /// Service tick interval in milliseconds (at most 100)
    #[arg(long, default_value_t = 100)]
    pub tick_ms: u64,

    /// What to do when the source runs out
    #[arg(long, value_enum, default_value_t = EndOfStream::Stop)]
    pub end_of_stream: EndOfStream,

    /// Source gain (1.0 = unity)
    #[arg(long, default_value_t = 1.0)]
    pub gain: f32,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndOfStream {
    /// Let the queued audio drain, then stop
    Stop,
    /// Rewind and keep playing
    Loop,
    /// Keep playing silence until the run time is up
    Silence,
}
