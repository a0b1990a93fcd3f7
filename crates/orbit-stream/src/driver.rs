//! Tick loop that drives a [`PlaybackSession`] until a stop condition holds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::backend::PlaybackDevice;
use crate::decode::FrameDecoder;
use crate::error::SessionError;
use crate::session::{PlaybackSession, SessionState};

/// Host scheduling boundary: where the loop gets its clock and its sleep.
pub trait Ticker {
    /// Time since the ticker was started.
    fn elapsed(&self) -> Duration;
    /// Block until the next tick is due.
    fn wait(&mut self, interval: Duration);
}

/// Wall-clock ticker. Deadlines advance by whole intervals so sleep overshoot
/// does not accumulate; if the loop falls behind it resynchronises instead of
/// bursting.
#[derive(Debug)]
pub struct IntervalTicker {
    started: Instant,
    next: Option<Instant>,
}

impl IntervalTicker {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            next: None,
        }
    }
}

impl Ticker for IntervalTicker {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn wait(&mut self, interval: Duration) {
        let now = Instant::now();
        let deadline = match self.next {
            Some(next) if next > now => next,
            Some(_) => now + interval,
            None => self.started + interval,
        };
        if let Some(sleep) = deadline.checked_duration_since(now) {
            std::thread::sleep(sleep);
        }
        self.next = Some(deadline + interval);
    }
}

/// Ticker whose clock only moves when [`Ticker::wait`] is called.
#[derive(Debug, Default)]
pub struct ManualTicker {
    now: Duration,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }
}

impl Ticker for ManualTicker {
    fn elapsed(&self) -> Duration {
        self.now
    }

    fn wait(&mut self, interval: Duration) {
        self.now += interval;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    RunDurationElapsed,
    Cancelled,
    /// The source ended under the stop policy and the device queue emptied.
    StreamDrained,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionSummary {
    pub ticks: u64,
    pub elapsed: Duration,
    pub refills: u64,
    pub frames_decoded: u64,
    pub stop_reason: StopReason,
}

/// Prime and start the session if needed, then tick it on the configured
/// interval until the run duration elapses, `cancel` is raised, or the
/// stream drains. The session is stopped on every exit path.
pub fn run<D, S, T>(
    session: &mut PlaybackSession<D, S>,
    ticker: &mut T,
    cancel: Option<&AtomicBool>,
) -> Result<SessionSummary, SessionError>
where
    D: PlaybackDevice,
    S: FrameDecoder,
    T: Ticker,
{
    let result = drive(session, ticker, cancel);
    session.stop();
    match &result {
        Ok(summary) => tracing::info!(
            ticks = summary.ticks,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            refills = summary.refills,
            frames_decoded = summary.frames_decoded,
            reason = ?summary.stop_reason,
            "playback finished"
        ),
        Err(e) => tracing::error!(error = %e, "playback failed"),
    }
    result
}

fn drive<D, S, T>(
    session: &mut PlaybackSession<D, S>,
    ticker: &mut T,
    cancel: Option<&AtomicBool>,
) -> Result<SessionSummary, SessionError>
where
    D: PlaybackDevice,
    S: FrameDecoder,
    T: Ticker,
{
    if session.state() == SessionState::Uninitialized {
        session.prime()?;
    }
    if session.state() == SessionState::Primed {
        session.start()?;
    }

    let interval = session.config().tick_interval;
    let run_duration = session.config().run_duration;
    let mut ticks = 0u64;
    let mut refills = 0u64;
    let mut frames_decoded = 0u64;

    let stop_reason = loop {
        let elapsed = ticker.elapsed();
        if run_duration.is_some_and(|limit| elapsed >= limit) {
            break StopReason::RunDurationElapsed;
        }
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            break StopReason::Cancelled;
        }

        let report = session.tick(elapsed)?;
        ticks += 1;
        refills += report.refill.refilled as u64;
        frames_decoded += report.refill.frames_decoded as u64;
        if report.refill.drained {
            break StopReason::StreamDrained;
        }

        ticker.wait(interval);
    };

    Ok(SessionSummary {
        ticks,
        elapsed: ticker.elapsed(),
        refills,
        frames_decoded,
        stop_reason,
    })
}
