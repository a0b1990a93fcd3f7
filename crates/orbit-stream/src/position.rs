//! Source position updates.
//!
//! The source moves on a fixed orbit around the listener. The position is a
//! pure function of elapsed time, recomputed on every service tick.

use std::f64::consts::TAU;
use std::time::Duration;

use crate::backend::{PlaybackDevice, SourceId};
use crate::config::OrbitConfig;
use crate::error::DeviceError;

/// Point in listener space (right-handed, y up).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ORIGIN: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(self, other: Vec3) -> f32 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Position on the orbit after `elapsed` time.
///
/// `θ = (t·ω) mod 2π`, `p = (R·cos θ, h·sin θ, d·sin θ)`.
pub fn orbit_position(orbit: &OrbitConfig, elapsed: Duration) -> Vec3 {
    let theta = (elapsed.as_secs_f64() * orbit.angular_speed as f64).rem_euclid(TAU);
    let (sin, cos) = theta.sin_cos();
    Vec3 {
        x: (orbit.radius as f64 * cos) as f32,
        y: (orbit.height as f64 * sin) as f32,
        z: (orbit.depth as f64 * sin) as f32,
    }
}

/// Pushes the orbit position to the device once per tick.
#[derive(Clone, Debug)]
pub struct PositionUpdater {
    orbit: OrbitConfig,
}

impl PositionUpdater {
    pub fn new(orbit: OrbitConfig) -> Self {
        Self { orbit }
    }

    /// Compute the position for `elapsed` and set it on `source`.
    pub fn update<D: PlaybackDevice>(
        &self,
        device: &mut D,
        source: SourceId,
        elapsed: Duration,
    ) -> Result<Vec3, DeviceError> {
        let position = orbit_position(&self.orbit, elapsed);
        device.set_source_position(source, position)?;
        Ok(position)
    }
}
