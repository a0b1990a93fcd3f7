//! Distance attenuation and stereo panning for the software mixer.
//!
//! Inverse-distance attenuation clamped at the reference distance, then an
//! equal-power pan driven by the lateral (x) offset of the source relative to
//! the listener.

use std::f32::consts::FRAC_PI_4;

use crate::position::Vec3;

/// Distance at which attenuation is unity.
pub const REFERENCE_DISTANCE: f32 = 1.0;

/// Gain for a source `distance` units away. Never exceeds 1.
pub fn distance_gain(distance: f32) -> f32 {
    if !distance.is_finite() || distance <= REFERENCE_DISTANCE {
        return 1.0;
    }
    REFERENCE_DISTANCE / distance
}

/// Per-channel gains `(left, right)` for a mono source heard by a listener.
pub fn stereo_gains(source: Vec3, listener: Vec3, gain: f32) -> (f32, f32) {
    let distance = source.distance(listener);
    let level = gain * distance_gain(distance);
    let pan = if distance > f32::EPSILON {
        ((source.x - listener.x) / distance).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    // pan -1..1 maps to an angle 0..pi/2
    let angle = (pan + 1.0) * FRAC_PI_4;
    (level * angle.cos(), level * angle.sin())
}

/// Gain for a single-channel output: attenuation only.
pub fn mono_gain(source: Vec3, listener: Vec3, gain: f32) -> f32 {
    gain * distance_gain(source.distance(listener))
}
