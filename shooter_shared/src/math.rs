//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics.

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Euler rotation in degrees (pitch/yaw/roll).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Rot3 {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl Rot3 {
    pub const ZERO: Self = Self {
        pitch: 0.0,
        yaw: 0.0,
        roll: 0.0,
    };

    pub const fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }
}

/// Relative mesh offset restored when a character stands up from ragdoll.
pub const GETUP_MESH_OFFSET: Vec3 = Vec3::new(0.0, 0.0, -97.0);

/// Relative mesh rotation restored when a character stands up from ragdoll.
pub const GETUP_MESH_ROTATION: Rot3 = Rot3::new(0.0, 270.0, 0.0);

/// Interpolates between two angles in degrees along the shortest arc.
///
/// Both inputs are treated modulo 360; the result is normalized to
/// $[0, 360)$.
pub fn lerp_degrees(a: f32, b: f32, t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    let delta = (b - a).rem_euclid(360.0);
    let delta = if delta > 180.0 { delta - 360.0 } else { delta };
    (a + delta * t).rem_euclid(360.0)
}
