//! Location-dependent gravitational acceleration.

use bevy::prelude::Vec3;

/// Supplies the ambient gravitational acceleration at a world position.
///
/// Detached physics children do not receive gravity from the pipeline, so
/// their owner applies `mass * gravity_at(position)` every step.
pub trait AmbientPhysics: Send + Sync {
    fn gravity_at(&self, position: Vec3) -> Vec3;
}

/// Same acceleration everywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformGravity(pub Vec3);

impl Default for UniformGravity {
    fn default() -> Self {
        Self(Vec3::new(0.0, 0.0, -9.81))
    }
}

impl AmbientPhysics for UniformGravity {
    fn gravity_at(&self, _position: Vec3) -> Vec3 {
        self.0
    }
}

/// Inverse-square attraction toward a point mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointGravity {
    pub center: Vec3,
    /// Standard gravitational parameter `G * M` in m^3/s^2.
    pub mu: f32,
    /// Distances below this radius are clamped to it.
    pub min_radius: f32,
}

impl PointGravity {
    pub const fn new(center: Vec3, mu: f32, min_radius: f32) -> Self {
        Self {
            center,
            mu,
            min_radius,
        }
    }
}

impl AmbientPhysics for PointGravity {
    fn gravity_at(&self, position: Vec3) -> Vec3 {
        let offset = self.center - position;
        let distance = offset.length().max(self.min_radius);
        if distance <= f32::EPSILON {
            return Vec3::ZERO;
        }
        offset.normalize_or_zero() * (self.mu / (distance * distance))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
