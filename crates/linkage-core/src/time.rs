use std::fmt;

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SimClock
// ---------------------------------------------------------------------------

/// Step counter and integer-nanosecond simulation clock.
///
/// Tracks elapsed time as a `u64` nanosecond count so long sessions do not
/// accumulate floating-point drift.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, Resource,
)]
pub struct SimClock {
    steps: u64,
    nanos: u64,
}

impl SimClock {
    #[must_use]
    pub const fn new() -> Self {
        Self { steps: 0, nanos: 0 }
    }

    /// Completed physics steps.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// Raw nanosecond count.
    #[must_use]
    pub const fn nanos(&self) -> u64 {
        self.nanos
    }

    /// Elapsed seconds as `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn secs_f64(&self) -> f64 {
        self.nanos as f64 / 1_000_000_000.0
    }

    /// Record one completed step of `dt_secs` seconds.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn tick(&mut self, dt_secs: f64) {
        self.steps += 1;
        self.nanos = self
            .nanos
            .saturating_add((dt_secs * 1_000_000_000.0).round() as u64);
    }

    pub const fn reset(&mut self) {
        self.steps = 0;
        self.nanos = 0;
    }
}

impl fmt::Display for SimClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({:.3}s)", self.steps, self.secs_f64())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_zero() {
        let clock = SimClock::new();
        assert_eq!(clock.steps(), 0);
        assert_eq!(clock.nanos(), 0);
    }

    #[test]
    fn tick_accumulates_without_drift() {
        let mut clock = SimClock::new();
        for _ in 0..50 {
            clock.tick(0.02);
        }
        assert_eq!(clock.steps(), 50);
        assert_eq!(clock.nanos(), 1_000_000_000);
    }

    #[test]
    fn reset_clears() {
        let mut clock = SimClock::new();
        clock.tick(0.5);
        clock.reset();
        assert_eq!(clock, SimClock::new());
    }

    #[test]
    fn display_format() {
        let mut clock = SimClock::new();
        clock.tick(0.25);
        assert_eq!(clock.to_string(), "step 1 (0.250s)");
    }
}
