//! Adaptive quality / frame-rate controller.
//!
//! Maps a [`NetworkQuality`] label onto deltas for the encoder quality
//! and the target frame rate. The controller is a pure policy: it never
//! touches session state other than the two targets it is handed, and
//! every result is clamped into the configured [`Bounds`].

use crate::quality::NetworkQuality;

// ── Bounds ───────────────────────────────────────────────────────

/// Inclusive `[min, max]` range for a streaming target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: u32,
    pub max: u32,
}

impl Bounds {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Swap the ends if they were given in the wrong order.
    pub fn normalized(self) -> Self {
        if self.min <= self.max {
            self
        } else {
            Self::new(self.max, self.min)
        }
    }

    /// Raise the floor to at least `floor` (the ceiling follows if needed).
    pub fn with_min(self, floor: u32) -> Self {
        let min = self.min.max(floor);
        Self::new(min, self.max.max(min))
    }

    /// Lower the ceiling to at most `ceiling`, never below the floor.
    pub fn with_max(self, ceiling: u32) -> Self {
        Self::new(self.min, self.max.min(ceiling).max(self.min))
    }

    pub fn clamp(&self, value: u32) -> u32 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

// ── Targets ──────────────────────────────────────────────────────

/// The two knobs the controller turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Targets {
    pub fps: u32,
    pub quality: u8,
}

// ── AdaptiveController ───────────────────────────────────────────

/// Label-driven policy for quality and frame rate.
///
/// | label     | quality | fps |
/// |-----------|---------|-----|
/// | Excellent | +5      | +1  |
/// | Good      | 0       | 0   |
/// | Fair      | −10     | −2  |
/// | Poor      | −20     | −2  |
/// | Unknown   | 0       | 0   |
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveController {
    quality_bounds: Bounds,
    fps_bounds: Bounds,
    enabled: bool,
}

impl AdaptiveController {
    pub fn new(quality_bounds: Bounds, fps_bounds: Bounds) -> Self {
        Self {
            quality_bounds,
            fps_bounds,
            enabled: true,
        }
    }

    /// Disable adaptation; [`adjust`](Self::adjust) then only clamps.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Compute the next targets for `label`.
    ///
    /// `fps_ceiling` is the session's own maximum (it may be lower than
    /// the configured one); the effective ceiling is the smaller of the
    /// two.
    pub fn adjust(&self, current: Targets, label: NetworkQuality, fps_ceiling: u32) -> Targets {
        let fps_bounds = self.fps_bounds.with_max(fps_ceiling);
        let quality = i64::from(current.quality);
        let fps = i64::from(current.fps);

        let (quality, fps) = if !self.enabled {
            (quality, fps)
        } else {
            match label {
                NetworkQuality::Excellent => (quality + 5, fps + 1),
                NetworkQuality::Good | NetworkQuality::Unknown => (quality, fps),
                NetworkQuality::Fair => (quality - 10, fps - 2),
                NetworkQuality::Poor => (quality - 20, fps - 2),
            }
        };

        Targets {
            quality: clamp_signed(quality, self.quality_bounds) as u8,
            fps: clamp_signed(fps, fps_bounds),
        }
    }

    pub fn quality_bounds(&self) -> Bounds {
        self.quality_bounds
    }

    pub fn fps_bounds(&self) -> Bounds {
        self.fps_bounds
    }
}

fn clamp_signed(value: i64, bounds: Bounds) -> u32 {
    value.clamp(i64::from(bounds.min), i64::from(bounds.max)) as u32
}

// ── Tests ────────────────────────────────────────────────────────
