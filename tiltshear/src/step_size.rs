use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::models::{AngularCorrection, AxisId, Direction, Mirror, StepCommand};

/// Degrees per step used until an axis has been calibrated.
pub const DEFAULT_STEP_SIZE: f64 = 0.005;

/// Calibrated degrees-per-step for every (mirror, axis, direction).
///
/// Entries are always finite and strictly positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSizeTable {
    entries: [[[f64; 2]; 2]; 2],
}

impl Default for StepSizeTable {
    fn default() -> Self {
        Self {
            entries: [[[DEFAULT_STEP_SIZE; 2]; 2]; 2],
        }
    }
}

impl StepSizeTable {
    pub fn get(&self, mirror: Mirror, axis: AxisId, direction: Direction) -> f64 {
        self.entries[mirror.index()][axis.index()][direction.index()]
    }

    /// Records the response of one test motion.
    ///
    /// Returns the stored value, or `None` when the motion carries no usable
    /// measurement (zero steps, or an angle that would give a non-positive entry).
    pub fn record(&mut self, mirror: Mirror, axis: AxisId, steps: i32, angle: f64) -> Option<f64> {
        if steps == 0 {
            return None;
        }

        let size = (angle / f64::from(steps)).abs();
        if !(size.is_finite() && size > 0.0) {
            warn!(%mirror, ?axis, steps, angle, "Ignoring unusable step size measurement");
            return None;
        }

        self.entries[mirror.index()][axis.index()][Direction::of(steps).index()] = size;
        Some(size)
    }

    /// Copies one mirror's entries from `other`, leaving the other mirror untouched.
    pub fn replace_mirror(&mut self, mirror: Mirror, other: &StepSizeTable) {
        self.entries[mirror.index()] = other.entries[mirror.index()];
    }

    /// Sets every entry of each mirror to that mirror's largest entry.
    pub fn equalize(&mut self) {
        for mirror in self.entries.iter_mut() {
            let largest = mirror
                .iter()
                .flatten()
                .copied()
                .fold(f64::MIN_POSITIVE, f64::max);
            *mirror = [[largest; 2]; 2];
        }
    }

    fn steps_for(&self, mirror: Mirror, axis: AxisId, angle: f64) -> i32 {
        // A positive angle is removed by stepping in the negative direction.
        let (direction, sign) = if angle > 0.0 {
            (Direction::Negative, -1.0)
        } else {
            (Direction::Positive, 1.0)
        };
        let steps = (angle.abs() / self.get(mirror, axis, direction)).round();
        (sign * steps) as i32
    }

    /// Converts mirror angles into step counts.
    ///
    /// SY2 axis 1 follows the mirror-2 Y angle and SY2 axis 2 the X angle.
    pub fn step_commands(&self, correction: &AngularCorrection) -> StepCommand {
        StepCommand {
            m1_axis1: self.steps_for(Mirror::Sy1, AxisId::One, correction.m1_x),
            m1_axis2: self.steps_for(Mirror::Sy1, AxisId::Two, correction.m1_y),
            m2_axis1: self.steps_for(Mirror::Sy2, AxisId::One, correction.m2_y),
            m2_axis2: self.steps_for(Mirror::Sy2, AxisId::Two, correction.m2_x),
        }
    }
}

/// Step size table shared between the calibrator and the control loop.
#[derive(Debug, Clone, Default)]
pub struct SharedStepSizes(Arc<RwLock<StepSizeTable>>);

impl SharedStepSizes {
    pub fn new(table: StepSizeTable) -> Self {
        Self(Arc::new(RwLock::new(table)))
    }

    pub fn snapshot(&self) -> StepSizeTable {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut StepSizeTable) -> R) -> R {
        let mut table = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut table)
    }
}
