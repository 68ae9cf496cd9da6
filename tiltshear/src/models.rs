use std::ops::Sub;

use serde::{Deserialize, Serialize};

/// Centroid position on a detector, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelOffset {
    pub x: f64,
    pub y: f64,
}

impl PixelOffset {
    pub const ORIGIN: PixelOffset = PixelOffset { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// A centroid of exactly (0, 0) means the detector lost the beam.
    pub fn is_origin(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

impl Sub for PixelOffset {
    type Output = PixelOffset;

    fn sub(self, rhs: PixelOffset) -> PixelOffset {
        PixelOffset::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Mirror tilt corrections in degrees, one pair per mirror.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AngularCorrection {
    pub m1_x: f64,
    pub m1_y: f64,
    pub m2_x: f64,
    pub m2_y: f64,
}

impl AngularCorrection {
    pub fn as_array(&self) -> [f64; 4] {
        [self.m1_x, self.m1_y, self.m2_x, self.m2_y]
    }

    pub fn is_finite(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite())
    }

    pub fn magnitude(&self) -> f64 {
        self.as_array().iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mirror {
    Sy1,
    Sy2,
}

impl Mirror {
    pub const ALL: [Mirror; 2] = [Mirror::Sy1, Mirror::Sy2];

    pub(crate) fn index(self) -> usize {
        match self {
            Mirror::Sy1 => 0,
            Mirror::Sy2 => 1,
        }
    }
}

impl std::fmt::Display for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mirror::Sy1 => write!(f, "SY1"),
            Mirror::Sy2 => write!(f, "SY2"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisId {
    One,
    Two,
}

impl AxisId {
    pub const ALL: [AxisId; 2] = [AxisId::One, AxisId::Two];

    pub(crate) fn index(self) -> usize {
        match self {
            AxisId::One => 0,
            AxisId::Two => 1,
        }
    }
}

impl From<AxisId> for agilis::Axis {
    fn from(axis: AxisId) -> Self {
        match axis {
            AxisId::One => agilis::Axis::One,
            AxisId::Two => agilis::Axis::Two,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Positive => 0,
            Direction::Negative => 1,
        }
    }

    pub fn of(steps: i32) -> Direction {
        if steps < 0 {
            Direction::Negative
        } else {
            Direction::Positive
        }
    }

    pub fn sign(self) -> i32 {
        match self {
            Direction::Positive => 1,
            Direction::Negative => -1,
        }
    }
}

/// Signed step counts for each actuator axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepCommand {
    pub m1_axis1: i32,
    pub m1_axis2: i32,
    pub m2_axis1: i32,
    pub m2_axis2: i32,
}

impl StepCommand {
    pub fn for_mirror(&self, mirror: Mirror) -> [(AxisId, i32); 2] {
        match mirror {
            Mirror::Sy1 => [(AxisId::One, self.m1_axis1), (AxisId::Two, self.m1_axis2)],
            Mirror::Sy2 => [(AxisId::One, self.m2_axis1), (AxisId::Two, self.m2_axis2)],
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == StepCommand::default()
    }
}

/// Beam displacement on both detectors, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DetectorOffsets {
    pub tilt_x: f64,
    pub tilt_y: f64,
    pub shear_x: f64,
    pub shear_y: f64,
}

impl DetectorOffsets {
    pub fn relative_to(&self, baseline: &DetectorOffsets) -> DetectorOffsets {
        DetectorOffsets {
            tilt_x: self.tilt_x - baseline.tilt_x,
            tilt_y: self.tilt_y - baseline.tilt_y,
            shear_x: self.shear_x - baseline.shear_x,
            shear_y: self.shear_y - baseline.shear_y,
        }
    }
}

/// Reference and current centroids of both detectors at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CentroidSnapshot {
    pub tilt_reference: PixelOffset,
    pub tilt: PixelOffset,
    pub shear_reference: PixelOffset,
    pub shear: PixelOffset,
}
