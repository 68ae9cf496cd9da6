//! Optical model of the two-mirror switchyard.
//!
//! Converts centroid displacements on the tilt and shear detectors into the
//! mirror angles that remove them. Distances are in millimetres, pixel pitch
//! in millimetres per pixel, angles are returned in degrees in the mount frame.

use std::f64::consts::FRAC_1_SQRT_2;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{AngularCorrection, DetectorOffsets, Mirror, PixelOffset};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorChannels {
    pub sy1: u8,
    pub sy2: u8,
}

impl Default for MirrorChannels {
    fn default() -> Self {
        Self { sy1: 1, sy2: 2 }
    }
}

impl MirrorChannels {
    pub fn channel(&self, mirror: Mirror) -> u8 {
        match mirror {
            Mirror::Sy1 => self.sy1,
            Mirror::Sy2 => self.sy2,
        }
    }
}

/// Fixed layout of the optical bench.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalGeometry {
    /// Distance between the two switchyard mirrors.
    pub ls2: f64,
    pub ll: f64,
    pub ld: f64,
    /// Focal length of the lens in front of the tilt detector.
    pub f: f64,
    pub lbs: f64,
    pub lc: f64,
    /// Magnification of the relay telescope.
    pub m: f64,
    pub lr: f64,
    pub xpix: f64,
    pub ypix: f64,
    pub channels: MirrorChannels,
}

impl Default for OpticalGeometry {
    fn default() -> Self {
        Self {
            ls2: 390.0,
            ll: 650.0,
            ld: 80.0,
            f: 150.0,
            lbs: 540.0,
            lc: 0.0,
            m: 1.0,
            lr: 60.0,
            xpix: 0.010,
            ypix: 0.010,
            channels: MirrorChannels::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("{name} must be a finite positive number, got {value}")]
    NotPositive { name: &'static str, value: f64 },
    #[error("{name} must be finite and non-negative, got {value}")]
    Negative { name: &'static str, value: f64 },
    #[error("geometry is degenerate: correction denominator is zero")]
    Degenerate,
    #[error("both mirrors are on channel {0}")]
    SharedChannel(u8),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Coefficients {
    pub den: f64,
    pub a1: f64,
    pub b1: f64,
    pub a2: f64,
    pub b2: f64,
}

/// Sign applied to (tilt x, tilt y, shear x, shear y) before each mirror's pass.
const SY1_ORIENTATION: [f64; 4] = [-1.0, 1.0, -1.0, -1.0];
const SY2_ORIENTATION: [f64; 4] = [1.0, 1.0, 1.0, -1.0];

impl OpticalGeometry {
    pub(crate) fn coefficients(&self) -> Coefficients {
        let (ls2, ll, ld, f, lbs, lc, lr) =
            (self.ls2, self.ll, self.ld, self.f, self.lbs, self.lc, self.lr);
        let m = self.m;
        let lr_m2 = lr * m * m;

        Coefficients {
            den: ls2 * (ld * (lr_m2 - ll + f + lbs + lc) + f * (ll - lr_m2 - lc - lbs)),
            a1: f * (lc + lbs + lr_m2),
            b1: m * (ld * ll - ld * f - ll * f),
            a2: f * (lc + lbs + lr_m2 + ls2),
            b2: m * (ld * ll - ld * f - ll * f - ls2 * f + ls2 * ld),
        }
    }

    /// Converts a pixel displacement pair into millimetres on both detectors.
    pub fn offsets_mm(&self, tilt: PixelOffset, shear: PixelOffset) -> DetectorOffsets {
        DetectorOffsets {
            tilt_x: tilt.x * self.xpix,
            tilt_y: tilt.y * self.ypix,
            shear_x: shear.x * self.xpix,
            shear_y: shear.y * self.ypix,
        }
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        let positive = [
            ("ls2", self.ls2),
            ("ll", self.ll),
            ("f", self.f),
            ("m", self.m),
            ("xpix", self.xpix),
            ("ypix", self.ypix),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(GeometryError::NotPositive { name, value });
            }
        }

        let non_negative = [
            ("ld", self.ld),
            ("lbs", self.lbs),
            ("lc", self.lc),
            ("lr", self.lr),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(GeometryError::Negative { name, value });
            }
        }

        if self.coefficients().den == 0.0 {
            return Err(GeometryError::Degenerate);
        }

        if self.channels.sy1 == self.channels.sy2 {
            return Err(GeometryError::SharedChannel(self.channels.sy1));
        }

        Ok(())
    }
}

fn to_mount_frame(x: f64, y: f64) -> (f64, f64) {
    (FRAC_1_SQRT_2 * (x - y), FRAC_1_SQRT_2 * (x + y))
}

fn mirror_pass(offsets: &DetectorOffsets, orientation: [f64; 4], a: f64, b: f64, den: f64) -> (f64, f64) {
    let hxdt = orientation[0] * offsets.tilt_x;
    let hydt = orientation[1] * offsets.tilt_y;
    let hxds = orientation[2] * offsets.shear_x;
    let hyds = orientation[3] * offsets.shear_y;

    let theta_x = -0.5 * (a * hydt + b * hyds) / den;
    let theta_y = 0.5 * (a * hxdt + b * hxds) / den;

    let (x, y) = to_mount_frame(theta_x, theta_y);
    (-x.to_degrees(), -y.to_degrees())
}

/// Angles for both mirrors that null the displacement of the current
/// centroids from their references.
///
/// No validation is done here: a degenerate geometry yields non-finite angles,
/// which callers must reject before commanding motion.
pub fn compute_correction(
    tilt_reference: PixelOffset,
    tilt_current: PixelOffset,
    shear_reference: PixelOffset,
    shear_current: PixelOffset,
    geometry: &OpticalGeometry,
) -> AngularCorrection {
    let offsets = geometry.offsets_mm(tilt_current - tilt_reference, shear_current - shear_reference);
    let k = geometry.coefficients();

    let (m1_x, m1_y) = mirror_pass(&offsets, SY1_ORIENTATION, k.a1, k.b1, k.den);
    let (m2_x, m2_y) = mirror_pass(&offsets, SY2_ORIENTATION, k.a2, k.b2, k.den);

    AngularCorrection {
        m1_x,
        m1_y,
        m2_x,
        m2_y,
    }
}

/// Signed angle, in degrees, subtended at the tilt lens by the tilt detector displacement.
pub fn compute_angular_extent(
    tilt_reference: PixelOffset,
    tilt_current: PixelOffset,
    geometry: &OpticalGeometry,
) -> f64 {
    let delta = tilt_current - tilt_reference;
    let dx = delta.x * geometry.xpix;
    let dy = -delta.y * geometry.ypix;

    let distance = dx.hypot(dy);
    let theta = (2.0 * (distance / (2.0 * geometry.f)).atan()).to_degrees();

    if dx != 0.0 && dy < 0.0 { -theta } else { theta }
}
