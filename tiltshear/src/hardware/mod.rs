use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::geometry::{OpticalGeometry, compute_correction};
use crate::models::{AngularCorrection, AxisId, CentroidSnapshot, PixelOffset};

pub mod agilis;
pub mod centroid_stream;
#[cfg(test)]
pub mod mock;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("actuator is locked by {owner}")]
pub struct LockHeld {
    pub owner: String,
}

/// Two-axis stepper controller that drives the mirror mounts, one channel at a time.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn connect(&self) -> io::Result<()>;
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;

    async fn select_channel(&self, channel: u8) -> io::Result<()>;
    async fn current_channel(&self) -> io::Result<u8>;

    async fn set_uniform_step_size(&self, amplitude: u8) -> io::Result<()>;
    async fn step_axis(&self, axis: AxisId, count: i32) -> io::Result<()>;
    async fn is_moving(&self, axis: AxisId) -> io::Result<bool>;

    /// Limit switch bits of the selected channel.
    async fn limit_status(&self) -> io::Result<u8>;
    async fn home_axis(&self, axis: AxisId) -> io::Result<()>;

    fn acquire_exclusive_lock(&self, owner: &str) -> Result<(), LockHeld>;
    fn release_exclusive_lock(&self, owner: &str);
}

/// Beam position detector fed by an external frame grabber.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    fn reference_centroid(&self) -> PixelOffset;
    fn current_centroid(&self) -> PixelOffset;
    /// Latches the current centroid as the new reference.
    fn set_reference_centroid(&self);

    async fn configure_coadd(&self, frames: u32, interval: Duration) -> io::Result<()>;
    async fn capture_single_coadded_frame(&self, block_until_done: bool) -> io::Result<()>;

    async fn initialize(&self) -> io::Result<()>;
    async fn terminate(&self);
}

/// Owner-tagged lock guarding the actuator.
#[derive(Debug, Default)]
pub struct ExclusiveLock {
    owner: Mutex<Option<String>>,
}

impl ExclusiveLock {
    pub fn acquire(&self, owner: &str) -> Result<(), LockHeld> {
        let mut current = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        match current.as_deref() {
            Some(held) => Err(LockHeld {
                owner: held.to_string(),
            }),
            None => {
                *current = Some(owner.to_string());
                Ok(())
            }
        }
    }

    pub fn release(&self, owner: &str) {
        let mut current = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        match current.as_deref() {
            Some(held) if held == owner => *current = None,
            Some(held) => warn!(owner, held, "Refusing to release a lock held by someone else"),
            None => debug!(owner, "Lock already released"),
        }
    }

    pub fn owner(&self) -> Option<String> {
        self.owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Holds the actuator's exclusive lock until dropped.
pub struct ExclusiveAccess {
    actuator: Arc<dyn Actuator>,
    owner: &'static str,
}

impl ExclusiveAccess {
    pub fn acquire(actuator: Arc<dyn Actuator>, owner: &'static str) -> Result<Self, LockHeld> {
        actuator.acquire_exclusive_lock(owner)?;
        debug!(owner, "Actuator lock acquired");
        Ok(Self { actuator, owner })
    }

    pub fn owner(&self) -> &'static str {
        self.owner
    }
}

impl Drop for ExclusiveAccess {
    fn drop(&mut self) {
        self.actuator.release_exclusive_lock(self.owner);
        debug!(owner = self.owner, "Actuator lock released");
    }
}

impl std::fmt::Debug for ExclusiveAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveAccess")
            .field("owner", &self.owner)
            .finish()
    }
}

/// Polls `is_moving` until the axis stops.
pub async fn wait_until_stopped(actuator: &dyn Actuator, axis: AxisId, poll: Duration) -> io::Result<()> {
    while actuator.is_moving(axis).await? {
        tokio::time::sleep(poll).await;
    }
    Ok(())
}

/// Steps one axis and waits for the motion to finish. Zero counts are skipped.
pub async fn step_and_wait(
    actuator: &dyn Actuator,
    axis: AxisId,
    count: i32,
    poll: Duration,
) -> io::Result<()> {
    if count == 0 {
        return Ok(());
    }
    actuator.step_axis(axis, count).await?;
    wait_until_stopped(actuator, axis, poll).await
}

/// The tilt and shear detectors.
#[derive(Clone)]
pub struct Detectors {
    pub tilt: Arc<dyn Detector>,
    pub shear: Arc<dyn Detector>,
}

impl Detectors {
    pub fn new(tilt: Arc<dyn Detector>, shear: Arc<dyn Detector>) -> Self {
        Self { tilt, shear }
    }

    pub fn snapshot(&self) -> CentroidSnapshot {
        CentroidSnapshot {
            tilt_reference: self.tilt.reference_centroid(),
            tilt: self.tilt.current_centroid(),
            shear_reference: self.shear.reference_centroid(),
            shear: self.shear.current_centroid(),
        }
    }

    pub fn correction(&self, geometry: &OpticalGeometry) -> (CentroidSnapshot, AngularCorrection) {
        let snapshot = self.snapshot();
        let correction = compute_correction(
            snapshot.tilt_reference,
            snapshot.tilt,
            snapshot.shear_reference,
            snapshot.shear,
            geometry,
        );
        (snapshot, correction)
    }

    pub fn set_references(&self) {
        self.tilt.set_reference_centroid();
        self.shear.set_reference_centroid();
    }

    pub async fn arm_coadd(&self, frames: u32, interval: Duration) -> io::Result<()> {
        for detector in [&self.tilt, &self.shear] {
            detector.configure_coadd(frames, interval).await?;
            detector.initialize().await?;
        }
        Ok(())
    }

    /// Captures one coadded frame on the tilt detector, then on the shear detector.
    pub async fn capture_coadded(&self) -> io::Result<()> {
        self.tilt.capture_single_coadded_frame(true).await?;
        self.shear.capture_single_coadded_frame(true).await
    }

    pub async fn initialize(&self) -> io::Result<()> {
        self.tilt.initialize().await?;
        self.shear.initialize().await
    }

    pub async fn terminate(&self) {
        self.tilt.terminate().await;
        self.shear.terminate().await;
    }
}
