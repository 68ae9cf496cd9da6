use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::config::CalibrationConfig;
use crate::error::ControlError;
use crate::geometry::{OpticalGeometry, compute_angular_extent};
use crate::hardware::{Actuator, Detectors, ExclusiveAccess, step_and_wait};
use crate::models::{AngularCorrection, AxisId, Direction, Mirror};
use crate::step_size::SharedStepSizes;

pub const CALIBRATOR: &str = "StepSizeCalibrator";

/// Test motions in the order they are driven.
const PROBES: [(AxisId, Direction); 4] = [
    (AxisId::One, Direction::Negative),
    (AxisId::One, Direction::Positive),
    (AxisId::Two, Direction::Negative),
    (AxisId::Two, Direction::Positive),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSample {
    pub axis: AxisId,
    pub steps: i32,
    pub correction: AngularCorrection,
    pub extent: f64,
    /// Stored step size, `None` when the probe gave no usable measurement.
    pub recorded: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    pub mirror: Mirror,
    pub samples: Vec<ProbeSample>,
}

/// Measures degrees-per-step for each axis and direction of a mirror.
#[derive(Clone)]
pub struct StepSizeCalibrator {
    actuator: Arc<dyn Actuator>,
    detectors: Detectors,
    geometry: OpticalGeometry,
    step_sizes: SharedStepSizes,
    config: CalibrationConfig,
}

impl StepSizeCalibrator {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        detectors: Detectors,
        geometry: OpticalGeometry,
        step_sizes: SharedStepSizes,
        config: CalibrationConfig,
    ) -> Self {
        Self {
            actuator,
            detectors,
            geometry,
            step_sizes,
            config,
        }
    }

    pub fn step_sizes(&self) -> &SharedStepSizes {
        &self.step_sizes
    }

    pub async fn calibrate(&self, mirror: Mirror) -> Result<CalibrationReport, ControlError> {
        let _access = ExclusiveAccess::acquire(self.actuator.clone(), CALIBRATOR)?;
        self.calibrate_held(mirror).await
    }

    /// Calibrates `mirrors` in order without releasing the actuator in between.
    pub async fn calibrate_mirrors(&self, mirrors: &[Mirror]) -> Result<Vec<CalibrationReport>, ControlError> {
        let _access = ExclusiveAccess::acquire(self.actuator.clone(), CALIBRATOR)?;

        let mut reports = Vec::with_capacity(mirrors.len());
        for &mirror in mirrors {
            reports.push(self.calibrate_held(mirror).await?);
        }
        Ok(reports)
    }

    pub async fn calibrate_all(&self) -> Result<Vec<CalibrationReport>, ControlError> {
        self.calibrate_mirrors(&Mirror::ALL).await
    }

    /// Runs the calibration as its own task so it can be aborted.
    pub fn spawn(&self, mirrors: Vec<Mirror>) -> CalibrationRun {
        let calibrator = self.clone();
        CalibrationRun {
            handle: tokio::spawn(async move { calibrator.calibrate_mirrors(&mirrors).await }),
        }
    }

    /// Calibrates one mirror. The caller must already hold the actuator lock.
    #[instrument(skip(self))]
    pub(crate) async fn calibrate_held(&self, mirror: Mirror) -> Result<CalibrationReport, ControlError> {
        match self.run(mirror).await {
            Ok(report) => Ok(report),
            Err(source) => {
                if let ControlError::Transport(_) = source {
                    self.actuator.disconnect().await;
                }
                error!(%mirror, "Calibration failed: {}", source);
                Err(ControlError::Calibration {
                    mirror,
                    source: Box::new(source),
                })
            }
        }
    }

    async fn run(&self, mirror: Mirror) -> Result<CalibrationReport, ControlError> {
        let transport = ControlError::Transport;
        let actuator = self.actuator.as_ref();
        let poll = self.config.poll_interval();
        let test_steps = self.config.test_steps;

        if !actuator.is_connected() {
            actuator.connect().await.map_err(transport)?;
        }
        actuator
            .select_channel(self.geometry.channels.channel(mirror))
            .await
            .map_err(transport)?;
        actuator
            .set_uniform_step_size(self.config.step_amplitude)
            .await
            .map_err(transport)?;

        self.detectors.set_references();
        tokio::time::sleep(self.config.settle()).await;

        // Entries are staged so a failed run leaves the shared table untouched.
        let mut staged = self.step_sizes.snapshot();
        let mut samples = Vec::with_capacity(PROBES.len());

        for (index, (axis, direction)) in PROBES.into_iter().enumerate() {
            let steps = direction.sign() * test_steps;
            step_and_wait(actuator, axis, steps, poll)
                .await
                .map_err(transport)?;

            let (snapshot, correction) = self.detectors.correction(&self.geometry);
            let extent = compute_angular_extent(snapshot.tilt_reference, snapshot.tilt, &self.geometry);
            let recorded = staged.record(mirror, axis, steps, extent);

            debug!(%mirror, ?axis, steps, extent, ?recorded, "Probe finished");
            samples.push(ProbeSample {
                axis,
                steps,
                correction,
                extent,
                recorded,
            });

            if index + 1 < PROBES.len() {
                self.detectors.set_references();
            }
        }

        // The probes leave axis 2 displaced; step it back.
        step_and_wait(actuator, AxisId::Two, -test_steps, poll)
            .await
            .map_err(transport)?;

        self.step_sizes
            .update(|table| table.replace_mirror(mirror, &staged));
        info!(%mirror, "Step sizes calibrated");

        Ok(CalibrationReport { mirror, samples })
    }
}

/// Handle to a calibration running in the background.
pub struct CalibrationRun {
    handle: JoinHandle<Result<Vec<CalibrationReport>, ControlError>>,
}

impl CalibrationRun {
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> Result<Vec<CalibrationReport>, ControlError> {
        self.handle.await.map_err(ControlError::from_join)?
    }
}
