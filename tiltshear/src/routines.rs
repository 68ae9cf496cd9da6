use std::io;

use tracing::info;

use crate::calibration::{CalibrationReport, StepSizeCalibrator};
use crate::controller::AlignmentController;
use crate::error::ControlError;
use crate::hardware::Detectors;

/// Latches the current centroids as references on both detectors.
/// In coadd mode a fresh coadded frame is captured first; the detectors must be armed.
pub async fn set_references(detectors: &Detectors, coadd: bool) -> io::Result<()> {
    if coadd {
        detectors.capture_coadded().await?;
    }
    detectors.set_references();

    let snapshot = detectors.snapshot();
    info!(
        tilt_x = snapshot.tilt_reference.x,
        tilt_y = snapshot.tilt_reference.y,
        shear_x = snapshot.shear_reference.x,
        shear_y = snapshot.shear_reference.y,
        "References latched"
    );
    Ok(())
}

/// Calibrates both mirrors, latches fresh references and starts the automatic loop.
pub async fn calibrate_and_align(
    calibrator: &StepSizeCalibrator,
    controller: &AlignmentController,
    detectors: &Detectors,
    step_amplitude: u8,
    coadd: bool,
) -> Result<Vec<CalibrationReport>, ControlError> {
    let reports = calibrator.calibrate_all().await?;
    info!(table = ?calibrator.step_sizes().snapshot(), "Step sizes calibrated");

    if coadd {
        let settings = controller.settings();
        detectors
            .arm_coadd(settings.coadd_frames, settings.coadd_interval)
            .await
            .map_err(ControlError::Detector)?;
    }
    set_references(detectors, coadd)
        .await
        .map_err(ControlError::Detector)?;

    controller.start_auto_loop(step_amplitude, coadd).await?;
    Ok(reports)
}
