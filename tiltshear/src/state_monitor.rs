use std::time::Duration;

use tracing::{debug, info};

use crate::controller::{AlignmentController, LoopState};

/// Logs the controller's telemetry every `period` while a loop is running.
pub async fn run_telemetry_monitor(controller: AlignmentController, period: Duration) {
    let mut interval = tokio::time::interval(period);
    let mut last_step = None;

    loop {
        interval.tick().await;

        let telemetry = controller.telemetry();
        if telemetry.state == LoopState::Idle {
            last_step = None;
            continue;
        }
        if last_step == Some(telemetry.step_count) {
            debug!(state = ?telemetry.state, "No new step since last report");
            continue;
        }
        last_step = Some(telemetry.step_count);

        let offsets = telemetry.offsets_mm;
        let correction = telemetry.correction;
        info!(
            state = ?telemetry.state,
            phase = ?telemetry.phase,
            step = telemetry.step_count,
            elapsed_secs = telemetry.elapsed.map(|e| e.as_secs_f64()),
            tilt_x_mm = offsets.tilt_x,
            tilt_y_mm = offsets.tilt_y,
            shear_x_mm = offsets.shear_x,
            shear_y_mm = offsets.shear_y,
            m1_x = correction.m1_x,
            m1_y = correction.m1_y,
            m2_x = correction.m2_x,
            m2_y = correction.m2_y,
            commands = ?telemetry.commands,
            correction_rms = telemetry.correction_rms,
            last_fault = telemetry.last_fault.as_deref(),
            "Alignment telemetry"
        );
    }
}
