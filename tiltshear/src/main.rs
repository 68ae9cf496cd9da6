use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use tracing::{error, info};

use tiltshear::{
    calibration::StepSizeCalibrator,
    config::{create_default_config, init_config},
    controller::{AlignmentController, LoopSettings},
    hardware::{
        Actuator, Detector, Detectors, agilis::create_actuator,
        centroid_stream::CentroidStreamDetector,
    },
    logging, routines,
    state_monitor::run_telemetry_monitor,
    step_size::SharedStepSizes,
};

const MONITOR_PERIOD: Duration = Duration::from_secs(1);

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|val| val == "1" || val.to_lowercase() == "true")
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if env_flag("CREATE_CONFIG") {
        create_default_config(None::<PathBuf>)?;
    }

    let (_config_manager, config) = init_config().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Run with CREATE_CONFIG=1 to create a default configuration file.");
        e
    })?;

    let _log_guard = logging::init(&config.logging)?;

    let (executor, actuator) = create_actuator(&config.actuator)?;
    let executor = executor.spawn();
    let actuator: Arc<dyn Actuator> = Arc::new(actuator);

    let tilt: Arc<dyn Detector> = Arc::new(CentroidStreamDetector::new("tilt", &config.tilt_detector));
    let shear: Arc<dyn Detector> = Arc::new(CentroidStreamDetector::new("shear", &config.shear_detector));
    let detectors = Detectors::new(tilt, shear);

    let calibrator = StepSizeCalibrator::new(
        actuator.clone(),
        detectors.clone(),
        config.geometry,
        SharedStepSizes::default(),
        config.calibration.clone(),
    );
    let controller = AlignmentController::new(
        actuator.clone(),
        detectors.clone(),
        config.geometry,
        calibrator.clone(),
        LoopSettings::from_config(&config.control, &config.coadd),
    );
    let monitor = tokio::spawn(run_telemetry_monitor(controller.clone(), MONITOR_PERIOD));

    let coadd = env_flag("COADD");
    let outcome: anyhow::Result<()> = async {
        detectors
            .initialize()
            .await
            .context("Failed to connect to the frame grabbers")?;

        tokio::select! {
            result = routines::calibrate_and_align(
                &calibrator,
                &controller,
                &detectors,
                config.control.step_amplitude,
                coadd,
            ) => {
                let reports = result.context("Calibrate and align failed")?;
                info!(mirrors = reports.len(), "Automatic alignment running, press Ctrl-C to stop");
                tokio::signal::ctrl_c().await?;
            }
            signal = tokio::signal::ctrl_c() => signal?,
        }
        Ok(())
    }
    .await;

    if let Err(e) = &outcome {
        error!("{:#}", e);
    }

    info!("Shutting down");
    controller.stop().await;
    monitor.abort();
    let _ = monitor.await;
    detectors.terminate().await;
    actuator.disconnect().await;

    // The executor thread exits once every handle to the actuator is gone.
    drop((controller, calibrator, detectors, actuator));
    executor.await.context("Actuator executor panicked")?;

    outcome
}
