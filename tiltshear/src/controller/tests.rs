use std::{sync::Arc, time::Duration};

use super::*;
use crate::calibration::CALIBRATOR;
use crate::config::CalibrationConfig;
use crate::hardware::mock::{Call, MockActuator, MockDetector};
use crate::models::{AxisId, PixelOffset};

struct Rig {
    actuator: Arc<MockActuator>,
    tilt: Arc<MockDetector>,
    shear: Arc<MockDetector>,
    controller: AlignmentController,
}

fn rig_with(settings: LoopSettings, geometry: OpticalGeometry) -> Rig {
    let actuator = Arc::new(MockActuator::new());
    let tilt = Arc::new(MockDetector::with_current("tilt", PixelOffset::new(37.02, -37.02)));
    let shear = Arc::new(MockDetector::with_current("shear", PixelOffset::new(430.0, -430.0)));
    let detectors = Detectors::new(tilt.clone(), shear.clone());

    let calibrator = StepSizeCalibrator::new(
        actuator.clone(),
        detectors.clone(),
        geometry,
        SharedStepSizes::default(),
        CalibrationConfig::default(),
    );
    let controller = AlignmentController::new(actuator.clone(), detectors, geometry, calibrator, settings);

    Rig {
        actuator,
        tilt,
        shear,
        controller,
    }
}

fn rig(settings: LoopSettings) -> Rig {
    rig_with(settings, OpticalGeometry::default())
}

fn manual_settings() -> LoopSettings {
    LoopSettings {
        error_checking: false,
        recalibrate_after_recovery: false,
        ..LoopSettings::default()
    }
}

fn is_violation(result: Result<(), ControlError>, expected: ConcurrencyViolation) -> bool {
    matches!(result, Err(ControlError::Concurrency(ref v)) if *v == expected)
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected_without_touching_the_lock() {
    let rig = rig(manual_settings());

    rig.controller.start_manual_loop(50, false).await.unwrap();

    assert!(is_violation(
        rig.controller.start_manual_loop(50, false).await,
        ConcurrencyViolation::SessionActive
    ));
    assert!(is_violation(
        rig.controller.start_auto_loop(50, false).await,
        ConcurrencyViolation::SessionActive
    ));
    assert_eq!(rig.controller.state(), LoopState::ManualArmed);
    assert_eq!(rig.actuator.lock_owner().as_deref(), Some(CONTROLLER));

    let amplitude_calls = rig
        .actuator
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::SetStepSize(_)))
        .count();
    assert_eq!(amplitude_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let rig = rig(manual_settings());

    rig.controller.stop().await;
    rig.controller.start_manual_loop(50, false).await.unwrap();
    rig.controller.stop().await;
    rig.controller.stop().await;

    assert_eq!(rig.controller.state(), LoopState::Idle);
    assert_eq!(rig.actuator.lock_owner(), None);
}

#[tokio::test(start_paused = true)]
async fn step_without_session_is_rejected() {
    let rig = rig(manual_settings());

    let err = rig.controller.single_step().unwrap_err();

    assert!(matches!(
        err,
        ControlError::Concurrency(ConcurrencyViolation::NoSession)
    ));
}

#[tokio::test(start_paused = true)]
async fn step_while_in_flight_is_rejected() {
    let rig = rig(manual_settings());
    rig.actuator.set_moving_polls(3);
    rig.controller.start_manual_loop(50, false).await.unwrap();

    rig.controller.single_step().unwrap();
    let telemetry = rig.controller.telemetry();
    let table = rig.controller.step_size_table();

    let err = rig.controller.single_step().unwrap_err();

    assert!(matches!(
        err,
        ControlError::Concurrency(ConcurrencyViolation::StepInProgress)
    ));
    assert_eq!(rig.controller.telemetry(), telemetry);
    assert_eq!(rig.controller.step_size_table(), table);

    assert_eq!(
        rig.controller.wait_for_motion().await.unwrap(),
        Some(MotionOutcome::Completed)
    );
    assert!(!rig.controller.is_step_in_flight());
    assert_eq!(rig.controller.single_step().unwrap().step, 2);
}

#[tokio::test(start_paused = true)]
async fn steps_alternate_between_mirrors() {
    let rig = rig(LoopSettings {
        alternate_mirrors: true,
        ..manual_settings()
    });
    rig.controller.start_manual_loop(50, false).await.unwrap();

    let first = rig.controller.single_step().unwrap();
    rig.controller.wait_for_motion().await.unwrap();
    let second = rig.controller.single_step().unwrap();
    rig.controller.wait_for_motion().await.unwrap();

    assert_eq!(first.phase, Phase::Sy1);
    assert_eq!(second.phase, Phase::Sy2);
    assert_eq!(
        rig.actuator.steps(),
        vec![
            (1, AxisId::One, first.commands.m1_axis1),
            (1, AxisId::Two, first.commands.m1_axis2),
            (2, AxisId::One, second.commands.m2_axis1),
            (2, AxisId::Two, second.commands.m2_axis2),
        ]
    );
    assert_eq!(rig.controller.latest_step_command(), second.commands);
}

#[tokio::test(start_paused = true)]
async fn step_commands_follow_the_step_size_table() {
    let rig = rig(manual_settings());
    rig.controller.start_manual_loop(50, false).await.unwrap();

    let report = rig.controller.single_step().unwrap();

    // Unit gains pass the measured angles straight through.
    assert_eq!(report.correction, report.measured);
    assert_eq!(
        report.commands,
        StepSizeTable::default().step_commands(&report.correction)
    );
    assert!(report.commands.m1_axis1 > 0);
    assert_eq!(rig.controller.latest_correction(), report.correction);
}

#[tokio::test(start_paused = true)]
async fn default_step_moves_all_axes_in_order() {
    assert!(!LoopSettings::default().alternate_mirrors);
    let rig = rig(manual_settings());
    rig.controller.start_manual_loop(50, false).await.unwrap();

    let first = rig.controller.single_step().unwrap();
    rig.controller.wait_for_motion().await.unwrap();
    let second = rig.controller.single_step().unwrap();
    rig.controller.wait_for_motion().await.unwrap();

    assert_eq!((first.phase, second.phase), (Phase::Sy1, Phase::Sy2));
    let (a, b) = (first.commands, second.commands);
    assert_eq!(
        rig.actuator.steps(),
        vec![
            (1, AxisId::One, a.m1_axis1),
            (1, AxisId::Two, a.m1_axis2),
            (2, AxisId::One, a.m2_axis1),
            (2, AxisId::Two, a.m2_axis2),
            (1, AxisId::One, b.m1_axis1),
            (1, AxisId::Two, b.m1_axis2),
            (2, AxisId::One, b.m2_axis1),
            (2, AxisId::Two, b.m2_axis2),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn gain_change_applies_to_running_session() {
    let rig = rig(manual_settings());
    rig.controller.start_manual_loop(50, false).await.unwrap();

    rig.controller.set_gains(PidGains {
        kp: 2.0,
        ki: 0.0,
        kd: 0.0,
    });
    let report = rig.controller.single_step().unwrap();

    assert_eq!(report.correction.m1_x, 2.0 * report.measured.m1_x);
    assert_eq!(rig.controller.settings().gains.kp, 2.0);
}

#[tokio::test(start_paused = true)]
async fn lost_shear_beam_homes_before_returning() {
    let rig = rig(LoopSettings {
        error_checking: true,
        ..manual_settings()
    });
    rig.shear.set_current(PixelOffset::ORIGIN);
    rig.actuator.set_moving_polls(1);
    rig.controller.start_manual_loop(50, false).await.unwrap();

    rig.controller.single_step().unwrap();
    let outcome = rig.controller.wait_for_motion().await.unwrap();

    match outcome {
        Some(MotionOutcome::Recovered(fault)) => assert!(fault.contains(FaultCode::SHEAR_BEAM_LOST)),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(
        rig.actuator.homes(),
        vec![
            (1, AxisId::One),
            (1, AxisId::Two),
            (2, AxisId::One),
            (2, AxisId::Two),
        ]
    );
    assert_eq!(rig.controller.state(), LoopState::ManualArmed);
    assert_eq!(rig.controller.telemetry().phase, Some(Phase::Sy1));
}

#[tokio::test(start_paused = true)]
async fn recovery_recalibrates_without_losing_entries() {
    let rig = rig(LoopSettings {
        error_checking: true,
        recalibrate_after_recovery: true,
        ..manual_settings()
    });
    rig.tilt.set_current(PixelOffset::ORIGIN);
    rig.controller.start_manual_loop(40, false).await.unwrap();

    rig.controller.single_step().unwrap();
    let outcome = rig.controller.wait_for_motion().await.unwrap();

    assert!(matches!(outcome, Some(MotionOutcome::Recovered(_))));
    let probes: Vec<_> = rig
        .actuator
        .steps()
        .into_iter()
        .filter(|(_, _, count)| count.abs() == 100)
        .collect();
    assert_eq!(probes.len(), 10);
    // No beam on the tilt detector, so no probe is usable.
    assert_eq!(rig.controller.step_size_table(), StepSizeTable::default());
    assert_eq!(rig.actuator.calls().last(), Some(&Call::SetStepSize(40)));
    assert_eq!(rig.actuator.lock_owner().as_deref(), Some(CONTROLLER));
}

#[tokio::test(start_paused = true)]
async fn transport_fault_ends_session() {
    let rig = rig(manual_settings());
    rig.actuator.fail_steps_after(0);
    rig.controller.start_manual_loop(50, false).await.unwrap();

    rig.controller.single_step().unwrap();
    let err = rig.controller.wait_for_motion().await.unwrap_err();

    assert!(matches!(err, ControlError::Transport(_)));
    assert_eq!(rig.controller.state(), LoopState::Idle);
    assert_eq!(rig.actuator.lock_owner(), None);
    assert!(rig.actuator.calls().contains(&Call::Disconnect));
    assert!(rig.controller.telemetry().last_fault.is_some());
}

#[tokio::test(start_paused = true)]
async fn coadd_step_captures_on_both_detectors() {
    let rig = rig(manual_settings());
    rig.controller.start_manual_loop(50, true).await.unwrap();
    assert!(rig.tilt.is_initialized() && rig.shear.is_initialized());

    rig.controller.single_step().unwrap();
    assert_eq!(
        rig.controller.wait_for_motion().await.unwrap(),
        Some(MotionOutcome::Completed)
    );
    assert_eq!((rig.tilt.captures(), rig.shear.captures()), (1, 1));

    rig.controller.stop().await;
    assert_eq!((rig.tilt.terminations(), rig.shear.terminations()), (1, 1));
    assert!(!rig.tilt.is_initialized());
}

#[tokio::test(start_paused = true)]
async fn detector_fault_during_coadd_ends_session() {
    let rig = rig(manual_settings());
    rig.tilt.fail_capture(true);
    rig.controller.start_manual_loop(50, true).await.unwrap();

    rig.controller.single_step().unwrap();
    let err = rig.controller.wait_for_motion().await.unwrap_err();

    assert!(matches!(err, ControlError::Detector(_)));
    assert_eq!(rig.controller.state(), LoopState::Idle);
    assert_eq!(rig.actuator.lock_owner(), None);
    assert!(rig.tilt.terminations() >= 1);
    assert!(!rig.actuator.calls().contains(&Call::Disconnect));
}

#[tokio::test(start_paused = true)]
async fn stop_during_coadd_capture_releases_lock() {
    let rig = rig(manual_settings());
    rig.tilt.set_capture_delay(Duration::from_secs(60));
    rig.controller.start_manual_loop(50, true).await.unwrap();

    rig.controller.single_step().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rig.controller.is_step_in_flight());

    rig.controller.stop().await;

    assert_eq!(rig.controller.state(), LoopState::Idle);
    assert_eq!(rig.actuator.lock_owner(), None);
    assert!(!rig.controller.is_step_in_flight());
    assert_eq!(rig.tilt.captures(), 0);
    assert_eq!(rig.controller.wait_for_motion().await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn auto_loop_steps_on_interval_until_stopped() {
    let rig = rig(LoopSettings {
        step_interval: Duration::from_millis(150),
        ..manual_settings()
    });
    rig.controller.start_auto_loop(50, false).await.unwrap();
    assert_eq!(rig.controller.state(), LoopState::AutoRunning);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let telemetry = rig.controller.telemetry();
    assert!(telemetry.step_count >= 5, "only {} steps", telemetry.step_count);

    rig.controller.stop().await;
    let moved = rig.actuator.steps().len();
    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert_eq!(rig.actuator.steps().len(), moved);
    assert_eq!(rig.controller.state(), LoopState::Idle);
    assert_eq!(rig.actuator.lock_owner(), None);
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_auto_loop_mid_motion() {
    let rig = rig(manual_settings());
    rig.actuator.set_moving_polls(100);
    rig.controller.start_auto_loop(50, false).await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(rig.controller.is_step_in_flight());

    rig.controller.stop().await;

    assert!(!rig.controller.is_step_in_flight());
    assert_eq!(rig.actuator.lock_owner(), None);
}

#[tokio::test(start_paused = true)]
async fn auto_start_clears_baseline_and_manual_keeps_it() {
    let rig = rig(manual_settings());

    rig.controller.start_manual_loop(50, false).await.unwrap();
    rig.controller.single_step().unwrap();
    rig.controller.wait_for_motion().await.unwrap();
    rig.controller.stop().await;
    let baseline = rig.controller.telemetry().baseline_mm;
    assert!(baseline.is_some());

    rig.controller.start_manual_loop(50, false).await.unwrap();
    assert_eq!(rig.controller.telemetry().baseline_mm, baseline);
    rig.controller.stop().await;

    rig.controller.start_auto_loop(50, false).await.unwrap();
    assert_eq!(rig.controller.telemetry().baseline_mm, None);
    rig.controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn start_fails_while_calibrator_holds_lock() {
    let rig = rig(manual_settings());
    rig.actuator.acquire_exclusive_lock(CALIBRATOR).unwrap();

    let err = rig.controller.start_manual_loop(50, false).await.unwrap_err();

    assert!(matches!(
        err,
        ControlError::Concurrency(ConcurrencyViolation::LockHeld { ref owner }) if owner == CALIBRATOR
    ));
    assert_eq!(rig.controller.state(), LoopState::Idle);

    rig.actuator.release_exclusive_lock(CALIBRATOR);
    rig.controller.start_manual_loop(50, false).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn non_finite_correction_is_rejected_before_motion() {
    let rig = rig_with(
        manual_settings(),
        OpticalGeometry {
            ls2: 0.0,
            ..OpticalGeometry::default()
        },
    );
    rig.controller.start_manual_loop(50, false).await.unwrap();

    let err = rig.controller.single_step().unwrap_err();

    assert!(matches!(err, ControlError::InvalidCorrection));
    assert!(!rig.controller.is_step_in_flight());
    assert!(rig.actuator.steps().is_empty());
}

#[tokio::test(start_paused = true)]
async fn move_mounts_drives_all_axes_when_idle() {
    let rig = rig(manual_settings());
    let commands = StepCommand {
        m1_axis1: 10,
        m1_axis2: -10,
        m2_axis1: 20,
        m2_axis2: -20,
    };

    let measured = rig.controller.move_mounts(commands).await.unwrap();

    assert!(measured.is_finite());
    assert_eq!(
        rig.actuator.steps(),
        vec![
            (1, AxisId::One, 10),
            (1, AxisId::Two, -10),
            (2, AxisId::One, 20),
            (2, AxisId::Two, -20),
        ]
    );
    assert_eq!(rig.controller.latest_step_command(), commands);
    assert_eq!(rig.actuator.lock_owner(), None);
}

#[tokio::test(start_paused = true)]
async fn move_mounts_rejected_during_session() {
    let rig = rig(manual_settings());
    rig.controller.start_manual_loop(50, false).await.unwrap();

    let err = rig
        .controller
        .move_mounts(StepCommand::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ControlError::Concurrency(ConcurrencyViolation::SessionActive)
    ));
}

#[tokio::test(start_paused = true)]
async fn home_all_when_idle() {
    let rig = rig(manual_settings());

    rig.controller.home_all().await.unwrap();

    assert_eq!(rig.actuator.homes().len(), 4);
    assert_eq!(rig.actuator.lock_owner(), None);
}
