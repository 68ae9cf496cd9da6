//! Closed-loop alignment of the two switchyard mirrors.
//!
//! A session owns the actuator lock from start until stop. Each step reads both
//! detectors, runs the four axis PID loops and hands the resulting step counts
//! to a separate motion task, so `stop` never waits on a motion poll. At most
//! one motion task is in flight at a time.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    task::{AbortHandle, JoinHandle},
    time::Instant,
};
use tracing::{Instrument as _, debug, error, info, info_span, instrument, warn};

use crate::calibration::StepSizeCalibrator;
use crate::config::{CoaddConfig, ControlConfig};
use crate::error::{ConcurrencyViolation, ControlError};
use crate::geometry::OpticalGeometry;
use crate::hardware::{Actuator, Detectors, ExclusiveAccess};
use crate::models::{AngularCorrection, CentroidSnapshot, DetectorOffsets, Mirror, StepCommand};
use crate::pid::{IntegralLimits, PidGains};
use crate::safety::{FaultCode, SafetyMonitor};
use crate::step_size::{SharedStepSizes, StepSizeTable};

pub mod motion;
pub mod session;
pub mod telemetry;

#[cfg(test)]
mod tests;

use session::{AcquisitionMode, AlignmentSession, AxisLoops, Phase};
use telemetry::{Telemetry, TelemetryRecorder};

pub const CONTROLLER: &str = "AlignmentController";
const MOVE_MOUNTS: &str = "MoveMounts";
const HOME_ALL: &str = "HomeAll";

const STOP_GRACE: Duration = Duration::from_secs(1);
const RMS_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    ManualArmed,
    AutoRunning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub gains: PidGains,
    pub integral_limits: IntegralLimits,
    /// Amplitude used by `move_mounts`; loops take theirs at start.
    pub step_amplitude: u8,
    pub step_interval: Duration,
    pub poll_interval: Duration,
    pub error_checking: bool,
    pub alternate_mirrors: bool,
    pub recalibrate_after_recovery: bool,
    pub coadd_frames: u32,
    pub coadd_interval: Duration,
}

impl LoopSettings {
    pub fn from_config(control: &ControlConfig, coadd: &CoaddConfig) -> Self {
        Self {
            gains: control.gains,
            integral_limits: control.integral_limits,
            step_amplitude: control.step_amplitude,
            step_interval: control.step_interval(),
            poll_interval: control.poll_interval(),
            error_checking: control.error_checking,
            alternate_mirrors: control.alternate_mirrors,
            recalibrate_after_recovery: control.recalibrate_after_recovery,
            coadd_frames: coadd.frames,
            coadd_interval: coadd.interval(),
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&ControlConfig::default(), &CoaddConfig::default())
    }
}

/// What a step computed before handing off to the motion task.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: u64,
    pub phase: Phase,
    pub measured: AngularCorrection,
    pub correction: AngularCorrection,
    pub commands: StepCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOutcome {
    Completed,
    /// The safety check raised a fault and the mounts were homed.
    Recovered(FaultCode),
}

type MotionHandle = JoinHandle<Result<MotionOutcome, ControlError>>;

/// Clears the in-flight flag when the motion task ends or is dropped.
struct FlightGuard(Arc<AtomicBool>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct MotionPlan {
    session_id: u64,
    commands: StepCommand,
    mirrors: Vec<Mirror>,
    coadd: bool,
    _flight: FlightGuard,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    actuator: Arc<dyn Actuator>,
    detectors: Detectors,
    geometry: OpticalGeometry,
    step_sizes: SharedStepSizes,
    calibrator: StepSizeCalibrator,
    safety: SafetyMonitor,

    settings: Mutex<LoopSettings>,
    session: Mutex<Option<AlignmentSession>>,
    next_session_id: AtomicU64,

    in_flight: Arc<AtomicBool>,
    motion: Mutex<Option<AbortHandle>>,
    pending: Mutex<Option<MotionHandle>>,
    telemetry: Mutex<TelemetryRecorder>,
}

#[derive(Clone)]
pub struct AlignmentController {
    inner: Arc<Inner>,
}

impl AlignmentController {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        detectors: Detectors,
        geometry: OpticalGeometry,
        calibrator: StepSizeCalibrator,
        settings: LoopSettings,
    ) -> Self {
        let safety = SafetyMonitor::new(actuator.clone(), detectors.clone(), geometry.channels);

        Self {
            inner: Arc::new(Inner {
                actuator,
                detectors,
                geometry,
                step_sizes: calibrator.step_sizes().clone(),
                calibrator,
                safety,
                settings: Mutex::new(settings),
                session: Mutex::new(None),
                next_session_id: AtomicU64::new(1),
                in_flight: Arc::new(AtomicBool::new(false)),
                motion: Mutex::new(None),
                pending: Mutex::new(None),
                telemetry: Mutex::new(TelemetryRecorder::new(RMS_WINDOW)),
            }),
        }
    }

    pub fn state(&self) -> LoopState {
        match lock(&self.inner.session).as_ref().map(|session| session.mode) {
            None => LoopState::Idle,
            Some(AcquisitionMode::Manual) => LoopState::ManualArmed,
            Some(AcquisitionMode::Automatic) => LoopState::AutoRunning,
        }
    }

    pub fn settings(&self) -> LoopSettings {
        self.inner.settings()
    }

    pub fn set_gains(&self, gains: PidGains) {
        lock(&self.inner.settings).gains = gains;
        if let Some(session) = lock(&self.inner.session).as_mut() {
            session.loops.set_gains(gains);
        }
        info!(kp = gains.kp, ki = gains.ki, kd = gains.kd, "Gains updated");
    }

    pub fn set_step_interval(&self, interval: Duration) {
        lock(&self.inner.settings).step_interval = interval;
        info!(?interval, "Step interval updated");
    }

    pub fn set_error_checking(&self, enabled: bool) {
        lock(&self.inner.settings).error_checking = enabled;
        info!(enabled, "Error checking updated");
    }

    pub fn is_step_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub async fn start_manual_loop(&self, step_amplitude: u8, coadd: bool) -> Result<(), ControlError> {
        self.start_session(AcquisitionMode::Manual, step_amplitude, coadd).await
    }

    /// Starts stepping every `step_interval` until stopped. Clears the baseline offsets.
    pub async fn start_auto_loop(&self, step_amplitude: u8, coadd: bool) -> Result<(), ControlError> {
        self.start_session(AcquisitionMode::Automatic, step_amplitude, coadd).await
    }

    async fn start_session(
        &self,
        mode: AcquisitionMode,
        step_amplitude: u8,
        coadd: bool,
    ) -> Result<(), ControlError> {
        let inner = &self.inner;
        if lock(&inner.session).is_some() {
            return Err(ConcurrencyViolation::SessionActive.into());
        }

        let access = inner.acquire(CONTROLLER)?;
        let settings = inner.settings();

        if coadd {
            if let Err(e) = inner
                .detectors
                .arm_coadd(settings.coadd_frames, settings.coadd_interval)
                .await
            {
                inner.detectors.terminate().await;
                return Err(ControlError::Detector(e));
            }
        }

        if let Err(e) = inner.prepare_actuator(step_amplitude).await {
            inner.actuator.disconnect().await;
            if coadd {
                inner.detectors.terminate().await;
            }
            return Err(ControlError::Transport(e));
        }

        let id = inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        let loops = AxisLoops::new(settings.gains, settings.integral_limits);
        let session = AlignmentSession::new(id, mode, step_amplitude, coadd, loops, access);

        if mode == AcquisitionMode::Automatic {
            lock(&inner.telemetry).clear_baseline();
        }

        let mut slot = lock(&inner.session);
        let session = slot.insert(session);
        if mode == AcquisitionMode::Automatic {
            session.auto_task = Some(tokio::spawn(inner.clone().run_auto_loop(id)));
        }
        info!(session = id, ?mode, step_amplitude, coadd, "Alignment loop started");

        Ok(())
    }

    /// Computes one correction and starts driving it.
    ///
    /// Returns as soon as the motion task is launched; a step issued while the
    /// previous one is still moving is rejected with `StepInProgress`.
    pub fn single_step(&self) -> Result<StepReport, ControlError> {
        let (report, handle) = self.inner.spawn_step()?;
        *lock(&self.inner.pending) = Some(handle);
        Ok(report)
    }

    /// Waits for the motion started by the last `single_step`.
    pub async fn wait_for_motion(&self) -> Result<Option<MotionOutcome>, ControlError> {
        let pending = lock(&self.inner.pending).take();
        match pending {
            Some(handle) => handle.await.map_err(ControlError::from_join)?.map(Some),
            None => Ok(None),
        }
    }

    /// Ends the session, cancelling scheduled steps and any motion wait.
    /// Does nothing when idle.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let session = lock(&inner.session).take();
        let Some(mut session) = session else {
            debug!("Stop requested while idle");
            return;
        };

        if let Some(task) = session.auto_task.take() {
            task.abort();
            let _ = task.await;
        }
        inner.cancel_motion().await;

        if session.coadd {
            inner.detectors.terminate().await;
        }

        info!(session = session.id, steps = session.step_count, "Alignment loop stopped");
    }

    /// Steps all four axes by explicit counts, SY1 first, then returns the
    /// correction measured afterwards.
    #[instrument(skip(self))]
    pub async fn move_mounts(&self, commands: StepCommand) -> Result<AngularCorrection, ControlError> {
        let inner = &self.inner;
        let _access = inner.acquire(MOVE_MOUNTS)?;
        let settings = inner.settings();

        let moved = async {
            inner.prepare_actuator(settings.step_amplitude).await?;
            motion::drive(
                inner.actuator.as_ref(),
                &inner.geometry.channels,
                &commands,
                &Mirror::ALL,
                settings.poll_interval,
            )
            .await
        }
        .await;

        if let Err(e) = moved {
            inner.actuator.disconnect().await;
            return Err(ControlError::Transport(e));
        }

        let (snapshot, measured) = inner.detectors.correction(&inner.geometry);
        let mut telemetry = lock(&inner.telemetry);
        telemetry.record_measurement(snapshot, inner.offsets_mm(&snapshot), measured);
        let correction = telemetry.correction();
        telemetry.record_step(correction, commands);

        Ok(measured)
    }

    #[instrument(skip(self))]
    pub async fn home_all(&self) -> Result<(), ControlError> {
        let inner = &self.inner;
        let _access = inner.acquire(HOME_ALL)?;
        let poll = inner.settings().poll_interval;

        let homed = async {
            if !inner.actuator.is_connected() {
                inner.actuator.connect().await?;
            }
            motion::home_all(inner.actuator.as_ref(), &inner.geometry.channels, poll).await
        }
        .await;

        if let Err(e) = homed {
            inner.actuator.disconnect().await;
            return Err(ControlError::Transport(e));
        }
        Ok(())
    }

    pub fn latest_correction(&self) -> AngularCorrection {
        lock(&self.inner.telemetry).correction()
    }

    pub fn latest_step_command(&self) -> StepCommand {
        lock(&self.inner.telemetry).commands()
    }

    pub fn step_size_table(&self) -> StepSizeTable {
        self.inner.step_sizes.snapshot()
    }

    pub fn telemetry(&self) -> Telemetry {
        let (state, phase, step_count, elapsed) = {
            let session = lock(&self.inner.session);
            match session.as_ref() {
                Some(session) => (
                    match session.mode {
                        AcquisitionMode::Manual => LoopState::ManualArmed,
                        AcquisitionMode::Automatic => LoopState::AutoRunning,
                    },
                    Some(session.phase),
                    session.step_count,
                    Some(session.started_at.elapsed()),
                ),
                None => (LoopState::Idle, None, 0, None),
            }
        };
        lock(&self.inner.telemetry).snapshot(state, phase, step_count, elapsed)
    }
}

impl Inner {
    fn settings(&self) -> LoopSettings {
        lock(&self.settings).clone()
    }

    fn is_current(&self, session_id: u64) -> bool {
        lock(&self.session)
            .as_ref()
            .is_some_and(|session| session.id == session_id)
    }

    fn offsets_mm(&self, snapshot: &CentroidSnapshot) -> DetectorOffsets {
        self.geometry.offsets_mm(
            snapshot.tilt - snapshot.tilt_reference,
            snapshot.shear - snapshot.shear_reference,
        )
    }

    fn acquire(&self, owner: &'static str) -> Result<ExclusiveAccess, ControlError> {
        ExclusiveAccess::acquire(self.actuator.clone(), owner).map_err(|held| {
            if held.owner == CONTROLLER {
                ConcurrencyViolation::SessionActive.into()
            } else {
                held.into()
            }
        })
    }

    async fn prepare_actuator(&self, step_amplitude: u8) -> std::io::Result<()> {
        if !self.actuator.is_connected() {
            self.actuator.connect().await?;
        }
        self.actuator.set_uniform_step_size(step_amplitude).await
    }

    fn begin_step(&self) -> Result<(StepReport, MotionPlan), ControlError> {
        let settings = self.settings();
        let mut slot = lock(&self.session);
        let session = slot.as_mut().ok_or(ConcurrencyViolation::NoSession)?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(session = session.id, "Step already in progress");
            return Err(ConcurrencyViolation::StepInProgress.into());
        }
        let flight = FlightGuard(self.in_flight.clone());

        let (snapshot, measured) = self.detectors.correction(&self.geometry);
        if !measured.is_finite() {
            warn!(?measured, "Rejecting non-finite correction");
            return Err(ControlError::InvalidCorrection);
        }

        let correction = session.loops.correct(&measured);
        let commands = self.step_sizes.snapshot().step_commands(&correction);
        let phase = session.advance();
        let mirrors = if settings.alternate_mirrors {
            vec![phase.mirror()]
        } else {
            Mirror::ALL.to_vec()
        };

        {
            let mut telemetry = lock(&self.telemetry);
            telemetry.record_measurement(snapshot, self.offsets_mm(&snapshot), measured);
            telemetry.record_step(correction, commands);
        }

        debug!(
            session = session.id,
            step = session.step_count,
            ?phase,
            ?commands,
            "Step computed"
        );

        let report = StepReport {
            step: session.step_count,
            phase,
            measured,
            correction,
            commands,
        };
        let plan = MotionPlan {
            session_id: session.id,
            commands,
            mirrors,
            coadd: session.coadd,
            _flight: flight,
        };
        Ok((report, plan))
    }

    fn spawn_step(self: &Arc<Self>) -> Result<(StepReport, MotionHandle), ControlError> {
        let (report, plan) = self.begin_step()?;

        let inner = self.clone();
        let handle = tokio::spawn(async move { inner.run_motion(plan).await });
        *lock(&self.motion) = Some(handle.abort_handle());

        Ok((report, handle))
    }

    async fn run_motion(self: Arc<Self>, plan: MotionPlan) -> Result<MotionOutcome, ControlError> {
        let span = info_span!("motion", session = plan.session_id, mirrors = ?plan.mirrors);
        let result = self.execute(&plan).instrument(span).await;

        if let Err(e) = &result {
            lock(&self.telemetry).record_fault(e.to_string());
            if e.is_fatal() {
                self.end_session_after_fault(plan.session_id, e).await;
            }
        }
        result
    }

    async fn execute(&self, plan: &MotionPlan) -> Result<MotionOutcome, ControlError> {
        if !self.is_current(plan.session_id) {
            return Err(ControlError::Interrupted);
        }
        let settings = self.settings();

        motion::drive(
            self.actuator.as_ref(),
            &self.geometry.channels,
            &plan.commands,
            &plan.mirrors,
            settings.poll_interval,
        )
        .await
        .map_err(ControlError::Transport)?;

        if settings.error_checking {
            let fault = self
                .safety
                .check_beam()
                .await
                .map_err(ControlError::Transport)?;
            if !fault.is_empty() {
                self.recover(plan.session_id, fault, &settings).await?;
                return Ok(MotionOutcome::Recovered(fault));
            }
        }

        if plan.coadd {
            self.detectors
                .capture_coadded()
                .await
                .map_err(ControlError::Detector)?;
        }

        Ok(MotionOutcome::Completed)
    }

    #[instrument(skip(self, settings))]
    async fn recover(
        &self,
        session_id: u64,
        fault: FaultCode,
        settings: &LoopSettings,
    ) -> Result<(), ControlError> {
        warn!("Homing all axes");
        motion::home_all(self.actuator.as_ref(), &self.geometry.channels, settings.poll_interval)
            .await
            .map_err(|source| ControlError::Recovery { fault, source })?;

        if settings.recalibrate_after_recovery {
            for mirror in Mirror::ALL {
                self.calibrator.calibrate_held(mirror).await?;
            }
        }

        let amplitude = {
            let mut slot = lock(&self.session);
            match slot.as_mut().filter(|session| session.id == session_id) {
                Some(session) => {
                    session.restart();
                    Some(session.step_amplitude)
                }
                None => None,
            }
        };

        if let Some(amplitude) = amplitude.filter(|_| settings.recalibrate_after_recovery) {
            self.actuator
                .set_uniform_step_size(amplitude)
                .await
                .map_err(|source| ControlError::Recovery { fault, source })?;
        }

        info!("Recovered");
        Ok(())
    }

    async fn end_session_after_fault(&self, session_id: u64, fault: &ControlError) {
        let detector_fault = matches!(fault, ControlError::Detector(_));
        if detector_fault {
            self.detectors.terminate().await;
        } else {
            self.actuator.disconnect().await;
        }

        let session = {
            let mut slot = lock(&self.session);
            if slot.as_ref().is_some_and(|session| session.id == session_id) {
                slot.take()
            } else {
                None
            }
        };
        let Some(mut session) = session else {
            return;
        };

        if let Some(task) = session.auto_task.take() {
            task.abort();
        }
        if session.coadd && !detector_fault {
            self.detectors.terminate().await;
        }
        error!(session = session_id, "Alignment session aborted: {}", fault);
    }

    /// Aborts the motion task and waits briefly for it to let go of the flight flag.
    async fn cancel_motion(&self) {
        let deadline = Instant::now() + STOP_GRACE;
        loop {
            if let Some(motion) = lock(&self.motion).take() {
                motion.abort();
            }
            if let Some(pending) = lock(&self.pending).take() {
                pending.abort();
            }
            if !self.in_flight.load(Ordering::SeqCst) {
                return;
            }
            if Instant::now() >= deadline {
                warn!("Motion task still running after stop");
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn run_auto_loop(self: Arc<Self>, session_id: u64) {
        debug!(session = session_id, "Automatic stepping started");

        while self.is_current(session_id) {
            let started = Instant::now();

            match self.spawn_step() {
                Ok((report, handle)) => match handle.await {
                    Ok(Ok(outcome)) => debug!(step = report.step, ?outcome, "Step finished"),
                    Ok(Err(e)) if e.is_fatal() => break,
                    Ok(Err(e)) => warn!(step = report.step, "Step failed: {}", e),
                    Err(e) => {
                        if e.is_panic() {
                            error!("Motion task panicked");
                        }
                        break;
                    }
                },
                Err(ControlError::Concurrency(ConcurrencyViolation::NoSession)) => break,
                Err(ControlError::Concurrency(ConcurrencyViolation::StepInProgress)) => {}
                Err(e) => warn!("Step skipped: {}", e),
            }

            let interval = self.settings().step_interval;
            if let Some(remaining) = interval.checked_sub(started.elapsed()) {
                tokio::time::sleep(remaining).await;
            }
        }

        debug!(session = session_id, "Automatic stepping ended");
    }
}
