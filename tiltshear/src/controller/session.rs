use tokio::time::Instant;

use crate::hardware::ExclusiveAccess;
use crate::models::{AngularCorrection, Mirror};
use crate::pid::{IntegralLimits, PidController, PidGains};

/// Mirror driven by the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Sy1,
    Sy2,
}

impl Phase {
    pub fn mirror(self) -> Mirror {
        match self {
            Phase::Sy1 => Mirror::Sy1,
            Phase::Sy2 => Mirror::Sy2,
        }
    }

    pub fn next(self) -> Phase {
        match self {
            Phase::Sy1 => Phase::Sy2,
            Phase::Sy2 => Phase::Sy1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    Manual,
    Automatic,
}

/// One PID controller per mirror angle.
#[derive(Debug, Clone)]
pub struct AxisLoops {
    m1_x: PidController,
    m1_y: PidController,
    m2_x: PidController,
    m2_y: PidController,
}

impl AxisLoops {
    pub fn new(gains: PidGains, limits: IntegralLimits) -> Self {
        let pid = PidController::new(gains, limits);
        Self {
            m1_x: pid.clone(),
            m1_y: pid.clone(),
            m2_x: pid.clone(),
            m2_y: pid,
        }
    }

    fn all_mut(&mut self) -> [&mut PidController; 4] {
        [&mut self.m1_x, &mut self.m1_y, &mut self.m2_x, &mut self.m2_y]
    }

    /// Drives each measured angle towards zero and returns the physical correction.
    pub fn correct(&mut self, measured: &AngularCorrection) -> AngularCorrection {
        AngularCorrection {
            m1_x: -self.m1_x.update(0.0, measured.m1_x),
            m1_y: -self.m1_y.update(0.0, measured.m1_y),
            m2_x: -self.m2_x.update(0.0, measured.m2_x),
            m2_y: -self.m2_y.update(0.0, measured.m2_y),
        }
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        for pid in self.all_mut() {
            pid.set_gains(gains);
        }
    }

    pub fn reset(&mut self) {
        for pid in self.all_mut() {
            pid.reset();
        }
    }
}

/// Run context of one alignment loop, from start until stop.
#[derive(Debug)]
pub struct AlignmentSession {
    pub id: u64,
    pub mode: AcquisitionMode,
    pub phase: Phase,
    pub step_count: u64,
    pub coadd: bool,
    pub step_amplitude: u8,
    pub started_at: Instant,
    pub loops: AxisLoops,
    pub(crate) auto_task: Option<tokio::task::JoinHandle<()>>,
    pub(crate) _access: ExclusiveAccess,
}

impl AlignmentSession {
    pub(crate) fn new(
        id: u64,
        mode: AcquisitionMode,
        step_amplitude: u8,
        coadd: bool,
        loops: AxisLoops,
        access: ExclusiveAccess,
    ) -> Self {
        Self {
            id,
            mode,
            phase: Phase::Sy1,
            step_count: 0,
            coadd,
            step_amplitude,
            started_at: Instant::now(),
            loops,
            auto_task: None,
            _access: access,
        }
    }

    /// Returns the phase to drive now and advances to the next one.
    pub(crate) fn advance(&mut self) -> Phase {
        let current = self.phase;
        self.phase = current.next();
        self.step_count += 1;
        current
    }

    /// Forgets controller history after a recovery.
    pub(crate) fn restart(&mut self) {
        self.loops.reset();
        self.phase = Phase::Sy1;
    }
}
