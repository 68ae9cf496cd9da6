use std::time::Duration;

use utilities::moving_average::MovingAverage;

use super::LoopState;
use super::session::Phase;
use crate::models::{AngularCorrection, CentroidSnapshot, DetectorOffsets, StepCommand};

/// Read-only view of the latest loop activity.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub state: LoopState,
    pub phase: Option<Phase>,
    pub step_count: u64,
    pub elapsed: Option<Duration>,
    pub centroids: CentroidSnapshot,
    pub offsets_mm: DetectorOffsets,
    /// Offsets latched at the first correction since the baseline was cleared.
    pub baseline_mm: Option<DetectorOffsets>,
    pub measured: AngularCorrection,
    pub correction: AngularCorrection,
    pub commands: StepCommand,
    pub correction_rms: f64,
    pub last_fault: Option<String>,
}

pub(crate) struct TelemetryRecorder {
    centroids: CentroidSnapshot,
    offsets_mm: DetectorOffsets,
    baseline_mm: Option<DetectorOffsets>,
    measured: AngularCorrection,
    correction: AngularCorrection,
    commands: StepCommand,
    magnitudes: MovingAverage,
    last_fault: Option<String>,
}

impl TelemetryRecorder {
    pub fn new(window: usize) -> Self {
        Self {
            centroids: CentroidSnapshot::default(),
            offsets_mm: DetectorOffsets::default(),
            baseline_mm: None,
            measured: AngularCorrection::default(),
            correction: AngularCorrection::default(),
            commands: StepCommand::default(),
            magnitudes: MovingAverage::new(window),
            last_fault: None,
        }
    }

    pub fn record_measurement(
        &mut self,
        centroids: CentroidSnapshot,
        offsets_mm: DetectorOffsets,
        measured: AngularCorrection,
    ) {
        self.centroids = centroids;
        self.offsets_mm = offsets_mm;
        self.measured = measured;
        self.baseline_mm.get_or_insert(offsets_mm);
        self.magnitudes.add(measured.magnitude());
    }

    pub fn record_step(&mut self, correction: AngularCorrection, commands: StepCommand) {
        self.correction = correction;
        self.commands = commands;
    }

    pub fn record_fault(&mut self, fault: String) {
        self.last_fault = Some(fault);
    }

    pub fn clear_baseline(&mut self) {
        self.baseline_mm = None;
        self.magnitudes.clear();
    }

    pub fn correction(&self) -> AngularCorrection {
        self.correction
    }

    pub fn commands(&self) -> StepCommand {
        self.commands
    }

    pub fn snapshot(
        &self,
        state: LoopState,
        phase: Option<Phase>,
        step_count: u64,
        elapsed: Option<Duration>,
    ) -> Telemetry {
        Telemetry {
            state,
            phase,
            step_count,
            elapsed,
            centroids: self.centroids,
            offsets_mm: self.offsets_mm,
            baseline_mm: self.baseline_mm,
            measured: self.measured,
            correction: self.correction,
            commands: self.commands,
            correction_rms: self.magnitudes.rms(),
            last_fault: self.last_fault.clone(),
        }
    }
}
