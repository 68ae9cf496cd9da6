use std::{io, sync::Arc};

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::geometry::MirrorChannels;
use crate::hardware::{Actuator, Detectors};
use crate::models::Mirror;

bitflags! {
    /// Fault bits raised after a motion. Limit bits carry the raw per-channel
    /// limit status, SY1 shifted by 2 and SY2 by 4.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FaultCode: u32 {
        const SHEAR_BEAM_LOST = 1;
        const TILT_BEAM_LOST = 1 << 1;
        const SY1_LIMIT_AXIS1 = 1 << 2;
        const SY1_LIMIT_AXIS2 = 1 << 3;
        const SY2_LIMIT_AXIS1 = 1 << 4;
        const SY2_LIMIT_AXIS2 = 1 << 5;
    }
}

impl FaultCode {
    pub fn beam_lost(&self) -> bool {
        self.intersects(FaultCode::SHEAR_BEAM_LOST | FaultCode::TILT_BEAM_LOST)
    }

    pub fn limit_reached(&self) -> bool {
        !self
            .difference(FaultCode::SHEAR_BEAM_LOST | FaultCode::TILT_BEAM_LOST)
            .is_empty()
    }

    fn limit_shift(mirror: Mirror) -> u32 {
        match mirror {
            Mirror::Sy1 => 2,
            Mirror::Sy2 => 4,
        }
    }
}

/// Classifies the beam and actuator state after a motion.
pub struct SafetyMonitor {
    actuator: Arc<dyn Actuator>,
    detectors: Detectors,
    channels: MirrorChannels,
}

impl SafetyMonitor {
    pub fn new(actuator: Arc<dyn Actuator>, detectors: Detectors, channels: MirrorChannels) -> Self {
        Self {
            actuator,
            detectors,
            channels,
        }
    }

    /// Reads both detectors and the limit switches of both mirrors.
    ///
    /// The channel selected on entry is selected again before returning.
    pub async fn check_beam(&self) -> io::Result<FaultCode> {
        let mut bits = 0u32;

        if self.detectors.shear.current_centroid().is_origin() {
            bits |= FaultCode::SHEAR_BEAM_LOST.bits();
        }
        if self.detectors.tilt.current_centroid().is_origin() {
            bits |= FaultCode::TILT_BEAM_LOST.bits();
        }

        let previous = self.actuator.current_channel().await?;
        for mirror in Mirror::ALL {
            self.actuator.select_channel(self.channels.channel(mirror)).await?;
            let status = self.actuator.limit_status().await?;
            bits |= u32::from(status) << FaultCode::limit_shift(mirror);
        }
        self.actuator.select_channel(previous).await?;

        let fault = FaultCode::from_bits_retain(bits);
        if fault.is_empty() {
            debug!("Beam and limits nominal");
        } else {
            warn!(?fault, "Safety check raised a fault");
        }
        Ok(fault)
    }
}
