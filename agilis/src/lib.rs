//! Newport Agilis piezo controller (AG-UC2/AG-UC8) over its ASCII line protocol.

use std::io::{self, ErrorKind, Read, Write};

use bitflags::bitflags;

pub mod command;

pub use command::{AgilisCommand, Axis};
use command::{query, send};

pub const MAX_STEP_AMPLITUDE: u8 = 50;

bitflags! {
    /// Limit switch state of the selected channel, as reported by `PH`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LimitStatus: u8 {
        const AXIS_1 = 0b01;
        const AXIS_2 = 0b10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisStatus {
    Ready,
    Stepping,
    Jogging,
    MovingToLimit,
}

impl AxisStatus {
    pub fn is_moving(self) -> bool {
        self != AxisStatus::Ready
    }
}

impl TryFrom<i32> for AxisStatus {
    type Error = io::Error;

    fn try_from(value: i32) -> io::Result<Self> {
        match value {
            0 => Ok(AxisStatus::Ready),
            1 => Ok(AxisStatus::Stepping),
            2 => Ok(AxisStatus::Jogging),
            3 => Ok(AxisStatus::MovingToLimit),
            other => Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("Unknown axis status {other}"),
            )),
        }
    }
}

#[derive(Default, Clone)]
pub struct Agilis;

impl Agilis {
    pub fn new() -> Self {
        Agilis
    }

    /// Executes a command that has no reply and asks the controller whether it was accepted.
    fn command(&self, sender: &mut (impl Write + Read), command: AgilisCommand) -> io::Result<()> {
        send(sender, command)?;
        match self.last_error(sender)? {
            0 => Ok(()),
            code => Err(io::Error::other(format!(
                "Controller rejected {command} with error {code}"
            ))),
        }
    }

    pub fn last_error(&self, sender: &mut (impl Write + Read)) -> io::Result<i32> {
        query(sender, AgilisCommand::LastError)
    }

    pub fn remote_mode(&self, sender: &mut (impl Write + Read)) -> io::Result<()> {
        self.command(sender, AgilisCommand::RemoteMode)
    }

    pub fn select_channel(&self, sender: &mut (impl Write + Read), channel: u8) -> io::Result<()> {
        if !(1..=4).contains(&channel) {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("Channel {channel} out of range 1..=4"),
            ));
        }
        self.command(sender, AgilisCommand::SelectChannel(channel))
    }

    pub fn channel(&self, sender: &mut (impl Write + Read)) -> io::Result<u8> {
        let channel = query(sender, AgilisCommand::QueryChannel)?;
        u8::try_from(channel).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
    }

    /// Sets the same amplitude for both directions of `axis`.
    pub fn set_step_amplitude(
        &self,
        sender: &mut (impl Write + Read),
        axis: Axis,
        amplitude: u8,
    ) -> io::Result<()> {
        if !(1..=MAX_STEP_AMPLITUDE).contains(&amplitude) {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("Step amplitude {amplitude} out of range 1..={MAX_STEP_AMPLITUDE}"),
            ));
        }
        self.command(sender, AgilisCommand::StepAmplitudePositive(axis, amplitude))?;
        self.command(sender, AgilisCommand::StepAmplitudeNegative(axis, amplitude))
    }

    pub fn move_relative(
        &self,
        sender: &mut (impl Write + Read),
        axis: Axis,
        steps: i32,
    ) -> io::Result<()> {
        self.command(sender, AgilisCommand::RelativeMove(axis, steps))
    }

    pub fn move_to_limit(
        &self,
        sender: &mut (impl Write + Read),
        axis: Axis,
        speed: i8,
    ) -> io::Result<()> {
        self.command(sender, AgilisCommand::MoveToLimit(axis, speed))
    }

    pub fn stop(&self, sender: &mut (impl Write + Read), axis: Axis) -> io::Result<()> {
        self.command(sender, AgilisCommand::Stop(axis))
    }

    pub fn axis_status(&self, sender: &mut (impl Write + Read), axis: Axis) -> io::Result<AxisStatus> {
        AxisStatus::try_from(query(sender, AgilisCommand::AxisStatus(axis))?)
    }

    pub fn limit_status(&self, sender: &mut (impl Write + Read)) -> io::Result<LimitStatus> {
        let raw = query(sender, AgilisCommand::LimitStatus)?;
        let raw = u8::try_from(raw).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
        LimitStatus::from_bits(raw).ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidData, format!("Unknown limit status {raw}"))
        })
    }
}
