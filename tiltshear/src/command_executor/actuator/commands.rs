use std::io;

use agilis::{Axis, AxisStatus, LimitStatus};
use utilities::command_executor::Command;

use super::AgilisHandler;

#[derive(Debug, Clone)]
pub enum ActuatorCommand {
    Connect,
    Disconnect,
    SelectChannel(u8),
    GetChannel,
    SetStepAmplitude(u8),
    Move { axis: Axis, steps: i32 },
    GetAxisStatus(Axis),
    GetLimitStatus,
    Home(Axis),
    Stop(Axis),
}

#[derive(Debug)]
pub enum ActuatorResponse {
    Ok,
    Channel(u8),
    AxisStatus(AxisStatus),
    Limits(LimitStatus),
}

impl Command for ActuatorCommand {
    type Response = ActuatorResponse;
    type Handler = AgilisHandler;

    fn execute(self, handler: &mut Self::Handler) -> io::Result<Self::Response> {
        match self {
            ActuatorCommand::Connect => handler.connect().map(|_| ActuatorResponse::Ok),
            ActuatorCommand::Disconnect => {
                handler.disconnect();
                Ok(ActuatorResponse::Ok)
            }
            ActuatorCommand::SelectChannel(channel) => {
                handler.select_channel(channel)?;
                Ok(ActuatorResponse::Ok)
            }
            ActuatorCommand::GetChannel => handler.channel().map(ActuatorResponse::Channel),
            ActuatorCommand::SetStepAmplitude(amplitude) => {
                handler.set_step_amplitude(amplitude)?;
                Ok(ActuatorResponse::Ok)
            }
            ActuatorCommand::Move { axis, steps } => {
                handler.move_relative(axis, steps)?;
                Ok(ActuatorResponse::Ok)
            }
            ActuatorCommand::GetAxisStatus(axis) => {
                handler.axis_status(axis).map(ActuatorResponse::AxisStatus)
            }
            ActuatorCommand::GetLimitStatus => handler.limit_status().map(ActuatorResponse::Limits),
            ActuatorCommand::Home(axis) => {
                handler.home(axis)?;
                Ok(ActuatorResponse::Ok)
            }
            ActuatorCommand::Stop(axis) => {
                handler.stop(axis)?;
                Ok(ActuatorResponse::Ok)
            }
        }
    }
}
