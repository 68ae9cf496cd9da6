use std::io;

use agilis::{Axis, AxisStatus, LimitStatus};
use utilities::command_executor::CommandSender;

use super::commands::{ActuatorCommand, ActuatorResponse};

fn unexpected(response: ActuatorResponse) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Unexpected response {response:?}"),
    )
}

#[derive(Clone)]
pub struct AgilisCommandSender {
    sender: CommandSender<ActuatorCommand>,
}

impl AgilisCommandSender {
    pub fn new(sender: CommandSender<ActuatorCommand>) -> Self {
        Self { sender }
    }

    async fn expect_ok(&self, command: ActuatorCommand) -> io::Result<()> {
        match self.sender.send_command(command).await? {
            ActuatorResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn connect(&self) -> io::Result<()> {
        self.expect_ok(ActuatorCommand::Connect).await
    }

    pub async fn disconnect(&self) -> io::Result<()> {
        self.expect_ok(ActuatorCommand::Disconnect).await
    }

    pub async fn select_channel(&self, channel: u8) -> io::Result<()> {
        self.expect_ok(ActuatorCommand::SelectChannel(channel)).await
    }

    pub async fn channel(&self) -> io::Result<u8> {
        match self.sender.send_command(ActuatorCommand::GetChannel).await? {
            ActuatorResponse::Channel(channel) => Ok(channel),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set_step_amplitude(&self, amplitude: u8) -> io::Result<()> {
        self.expect_ok(ActuatorCommand::SetStepAmplitude(amplitude))
            .await
    }

    pub async fn move_relative(&self, axis: Axis, steps: i32) -> io::Result<()> {
        self.expect_ok(ActuatorCommand::Move { axis, steps }).await
    }

    pub async fn axis_status(&self, axis: Axis) -> io::Result<AxisStatus> {
        match self
            .sender
            .send_command(ActuatorCommand::GetAxisStatus(axis))
            .await?
        {
            ActuatorResponse::AxisStatus(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    pub async fn limit_status(&self) -> io::Result<LimitStatus> {
        match self
            .sender
            .send_command(ActuatorCommand::GetLimitStatus)
            .await?
        {
            ActuatorResponse::Limits(limits) => Ok(limits),
            other => Err(unexpected(other)),
        }
    }

    pub async fn home(&self, axis: Axis) -> io::Result<()> {
        self.expect_ok(ActuatorCommand::Home(axis)).await
    }

    pub async fn stop(&self, axis: Axis) -> io::Result<()> {
        self.expect_ok(ActuatorCommand::Stop(axis)).await
    }
}
