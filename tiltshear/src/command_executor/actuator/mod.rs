use std::io;

use agilis::{Agilis, Axis, AxisStatus, LimitStatus};
use commands::ActuatorCommand;
use utilities::{command_executor::DeviceHandler, lazy_tcp::LazyTcpStream};

pub mod command_sender;
pub mod commands;

/// Agilis controller behind a serial-over-TCP gateway.
pub struct AgilisHandler {
    tcp_stream: LazyTcpStream,
    agilis: Agilis,
}

impl DeviceHandler for AgilisHandler {
    type Command = ActuatorCommand;

    fn device_name(&self) -> &str {
        "agilis"
    }
}

impl AgilisHandler {
    pub fn new(agilis: Agilis, tcp_stream: LazyTcpStream) -> Self {
        Self { tcp_stream, agilis }
    }

    /// Reconnects and puts the controller in remote mode.
    pub fn connect(&mut self) -> io::Result<()> {
        self.tcp_stream.reconnect()?;
        self.agilis.remote_mode(&mut self.tcp_stream)
    }

    pub fn disconnect(&mut self) {
        self.tcp_stream.disconnect();
    }

    pub fn select_channel(&mut self, channel: u8) -> io::Result<()> {
        self.agilis.select_channel(&mut self.tcp_stream, channel)
    }

    pub fn channel(&mut self) -> io::Result<u8> {
        self.agilis.channel(&mut self.tcp_stream)
    }

    pub fn set_step_amplitude(&mut self, amplitude: u8) -> io::Result<()> {
        for axis in [Axis::One, Axis::Two] {
            self.agilis
                .set_step_amplitude(&mut self.tcp_stream, axis, amplitude)?;
        }
        Ok(())
    }

    pub fn move_relative(&mut self, axis: Axis, steps: i32) -> io::Result<()> {
        self.agilis.move_relative(&mut self.tcp_stream, axis, steps)
    }

    pub fn axis_status(&mut self, axis: Axis) -> io::Result<AxisStatus> {
        self.agilis.axis_status(&mut self.tcp_stream, axis)
    }

    pub fn limit_status(&mut self) -> io::Result<LimitStatus> {
        self.agilis.limit_status(&mut self.tcp_stream)
    }

    /// Runs the axis into its negative limit switch at full speed.
    pub fn home(&mut self, axis: Axis) -> io::Result<()> {
        self.agilis.move_to_limit(&mut self.tcp_stream, axis, -4)
    }

    pub fn stop(&mut self, axis: Axis) -> io::Result<()> {
        self.agilis.stop(&mut self.tcp_stream, axis)
    }
}
