use std::time::Duration;

use utilities::lazy_tcp::TcpTimeouts;

use crate::config::ActuatorConfig;

pub mod actuator;

pub fn actuator_timeouts(config: &ActuatorConfig) -> TcpTimeouts {
    TcpTimeouts {
        connect: Duration::from_millis(config.connect_timeout_ms),
        read: Duration::from_millis(config.read_timeout_ms),
        write: Duration::from_millis(config.write_timeout_ms),
    }
}
