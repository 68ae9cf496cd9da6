use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
};

use agilis::Agilis;
use anyhow::Context as _;
use async_trait::async_trait;
use tracing::{debug, info, warn};
use utilities::{command_executor::CommandExecutor, lazy_tcp::LazyTcpStream};

use super::{Actuator, ExclusiveLock, LockHeld};
use crate::command_executor::{
    actuator::{AgilisHandler, command_sender::AgilisCommandSender},
    actuator_timeouts,
};
use crate::config::ActuatorConfig;
use crate::models::AxisId;

/// [`Actuator`] backed by an Agilis controller running on its own executor thread.
pub struct AgilisActuator {
    sender: AgilisCommandSender,
    lock: ExclusiveLock,
    connected: AtomicBool,
}

impl AgilisActuator {
    pub fn new(sender: AgilisCommandSender) -> Self {
        Self {
            sender,
            lock: ExclusiveLock::default(),
            connected: AtomicBool::new(false),
        }
    }

    fn track<T>(&self, result: io::Result<T>) -> io::Result<T> {
        if let Err(e) = &result
            && matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
            )
        {
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }
}

#[async_trait]
impl Actuator for AgilisActuator {
    async fn connect(&self) -> io::Result<()> {
        self.sender.connect().await?;
        self.connected.store(true, Ordering::SeqCst);
        info!("Agilis controller connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if let Err(e) = self.sender.disconnect().await {
            warn!("Failed to disconnect Agilis controller: {}", e);
        }
        self.connected.store(false, Ordering::SeqCst);
        debug!("Agilis controller disconnected");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn select_channel(&self, channel: u8) -> io::Result<()> {
        let result = self.sender.select_channel(channel).await;
        self.track(result)
    }

    async fn current_channel(&self) -> io::Result<u8> {
        let result = self.sender.channel().await;
        self.track(result)
    }

    async fn set_uniform_step_size(&self, amplitude: u8) -> io::Result<()> {
        let result = self.sender.set_step_amplitude(amplitude).await;
        self.track(result)
    }

    async fn step_axis(&self, axis: AxisId, count: i32) -> io::Result<()> {
        let result = self.sender.move_relative(axis.into(), count).await;
        self.track(result)
    }

    async fn is_moving(&self, axis: AxisId) -> io::Result<bool> {
        let result = self.sender.axis_status(axis.into()).await;
        self.track(result).map(|status| status.is_moving())
    }

    async fn limit_status(&self) -> io::Result<u8> {
        let result = self.sender.limit_status().await;
        self.track(result).map(|limits| limits.bits())
    }

    async fn home_axis(&self, axis: AxisId) -> io::Result<()> {
        let result = self.sender.home(axis.into()).await;
        self.track(result)
    }

    fn acquire_exclusive_lock(&self, owner: &str) -> Result<(), LockHeld> {
        self.lock.acquire(owner)
    }

    fn release_exclusive_lock(&self, owner: &str) {
        self.lock.release(owner);
    }
}

/// Builds the executor for the configured controller and the actuator that talks to it.
/// The executor must be spawned before the actuator is used.
pub fn create_actuator(
    config: &ActuatorConfig,
) -> anyhow::Result<(CommandExecutor<AgilisHandler>, AgilisActuator)> {
    let address = format!("{}:{}", config.host, config.port);
    let stream = LazyTcpStream::new(address.as_str(), config.retries, actuator_timeouts(config))
        .with_context(|| format!("Failed to resolve Agilis gateway address {address}"))?;

    let executor = CommandExecutor::new(AgilisHandler::new(Agilis::new(), stream));
    let actuator = AgilisActuator::new(AgilisCommandSender::new(executor.sender()));

    Ok((executor, actuator))
}
