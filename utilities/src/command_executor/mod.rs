use std::{
    io,
    sync::mpsc::{Receiver, Sender},
};

use tokio::sync::oneshot;
use tracing::warn;

/// A request executed against a device handler on the executor thread.
pub trait Command: Send + std::fmt::Debug {
    type Response: Send;
    type Handler: DeviceHandler<Command = Self>;

    fn execute(self, handler: &mut Self::Handler) -> io::Result<Self::Response>;
}

pub trait DeviceHandler {
    type Command: Command<Handler = Self>;

    /// Name used when reporting failed commands.
    fn device_name(&self) -> &str;
}

struct Envelope<C: Command> {
    command: C,
    reply: oneshot::Sender<io::Result<C::Response>>,
}

/// Owns a blocking device handler and executes queued commands one at a time.
pub struct CommandExecutor<H: DeviceHandler + Send + 'static> {
    handler: H,
    queue: Receiver<Envelope<H::Command>>,
    sender: Sender<Envelope<H::Command>>,
}

impl<H: DeviceHandler + Send> CommandExecutor<H> {
    pub fn new(handler: H) -> Self {
        let (sender, queue) = std::sync::mpsc::channel();

        Self {
            handler,
            queue,
            sender,
        }
    }

    pub fn sender(&self) -> CommandSender<H::Command> {
        CommandSender {
            queue: self.sender.clone(),
        }
    }

    /// Runs until every sender has been dropped.
    pub fn run(mut self) {
        drop(self.sender);

        while let Ok(Envelope { command, reply }) = self.queue.recv() {
            let description = format!("{command:?}");
            let result = command.execute(&mut self.handler);

            if let Err(e) = &result {
                warn!(
                    device = self.handler.device_name(),
                    command = %description,
                    "Command failed: {}",
                    e
                );
            }

            if reply.send(result).is_err() {
                warn!(
                    device = self.handler.device_name(),
                    command = %description,
                    "Caller dropped before the response arrived"
                );
            }
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.run())
    }
}

pub struct CommandSender<C: Command> {
    queue: Sender<Envelope<C>>,
}

impl<C: Command> Clone for CommandSender<C> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<C: Command> CommandSender<C> {
    pub async fn send_command(&self, command: C) -> io::Result<C::Response> {
        let (reply, response) = oneshot::channel();

        self.queue
            .send(Envelope { command, reply })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "Command executor stopped"))?;

        response.await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                "Command executor dropped the request",
            )
        })?
    }
}
