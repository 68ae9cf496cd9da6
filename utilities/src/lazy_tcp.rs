use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct TcpTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for TcpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(1),
            read: Duration::from_millis(500),
            write: Duration::from_millis(500),
        }
    }
}

/// Blocking TCP stream that connects on first use and reconnects after a reset.
pub struct LazyTcpStream {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    max_retries: u32,
    timeouts: TcpTimeouts,
}

fn is_connection_lost(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

impl LazyTcpStream {
    pub fn new<A: ToSocketAddrs>(addr: A, max_retries: u32, timeouts: TcpTimeouts) -> io::Result<Self> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Address resolved to nothing")
        })?;

        Ok(Self {
            addr,
            stream: None,
            max_retries,
            timeouts,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connect(&mut self) -> io::Result<()> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match TcpStream::connect_timeout(&self.addr, self.timeouts.connect) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeouts.read))?;
                    stream.set_write_timeout(Some(self.timeouts.write))?;
                    stream.set_nodelay(true)?;
                    debug!(peer = %self.addr, attempt, "Connected");
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    debug!(peer = %self.addr, attempt, "Connect failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| io::Error::other("Max connection retries reached")))
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        if self.stream.is_none() {
            self.connect()?;
        }
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "Not connected"))
    }

    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(peer = %self.addr, "Disconnected");
        }
    }

    pub fn reconnect(&mut self) -> io::Result<()> {
        self.disconnect();
        self.connect()
    }

    /// Runs `op` on the stream, retrying once on a fresh connection if the peer went away.
    fn with_stream<T>(&mut self, mut op: impl FnMut(&mut TcpStream) -> io::Result<T>) -> io::Result<T> {
        match op(self.stream()?) {
            Err(e) if is_connection_lost(&e) => {
                warn!(peer = %self.addr, "Connection lost, reconnecting: {}", e);
                self.reconnect()?;
                op(self.stream()?)
            }
            other => other,
        }
    }
}

impl Read for LazyTcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.with_stream(|stream| stream.read(buf))
    }
}

impl Write for LazyTcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_stream(|stream| stream.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_stream(|stream| stream.flush())
    }
}
