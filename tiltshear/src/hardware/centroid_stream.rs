use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::watch,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::Detector;
use crate::config::DetectorConfig;
use crate::models::PixelOffset;

/// Parses a centroid line of the form `x y`. Anything else is ignored.
pub fn parse_centroid_line(line: &str) -> Option<PixelOffset> {
    let mut fields = line.split_whitespace();
    let x: f64 = fields.next()?.parse().ok()?;
    let y: f64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() || !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some(PixelOffset::new(x, y))
}

/// Frames received on the current connection, and whether the reader has stopped.
#[derive(Debug, Clone, Copy, Default)]
struct StreamState {
    frames: u64,
    closed: bool,
}

struct Shared {
    current: Mutex<PixelOffset>,
    stream: watch::Sender<StreamState>,
}

struct Link {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

/// [`Detector`] fed by a frame grabber service that pushes one centroid line per frame.
///
/// The service accepts `COADD <frames> <interval>`, `GRAB` and `LIVE` commands.
pub struct CentroidStreamDetector {
    name: String,
    address: String,
    connect_timeout: Duration,
    shared: Arc<Shared>,
    reference: Mutex<PixelOffset>,
    coadd: Mutex<Option<(u32, Duration)>>,
    link: tokio::sync::Mutex<Option<Link>>,
}

impl CentroidStreamDetector {
    pub fn new(name: impl Into<String>, config: &DetectorConfig) -> Self {
        let (stream, _) = watch::channel(StreamState::default());
        Self {
            name: name.into(),
            address: format!("{}:{}", config.host, config.port),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            shared: Arc::new(Shared {
                current: Mutex::new(PixelOffset::ORIGIN),
                stream,
            }),
            reference: Mutex::new(PixelOffset::ORIGIN),
            coadd: Mutex::new(None),
            link: tokio::sync::Mutex::new(None),
        }
    }

    /// Number of centroid lines received so far.
    pub fn frame_count(&self) -> u64 {
        self.shared.stream.borrow().frames
    }

    async fn connect(&self) -> io::Result<Link> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("Timed out connecting to {}", self.address),
                )
            })??;
        stream.set_nodelay(true)?;

        let (read_half, writer) = stream.into_split();
        self.shared.stream.send_modify(|state| state.closed = false);
        let reader = tokio::spawn(read_centroids(
            self.name.clone(),
            read_half,
            self.shared.clone(),
        ));
        info!(detector = %self.name, address = %self.address, "Connected to frame grabber");

        Ok(Link { writer, reader })
    }

    async fn send(&self, line: &str) -> io::Result<()> {
        let mut link = self.link.lock().await;
        let link = link.as_mut().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("Detector {} is not initialized", self.name),
            )
        })?;
        debug!(detector = %self.name, command = line, "Sending");
        link.writer.write_all(line.as_bytes()).await?;
        link.writer.write_all(b"\n").await?;
        link.writer.flush().await
    }

    fn coadd_settings(&self) -> Option<(u32, Duration)> {
        *self.coadd.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn read_centroids(name: String, reader: OwnedReadHalf, shared: Arc<Shared>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_centroid_line(&line) {
                Some(centroid) => {
                    *shared.current.lock().unwrap_or_else(PoisonError::into_inner) = centroid;
                    shared.stream.send_modify(|state| state.frames += 1);
                }
                None => debug!(detector = %name, line, "Ignoring malformed centroid line"),
            },
            Ok(None) => {
                warn!(detector = %name, "Frame grabber closed the connection");
                break;
            }
            Err(e) => {
                warn!(detector = %name, "Failed to read centroid stream: {}", e);
                break;
            }
        }
    }

    shared.stream.send_modify(|state| state.closed = true);
}

#[async_trait]
impl Detector for CentroidStreamDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn reference_centroid(&self) -> PixelOffset {
        *self.reference.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_centroid(&self) -> PixelOffset {
        *self
            .shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_reference_centroid(&self) {
        let current = self.current_centroid();
        *self.reference.lock().unwrap_or_else(PoisonError::into_inner) = current;
        debug!(detector = %self.name, x = current.x, y = current.y, "Reference latched");
    }

    async fn configure_coadd(&self, frames: u32, interval: Duration) -> io::Result<()> {
        if frames == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Coadd needs at least one frame",
            ));
        }
        *self.coadd.lock().unwrap_or_else(PoisonError::into_inner) = Some((frames, interval));

        if self.link.lock().await.is_some() {
            self.send(&format!("COADD {frames} {}", interval.as_secs_f64()))
                .await?;
        }
        Ok(())
    }

    async fn capture_single_coadded_frame(&self, block_until_done: bool) -> io::Result<()> {
        let stream_closed = || io::Error::new(io::ErrorKind::UnexpectedEof, "Centroid stream closed");

        let mut stream = self.shared.stream.subscribe();
        let connected = self.link.lock().await.is_some();
        if connected && stream.borrow_and_update().closed {
            return Err(stream_closed());
        }

        self.send("GRAB").await?;
        if block_until_done {
            stream.changed().await.map_err(|_| stream_closed())?;
            if stream.borrow_and_update().closed {
                return Err(stream_closed());
            }
        }
        Ok(())
    }

    async fn initialize(&self) -> io::Result<()> {
        {
            let mut link = self.link.lock().await;
            let alive = link.as_ref().is_some_and(|link| !link.reader.is_finished());
            if !alive {
                if let Some(stale) = link.take() {
                    stale.reader.abort();
                }
                *link = Some(self.connect().await?);
            }
        }

        if let Some((frames, interval)) = self.coadd_settings() {
            self.send(&format!("COADD {frames} {}", interval.as_secs_f64()))
                .await?;
        }
        Ok(())
    }

    async fn terminate(&self) {
        let coadd = self
            .coadd
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if coadd.is_some()
            && let Err(e) = self.send("LIVE").await
        {
            debug!(detector = %self.name, "Could not restore live mode: {}", e);
        }

        if let Some(link) = self.link.lock().await.take() {
            link.reader.abort();
            info!(detector = %self.name, "Disconnected from frame grabber");
        }
    }
}

impl Drop for CentroidStreamDetector {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.reader.abort();
        }
    }
}
