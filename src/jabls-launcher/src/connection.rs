//! Connection to the server socket: probe, provision-and-spawn fallback,
//! and exponential-backoff reconnection.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::catalog::ArchiveDescriptor;
use crate::downloader::{BinaryProvisioner, ProgressCallback};
use crate::error::{LauncherError, LauncherResult};
use crate::supervisor::ProcessSupervisor;

/// Default timeout of the initial probe (500 ms).
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Delay schedule between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first failed attempt.
    pub start: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
}

impl Backoff {
    pub const DEFAULT_START: Duration = Duration::from_millis(1000);
    pub const DEFAULT_MAX: Duration = Duration::from_millis(3000);

    pub fn new(start: Duration, max: Duration) -> Self {
        Self { start, max }
    }

    /// Delay before the next try after `attempt` failures (1-based):
    /// `min(max, start * 2^(attempt - 1))`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.start
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_START, Self::DEFAULT_MAX)
    }
}

/// Phase of a connection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Probing,
    Provisioning,
    Spawning,
    /// Waiting to retry after `attempt` failed connects.
    Reconnecting { attempt: u32 },
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Probing => f.write_str("probing"),
            Self::Provisioning => f.write_str("provisioning"),
            Self::Spawning => f.write_str("spawning"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            Self::Connected => f.write_str("connected"),
        }
    }
}

/// Duplex byte stream over one server socket.
#[derive(Debug)]
pub struct ConnectionStream {
    stream: TcpStream,
}

impl ConnectionStream {
    fn new(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        Self { stream }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Split into owned reader and writer halves for a protocol client.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl AsyncRead for ConnectionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for ConnectionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }
}

/// Transient socket failure; logged, never returned to callers.
fn connection_error(host: &str, port: u16, error: &io::Error) -> LauncherError {
    LauncherError::Connection {
        address: format!("{}:{}", host, port),
        message: error.to_string(),
    }
}

/// Try one connection with a timeout.
///
/// Never fails: errors and timeouts both mean "not reachable".
pub async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            debug!("Probe failed: {}", connection_error(host, port, &e));
            false
        }
        Err(_) => {
            debug!("Probe of {}:{} timed out after {:?}", host, port, timeout);
            false
        }
    }
}

/// Connect, retrying forever with `backoff` between attempts.
///
/// `on_retry(attempt, delay)` is called before each wait. Each failed socket
/// is dropped before the next attempt starts.
pub async fn connect_with_retry<F>(
    host: &str,
    port: u16,
    backoff: Backoff,
    mut on_retry: F,
) -> ConnectionStream
where
    F: FnMut(u32, Duration),
{
    let mut attempt: u32 = 0;

    loop {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => return ConnectionStream::new(stream),
            Err(e) => {
                attempt = attempt.saturating_add(1);
                let delay = backoff.delay_for(attempt);
                debug!(
                    "{} (attempt {}); retrying in {:?}",
                    connection_error(host, port, &e),
                    attempt,
                    delay
                );
                on_retry(attempt, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Drives one connection cycle at a time:
/// probe, then provision and spawn when nothing answers, then connect.
pub struct ConnectionManager {
    descriptor: ArchiveDescriptor,
    provisioner: BinaryProvisioner,
    supervisor: ProcessSupervisor,
    backoff: Backoff,
    probe_timeout: Duration,
    state: watch::Sender<ConnectionState>,
    /// Serializes connection cycles so two callers never download or spawn
    /// at the same time.
    cycle: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        descriptor: ArchiveDescriptor,
        provisioner: BinaryProvisioner,
        supervisor: ProcessSupervisor,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            descriptor,
            provisioner,
            supervisor,
            backoff: Backoff::default(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            state,
            cycle: Mutex::new(()),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Report download progress of the provisioning step.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.provisioner = self.provisioner.with_progress(progress);
        self
    }

    pub fn descriptor(&self) -> &ArchiveDescriptor {
        &self.descriptor
    }

    pub fn provisioner(&self) -> &BinaryProvisioner {
        &self.provisioner
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Current phase of the connection cycle.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch phase changes, e.g. to show a "still connecting" indicator.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Return a live stream to the server, starting it first if needed.
    ///
    /// Only provisioning and spawn failures are returned; connection
    /// failures are retried until the server answers.
    pub async fn ensure_connection(&self, host: &str, port: u16) -> LauncherResult<ConnectionStream> {
        let _cycle = self.cycle.lock().await;

        self.set_state(ConnectionState::Probing);
        if probe(host, port, self.probe_timeout).await {
            info!("Server already listening on {}:{}", host, port);
            return Ok(self.connect_with_retry(host, port).await);
        }

        self.set_state(ConnectionState::Provisioning);
        self.provisioner
            .ensure_latest(&self.descriptor)
            .await
            .inspect_err(|_| self.set_state(ConnectionState::Disconnected))?;

        self.set_state(ConnectionState::Spawning);
        self.supervisor
            .ensure_running(&self.descriptor, self.provisioner.tree_root())
            .await
            .inspect_err(|_| self.set_state(ConnectionState::Disconnected))?;

        Ok(self.connect_with_retry(host, port).await)
    }

    /// Connect with this manager's backoff, publishing retry progress.
    pub async fn connect_with_retry(&self, host: &str, port: u16) -> ConnectionStream {
        let stream = connect_with_retry(host, port, self.backoff, |attempt, _| {
            self.set_state(ConnectionState::Reconnecting { attempt });
        })
        .await;

        self.set_state(ConnectionState::Connected);
        info!("Connected to server at {}:{}", host, port);
        stream
    }

    /// Stop the server process this manager started.
    pub async fn stop(&self) {
        self.supervisor.stop().await;
        self.set_state(ConnectionState::Disconnected);
    }
}
