//! Server Connection
//!
//! A `Connection` owns one stream to one server and exchanges request lines
//! for response frames.
//!
//! ## Exchange Shapes
//!
//! ```text
//! send:      write c1 ──> read r1
//!
//! send_all:  write c1 c2 c3 (one flush) ──> read r1 ──> read r2 ──> read r3
//! ```
//!
//! The server answers in request order, so the i-th frame read belongs to the
//! i-th command written. `send_all` never interleaves writes and reads.
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut` buffer because a frame can
//! arrive split across reads, and a batched exchange can deliver several
//! frames in one read.
//!
//! ## Failure
//!
//! Any write error, read error, framing error or timeout marks the connection
//! dead. A dead connection refuses further requests; reconnecting is up to the
//! owner.

use crate::config::ServerAddr;
use crate::protocol::{Command, Frame, FrameParser, ParseError};
use bytes::{Buf, BytesMut};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, trace, warn};

/// Maximum size for the read buffer (16 MB, large `list` blocks included)
const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for the connections to one server
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections opened
    pub connections_opened: AtomicU64,
    /// Connections that were marked dead
    pub connection_failures: AtomicU64,
    /// Total commands written
    pub commands_sent: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn commands_sent(&self, count: usize) {
        self.commands_sent
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// A batched exchange that broke part way.
///
/// `frames` holds the responses read before the failure, in command order.
#[derive(Debug, thiserror::Error)]
#[error("batch aborted after {} responses: {source}", .frames.len())]
pub struct BatchError {
    pub frames: Vec<Frame>,
    #[source]
    pub source: ConnectionError,
}

/// One request/response stream to a server.
pub struct Connection<S = TcpStream> {
    /// The stream, buffered for writes
    stream: BufWriter<S>,

    /// The server on the other end (for logging)
    server: ServerAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    parser: FrameParser,

    /// I/O timeout applied to every read and write
    timeout: Option<Duration>,

    /// False once any exchange has failed
    alive: bool,

    /// Statistics shared with the owning server handle
    stats: Arc<ConnectionStats>,
}

impl Connection<TcpStream> {
    /// Opens a TCP connection to `server`.
    pub async fn connect(
        server: &ServerAddr,
        timeout: Option<Duration>,
        stats: Arc<ConnectionStats>,
    ) -> Result<Self, ConnectionError> {
        let stream = with_timeout(
            timeout,
            TcpStream::connect((server.host(), server.port())),
        )
        .await?;
        stream.set_nodelay(true)?;
        debug!(server = %server, "Connected");

        Ok(Self::from_stream(stream, server.clone(), timeout, stats))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already established stream.
    pub fn from_stream(
        stream: S,
        server: ServerAddr,
        timeout: Option<Duration>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            server,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: FrameParser::new(),
            timeout,
            alive: true,
            stats,
        }
    }

    pub fn server(&self) -> &ServerAddr {
        &self.server
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Sends one command and reads its response.
    pub async fn send(&mut self, command: &Command) -> Result<Frame, ConnectionError> {
        self.ensure_alive()?;

        if let Err(e) = self.write_commands(std::slice::from_ref(command)).await {
            return Err(self.fail(e));
        }
        match self.read_frame().await {
            Ok(frame) => Ok(frame),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Writes every command, then reads one response per command.
    ///
    /// On failure the responses read so far are returned in the error.
    pub async fn send_all(&mut self, commands: &[Command]) -> Result<Vec<Frame>, BatchError> {
        if let Err(source) = self.ensure_alive() {
            return Err(BatchError {
                frames: Vec::new(),
                source,
            });
        }
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        if let Err(e) = self.write_commands(commands).await {
            return Err(BatchError {
                frames: Vec::new(),
                source: self.fail(e),
            });
        }

        let mut frames = Vec::with_capacity(commands.len());
        while frames.len() < commands.len() {
            match self.read_frame().await {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    return Err(BatchError {
                        frames,
                        source: self.fail(e),
                    })
                }
            }
        }

        trace!(server = %self.server, count = frames.len(), "Batch complete");
        Ok(frames)
    }

    fn ensure_alive(&self) -> Result<(), ConnectionError> {
        if self.alive {
            Ok(())
        } else {
            Err(ConnectionError::Dead)
        }
    }

    /// Marks the connection dead and passes the error through.
    fn fail(&mut self, error: ConnectionError) -> ConnectionError {
        self.alive = false;
        self.stats.connection_failed();
        warn!(server = %self.server, error = %error, "Connection marked dead");
        error
    }

    /// Writes all commands with a single flush.
    async fn write_commands(&mut self, commands: &[Command]) -> Result<(), ConnectionError> {
        let mut out = Vec::new();
        for command in commands {
            command.serialize_into(&mut out);
        }
        let len = out.len();

        let stream = &mut self.stream;
        with_timeout(self.timeout, async move {
            stream.write_all(&out).await?;
            stream.flush().await
        })
        .await?;

        self.stats.commands_sent(commands.len());
        self.stats.bytes_written(len);
        trace!(
            server = %self.server,
            commands = commands.len(),
            bytes = len,
            "Sent commands"
        );
        Ok(())
    }

    /// Reads until one complete frame is buffered.
    async fn read_frame(&mut self) -> Result<Frame, ConnectionError> {
        loop {
            if let Some(frame) = self.try_parse_frame()? {
                return Ok(frame);
            }
            self.read_more_data().await?;
        }
    }

    /// Attempts to parse a frame from the buffer.
    fn try_parse_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer)? {
            Some((frame, consumed)) => {
                self.buffer.advance(consumed);
                trace!(
                    server = %self.server,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed frame"
                );
                Ok(Some(frame))
            }
            None => {
                trace!(
                    server = %self.server,
                    buffered = self.buffer.len(),
                    "Incomplete frame, need more data"
                );
                Ok(None)
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                server = %self.server,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let stream = self.stream.get_mut();
        let buffer = &mut self.buffer;
        let n = with_timeout(self.timeout, stream.read_buf(buffer)).await?;

        if n == 0 {
            return Err(if self.buffer.is_empty() {
                ConnectionError::Closed
            } else {
                // Partial frame in buffer
                ConnectionError::UnexpectedEof
            });
        }

        self.stats.bytes_read(n);
        trace!(server = %self.server, bytes = n, "Read data");

        Ok(())
    }
}

/// Runs an I/O future under an optional deadline.
async fn with_timeout<T, F>(limit: Option<Duration>, io: F) -> Result<T, ConnectionError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, io).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ConnectionError::Timeout(limit)),
        },
        None => Ok(io.await?),
    }
}

/// Errors that can occur on a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Response framing error
    #[error("parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Server closed the stream between frames
    #[error("server closed the connection")]
    Closed,

    /// Server closed the stream inside a frame
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Buffer size limit exceeded
    #[error("buffer size limit exceeded")]
    BufferFull,

    /// A previous exchange failed on this connection
    #[error("connection is dead")]
    Dead,
}
