//! Per-Client Connection Loop
//!
//! Each client gets its own task running [`ConnectionHandler::run`]. Commands
//! go through the client's [`Session`], which also owns its subscriptions:
//!
//! ```text
//!    ┌──────────────────────────────────────────┐
//!    │  read into BytesMut                      │
//!    │        │                                 │
//!    │        ▼                                 │
//!    │  parse_pipeline(buf, &mut cursor)        │
//!    │        │  every complete frame           │
//!    │        ▼                                 │
//!    │  session.execute each, append replies    │
//!    │        │                                 │
//!    │        ▼                                 │
//!    │  write + flush once, drop buf[..cursor]  │
//!    │        │                                 │
//!    │   [loop back]                            │
//!    └──────────────────────────────────────────┘
//! ```
//!
//! ## Buffer Management
//!
//! TCP is a byte stream, so a read may end mid-frame or carry many frames.
//! The decoder reports how far it got; everything after that stays in the
//! buffer and the next read is appended to it. If the unconsumed bytes grow
//! past [`MAX_BUFFER_SIZE`] the client is disconnected.
//!
//! ## Published Messages
//!
//! While waiting for input the loop also listens on the session's message
//! queue. A message published to a subscribed channel is written and
//! flushed as soon as it arrives, between request batches.

use crate::commands::{is_quit, Session};
use crate::protocol::{parse_pipeline, ParseError, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Largest unconsumed input a client may leave buffered (64 MiB).
pub const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Server-wide connection counters, shared by every connection task.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    accepted: AtomicU64,
    active: AtomicU64,
    commands: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// A point-in-time copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCounters {
    pub accepted: u64,
    pub active: u64,
    pub commands: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> ConnectionCounters {
        ConnectionCounters {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }

    /// Counts a new connection as active until the guard is dropped.
    fn open(self: &Arc<Self>) -> ActiveConnection {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveConnection(Arc::clone(self))
    }

    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Keeps a connection in the active count for as long as it lives.
struct ActiveConnection(Arc<ConnectionStats>);

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// What to do after a batch of replies has been written.
enum Next {
    Continue,
    Close,
}

/// Reads, executes, and answers commands for one client.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Bytes read but not yet decoded
    buffer: BytesMut,

    /// Replies for the current batch
    out: BytesMut,

    /// Replies produced by the command being executed
    replies: Vec<RespValue>,

    session: Session,

    stats: Arc<ConnectionStats>,

    /// Dropped with the handler, which takes it out of the active count
    _active: ActiveConnection,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        session: Session,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        let active = stats.open();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            out: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            replies: Vec::new(),
            session,
            stats,
            _active: active,
        }
    }

    /// Serves the client until it disconnects, sends QUIT, or misbehaves.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            if !self.buffer.is_empty() {
                if let Next::Close = self.process_buffer().await? {
                    return Ok(());
                }
            }
            self.read_more_data().await?;
        }
    }

    /// Decodes and answers every complete frame in the buffer.
    async fn process_buffer(&mut self) -> Result<Next, ConnectionError> {
        let mut cursor = 0;
        let batch = match parse_pipeline(&self.buffer, &mut cursor) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Protocol error");
                let reply = RespValue::error(format!("ERR Protocol error: {}", e));
                reply.serialize_into(&mut self.out);
                self.send_replies().await?;
                return Err(ConnectionError::ParseError(e));
            }
        };
        self.buffer.advance(cursor);

        trace!(
            client = %self.addr,
            commands = batch.len(),
            consumed = cursor,
            remaining = self.buffer.len(),
            "Decoded batch"
        );

        let mut next = Next::Continue;
        let mut executed = 0;
        for args in &batch {
            // Null frames carry no command and get no reply.
            if args.is_empty() {
                continue;
            }
            self.session.execute(args, &mut self.replies).await;
            for reply in self.replies.drain(..) {
                reply.serialize_into(&mut self.out);
            }
            executed += 1;

            if is_quit(args) {
                next = Next::Close;
                break;
            }
        }
        ConnectionStats::add(&self.stats.commands, executed);

        if !self.out.is_empty() {
            self.send_replies().await?;
        }
        Ok(next)
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        loop {
            tokio::select! {
                read = self.stream.get_mut().read_buf(&mut self.buffer) => {
                    let n = read?;
                    if n == 0 {
                        return if self.buffer.is_empty() {
                            Err(ConnectionError::ClientDisconnected)
                        } else {
                            Err(ConnectionError::UnexpectedEof)
                        };
                    }

                    ConnectionStats::add(&self.stats.bytes_in, n);
                    trace!(client = %self.addr, bytes = n, "Read data");
                    return Ok(());
                }
                Some(message) = self.session.next_message() => {
                    message.serialize_into(&mut self.out);
                    self.send_replies().await?;
                }
            }
        }
    }

    /// Writes the pending replies and flushes once.
    async fn send_replies(&mut self) -> Result<(), ConnectionError> {
        let bytes = self.out.split();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        ConnectionStats::add(&self.stats.bytes_out, bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Sent replies");
        Ok(())
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The client sent bytes that are not valid RESP
    #[error("Protocol error: {0}")]
    ParseError(#[from] ParseError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// The client closed with a partial frame buffered
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Runs a [`ConnectionHandler`] to completion. The outcome is logged by
/// [`ConnectionHandler::run`], so it is dropped here.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    session: Session,
    stats: Arc<ConnectionStats>,
) {
    let _ = ConnectionHandler::new(stream, addr, session, stats)
        .run()
        .await;
}
