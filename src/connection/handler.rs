//! Connection Actor
//!
//! One `ConnectionActor` owns one socket. It runs as its own tokio task and
//! is driven only by the messages in its mailbox.
//!
//! ## Actor Lifecycle
//!
//! ```text
//! 1. spawn_connection(stream, consumer)
//!        │
//!        ▼
//! 2. ┌──────────────────────────────────────┐
//!    │ Active(accumulator)                  │
//!    │                                      │
//!    │  entry: connection closed? ──yes──┐  │
//!    │         │ no                      │  │
//!    │         ▼                         │  │
//!    │  spawn one read ──> read task     │  │
//!    │         │                         │  │
//!    │         ▼                         │  │
//!    │  mailbox.recv()                   │  │
//!    │   SendLine     -> write queue     │  │
//!    │                   (stay)          │  │
//!    │   ChunkArrived -> extract line    │  │
//!    │                   (become) ──┐    │  │
//!    │   Terminate ─────────────────┼──┐ │  │
//!    └──────────────────────────────┼──┼─┼──┘
//!          ▲                        │  │ │
//!          └────────────────────────┘  ▼ ▼
//! 3.                              Stopped: release connection
//! ```
//!
//! ## I/O Completions
//!
//! Reads and writes never run inside the actor's message handling. The read
//! half is moved into a short-lived read task and handed back over a oneshot
//! channel when the read completes, so there is never more than one read in
//! flight. Outbound frames go to an unbounded queue drained by a single
//! writer task. Both tasks report back by posting `ChunkArrived` or
//! `Terminate` to the actor's own mailbox; they never touch the accumulator.
//!
//! ## Stopping
//!
//! The actor stops on `Terminate`, on any read or write failure, when the
//! connection is found closed at read time, or when every
//! [`ConnectionHandle`] has been dropped. Stopping aborts both I/O tasks and
//! waits for them, so the socket is closed when `run` returns. Frames still
//! queued at that point are never written.

use crate::protocol::{encode_line, extract_line, ConnectionId, ConnectionMessage, LineArrived};
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Capacity of each read issued against the socket.
pub const READ_BUFFER_SIZE: usize = 2048;

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum number of bytes delivered by a single read
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }
}

/// Statistics shared by every connection actor.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections opened
    pub connections_accepted: AtomicU64,
    /// Connections not yet released
    pub active_connections: AtomicU64,
    /// Lines delivered to consumers
    pub lines_received: AtomicU64,
    /// Frames fully written to the wire
    pub lines_sent: AtomicU64,
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
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn line_received(&self) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn line_sent(&self) {
        self.lines_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors raised by a connection actor.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connection was already closed when a read was due
    #[error("channel closed")]
    ChannelClosedPrecondition,

    /// The socket failed while reading
    #[error("read failed: {0}")]
    ReadFailure(#[source] std::io::Error),

    /// The socket failed while writing
    #[error("write failed: {0}")]
    WriteFailure(#[source] std::io::Error),

    /// A message arrived that the actor has no handling for
    #[error("unhandled message: {0}")]
    UnhandledMessage(String),

    /// The actor has stopped and no longer accepts messages
    #[error("connection mailbox closed")]
    MailboxClosed,
}

/// The owner of a connection, notified of every line it reads.
///
/// `line_arrived` is called from the connection's own task and must not
/// block.
pub trait LineConsumer: Send + 'static {
    fn line_arrived(&self, line: LineArrived);
}

impl LineConsumer for UnboundedSender<LineArrived> {
    fn line_arrived(&self, line: LineArrived) {
        if let Err(e) = self.send(line) {
            let connection = e.0.connection;
            debug!(connection = %connection, "Line consumer gone, dropping line");
        }
    }
}

/// Address of a running connection actor.
///
/// Cloning is cheap. Once every handle is dropped the actor stops.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    mailbox: UnboundedSender<ConnectionMessage>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Delivers `message` to the actor's mailbox without waiting.
    ///
    /// `ChunkArrived` is reserved for the actor's own reads and is refused
    /// here without reaching the mailbox.
    pub fn tell(&self, message: ConnectionMessage) -> Result<(), ConnectionError> {
        if let ConnectionMessage::ChunkArrived(_) = message {
            return Err(ConnectionError::UnhandledMessage(
                "ChunkArrived is only delivered by the connection's own reads".to_string(),
            ));
        }
        self.mailbox
            .send(message)
            .map_err(|_| ConnectionError::MailboxClosed)
    }

    /// Queues `payload` to be written with the line delimiter appended.
    pub fn send_line(&self, payload: impl Into<String>) -> Result<(), ConnectionError> {
        self.tell(ConnectionMessage::SendLine(payload.into()))
    }

    /// Asks the actor to stop.
    pub fn terminate(&self) -> Result<(), ConnectionError> {
        self.tell(ConnectionMessage::Terminate)
    }

    /// Returns true once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

/// Where the read half currently lives.
enum ReadSlot<R> {
    /// Open, no read outstanding
    Idle(R),
    /// A read task owns the read half and returns it through `returned`
    Pending {
        task: JoinHandle<()>,
        returned: oneshot::Receiver<R>,
    },
    /// The peer closed the stream, a read failed, or the actor stopped
    Closed,
}

/// Frames lines in and out of one socket.
pub struct ConnectionActor<R, W, C> {
    id: ConnectionId,
    consumer: C,
    mailbox: UnboundedReceiver<ConnectionMessage>,
    address: WeakUnboundedSender<ConnectionMessage>,
    reader: ReadSlot<R>,
    writer: Option<W>,
    frames: Option<UnboundedSender<Bytes>>,
    writer_task: Option<JoinHandle<()>>,
    read_buffer_size: usize,
    stats: Arc<ConnectionStats>,
    released: bool,
}

impl<R, W, C> ConnectionActor<R, W, C>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    C: LineConsumer,
{
    /// Creates an actor over the two halves of a connection.
    ///
    /// Nothing happens until [`run`](Self::run) is awaited or spawned.
    pub fn new(
        reader: R,
        writer: W,
        consumer: C,
        config: &ConnectionConfig,
        stats: Arc<ConnectionStats>,
    ) -> (Self, ConnectionHandle) {
        let id = ConnectionId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        stats.connection_opened();

        let actor = Self {
            id,
            consumer,
            mailbox: rx,
            address: tx.downgrade(),
            reader: ReadSlot::Idle(reader),
            writer: Some(writer),
            frames: None,
            writer_task: None,
            read_buffer_size: config.read_buffer_size.max(1),
            stats,
            released: false,
        };

        (actor, ConnectionHandle { id, mailbox: tx })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Runs the actor until it stops.
    ///
    /// Returns `Ok(())` for every orderly or I/O-induced stop and
    /// `Err(ConnectionError::UnhandledMessage)` for a contract violation.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(connection = %self.id, "Connection opened");
        self.start_writer();

        let result = match self.main_loop().await {
            Err(ConnectionError::ChannelClosedPrecondition) => {
                info!(connection = %self.id, "Channel closed, stopping");
                Ok(())
            }
            Err(ConnectionError::MailboxClosed) => {
                debug!(connection = %self.id, "All handles dropped, stopping");
                Ok(())
            }
            Err(e @ ConnectionError::UnhandledMessage(_)) => {
                error!(connection = %self.id, error = %e, "Connection actor crashed");
                Err(e)
            }
            other => other,
        };

        self.release().await;
        result
    }

    /// Alternates between the `Active` entry action and message handling.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        let mut accumulator = String::new();

        loop {
            self.issue_read()?;

            // Stay in the current state until a chunk makes us become anew
            loop {
                let message = self
                    .mailbox
                    .recv()
                    .await
                    .ok_or(ConnectionError::MailboxClosed)?;
                trace!(connection = %self.id, kind = message.kind(), "Message received");

                match message {
                    ConnectionMessage::Terminate => {
                        if !accumulator.is_empty() {
                            debug!(
                                connection = %self.id,
                                discarded = accumulator.len(),
                                "Discarding partial line"
                            );
                        }
                        return Ok(());
                    }
                    ConnectionMessage::SendLine(payload) => self.send_line(&payload),
                    ConnectionMessage::ChunkArrived(chunk) => {
                        self.reclaim_reader()?;
                        accumulator = self.on_chunk(accumulator, &chunk);
                        break;
                    }
                }
            }
        }
    }

    /// Entry action of `Active`: issue exactly one read, or fail if closed.
    fn issue_read(&mut self) -> Result<(), ConnectionError> {
        let reader = match std::mem::replace(&mut self.reader, ReadSlot::Closed) {
            ReadSlot::Idle(reader) => reader,
            ReadSlot::Closed => return Err(ConnectionError::ChannelClosedPrecondition),
            pending @ ReadSlot::Pending { .. } => {
                self.reader = pending;
                return Ok(());
            }
        };

        let (returned_tx, returned_rx) = oneshot::channel();
        let task = tokio::spawn(read_once(
            self.id,
            reader,
            self.read_buffer_size,
            returned_tx,
            self.address.clone(),
            Arc::clone(&self.stats),
        ));

        self.reader = ReadSlot::Pending {
            task,
            returned: returned_rx,
        };
        trace!(connection = %self.id, capacity = self.read_buffer_size, "Read issued");
        Ok(())
    }

    /// Takes the read half back from the completed read.
    ///
    /// A chunk that did not come from our own outstanding read breaks the
    /// single-reader contract and crashes the actor.
    fn reclaim_reader(&mut self) -> Result<(), ConnectionError> {
        match std::mem::replace(&mut self.reader, ReadSlot::Closed) {
            ReadSlot::Pending { task, mut returned } => match returned.try_recv() {
                Ok(reader) => {
                    self.reader = ReadSlot::Idle(reader);
                    Ok(())
                }
                // The read task dropped the half: end of stream
                Err(TryRecvError::Closed) => Ok(()),
                Err(TryRecvError::Empty) => {
                    self.reader = ReadSlot::Pending { task, returned };
                    Err(ConnectionError::UnhandledMessage(
                        "ChunkArrived while the read is still outstanding".to_string(),
                    ))
                }
            },
            ReadSlot::Idle(reader) => {
                self.reader = ReadSlot::Idle(reader);
                Err(ConnectionError::UnhandledMessage(
                    "ChunkArrived with no read outstanding".to_string(),
                ))
            }
            ReadSlot::Closed => Err(ConnectionError::UnhandledMessage(
                "ChunkArrived after the channel closed".to_string(),
            )),
        }
    }

    /// Folds a chunk into the accumulator and emits at most one line.
    fn on_chunk(&mut self, accumulator: String, chunk: &[u8]) -> String {
        let extracted = extract_line(accumulator, chunk);

        if let Some(text) = extracted.line {
            trace!(connection = %self.id, len = text.len(), "Line extracted");
            self.stats.line_received();
            self.consumer.line_arrived(LineArrived {
                connection: self.id,
                text,
            });
        }

        extracted.remainder
    }

    fn send_line(&mut self, payload: &str) {
        let Some(frames) = &self.frames else {
            return;
        };
        if frames.send(encode_line(payload)).is_err() {
            // The writer already failed and posted Terminate
            trace!(connection = %self.id, "Writer gone, dropping line");
        }
    }

    fn start_writer(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        let (tx, rx) = mpsc::unbounded_channel();
        self.writer_task = Some(tokio::spawn(write_frames(
            self.id,
            writer,
            rx,
            self.address.clone(),
            Arc::clone(&self.stats),
        )));
        self.frames = Some(tx);
    }

    /// Releases the connection at the end of `run`. `Drop` covers every
    /// other exit path.
    ///
    /// Both I/O tasks are aborted and awaited, so the read and write halves
    /// are dropped and the socket is closed by the time this returns. Frames
    /// still queued are discarded.
    async fn release(&mut self) {
        if self.released {
            return;
        }

        let reader_task = match std::mem::replace(&mut self.reader, ReadSlot::Closed) {
            ReadSlot::Pending { task, .. } => Some(task),
            _ => None,
        };
        self.frames.take();
        self.writer.take();
        self.mailbox.close();

        let tasks: Vec<_> = reader_task.into_iter().chain(self.writer_task.take()).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            // Cancelled is the expected outcome
            let _ = task.await;
        }

        self.released = true;
        self.stats.connection_closed();
        info!(connection = %self.id, "Connection closed");
    }
}

impl<R, W, C> Drop for ConnectionActor<R, W, C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let ReadSlot::Pending { task, .. } = &self.reader {
            task.abort();
        }
        if let Some(task) = &self.writer_task {
            task.abort();
        }
        self.stats.connection_closed();
        debug!(connection = %self.id, "Connection released on drop");
    }
}

/// Performs one read and posts the outcome to the actor's mailbox.
async fn read_once<R>(
    id: ConnectionId,
    mut reader: R,
    capacity: usize,
    returned: oneshot::Sender<R>,
    mailbox: WeakUnboundedSender<ConnectionMessage>,
    stats: Arc<ConnectionStats>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = BytesMut::zeroed(capacity);
    let result = reader.read(&mut buf[..]).await;

    let Some(mailbox) = mailbox.upgrade() else {
        return;
    };

    match result {
        Ok(0) => {
            debug!(connection = %id, "Peer closed the stream");
            drop(reader);
            drop(returned);
            let _ = mailbox.send(ConnectionMessage::ChunkArrived(Bytes::new()));
        }
        Ok(n) => {
            buf.truncate(n);
            stats.bytes_read(n);
            trace!(connection = %id, bytes = n, "Read data");
            // Hand the half back first so the chunk finds it waiting
            let _ = returned.send(reader);
            let _ = mailbox.send(ConnectionMessage::ChunkArrived(buf.freeze()));
        }
        Err(e) => {
            let e = ConnectionError::ReadFailure(e);
            warn!(connection = %id, error = %e, "Read failed");
            let _ = mailbox.send(ConnectionMessage::Terminate);
        }
    }
}

/// Drains the frame queue onto the write half, in order.
async fn write_frames<W>(
    id: ConnectionId,
    mut writer: W,
    mut frames: UnboundedReceiver<Bytes>,
    mailbox: WeakUnboundedSender<ConnectionMessage>,
    stats: Arc<ConnectionStats>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(frame) = frames.recv().await {
        let result = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                stats.bytes_written(frame.len());
                stats.line_sent();
                trace!(connection = %id, bytes = frame.len(), "Sent line");
            }
            Err(e) => {
                let e = ConnectionError::WriteFailure(e);
                warn!(connection = %id, error = %e, "Write failed");
                if let Some(mailbox) = mailbox.upgrade() {
                    let _ = mailbox.send(ConnectionMessage::Terminate);
                }
                return;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(connection = %id, error = %e, "Shutdown of write half failed");
    }
}

/// Splits `stream` and spawns a connection actor over it.
///
/// Returns the actor's address and the task it runs on.
pub fn spawn_connection<S, C>(
    stream: S,
    consumer: C,
    config: &ConnectionConfig,
    stats: Arc<ConnectionStats>,
) -> (ConnectionHandle, JoinHandle<Result<(), ConnectionError>>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    C: LineConsumer,
{
    let (reader, writer) = tokio::io::split(stream);
    let (actor, handle) = ConnectionActor::new(reader, writer, consumer, config, stats);
    (handle, tokio::spawn(actor.run()))
}
