//! Connection Module
//!
//! Every accepted socket is handed to its own `ConnectionActor`, a tokio
//! task with a private mailbox. The actor turns the byte stream into
//! `$`-delimited lines for its consumer and writes the consumer's outgoing
//! lines back to the socket.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────────── ConnectionActor ───────────────┐
//!            │                                                        │
//!  socket ──>│ read task ──ChunkArrived──┐                            │
//!            │                           ▼                            │
//!  consumer ─┼──── SendLine/Terminate ─> mailbox ─> accumulator ──────┼─> LineArrived
//!            │                           │                            │
//!  socket <──┼── writer task <── frames ─┘                            │
//!            └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use dollarline::connection::{spawn_connection, ConnectionConfig, ConnectionStats};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! let (lines_tx, mut lines_rx) = mpsc::unbounded_channel();
//! let stats = Arc::new(ConnectionStats::new());
//!
//! let (stream, _addr) = listener.accept().await?;
//! let (handle, _task) = spawn_connection(stream, lines_tx, &ConnectionConfig::default(), stats);
//!
//! while let Some(line) = lines_rx.recv().await {
//!     handle.send_line(line.text)?;
//! }
//! ```

pub mod handler;

pub use handler::{
    spawn_connection, ConnectionActor, ConnectionConfig, ConnectionError, ConnectionHandle,
    ConnectionStats, LineConsumer, READ_BUFFER_SIZE,
};
