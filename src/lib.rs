//! # dollarline
//!
//! Per-connection line framing for line-oriented TCP protocols.
//!
//! Each connection is owned by a `ConnectionActor`: a tokio task with its own
//! mailbox that reads the socket, splits the byte stream into `$`-terminated
//! lines for an owning consumer, and writes the consumer's outgoing lines
//! back with the delimiter appended.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        dollarline server                         │
//! │                                                                  │
//! │  ┌─────────────┐  spawn   ┌──────────────────┐                   │
//! │  │ TCP Server  │────────> │ ConnectionActor  │──┐                │
//! │  │ (Listener)  │          │  (one per conn)  │  │ LineArrived    │
//! │  └─────────────┘          └──────────────────┘  ▼                │
//! │                                  ▲        ┌────────────┐         │
//! │                                  └────────│  ChatRoom  │         │
//! │                                  SendLine └────────────┘         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use dollarline::chat::ChatRoom;
//! use dollarline::connection::{spawn_connection, ConnectionConfig, ConnectionStats};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (room, _room_task) = ChatRoom::spawn();
//!     let stats = Arc::new(ConnectionStats::new());
//!     let config = ConnectionConfig::default();
//!
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!
//!     loop {
//!         let (stream, _addr) = listener.accept().await.unwrap();
//!         let (handle, _task) =
//!             spawn_connection(stream, room.clone(), &config, Arc::clone(&stats));
//!         room.join(handle).unwrap();
//!     }
//! }
//! ```
//!
//! ## Wire Format
//!
//! A line is any byte run terminated by `$` (0x24). There is no escaping.
//! Bytes are decoded as lossy UTF-8.
//!
//! ## Module Overview
//!
//! - [`protocol`]: line framing and the messages actors exchange
//! - [`connection`]: the per-connection actor and its handle
//! - [`chat`]: a broadcast chat room consuming many connections
//!
//! ## Known Limitation
//!
//! Only the first delimiter in each received chunk produces a line. When a
//! single read carries `"A$B$"`, `"A"` is emitted at once while `"B"` stays
//! buffered until a later read brings another delimiter.

pub mod chat;
pub mod connection;
pub mod protocol;

pub use chat::{ChatRoom, RoomHandle};
pub use connection::{
    spawn_connection, ConnectionActor, ConnectionConfig, ConnectionError, ConnectionHandle,
    ConnectionStats, LineConsumer,
};
pub use protocol::{ConnectionId, ConnectionMessage, LineArrived, DELIMITER};

/// The default port the chat server listens on
pub const DEFAULT_PORT: u16 = 8080;

/// The default host the chat server binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of dollarline
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
