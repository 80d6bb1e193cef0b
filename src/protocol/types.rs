//! Message Types
//!
//! These are the only messages that cross a connection actor's boundary.
//!
//! ```text
//!   read task ──ChunkArrived──┐
//!                             ▼
//!   consumer ───SendLine────> mailbox ──> ConnectionActor ──LineArrived──> consumer
//!   anyone ─────Terminate─────┘
//! ```

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocates the next unused id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw id. Uniqueness is the caller's concern.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Messages processed by a connection actor's mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionMessage {
    /// Raw bytes delivered by the actor's own read completion.
    ///
    /// An empty chunk means the peer closed its side of the stream.
    ChunkArrived(Bytes),

    /// Frame `payload` with the delimiter and write it to the socket.
    SendLine(String),

    /// Stop the actor and release the connection.
    Terminate,
}

impl ConnectionMessage {
    /// Short name used in log lines and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionMessage::ChunkArrived(_) => "ChunkArrived",
            ConnectionMessage::SendLine(_) => "SendLine",
            ConnectionMessage::Terminate => "Terminate",
        }
    }
}

/// A complete line received on a connection, delimiter stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineArrived {
    /// The connection the line was read from
    pub connection: ConnectionId,
    /// Line content without the delimiter
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::from_raw(42).to_string(), "#42");
        assert_eq!(ConnectionId::from_raw(7).as_u64(), 7);
    }

    #[test]
    fn test_message_kind() {
        assert_eq!(
            ConnectionMessage::ChunkArrived(Bytes::new()).kind(),
            "ChunkArrived"
        );
        assert_eq!(ConnectionMessage::SendLine("x".into()).kind(), "SendLine");
        assert_eq!(ConnectionMessage::Terminate.kind(), "Terminate");
    }
}
