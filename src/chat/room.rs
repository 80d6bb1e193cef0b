//! Chat Room
//!
//! The room is the owning consumer for every connection that joins it. It
//! runs as its own task; connections report lines to it through
//! [`RoomHandle`], and it answers by telling the other members `SendLine`.

use crate::connection::{ConnectionHandle, LineConsumer};
use crate::protocol::{ConnectionId, LineArrived};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Events processed by the room.
#[derive(Debug)]
pub enum RoomEvent {
    /// A connection becomes a member
    Joined(ConnectionHandle),
    /// A connection has stopped and leaves
    Left(ConnectionId),
    /// A member sent a line
    Line(LineArrived),
    /// Terminate every member and stop the room
    Shutdown,
}

/// Errors returned by [`RoomHandle`].
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("chat room closed")]
    Closed,
}

/// Address of a running chat room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    mailbox: UnboundedSender<RoomEvent>,
}

impl RoomHandle {
    pub fn join(&self, member: ConnectionHandle) -> Result<(), RoomError> {
        self.send(RoomEvent::Joined(member))
    }

    pub fn leave(&self, id: ConnectionId) -> Result<(), RoomError> {
        self.send(RoomEvent::Left(id))
    }

    pub fn shutdown(&self) -> Result<(), RoomError> {
        self.send(RoomEvent::Shutdown)
    }

    fn send(&self, event: RoomEvent) -> Result<(), RoomError> {
        self.mailbox.send(event).map_err(|_| RoomError::Closed)
    }
}

impl LineConsumer for RoomHandle {
    fn line_arrived(&self, line: LineArrived) {
        if self.send(RoomEvent::Line(line)).is_err() {
            trace!("Chat room closed, dropping line");
        }
    }
}

/// Broadcasts each member's lines to every other member.
pub struct ChatRoom {
    members: HashMap<ConnectionId, ConnectionHandle>,
    mailbox: UnboundedReceiver<RoomEvent>,
}

impl ChatRoom {
    pub fn new() -> (Self, RoomHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let room = Self {
            members: HashMap::new(),
            mailbox: rx,
        };
        (room, RoomHandle { mailbox: tx })
    }

    /// Creates a room and runs it on its own task.
    pub fn spawn() -> (RoomHandle, JoinHandle<()>) {
        let (room, handle) = Self::new();
        (handle, tokio::spawn(room.run()))
    }

    pub async fn run(mut self) {
        info!("Chat room open");

        while let Some(event) = self.mailbox.recv().await {
            match event {
                RoomEvent::Joined(member) => {
                    debug!(connection = %member.id(), "Member joined");
                    self.members.insert(member.id(), member);
                }
                RoomEvent::Left(id) => {
                    if self.members.remove(&id).is_some() {
                        debug!(connection = %id, "Member left");
                    }
                }
                RoomEvent::Line(line) => self.broadcast(&line),
                RoomEvent::Shutdown => break,
            }
        }

        for member in self.members.values() {
            let _ = member.terminate();
        }
        info!(members = self.members.len(), "Chat room closed");
    }

    fn broadcast(&mut self, line: &LineArrived) {
        if line.text.trim().is_empty() {
            return;
        }

        let message = format!("{}: {}", line.connection, line.text);
        let mut gone = Vec::new();

        for (id, member) in &self.members {
            if *id == line.connection {
                continue;
            }
            if member.send_line(message.as_str()).is_err() {
                gone.push(*id);
            }
        }

        for id in gone {
            debug!(connection = %id, "Dropping stopped member");
            self.members.remove(&id);
        }
        trace!(from = %line.connection, members = self.members.len(), "Broadcast line");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{spawn_connection, ConnectionConfig, ConnectionError, ConnectionStats};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::time::timeout;
    use tokio_test::assert_ok;

    struct Member {
        client: DuplexStream,
        handle: ConnectionHandle,
        task: JoinHandle<Result<(), ConnectionError>>,
    }

    fn connect(room: &RoomHandle, stats: &Arc<ConnectionStats>) -> Member {
        let (client, server) = tokio::io::duplex(4096);
        let (handle, task) = spawn_connection(
            server,
            room.clone(),
            &ConnectionConfig::default(),
            Arc::clone(stats),
        );
        assert_ok!(room.join(handle.clone()));
        Member {
            client,
            handle,
            task,
        }
    }

    async fn read_frame(client: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for broadcast")
            .unwrap();
        buf
    }

    async fn assert_silent(client: &mut DuplexStream) {
        let mut buf = [0u8; 64];
        if let Ok(Ok(n)) = timeout(Duration::from_millis(100), client.read(&mut buf)).await {
            panic!("unexpected bytes {:?}", &buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_other_members() {
        let (room, _task) = ChatRoom::spawn();
        let stats = Arc::new(ConnectionStats::new());
        let mut alice = connect(&room, &stats);
        let mut bob = connect(&room, &stats);
        let mut carol = connect(&room, &stats);

        alice.client.write_all(b"hi all$").await.unwrap();

        let expected = format!("{}: hi all$", alice.handle.id());
        assert_eq!(read_frame(&mut bob.client, expected.len()).await, expected.as_bytes());
        assert_eq!(read_frame(&mut carol.client, expected.len()).await, expected.as_bytes());
        assert_silent(&mut alice.client).await;
    }

    #[tokio::test]
    async fn test_blank_lines_are_not_broadcast() {
        let (room, _task) = ChatRoom::spawn();
        let stats = Arc::new(ConnectionStats::new());
        let mut alice = connect(&room, &stats);
        let mut bob = connect(&room, &stats);

        alice.client.write_all(b"   $").await.unwrap();

        assert_silent(&mut bob.client).await;
        drop(alice);
    }

    #[tokio::test]
    async fn test_left_member_gets_nothing() {
        let (room, _task) = ChatRoom::spawn();
        let stats = Arc::new(ConnectionStats::new());
        let mut alice = connect(&room, &stats);
        let mut bob = connect(&room, &stats);

        assert_ok!(room.leave(bob.handle.id()));
        alice.client.write_all(b"anyone?$").await.unwrap();

        assert_silent(&mut bob.client).await;
    }

    #[tokio::test]
    async fn test_shutdown_terminates_members() {
        let (room, task) = ChatRoom::spawn();
        let stats = Arc::new(ConnectionStats::new());
        let alice = connect(&room, &stats);
        let bob = connect(&room, &stats);

        assert_ok!(room.shutdown());
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        for member in [alice, bob] {
            let result = timeout(Duration::from_secs(2), member.task)
                .await
                .unwrap()
                .unwrap();
            assert!(result.is_ok());
        }
        assert_eq!(
            stats
                .active_connections
                .load(std::sync::atomic::Ordering::Relaxed),
            0
        );
        assert!(matches!(
            room.leave(ConnectionId::from_raw(0)),
            Err(RoomError::Closed)
        ));
    }
}
