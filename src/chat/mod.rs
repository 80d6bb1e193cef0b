//! Chat Module
//!
//! A broadcast chat room built on connection actors. The room consumes the
//! lines of all its members and relays each one to everybody else as
//! `"#<id>: <text>$"`.
//!
//! ```text
//!   alice ──LineArrived──┐
//!                        ▼
//!   bob   <──SendLine── ChatRoom ──SendLine──> carol
//! ```

pub mod room;

pub use room::{ChatRoom, RoomError, RoomEvent, RoomHandle};
