//! fssync - sender side of a streaming filesystem sync protocol.
//!
//! Walks a directory tree, announces every entry's metadata to a peer, and
//! streams the content of the files the peer asks for.

pub mod config;
pub mod error;
pub mod fs;
pub mod server;
pub mod streaming;
pub mod transport;

pub use config::SenderConfig;
pub use error::{Result, SyncError};
pub use fs::{FileSystem, LocalFs, WalkEntry};
pub use streaming::{Packet, PacketType, Session, SessionStats, Stat};
