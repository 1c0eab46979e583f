//! Filesystem collaborator: walks a tree and opens files for reading.
//!
//! The session does not decide what exists or is included; it announces
//! whatever the [`FileSystem`] yields, in the order it yields it.

mod local;

use std::io;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::streaming::protocol::Stat;

pub use local::LocalFs;

/// Entries buffered between the walker and the walk task
pub const WALK_CHANNEL_SIZE: usize = 1024;

pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// One walked entry.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Path relative to the walk root
    pub path: String,
    /// `None` when the walker could not produce stat information
    pub stat: Option<Stat>,
}

#[async_trait]
pub trait FileSystem: Send + Sync + 'static {
    /// Stream entries in walk order. The walk stops early once the receiver
    /// is dropped; a walk failure arrives as an `Err` item and ends the stream.
    fn walk(&self) -> mpsc::Receiver<Result<WalkEntry>>;

    /// Open a walked regular file by its relative path.
    async fn open(&self, path: &str) -> io::Result<FileReader>;
}
