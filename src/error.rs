//! Error types for the sync sender.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Send or receive failure on the packet stream.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Walk produced an entry without usable stat information.
    #[error("bad message: fileinfo without stat info: {path}")]
    MalformedMetadata { path: String },

    /// Peer requested an id that was never announced or was already consumed.
    #[error("invalid file id {0}")]
    UnknownFileId(u32),

    /// Peer aborted the session with an ERR packet.
    #[error("error from receiver: {0}")]
    Remote(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// More entries than the u32 id space can address.
    #[error("too many entries: id space exhausted after {0}")]
    IdsExhausted(u32),

    #[error("session cancelled")]
    Cancelled,

    #[error("session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Whether the peer should be told about this failure with an ERR packet.
    ///
    /// A remote ERR is the peer's own failure, and cancellation is not a
    /// protocol event.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, SyncError::Remote(_) | SyncError::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}
