//! Server mode - serve one sender session over stdin/stdout.
//!
//! The peer (usually reached through ssh or a build tool's pipe) speaks the
//! framed packet protocol on our stdio. Logging must go to stderr.

use std::path::{Path, PathBuf};

use tokio::io;
use tokio_util::sync::CancellationToken;

use crate::config::SenderConfig;
use crate::error::{Result, SyncError};
use crate::fs::LocalFs;
use crate::streaming::{Session, SessionStats};
use crate::transport::{FramedSink, FramedSource};

/// Expand tilde (~) in paths to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    }
}

/// Serve `root` to the peer on stdio until the session ends.
pub async fn serve_stdio(
    root: &Path,
    config: SenderConfig,
    cancel: CancellationToken,
) -> Result<SessionStats> {
    let root = expand_tilde(root);
    let meta = std::fs::metadata(&root).map_err(|source| SyncError::Walk {
        path: root.clone(),
        source,
    })?;
    if !meta.is_dir() {
        return Err(SyncError::Walk {
            path: root,
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
        });
    }

    tracing::info!(root = %root.display(), "serving directory");

    let session = Session::new(LocalFs::new(root), config);
    session
        .run(
            FramedSource::new(io::stdin()),
            FramedSink::new(io::stdout()),
            cancel,
        )
        .await
}
