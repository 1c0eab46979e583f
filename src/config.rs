//! Sender tuning knobs, loadable from TOML.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SyncError};
use crate::streaming::buffer::DEFAULT_MAX_IDLE;
use crate::streaming::channel::{DATA_CHUNK_SIZE, JOB_QUEUE_SIZE, WORKER_COUNT};
use crate::streaming::protocol::MAX_FRAME_SIZE;

/// Sender configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SenderConfig {
    /// Concurrent file transfers
    pub workers: usize,
    /// Requested files waiting for a worker before the receive loop blocks
    pub queue_depth: usize,
    /// Bytes per DATA packet
    pub chunk_size: usize,
    /// Transfer buffers kept for reuse
    pub max_idle_buffers: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            workers: WORKER_COUNT,
            queue_depth: JOB_QUEUE_SIZE,
            chunk_size: DATA_CHUNK_SIZE,
            max_idle_buffers: DEFAULT_MAX_IDLE,
        }
    }
}

impl SenderConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SyncError::Config("workers must be at least 1".into()));
        }
        if self.queue_depth == 0 {
            return Err(SyncError::Config("queue_depth must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(SyncError::Config("chunk_size must be at least 1".into()));
        }
        // Leave room for the DATA header inside one frame
        if self.chunk_size > MAX_FRAME_SIZE as usize - 64 {
            return Err(SyncError::Config(format!(
                "chunk_size {} exceeds frame limit {}",
                self.chunk_size, MAX_FRAME_SIZE
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SenderConfig::default();
        assert_eq!(config.workers, 64);
        assert_eq!(config.queue_depth, 128);
        assert_eq!(config.chunk_size, 1 << 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SenderConfig::from_toml_str("workers = 8\nchunk_size = 65536\n").unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.chunk_size, 65536);
        assert_eq!(config.queue_depth, JOB_QUEUE_SIZE);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            SenderConfig::from_toml_str("workers = 0"),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            SenderConfig::from_toml_str("chunk_size = 134217728"),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            SenderConfig::from_toml_str("threads = 4"),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "queue_depth = 16\n").unwrap();

        let config = SenderConfig::load(tmp.path()).unwrap();
        assert_eq!(config.queue_depth, 16);

        let missing = SenderConfig::load(Path::new("/nonexistent/fssync.toml"));
        assert!(matches!(missing, Err(SyncError::Config(_))));
    }
}
