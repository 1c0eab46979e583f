//! Files announced to the peer that it may still request.

use std::collections::HashMap;
use std::sync::Mutex;

/// Maps a transient entry id to the path it was announced under.
///
/// Filled by the walk, drained by the receive loop. Each id can be taken once.
#[derive(Debug, Default)]
pub struct PendingFiles {
    files: Mutex<HashMap<u32, String>>,
}

impl PendingFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: u32, path: String) {
        self.lock().insert(id, path);
    }

    /// Remove and return the path for `id`, if it is still pending.
    pub fn take(&self, id: u32) -> Option<String> {
        self.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, String>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}
