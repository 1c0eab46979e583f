//! Channel types for the transfer pipeline.
//!
//! Receive loop -> worker pool, over a bounded queue for backpressure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

/// Accepted-but-unstarted transfer jobs
pub const JOB_QUEUE_SIZE: usize = 128;

/// Concurrent transfer workers
pub const WORKER_COUNT: usize = 64;

/// Content frame size (1MB)
pub const DATA_CHUNK_SIZE: usize = 1 << 20;

// =============================================================================
// TransferJob: receive loop -> worker
// =============================================================================

/// A requested file, resolved against the pending table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub id: u32,
    /// Path relative to the sync root
    pub path: String,
}

pub type JobSender = mpsc::Sender<TransferJob>;

/// Shared by every worker; whoever holds the lock takes the next job.
pub type JobReceiver = Arc<Mutex<mpsc::Receiver<TransferJob>>>;

pub fn job_channel(capacity: usize) -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, Arc::new(Mutex::new(rx)))
}

// =============================================================================
// Session statistics
// =============================================================================

/// Counters for one session
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// STAT packets sent for real entries
    pub entries_announced: u64,

    /// REQ packets resolved to a job
    pub files_requested: u64,

    /// Jobs finished with their content streamed
    pub files_sent: u64,

    /// Jobs that could not be opened or read to the end
    pub files_degraded: u64,

    /// Content bytes sent in DATA packets
    pub bytes_sent: u64,
}

/// Live counters, shared by the session tasks.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub entries_announced: AtomicU64,
    pub files_requested: AtomicU64,
    pub files_sent: AtomicU64,
    pub files_degraded: AtomicU64,
    pub bytes_sent: AtomicU64,
}

impl StatsCounters {
    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            entries_announced: self.entries_announced.load(Ordering::Relaxed),
            files_requested: self.files_requested.load(Ordering::Relaxed),
            files_sent: self.files_sent.load(Ordering::Relaxed),
            files_degraded: self.files_degraded.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}
