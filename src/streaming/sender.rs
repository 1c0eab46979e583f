//! Transfer workers for a sender session.
//!
//! Each worker takes requested files off the job queue and streams their
//! content as DATA packets, closing every file with an empty DATA.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SyncError};
use crate::fs::{FileReader, FileSystem};
use crate::streaming::buffer::BufferPool;
use crate::streaming::channel::{JobReceiver, StatsCounters, TransferJob};
use crate::streaming::protocol::Packet;
use crate::transport::{PacketSink, SharedSink};

/// How a file's content phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Copied {
    Complete,
    Truncated,
}

pub(crate) struct Sender<F, S> {
    fs: Arc<F>,
    sink: SharedSink<S>,
    pool: Arc<BufferPool>,
    chunk_size: usize,
    stats: Arc<StatsCounters>,
}

impl<F, S> Clone for Sender<F, S> {
    fn clone(&self) -> Self {
        Self {
            fs: Arc::clone(&self.fs),
            sink: self.sink.clone(),
            pool: Arc::clone(&self.pool),
            chunk_size: self.chunk_size,
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<F: FileSystem, S: PacketSink> Sender<F, S> {
    pub fn new(
        fs: Arc<F>,
        sink: SharedSink<S>,
        pool: Arc<BufferPool>,
        chunk_size: usize,
        stats: Arc<StatsCounters>,
    ) -> Self {
        Self {
            fs,
            sink,
            pool,
            chunk_size,
            stats,
        }
    }

    /// Worker loop: runs until the job queue is closed and drained, or the
    /// session is cancelled.
    pub async fn run(self, jobs: JobReceiver, cancel: CancellationToken) -> Result<()> {
        loop {
            let job = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                job = async { jobs.lock().await.recv().await } => job,
            };
            let Some(job) = job else { return Ok(()) };

            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            self.send_file(job, &cancel).await?;
        }
    }

    /// Stream one file and its completion marker.
    ///
    /// A file that cannot be opened or read is not a session failure: the
    /// peer gets whatever content made it out, then the marker.
    pub async fn send_file(&self, job: TransferJob, cancel: &CancellationToken) -> Result<()> {
        let copied = match self.fs.open(&job.path).await {
            Ok(mut reader) => self.copy_content(&job, &mut reader, cancel).await?,
            Err(err) => {
                tracing::debug!(id = job.id, path = %job.path, error = %err, "open failed, sending empty file");
                Copied::Truncated
            }
        };

        match copied {
            Copied::Complete => self.stats.files_sent.fetch_add(1, Ordering::Relaxed),
            Copied::Truncated => self.stats.files_degraded.fetch_add(1, Ordering::Relaxed),
        };

        self.sink
            .send_cancellable(Packet::data_end(job.id), cancel)
            .await
    }

    async fn copy_content(
        &self,
        job: &TransferJob,
        reader: &mut FileReader,
        cancel: &CancellationToken,
    ) -> Result<Copied> {
        let mut buf = self.pool.acquire();
        let limit = self.chunk_size.min(buf.len());

        loop {
            let n = match reader.read(&mut buf[..limit]).await {
                Ok(0) => return Ok(Copied::Complete),
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(id = job.id, path = %job.path, error = %err, "read failed, truncating transfer");
                    return Ok(Copied::Truncated);
                }
            };

            let chunk = Bytes::copy_from_slice(&buf[..n]);
            self.sink
                .send_cancellable(Packet::data(job.id, chunk), cancel)
                .await?;
            self.stats.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
        }
    }
}
