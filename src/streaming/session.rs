//! Sender session controller.
//!
//! Runs three activities under one cancellation token:
//!
//! ```text
//! +--------------+  STAT*   +-----------+
//! |  Generator   | -------> |           |
//! |  (walk)      |          |  Shared   |
//! +--------------+          |  sink     | ---> peer
//! +--------------+  DATA*   |  (mutex)  |
//! | Sender x N   | -------> |           |
//! +--------------+          +-----------+
//!        ^ jobs
//! +--------------+  REQ / FIN / ERR
//! | Request loop | <-------------------------- peer
//! +--------------+
//! ```
//!
//! The first failure wins: it is reported to the peer (unless it came from the
//! peer), every other task is cancelled, and it becomes the session's result.

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::SenderConfig;
use crate::error::{Result, SyncError};
use crate::fs::FileSystem;
use crate::streaming::buffer::BufferPool;
use crate::streaming::channel::{job_channel, JobSender, SessionStats, StatsCounters, TransferJob};
use crate::streaming::generator::Generator;
use crate::streaming::pending::PendingFiles;
use crate::streaming::protocol::{Packet, PacketType};
use crate::streaming::sender::Sender;
use crate::transport::{PacketSink, PacketSource, SharedSink};

/// Upper bound on delivering the ERR packet for a failed session
const ERR_REPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// One sender session over one packet stream.
pub struct Session<F> {
    fs: Arc<F>,
    config: SenderConfig,
    pool: Option<Arc<BufferPool>>,
}

impl<F: FileSystem> Session<F> {
    pub fn new(fs: F, config: SenderConfig) -> Self {
        Self {
            fs: Arc::new(fs),
            config,
            pool: None,
        }
    }

    /// Reuse transfer buffers from an existing pool instead of a per-session one.
    pub fn with_buffer_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Run the session to completion.
    ///
    /// Returns once the peer's FIN has been acknowledged and every requested
    /// file has been sent, or with the first fatal error. Cancelling `cancel`
    /// ends the session with [`SyncError::Cancelled`].
    pub async fn run<R, S>(self, source: R, sink: S, cancel: CancellationToken) -> Result<SessionStats>
    where
        R: PacketSource,
        S: PacketSink,
    {
        self.config.validate()?;

        // Internal failures cancel this session only, never the caller's token
        let cancel = cancel.child_token();
        let sink = SharedSink::new(sink);
        let pending = Arc::new(PendingFiles::new());
        let stats = Arc::new(StatsCounters::default());
        let pool = self.pool.unwrap_or_else(|| {
            Arc::new(BufferPool::new(
                self.config.chunk_size,
                self.config.max_idle_buffers,
            ))
        });
        let (job_tx, job_rx) = job_channel(self.config.queue_depth);
        let supervisor = Arc::new(Supervisor {
            first: Mutex::new(None),
            sink: sink.clone(),
            cancel: cancel.clone(),
        });

        tracing::info!(workers = self.config.workers, "sender session started");

        let mut tasks = JoinSet::new();

        let generator = Generator::new(self.fs.clone(), pending.clone(), stats.clone());
        supervisor.spawn(
            &mut tasks,
            "walk",
            generator.run(sink.clone(), cancel.clone()),
        );

        let sender = Sender::new(
            self.fs.clone(),
            sink.clone(),
            pool,
            self.config.chunk_size,
            stats.clone(),
        );
        for _ in 0..self.config.workers {
            supervisor.spawn(
                &mut tasks,
                "transfer",
                sender.clone().run(job_rx.clone(), cancel.clone()),
            );
        }
        drop(sender);
        drop(job_rx);

        let requests = RequestLoop {
            source,
            sink,
            pending,
            jobs: job_tx,
            stats: stats.clone(),
        };
        supervisor.spawn(&mut tasks, "receive", requests.run(cancel.clone()));

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                supervisor.fail("task", SyncError::Task(err)).await;
            }
        }
        cancel.cancel();

        let stats = stats.snapshot();
        match supervisor.take() {
            Some(err) => {
                tracing::debug!(?stats, "sender session aborted");
                Err(err)
            }
            None => {
                tracing::info!(
                    entries = stats.entries_announced,
                    files = stats.files_sent,
                    degraded = stats.files_degraded,
                    bytes = stats.bytes_sent,
                    "sender session finished"
                );
                Ok(stats)
            }
        }
    }
}

// =============================================================================
// Failure fan-in
// =============================================================================

struct Supervisor<S> {
    first: Mutex<Option<SyncError>>,
    sink: SharedSink<S>,
    cancel: CancellationToken,
}

impl<S: PacketSink> Supervisor<S> {
    fn spawn<T, Fut>(self: &Arc<Self>, tasks: &mut JoinSet<()>, stage: &'static str, fut: Fut)
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let supervisor = Arc::clone(self);
        tasks.spawn(async move {
            if let Err(err) = fut.await {
                supervisor.fail(stage, err).await;
            }
        });
    }

    /// Record a task failure. Only the first one is kept; it stops the other
    /// tasks and, when it originated locally, is reported to the peer.
    async fn fail(&self, stage: &'static str, err: SyncError) {
        let message = err.to_string();
        let reportable = err.is_reportable();

        let is_first = {
            let mut first = self.first.lock().unwrap_or_else(|e| e.into_inner());
            if first.is_none() {
                *first = Some(err);
                true
            } else {
                false
            }
        };
        if !is_first {
            tracing::debug!(stage, error = %message, "discarding secondary error");
            return;
        }

        self.cancel.cancel();
        if !reportable {
            tracing::debug!(stage, error = %message, "session stopped");
            return;
        }

        tracing::error!(stage, error = %message, "session failed");
        match tokio::time::timeout(ERR_REPORT_TIMEOUT, self.sink.send(Packet::err(message))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "failed to report error to peer"),
            Err(_) => tracing::debug!("timed out reporting error to peer"),
        }
    }

    fn take(&self) -> Option<SyncError> {
        self.first.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

// =============================================================================
// Receive loop
// =============================================================================

struct RequestLoop<R, S> {
    source: R,
    sink: SharedSink<S>,
    pending: Arc<PendingFiles>,
    jobs: JobSender,
    stats: Arc<StatsCounters>,
}

impl<R: PacketSource, S: PacketSink> RequestLoop<R, S> {
    /// Serve peer packets until FIN. Consumes the loop so the job queue closes
    /// on every exit path.
    async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            let packet = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                packet = self.source.recv_packet() => packet?,
            };

            match packet.kind {
                PacketType::Err => return Err(SyncError::Remote(packet.message())),
                PacketType::Req => self.queue(packet.id, &cancel).await?,
                PacketType::Fin => {
                    tracing::debug!("peer finished, acknowledging");
                    return self.sink.send_cancellable(Packet::fin(), &cancel).await;
                }
                PacketType::Stat | PacketType::Data => {
                    tracing::debug!(kind = ?packet.kind, id = packet.id, "ignoring packet not meant for sender");
                }
            }
        }
    }

    async fn queue(&mut self, id: u32, cancel: &CancellationToken) -> Result<()> {
        let path = self.pending.take(id).ok_or(SyncError::UnknownFileId(id))?;
        self.stats.files_requested.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(id, path = %path, "queue transfer");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            // Every worker gone means the session is already going down
            sent = self.jobs.send(TransferJob { id, path }) => sent.map_err(|_| SyncError::Cancelled),
        }
    }
}
