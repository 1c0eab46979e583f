//! Walk task for a sender session.
//!
//! Streams one STAT per walked entry, registers regular files as requestable,
//! and closes the metadata phase with an empty STAT.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, SyncError};
use crate::fs::FileSystem;
use crate::streaming::channel::StatsCounters;
use crate::streaming::pending::PendingFiles;
use crate::streaming::protocol::Packet;
use crate::transport::{PacketSink, SharedSink};

pub(crate) struct Generator<F> {
    fs: Arc<F>,
    pending: Arc<PendingFiles>,
    stats: Arc<StatsCounters>,
}

impl<F: FileSystem> Generator<F> {
    pub fn new(fs: Arc<F>, pending: Arc<PendingFiles>, stats: Arc<StatsCounters>) -> Self {
        Self { fs, pending, stats }
    }

    /// Announce every entry, then the end-of-metadata marker.
    /// Returns the number of entries announced.
    pub async fn run<S: PacketSink>(
        self,
        sink: SharedSink<S>,
        cancel: CancellationToken,
    ) -> Result<u32> {
        let mut entries = self.fs.walk();
        let mut next_id: u32 = 0;

        loop {
            let entry = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                entry = entries.recv() => entry,
            };
            let Some(entry) = entry else { break };
            let entry = entry?;

            let stat = match entry.stat {
                Some(stat) if !stat.path.is_empty() => stat,
                _ => return Err(SyncError::MalformedMetadata { path: entry.path }),
            };

            let id = next_id;
            if stat.is_regular() {
                self.pending.insert(id, stat.path.clone());
            }
            next_id = next_entry_id(id)?;

            tracing::trace!(id, path = %stat.path, mode = stat.mode, "announce");
            sink.send_cancellable(Packet::stat(id, stat), &cancel).await?;
            self.stats.entries_announced.fetch_add(1, Ordering::Relaxed);
        }

        sink.send_cancellable(Packet::end_of_stats(), &cancel).await?;
        tracing::debug!(entries = next_id, "metadata walk complete");

        Ok(next_id)
    }
}

fn next_entry_id(id: u32) -> Result<u32> {
    id.checked_add(1).ok_or(SyncError::IdsExhausted(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileReader, LocalFs, WalkEntry};
    use crate::streaming::protocol::{PacketType, Stat, S_IFDIR, S_IFREG};
    use crate::transport::memory;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Yields a fixed list of entries.
    struct ListFs(Vec<WalkEntry>);

    #[async_trait]
    impl FileSystem for ListFs {
        fn walk(&self) -> mpsc::Receiver<Result<WalkEntry>> {
            let (tx, rx) = mpsc::channel(self.0.len().max(1));
            for entry in &self.0 {
                tx.try_send(Ok(entry.clone())).unwrap();
            }
            rx
        }

        async fn open(&self, _path: &str) -> std::io::Result<FileReader> {
            Err(std::io::ErrorKind::NotFound.into())
        }
    }

    fn entry(path: &str, mode: u32) -> WalkEntry {
        WalkEntry {
            path: path.to_string(),
            stat: Some(Stat {
                path: path.to_string(),
                mode,
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn test_generator_announces_in_walk_order() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a"), "").unwrap();
        fs::create_dir(tmp.path().join("b")).unwrap();
        fs::write(tmp.path().join("b/c"), "c").unwrap();

        let (_source, sink, mut peer) = memory::pair(16);
        let pending = Arc::new(PendingFiles::new());
        let stats = Arc::new(StatsCounters::default());
        let gen = Generator::new(Arc::new(LocalFs::new(tmp.path())), pending.clone(), stats.clone());

        let count = gen
            .run(SharedSink::new(sink), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(count, 3);

        let mut announced = Vec::new();
        loop {
            let packet = peer.recv().await.unwrap();
            assert_eq!(packet.kind, PacketType::Stat);
            match packet.stat {
                Some(stat) => announced.push((packet.id, stat.path)),
                None => break,
            }
        }
        assert_eq!(
            announced,
            vec![(0, "a".to_string()), (1, "b".to_string()), (2, "b/c".to_string())]
        );

        // Directory id 1 is not requestable
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.take(0).as_deref(), Some("a"));
        assert_eq!(pending.take(1), None);
        assert_eq!(pending.take(2).as_deref(), Some("b/c"));
        assert_eq!(stats.snapshot().entries_announced, 3);
    }

    #[tokio::test]
    async fn test_generator_empty_tree_sends_only_marker() {
        let (_source, sink, mut peer) = memory::pair(4);
        let gen = Generator::new(
            Arc::new(ListFs(vec![])),
            Arc::new(PendingFiles::new()),
            Arc::new(StatsCounters::default()),
        );

        let count = gen
            .run(SharedSink::new(sink), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(peer.recv().await.unwrap().is_end_of_stats());
    }

    #[tokio::test]
    async fn test_generator_rejects_missing_stat() {
        let fs = ListFs(vec![
            entry("ok", S_IFREG | 0o644),
            WalkEntry {
                path: "broken".to_string(),
                stat: None,
            },
            entry("never", S_IFDIR | 0o755),
        ]);
        let (_source, sink, mut peer) = memory::pair(8);
        let gen = Generator::new(
            Arc::new(fs),
            Arc::new(PendingFiles::new()),
            Arc::new(StatsCounters::default()),
        );

        let err = gen
            .run(SharedSink::new(sink), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedMetadata { ref path } if path == "broken"));

        // Only the entry before the malformed one went out, no end marker
        let first = peer.recv().await.unwrap();
        assert_eq!(first.stat.unwrap().path, "ok");
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_generator_stops_on_cancel() {
        let fs = ListFs(vec![entry("a", S_IFREG | 0o644), entry("b", S_IFREG | 0o644)]);
        // Capacity 1 and nobody reading: the second STAT blocks
        let (_source, sink, _peer) = memory::pair(1);
        let cancel = CancellationToken::new();
        let gen = Generator::new(
            Arc::new(fs),
            Arc::new(PendingFiles::new()),
            Arc::new(StatsCounters::default()),
        );

        let handle = tokio::spawn(gen.run(SharedSink::new(sink), cancel.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_id_space_exhaustion() {
        assert_eq!(next_entry_id(0).unwrap(), 1);
        assert_eq!(next_entry_id(u32::MAX - 1).unwrap(), u32::MAX);
        let err = next_entry_id(u32::MAX).unwrap_err();
        assert!(matches!(err, SyncError::IdsExhausted(n) if n == u32::MAX));
        assert!(err.is_reportable());
    }
}
