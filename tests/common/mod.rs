#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use fssync::fs::{FileReader, FileSystem, WalkEntry};
use fssync::streaming::protocol::{S_IFDIR, S_IFREG};
use fssync::transport::memory::{self, Peer};
use fssync::{Packet, PacketType, Result, SenderConfig, Session, SessionStats, Stat};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub struct Harness {
    pub peer: Peer,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<Result<SessionStats>>,
}

impl Harness {
    pub async fn recv(&mut self) -> Option<Packet> {
        tokio::time::timeout(TIMEOUT, self.peer.recv())
            .await
            .expect("timed out waiting for sender")
    }

    /// STAT packets up to, not including, the end-of-metadata marker.
    pub async fn read_metadata(&mut self) -> Vec<Packet> {
        let mut stats = Vec::new();
        loop {
            let packet = self.recv().await.expect("stream ended during metadata");
            assert_eq!(packet.kind, PacketType::Stat, "unexpected {:?}", packet);
            if packet.is_end_of_stats() {
                return stats;
            }
            stats.push(packet);
        }
    }

    /// Content for `id`, read until its completion marker. Other packets are
    /// returned in the second element.
    pub async fn read_file(&mut self, id: u32) -> (Vec<u8>, Vec<Packet>) {
        let mut content = Vec::new();
        let mut others = Vec::new();
        loop {
            let packet = self.recv().await.expect("stream ended during content");
            if packet.kind == PacketType::Data && packet.id == id {
                if packet.data.is_empty() {
                    return (content, others);
                }
                content.extend_from_slice(&packet.data);
            } else {
                others.push(packet);
            }
        }
    }

    pub async fn send(&self, packet: Packet) {
        self.peer.send(packet).await.expect("sender stopped reading");
    }

    /// Wait for the session result.
    pub async fn finish(self) -> (Result<SessionStats>, Peer) {
        let result = tokio::time::timeout(TIMEOUT, self.handle)
            .await
            .expect("session did not terminate")
            .expect("session task panicked");
        (result, self.peer)
    }
}

pub fn start<F: FileSystem>(fs: F, config: SenderConfig, capacity: usize) -> Harness {
    start_session(Session::new(fs, config), capacity)
}

pub fn start_session<F: FileSystem>(session: Session<F>, capacity: usize) -> Harness {
    let (source, sink, peer) = memory::pair(capacity);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(session.run(source, sink, cancel.clone()));
    Harness {
        peer,
        cancel,
        handle,
    }
}

/// Everything still queued once the sender is gone.
pub async fn drain(mut peer: Peer) -> Vec<Packet> {
    let mut packets = Vec::new();
    while let Some(packet) = peer.recv().await {
        packets.push(packet);
    }
    packets
}

pub fn small_config() -> SenderConfig {
    SenderConfig {
        workers: 4,
        queue_depth: 8,
        ..SenderConfig::default()
    }
}

/// In-memory tree with scripted failures.
#[derive(Default)]
pub struct FakeFs {
    entries: Vec<WalkEntry>,
    contents: HashMap<String, Vec<u8>>,
}

impl FakeFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(mut self, path: &str) -> Self {
        self.entries.push(entry(path, S_IFDIR | 0o755, 0));
        self
    }

    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.entries
            .push(entry(path, S_IFREG | 0o644, content.len() as u64));
        self.contents.insert(path.to_string(), content.to_vec());
        self
    }

    /// Announced as a regular file, but open fails.
    pub fn unopenable(mut self, path: &str) -> Self {
        self.entries.push(entry(path, S_IFREG | 0o600, 42));
        self
    }

    /// Walked without stat information.
    pub fn without_stat(mut self, path: &str) -> Self {
        self.entries.push(WalkEntry {
            path: path.to_string(),
            stat: None,
        });
        self
    }
}

fn entry(path: &str, mode: u32, size: u64) -> WalkEntry {
    WalkEntry {
        path: path.to_string(),
        stat: Some(Stat {
            path: path.to_string(),
            mode,
            size,
            ..Default::default()
        }),
    }
}

#[async_trait]
impl FileSystem for FakeFs {
    fn walk(&self) -> mpsc::Receiver<Result<WalkEntry>> {
        let (tx, rx) = mpsc::channel(self.entries.len().max(1));
        for entry in &self.entries {
            tx.try_send(Ok(entry.clone())).expect("walk channel sized to fit");
        }
        rx
    }

    async fn open(&self, path: &str) -> io::Result<FileReader> {
        match self.contents.get(path) {
            Some(content) => Ok(Box::new(io::Cursor::new(content.clone()))),
            None => Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied")),
        }
    }
}
