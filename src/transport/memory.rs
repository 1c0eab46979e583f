//! In-process packet transport backed by tokio channels.
//!
//! Used to embed a sender next to its consumer in one process, and by the
//! session tests to play the peer.

use std::io;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::streaming::protocol::Packet;
use crate::transport::{PacketSink, PacketSource};

pub struct MemorySource {
    rx: mpsc::Receiver<Packet>,
}

pub struct MemorySink {
    tx: mpsc::Sender<Packet>,
}

/// The far end of a memory transport.
pub struct Peer {
    tx: Option<mpsc::Sender<Packet>>,
    rx: mpsc::Receiver<Packet>,
}

/// Create a connected transport. `capacity` bounds packets in flight per
/// direction.
pub fn pair(capacity: usize) -> (MemorySource, MemorySink, Peer) {
    let (to_sender, from_peer) = mpsc::channel(capacity);
    let (to_peer, from_sender) = mpsc::channel(capacity);
    (
        MemorySource { rx: from_peer },
        MemorySink { tx: to_peer },
        Peer {
            tx: Some(to_sender),
            rx: from_sender,
        },
    )
}

#[async_trait]
impl PacketSource for MemorySource {
    async fn recv_packet(&mut self) -> Result<Packet> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed stream").into())
    }
}

#[async_trait]
impl PacketSink for MemorySink {
    async fn send_packet(&mut self, packet: Packet) -> Result<()> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed stream").into())
    }
}

impl Peer {
    /// Send a packet to the sender. Fails once the sender has gone away or
    /// after [`Peer::close`].
    pub async fn send(&self, packet: Packet) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "peer side closed"))?;
        tx.send(packet)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "sender closed stream").into())
    }

    /// Next packet from the sender, `None` once its sink is dropped.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }

    /// Close the peer's outbound direction; the sender sees end of stream.
    pub fn close(&mut self) {
        self.tx = None;
    }
}
