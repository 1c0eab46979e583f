//! Packet transport seams.
//!
//! The session only sees [`PacketSource`] and [`PacketSink`]; framing and the
//! byte stream underneath belong to the implementations.

pub mod framed;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SyncError};
use crate::streaming::protocol::Packet;

pub use framed::{FramedSink, FramedSource};

/// Inbound half of a packet stream.
#[async_trait]
pub trait PacketSource: Send + 'static {
    async fn recv_packet(&mut self) -> Result<Packet>;
}

/// Outbound half of a packet stream.
///
/// `send_packet` must be cancel safe at packet granularity: if the future is
/// dropped midway, the partially sent packet is completed by the next call
/// instead of leaving a torn frame behind.
#[async_trait]
pub trait PacketSink: Send + 'static {
    async fn send_packet(&mut self, packet: Packet) -> Result<()>;
}

/// Cloneable sink that writes one whole packet at a time.
///
/// The walk task and every transfer worker hold a clone; the mutex is held for
/// the full packet write so frames never interleave on the wire.
pub struct SharedSink<S> {
    inner: Arc<Mutex<S>>,
}

impl<S: PacketSink> SharedSink<S> {
    pub fn new(sink: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }

    pub async fn send(&self, packet: Packet) -> Result<()> {
        let mut sink = self.inner.lock().await;
        sink.send_packet(packet).await
    }

    /// Send unless `cancel` fires first, whether waiting for the lock or for
    /// the write itself.
    pub async fn send_cancellable(&self, packet: Packet, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            sent = self.send(packet) => sent,
        }
    }
}

impl<S> Clone for SharedSink<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::protocol::PacketType;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_shared_sink_keeps_packets_whole() {
        let (_source, sink, mut peer) = memory::pair(1024);
        let shared = SharedSink::new(sink);

        let mut handles = Vec::new();
        for id in 0..8u32 {
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..16u8 {
                    shared
                        .send(Packet::data(id, Bytes::from(vec![n; 32])))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut last = vec![None::<u8>; 8];
        for _ in 0..8 * 16 {
            let packet = peer.recv().await.unwrap();
            assert_eq!(packet.kind, PacketType::Data);
            let n = packet.data[0];
            assert!(packet.data.iter().all(|b| *b == n));
            // Per-id order is the order each task sent in
            let slot = &mut last[packet.id as usize];
            assert!(slot.map_or(true, |prev| prev < n));
            *slot = Some(n);
        }
    }
}
