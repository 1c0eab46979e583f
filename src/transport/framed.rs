//! Framed packet transport over any async byte stream.

use std::io;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::streaming::protocol::{read_frame, Packet, PacketType};
use crate::transport::{PacketSink, PacketSource};

pub struct FramedSource<R> {
    reader: R,
}

impl<R> FramedSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send + 'static> PacketSource for FramedSource<R> {
    async fn recv_packet(&mut self) -> Result<Packet> {
        loop {
            let frame = read_frame(&mut self.reader).await?;
            match PacketType::from_u8(frame.type_code) {
                Some(kind) => return Packet::decode(kind, frame.payload),
                None => {
                    tracing::debug!(
                        type_code = frame.type_code,
                        len = frame.payload.len(),
                        "skipping frame with unknown packet type"
                    );
                }
            }
        }
    }
}

pub struct FramedSink<W> {
    writer: W,
    /// Unwritten tail of the current frame
    pending: Bytes,
}

impl<W> FramedSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pending: Bytes::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + Unpin> FramedSink<W> {
    async fn write_pending(&mut self) -> Result<()> {
        while self.pending.has_remaining() {
            // write_buf advances `pending` only by what reached the writer
            if self.writer.write_buf(&mut self.pending).await? == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> PacketSink for FramedSink<W> {
    async fn send_packet(&mut self, packet: Packet) -> Result<()> {
        // A cancelled send may have left a frame half-written; finish it first
        self.write_pending().await?;
        self.pending = packet.encode();
        self.write_pending().await?;
        self.writer.flush().await?;
        Ok(())
    }
}
