//! Sender side of the streaming sync protocol.
//!
//! Walk-and-announce plus request-driven content streaming.
//!
//! # Protocol
//!
//! ```text
//! sender                               peer
//!   STAT(id, stat)*  ------------------>
//!   STAT(empty)      ------------------>   end of metadata
//!                    <------------------   REQ(id)*
//!   DATA(id, chunk)* ------------------>   per requested file,
//!   DATA(id, empty)  ------------------>   files interleaved
//!                    <------------------   FIN
//!   FIN              ------------------>
//! ```
//!
//! Either side may send ERR at any point; the receiving side treats it as
//! fatal.

pub mod buffer;
pub mod channel;
mod generator;
pub mod pending;
pub mod protocol;
mod sender;
pub mod session;

pub use buffer::{BufferPool, PooledBuffer, DEFAULT_BUFFER_SIZE};
pub use channel::{SessionStats, TransferJob, DATA_CHUNK_SIZE, JOB_QUEUE_SIZE, WORKER_COUNT};
pub use pending::PendingFiles;
pub use protocol::{read_frame, Frame, Packet, PacketType, Stat, MAX_FRAME_SIZE};
pub use session::Session;
