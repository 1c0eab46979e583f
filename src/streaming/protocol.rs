//! Packet model and wire framing for the sync stream.
//!
//! Wire format: all multi-byte integers are big-endian.
//! Strings are length-prefixed (u16 len + UTF-8).
//! Frame format: len:u32 | type:u8 | payload
//!
//! Every packet shares one payload layout:
//! id:u32 | data_len:u32 | data | has_stat:u8 | [stat]

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, SyncError};

/// Maximum frame payload (64MB) - prevents OOM from malicious/corrupted frames
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// File type mask of a POSIX `st_mode`
pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

// =============================================================================
// Packet Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Stat = 0,
    Req = 1,
    Data = 2,
    Fin = 3,
    Err = 4,
}

impl PacketType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Stat),
            1 => Some(Self::Req),
            2 => Some(Self::Data),
            3 => Some(Self::Fin),
            4 => Some(Self::Err),
            _ => None,
        }
    }
}

// =============================================================================
// Stat
// =============================================================================

/// OS-level metadata for one walked entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    /// Path relative to the sync root, `/`-separated
    pub path: String,
    /// POSIX `st_mode`, file type bits included
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub mod_time: i64,
    /// Symlink target, or the first walked path of a hardlinked inode;
    /// empty for everything else
    pub linkname: String,
    pub devmajor: u64,
    pub devminor: u64,
    pub xattrs: BTreeMap<String, Bytes>,
}

impl Stat {
    pub fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }

    /// Regular files are the only entries whose content can be requested.
    pub fn is_regular(&self) -> bool {
        self.file_type() == S_IFREG
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == S_IFLNK
    }

    fn encoded_len(&self) -> usize {
        let xattrs: usize = self
            .xattrs
            .iter()
            .map(|(name, value)| 2 + name.len() + 4 + value.len())
            .sum();
        2 + self.path.len() + 4 + 4 + 4 + 8 + 8 + 2 + self.linkname.len() + 8 + 8 + 2 + xattrs
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        put_str(buf, &self.path);
        buf.put_u32(self.mode);
        buf.put_u32(self.uid);
        buf.put_u32(self.gid);
        buf.put_u64(self.size);
        buf.put_i64(self.mod_time);
        put_str(buf, &self.linkname);
        buf.put_u64(self.devmajor);
        buf.put_u64(self.devminor);
        buf.put_u16(self.xattrs.len() as u16);
        for (name, value) in &self.xattrs {
            put_str(buf, name);
            buf.put_u32(value.len() as u32);
            buf.put_slice(value);
        }
    }

    fn decode_from(payload: &mut Bytes) -> Result<Self> {
        let path = get_str(payload, "stat path")?;
        need(payload, 28, "stat fields")?;
        let mode = payload.get_u32();
        let uid = payload.get_u32();
        let gid = payload.get_u32();
        let size = payload.get_u64();
        let mod_time = payload.get_i64();
        let linkname = get_str(payload, "stat linkname")?;
        need(payload, 18, "stat device numbers")?;
        let devmajor = payload.get_u64();
        let devminor = payload.get_u64();
        let count = payload.get_u16();

        let mut xattrs = BTreeMap::new();
        for _ in 0..count {
            let name = get_str(payload, "xattr name")?;
            need(payload, 4, "xattr value length")?;
            let len = payload.get_u32() as usize;
            need(payload, len, "xattr value")?;
            xattrs.insert(name, payload.copy_to_bytes(len));
        }

        Ok(Self {
            path,
            mode,
            uid,
            gid,
            size,
            mod_time,
            linkname,
            devmajor,
            devminor,
            xattrs,
        })
    }
}

// =============================================================================
// Packet
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    /// Entry identifier; meaningful for STAT, REQ and DATA
    pub id: u32,
    /// DATA content or ERR message
    pub data: Bytes,
    /// Present on STAT packets that describe a real entry
    pub stat: Option<Stat>,
}

impl Packet {
    fn new(kind: PacketType, id: u32) -> Self {
        Self {
            kind,
            id,
            data: Bytes::new(),
            stat: None,
        }
    }

    pub fn stat(id: u32, stat: Stat) -> Self {
        Self {
            stat: Some(stat),
            ..Self::new(PacketType::Stat, id)
        }
    }

    /// STAT without metadata: no more entries follow.
    pub fn end_of_stats() -> Self {
        Self::new(PacketType::Stat, 0)
    }

    pub fn data(id: u32, data: Bytes) -> Self {
        Self {
            data,
            ..Self::new(PacketType::Data, id)
        }
    }

    /// Empty DATA: all content for `id` has been sent.
    pub fn data_end(id: u32) -> Self {
        Self::new(PacketType::Data, id)
    }

    pub fn req(id: u32) -> Self {
        Self::new(PacketType::Req, id)
    }

    pub fn fin() -> Self {
        Self::new(PacketType::Fin, 0)
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(message.into()),
            ..Self::new(PacketType::Err, 0)
        }
    }

    pub fn is_end_of_stats(&self) -> bool {
        self.kind == PacketType::Stat && self.stat.is_none()
    }

    /// ERR payload as text.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Encode as a complete frame, header included.
    pub fn encode(&self) -> Bytes {
        let stat_len = self.stat.as_ref().map_or(0, Stat::encoded_len);
        let payload_len = 4 + 4 + self.data.len() + 1 + stat_len;

        let mut buf = BytesMut::with_capacity(5 + payload_len);
        buf.put_u32(payload_len as u32);
        buf.put_u8(self.kind as u8);
        buf.put_u32(self.id);
        buf.put_u32(self.data.len() as u32);
        buf.put_slice(&self.data);
        match &self.stat {
            Some(stat) => {
                buf.put_u8(1);
                stat.encode_into(&mut buf);
            }
            None => buf.put_u8(0),
        }

        buf.freeze()
    }

    pub fn decode(kind: PacketType, mut payload: Bytes) -> Result<Self> {
        need(&payload, 8, "packet header")?;
        let id = payload.get_u32();
        let data_len = payload.get_u32() as usize;
        need(&payload, data_len + 1, "packet data")?;
        let data = payload.copy_to_bytes(data_len);
        let stat = match payload.get_u8() {
            0 => None,
            _ => Some(Stat::decode_from(&mut payload)?),
        };

        Ok(Self {
            kind,
            id,
            data,
            stat,
        })
    }
}

// =============================================================================
// Frame reading/writing
// =============================================================================

/// One frame off the wire, type code not yet interpreted.
#[derive(Debug)]
pub struct Frame {
    pub type_code: u8,
    pub payload: Bytes,
}

/// Read a single frame from the stream.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Frame> {
    let len = r.read_u32().await?;

    // Validate frame size before allocation
    if len > MAX_FRAME_SIZE {
        return Err(SyncError::InvalidFrame(format!(
            "frame size {} exceeds maximum allowed size {}",
            len, MAX_FRAME_SIZE
        )));
    }

    let type_code = r.read_u8().await?;

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await?;

    Ok(Frame {
        type_code,
        payload: Bytes::from(payload),
    })
}

fn need(payload: &Bytes, n: usize, what: &str) -> Result<()> {
    if payload.remaining() < n {
        return Err(SyncError::InvalidFrame(format!(
            "{} truncated: expected {} bytes, got {}",
            what,
            n,
            payload.remaining()
        )));
    }
    Ok(())
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_str(payload: &mut Bytes, what: &str) -> Result<String> {
    need(payload, 2, what)?;
    let len = payload.get_u16() as usize;
    need(payload, len, what)?;
    String::from_utf8(payload.copy_to_bytes(len).to_vec())
        .map_err(|_| SyncError::InvalidFrame(format!("invalid UTF-8 in {}", what)))
}

// =============================================================================
// Tests
// =============================================================================
