//! Sync Wire Frames
//!
//! Fixed-layout frames exchanged on the retrieve connection. Every frame
//! is hand-encoded into a byte-stable, **packed little-endian** layout —
//! no serialization library, no struct padding, so the on-wire
//! representation never changes underneath a dependency upgrade.
//!
//! # Wire layouts
//!
//! | Frame | Layout | Size |
//! |-------|--------|------|
//! | [`SyncHead`]  | `msg_type(1) vg_id(4)`                               | 5 |
//! | [`Greeting`]  | `head(5) fqdn(128, NUL padded) port(2)`              | 135 |
//! | greeting rsp  | opaque bytes, contents unused by the leader          | 8 |
//! | [`FileInfo`]  | `name(128, NUL padded) index(4) size(8) fversion(8) magic(4)` | 152 |
//! | [`FileAck`]   | `sync(1) reserved(3)`                                | 4 |
//!
//! WAL records travel with the same head they carry on disk; see
//! [`crate::wal::WalHead`].
//!
//! # Byte order
//!
//! All multi-byte integers are little-endian on the wire. Leader and
//! follower are assumed to be builds of the same product; there is no
//! network-order conversion step.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use thiserror::Error;

/// Bytes reserved for the leader FQDN in a [`Greeting`], NUL padding
/// included. The usable name length is one less.
pub const FQDN_LEN: usize = 128;

/// Bytes reserved for a data-file name in a [`FileInfo`], NUL padding
/// included. The usable name length is one less.
pub const FILENAME_LEN: usize = 128;

/// Size of the opaque greeting response the follower sends back.
pub const GREETING_RSP_LEN: usize = 8;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors produced while encoding or decoding sync frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// A name field does not fit its fixed-size, NUL-padded slot.
    #[error("name too long: {len} bytes (limit {limit})")]
    NameTooLong {
        /// Actual byte length of the name.
        len: usize,
        /// Maximum usable bytes for this slot.
        limit: usize,
    },

    /// A decoded name field was not valid UTF-8.
    #[error("name is not valid UTF-8")]
    InvalidName(#[from] std::str::Utf8Error),

    /// The message-type byte of a [`SyncHead`] was not recognised.
    #[error("unknown sync message type: {0}")]
    UnknownMsgType(u8),
}

// ------------------------------------------------------------------------------------------------
// Name field helpers
// ------------------------------------------------------------------------------------------------

/// Copy `name` into a fixed NUL-padded slot. `dst` must already be zeroed.
fn put_name(dst: &mut [u8], name: &str) -> Result<(), WireError> {
    if name.len() >= dst.len() {
        return Err(WireError::NameTooLong {
            len: name.len(),
            limit: dst.len() - 1,
        });
    }
    dst[..name.len()].copy_from_slice(name.as_bytes());
    Ok(())
}

/// Read a name back out of a fixed NUL-padded slot.
fn take_name(src: &[u8]) -> Result<String, WireError> {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    Ok(std::str::from_utf8(&src[..end])?.to_string())
}

// ------------------------------------------------------------------------------------------------
// SyncHead
// ------------------------------------------------------------------------------------------------

/// Message discriminator carried at the front of a [`Greeting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncMsgType {
    /// Leader-initiated bulk catch-up stream.
    SyncData = 3,
}

impl TryFrom<u8> for SyncMsgType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            3 => Ok(SyncMsgType::SyncData),
            other => Err(WireError::UnknownMsgType(other)),
        }
    }
}

/// Common prefix of connection-opening frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncHead {
    /// What kind of sync exchange this connection carries.
    pub msg_type: SyncMsgType,

    /// Replication group this exchange belongs to.
    pub vg_id: u32,
}

impl SyncHead {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 1 + 4;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[0] = self.msg_type as u8;
        buf[1..5].copy_from_slice(&self.vg_id.to_le_bytes());
    }

    fn decode_from(buf: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            msg_type: SyncMsgType::try_from(buf[0])?,
            vg_id: u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Greeting
// ------------------------------------------------------------------------------------------------

/// First frame on every retrieve connection: identifies the leader and
/// the replication group. The follower answers with [`GREETING_RSP_LEN`]
/// opaque bytes the leader reads and discards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    /// Always [`SyncMsgType::SyncData`] plus the group id.
    pub head: SyncHead,

    /// The leader's FQDN, so the follower can verify who is pushing.
    pub fqdn: String,

    /// The leader's sync port.
    pub port: u16,
}

impl Greeting {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = SyncHead::WIRE_SIZE + FQDN_LEN + 2;

    /// Build the greeting for one replication group.
    pub fn new(vg_id: u32, fqdn: impl Into<String>, port: u16) -> Self {
        Self {
            head: SyncHead {
                msg_type: SyncMsgType::SyncData,
                vg_id,
            },
            fqdn: fqdn.into(),
            port,
        }
    }

    /// Encode into the fixed wire layout.
    pub fn encode(&self) -> Result<[u8; Self::WIRE_SIZE], WireError> {
        let mut buf = [0u8; Self::WIRE_SIZE];
        self.head.encode_into(&mut buf[..SyncHead::WIRE_SIZE]);
        put_name(
            &mut buf[SyncHead::WIRE_SIZE..SyncHead::WIRE_SIZE + FQDN_LEN],
            &self.fqdn,
        )?;
        buf[SyncHead::WIRE_SIZE + FQDN_LEN..].copy_from_slice(&self.port.to_le_bytes());
        Ok(buf)
    }

    /// Decode from the fixed wire layout.
    pub fn decode(buf: &[u8; Self::WIRE_SIZE]) -> Result<Self, WireError> {
        let head = SyncHead::decode_from(&buf[..SyncHead::WIRE_SIZE])?;
        let fqdn = take_name(&buf[SyncHead::WIRE_SIZE..SyncHead::WIRE_SIZE + FQDN_LEN])?;
        let port = u16::from_le_bytes([
            buf[SyncHead::WIRE_SIZE + FQDN_LEN],
            buf[SyncHead::WIRE_SIZE + FQDN_LEN + 1],
        ]);
        Ok(Self { head, fqdn, port })
    }
}

// ------------------------------------------------------------------------------------------------
// FileInfo
// ------------------------------------------------------------------------------------------------

/// One committed data file offered to the peer during the file phase.
///
/// A frame with `magic == 0` or an empty name is the **end-of-files
/// sentinel**: no more files, the WAL phase follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Path relative to the vnode root. Empty = sentinel.
    pub name: String,

    /// 0-based cursor the leader advances file by file.
    pub index: u32,

    /// File size in bytes at the moment the oracle reported it. The
    /// transfer sends exactly this many bytes even if the file has since
    /// grown, to preserve framing.
    pub size: i64,

    /// Committed version this file belongs to.
    pub fversion: u64,

    /// Nonzero content fingerprint. Zero = sentinel.
    pub magic: u32,
}

impl FileInfo {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = FILENAME_LEN + 4 + 8 + 8 + 4;

    /// The end-of-files sentinel at the given cursor position.
    pub fn end_marker(index: u32) -> Self {
        Self {
            name: String::new(),
            index,
            size: 0,
            fversion: 0,
            magic: 0,
        }
    }

    /// True when this frame terminates the file phase.
    pub fn is_end(&self) -> bool {
        self.magic == 0 || self.name.is_empty()
    }

    /// Encode into the fixed wire layout.
    pub fn encode(&self) -> Result<[u8; Self::WIRE_SIZE], WireError> {
        let mut buf = [0u8; Self::WIRE_SIZE];
        put_name(&mut buf[..FILENAME_LEN], &self.name)?;
        let mut at = FILENAME_LEN;
        buf[at..at + 4].copy_from_slice(&self.index.to_le_bytes());
        at += 4;
        buf[at..at + 8].copy_from_slice(&self.size.to_le_bytes());
        at += 8;
        buf[at..at + 8].copy_from_slice(&self.fversion.to_le_bytes());
        at += 8;
        buf[at..at + 4].copy_from_slice(&self.magic.to_le_bytes());
        Ok(buf)
    }

    /// Decode from the fixed wire layout.
    pub fn decode(buf: &[u8; Self::WIRE_SIZE]) -> Result<Self, WireError> {
        let name = take_name(&buf[..FILENAME_LEN])?;
        let mut at = FILENAME_LEN;
        let index = u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        at += 4;
        let size = i64::from_le_bytes([
            buf[at],
            buf[at + 1],
            buf[at + 2],
            buf[at + 3],
            buf[at + 4],
            buf[at + 5],
            buf[at + 6],
            buf[at + 7],
        ]);
        at += 8;
        let fversion = u64::from_le_bytes([
            buf[at],
            buf[at + 1],
            buf[at + 2],
            buf[at + 3],
            buf[at + 4],
            buf[at + 5],
            buf[at + 6],
            buf[at + 7],
        ]);
        at += 8;
        let magic = u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        Ok(Self {
            name,
            index,
            size,
            fversion,
            magic,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// FileAck
// ------------------------------------------------------------------------------------------------

/// The follower's per-file answer: does it want the bytes, or does it
/// already hold an identical copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAck {
    /// `true` — send the file body. `false` — skip, the peer has it.
    pub sync: bool,
}

impl FileAck {
    /// Encoded size in bytes (one flag byte plus reserved padding).
    pub const WIRE_SIZE: usize = 4;

    /// Encode into the fixed wire layout.
    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0] = u8::from(self.sync);
        buf
    }

    /// Decode from the fixed wire layout. Any nonzero flag byte means
    /// "send the file".
    pub fn decode(buf: &[u8; Self::WIRE_SIZE]) -> Self {
        Self { sync: buf[0] != 0 }
    }
}
