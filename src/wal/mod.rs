//! Write-Ahead-Log Record Format
//!
//! The record format shared by the vnode's WAL segments and the retrieve
//! wire: a fixed [`WalHead`] followed by an opaque body. The layout is
//! identical on disk and on the wire, which is what lets the retrieve
//! path forward records verbatim and stream whole rotated segments as
//! opaque blobs the receiver re-frames itself.
//!
//! # On-disk layout
//!
//! ```text
//! [VERSION_LE(8)][LEN_LE(4)][CKSUM_LE(4)][BODY ...]
//! [VERSION_LE(8)][LEN_LE(4)][CKSUM_LE(4)][BODY ...]
//! ...
//! ```
//!
//! Segments are headerless record sequences named `wal-<seq>.log`; the
//! body checksum is CRC32 via [`crc32fast`]. An **all-zero head** never
//! appears inside a segment — on the wire it is the end-of-stream
//! sentinel that closes a retrieve run.
//!
//! # Tail reads
//!
//! The live segment is read while the vnode is appending to it.
//! [`read_tail_record`] therefore treats a truncated head or body as
//! *"not yet written"*, not as corruption: the caller keeps its own
//! offset, reopens, and retries once the writer has caught up. Only a
//! **complete** record with a failing checksum is an error.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Upper bound on a single record body (1 MiB). Bounds allocation when a
/// head is read out of a possibly-torn tail.
pub const MAX_RECORD_SIZE: u32 = 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL record I/O.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record body exceeds [`MAX_RECORD_SIZE`].
    #[error("record size {0} exceeds limit")]
    RecordTooLarge(usize),

    /// A complete record failed its body checksum.
    #[error("record checksum mismatch at version {0}")]
    ChecksumMismatch(u64),
}

// ------------------------------------------------------------------------------------------------
// WalHead
// ------------------------------------------------------------------------------------------------

/// Fixed prefix of every WAL record, on disk and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHead {
    /// Record version; strictly increasing within a segment sequence.
    pub version: u64,

    /// Body length in bytes.
    pub len: u32,

    /// CRC32 over the body.
    pub cksum: u32,
}

impl WalHead {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 8 + 4 + 4;

    /// The all-zero head that terminates a retrieve stream.
    pub const SENTINEL: WalHead = WalHead {
        version: 0,
        len: 0,
        cksum: 0,
    };

    /// True for the zeroed end-of-stream head.
    pub fn is_sentinel(&self) -> bool {
        self.version == 0 && self.len == 0
    }

    /// Encode into the fixed layout.
    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.cksum.to_le_bytes());
        buf
    }

    /// Decode from the fixed layout.
    pub fn decode(buf: &[u8; Self::WIRE_SIZE]) -> Self {
        Self {
            version: u64::from_le_bytes([
                buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
            ]),
            len: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            cksum: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }
}

/// One complete record read out of a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// The record's head, checksum already verified.
    pub head: WalHead,

    /// The opaque body.
    pub body: Vec<u8>,
}

impl WalRecord {
    /// Bytes this record occupies on disk and on the wire.
    pub fn frame_size(&self) -> u64 {
        (WalHead::WIRE_SIZE + self.body.len()) as u64
    }
}

// ------------------------------------------------------------------------------------------------
// Checksums / naming
// ------------------------------------------------------------------------------------------------

/// CRC32 of a record body, as stored in [`WalHead::cksum`].
pub fn body_cksum(body: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(body);
    hasher.finalize()
}

/// File name of the WAL segment with the given sequence number.
pub fn segment_file_name(seq: u64) -> String {
    format!("wal-{seq:06}.log")
}

// ------------------------------------------------------------------------------------------------
// Tail reader
// ------------------------------------------------------------------------------------------------

/// Read one record at the reader's current position.
///
/// Returns `Ok(None)` on clean end-of-data **or** on a partial head/body
/// — a record the writer has not finished appending. The caller reopens
/// at its tracked offset and retries later; nothing about the reader's
/// position is assumed after a partial read.
pub fn read_tail_record<R: Read>(reader: &mut R) -> Result<Option<WalRecord>, WalError> {
    let mut head_buf = [0u8; WalHead::WIRE_SIZE];
    if !read_exact_or_eof(reader, &mut head_buf)? {
        trace!("wal tail at end, or head mid-append");
        return Ok(None);
    }

    let head = WalHead::decode(&head_buf);
    if head.len > MAX_RECORD_SIZE {
        return Err(WalError::RecordTooLarge(head.len as usize));
    }

    let mut body = vec![0u8; head.len as usize];
    if !read_exact_or_eof(reader, &mut body)? {
        trace!(version = head.version, "partial wal body, will retry");
        return Ok(None);
    }

    if body_cksum(&body) != head.cksum {
        warn!(version = head.version, "wal record checksum mismatch");
        return Err(WalError::ChecksumMismatch(head.version));
    }

    Ok(Some(WalRecord { head, body }))
}

/// `read_exact` that reports end-of-input (including a partial fill) as
/// `Ok(false)` instead of an error.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, WalError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(WalError::Io(e)),
    }
}

// ------------------------------------------------------------------------------------------------
// Appender
// ------------------------------------------------------------------------------------------------

/// Sequential writer for one WAL segment.
///
/// The vnode's write path appends through this; the retrieve path only
/// ever reads. Appends are length-prefixed and checksummed but not
/// individually synced — callers decide when durability matters via
/// [`Appender::sync`].
#[derive(Debug)]
pub struct Appender {
    file: File,
    path: PathBuf,
}

impl Appender {
    /// Open (or create) a segment for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "wal segment opened for append");
        Ok(Self { file, path })
    }

    /// Append one record.
    pub fn append(&mut self, version: u64, body: &[u8]) -> Result<(), WalError> {
        if body.len() > MAX_RECORD_SIZE as usize {
            return Err(WalError::RecordTooLarge(body.len()));
        }
        let head = WalHead {
            version,
            len: body.len() as u32,
            cksum: body_cksum(body),
        };
        self.file.write_all(&head.encode())?;
        self.file.write_all(body)?;
        trace!(path = %self.path.display(), version, len = head.len, "wal record appended");
        Ok(())
    }

    /// Flush appended records to stable storage.
    pub fn sync(&self) -> Result<(), WalError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Current segment size in bytes.
    pub fn size(&self) -> Result<u64, WalError> {
        Ok(self.file.metadata()?.len())
    }

    /// Path of the underlying segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
