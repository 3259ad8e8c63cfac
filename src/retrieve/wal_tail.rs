//! WAL-phase streaming.
//!
//! Rotated segments are immutable, so they go over the wire whole — no
//! per-record framing, the receiver re-frames from record structure. The
//! live segment is different: the vnode keeps appending to it, so it is
//! *tailed* record-by-record with partial-record tolerance until the
//! peer has everything up to the handoff target.
//!
//! The handoff is the delicate part. The target version is latched
//! exactly once — the first time the WAL held still across the
//! preceding pass, or after at least one full pass — and at that same
//! instant the peer's status flips to cache, allowing live forwarding to
//! start. From then on every record `<= target` belongs to this stream
//! and every record `> target` belongs to forwarding, which together
//! cover the log with no gap and no overlap.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, trace};

use super::{RetrieveError, SyncNode, watcher};
use crate::conn::FramedConn;
use crate::peer::{Peer, SyncStatus};
use crate::wal;

/// Wait between tail passes when the WAL holds data the vnode has not
/// flushed to disk yet.
const TAIL_RETRY_DELAY: Duration = Duration::from_millis(10);

pub(super) fn run(node: &SyncNode, peer: &Peer, conn: &mut FramedConn) -> Result<(), RetrieveError> {
    let mut index: u64 = 0;
    loop {
        let Some(segment) = node.oracle.wal_info(node.vg_id, &mut index)? else {
            debug!(peer = %peer.id, "no wal file");
            return Ok(());
        };

        if segment.last {
            return tail_live(node, peer, conn, &segment.name);
        }

        // Rotated segments won't be modified; even removal mid-transfer
        // just surfaces as an I/O error and restarts the run.
        let path = node.root.join(&segment.name);
        let size = std::fs::metadata(&path)?.len();
        debug!(peer = %peer.id, segment = %segment.name, size, "retrieve rotated wal");

        let file = File::open(&path)?;
        conn.send_file_range(&file, size)?;

        if watcher::files_modified(node, peer) {
            return Err(RetrieveError::FilesChanged);
        }
    }
}

/// Tail the live segment until the peer holds every record up to the
/// latched target version.
fn tail_live(
    node: &SyncNode,
    peer: &Peer,
    conn: &mut FramedConn,
    wname: &str,
) -> Result<(), RetrieveError> {
    let fname = node.root.join(wname);
    let mut once = false;
    let mut offset: u64 = 0;
    let mut fversion: u64 = 0;

    debug!(peer = %peer.id, wal = %fname.display(), "start to retrieve live wal");

    loop {
        if watcher::files_modified(node, peer) {
            return Err(RetrieveError::FilesChanged);
        }
        watcher::wal_version(node, peer)?;

        let bytes = tail_once(peer, conn, &fname, fversion, offset)?;
        let wal_mod = watcher::wal_modified(node, peer);

        // Latch the target exactly once: the wal held still across the
        // preceding pass, or one pass has already completed. Flipping to
        // cache first means forwarding may start enqueueing newer writes
        // while the final passes drain everything up to the target.
        if (!wal_mod || once) && fversion == 0 {
            peer.advance_sstatus(SyncStatus::Cache);
            fversion = node.oracle.node_version();
            debug!(peer = %peer.id, fversion, "tail target latched");
        }

        if peer.sversion() >= fversion && fversion > 0 {
            debug!(peer = %peer.id, fversion, "wal read out up to target");
            return Ok(());
        }

        if bytes == 0 && !wal_mod {
            // Appended but not yet flushed; give the writer a moment.
            thread::sleep(TAIL_RETRY_DELAY);
        }

        once = true;
        offset += bytes;
        trace!(peer = %peer.id, bytes, offset, "continue live wal tail");
    }
}

/// One sweep over the live segment from `offset`: forward every complete
/// record, stop at the target version or at the (possibly torn) end.
/// Returns the bytes consumed so the caller can advance its offset.
fn tail_once(
    peer: &Peer,
    conn: &mut FramedConn,
    fname: &Path,
    fversion: u64,
    offset: u64,
) -> Result<u64, RetrieveError> {
    let mut file = match File::open(fname) {
        Ok(file) => file,
        Err(e) => {
            error!(peer = %peer.id, wal = %fname.display(), error = %e, "failed to open live wal");
            return Err(e.into());
        }
    };
    file.seek(SeekFrom::Start(offset))?;

    let mut bytes: u64 = 0;
    loop {
        let Some(record) = wal::read_tail_record(&mut file)? else {
            trace!(peer = %peer.id, bytes, "read to the end of wal");
            return Ok(bytes);
        };

        conn.write_exact(&record.head.encode())?;
        conn.write_exact(&record.body)?;
        peer.set_sversion(record.head.version);
        bytes += record.frame_size();
        trace!(peer = %peer.id, version = record.head.version, "live wal record forwarded");

        if record.head.version >= fversion && fversion > 0 {
            debug!(peer = %peer.id, fversion, "tail reached target version");
            return Ok(bytes);
        }
    }
}
