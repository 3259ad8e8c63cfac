//! File-phase streaming.
//!
//! Offers the committed data files one by one, each offer answered by a
//! per-file ack: the peer either wants the bytes or already holds an
//! identical copy. After every shipped file the committed set is probed
//! for movement; any movement aborts the run.

use std::fs::File;

use tracing::{debug, error};

use super::{RetrieveError, SyncNode, watcher};
use crate::conn::FramedConn;
use crate::peer::Peer;
use crate::wire::FileAck;

pub(super) fn run(node: &SyncNode, peer: &Peer, conn: &mut FramedConn) -> Result<(), RetrieveError> {
    watcher::file_version(node, peer)?;

    let mut index: u32 = 0;
    loop {
        let info = node.oracle.file_info(node.vg_id, index)?;
        conn.write_exact(&info.encode()?)?;

        if info.is_end() {
            debug!(peer = %peer.id, "no more files to sync");
            return Ok(());
        }
        debug!(peer = %peer.id, file = %info.name, size = info.size, "file info sent");

        let mut ack_buf = [0u8; FileAck::WIRE_SIZE];
        conn.read_exact(&mut ack_buf)?;
        let ack = FileAck::decode(&ack_buf);

        // The peer now holds everything up to this file's version either
        // way: it acked the copy it has, or is about to receive ours.
        peer.set_sversion(info.fversion);

        if !ack.sync {
            debug!(peer = %peer.id, file = %info.name, "peer already has this file");
            index += 1;
            continue;
        }

        let path = node.root.join(&info.name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                error!(peer = %peer.id, file = %info.name, error = %e, "failed to open data file");
                return Err(e.into());
            }
        };

        conn.send_file_range(&file, info.size as u64)?;
        debug!(peer = %peer.id, file = %info.name, size = info.size, "file sent");
        index += 1;

        if watcher::files_modified(node, peer) {
            return Err(RetrieveError::FilesChanged);
        }
    }
}
