//! Mutation probes over the version oracle.
//!
//! Each probe is a (snapshot, compare) pair against the peer's last
//! observed versions. File-set movement invalidates file-phase work and
//! aborts the run; WAL movement during tailing is expected and drives
//! another pass. An oracle answering `Busy` counts as movement for both.

use tracing::debug;

use super::SyncNode;
use crate::oracle::OracleError;
use crate::peer::Peer;

/// Snapshot `wver` into the peer. `Busy` propagates; the caller aborts.
pub(super) fn wal_version(node: &SyncNode, peer: &Peer) -> Result<(), OracleError> {
    match node.oracle.versions(node.vg_id) {
        Ok(v) => {
            peer.set_last_wver(v.wver);
            Ok(())
        }
        Err(e) => {
            debug!(peer = %peer.id, last_wver = peer.last_wver(), "vnode is committing while retrieve");
            Err(e)
        }
    }
}

/// Has the live WAL advanced since the last [`wal_version`] snapshot?
/// Does not touch the peer's `file_changed` flag.
pub(super) fn wal_modified(node: &SyncNode, peer: &Peer) -> bool {
    match node.oracle.versions(node.vg_id) {
        Err(_) => {
            debug!(peer = %peer.id, last_wver = peer.last_wver(), "vnode is committing while retrieve");
            true
        }
        Ok(v) if v.wver != peer.last_wver() => {
            debug!(peer = %peer.id, wver = v.wver, last = peer.last_wver(), "wal is modified while retrieve");
            true
        }
        Ok(_) => false,
    }
}

/// Snapshot `fver` into the peer. `Busy` propagates; the caller aborts.
pub(super) fn file_version(node: &SyncNode, peer: &Peer) -> Result<(), OracleError> {
    match node.oracle.versions(node.vg_id) {
        Ok(v) => {
            peer.set_last_fver(v.fver);
            Ok(())
        }
        Err(e) => {
            debug!(peer = %peer.id, last_fver = peer.last_fver(), "vnode is committing while retrieve");
            Err(e)
        }
    }
}

/// Has the committed file set changed since the last [`file_version`]
/// snapshot? Records the answer in the peer's `file_changed` flag so the
/// exit path can tell a productive retry from an idle one.
pub(super) fn files_modified(node: &SyncNode, peer: &Peer) -> bool {
    match node.oracle.versions(node.vg_id) {
        Err(_) => {
            peer.set_file_changed(true);
            debug!(peer = %peer.id, last_fver = peer.last_fver(), "vnode is committing while retrieve");
            true
        }
        Ok(v) if v.fver != peer.last_fver() => {
            peer.set_file_changed(true);
            debug!(peer = %peer.id, fver = v.fver, last = peer.last_fver(), "files are modified while retrieve");
            true
        }
        Ok(_) => {
            peer.set_file_changed(false);
            false
        }
    }
}
