//! Retrieve Worker
//!
//! One worker per peer under catch-up. The worker owns a dedicated TCP
//! connection for the run's lifetime and drives a linear state machine
//! on its own OS thread — every I/O call blocks, nothing suspends:
//!
//! | From | Event | To | Action |
//! |------|-------|----|--------|
//! | init | start | greeting | open connection, mask SIGPIPE, flow-ctrl notify |
//! | greeting | greeting acked | file | `sstatus = file`, `sversion = 0` |
//! | file | all files offered | wal | bump `sversion` 0 → 1 if nothing shipped |
//! | wal | tail drained to target | done | `sstatus = cache`, write end sentinel |
//! | any | error | failed | drop connection, ask supervisor to restart |
//!
//! Both exits share one epilogue: a run that saw the file set move bumps
//! the retry counter (the supervisor backs off on it); a clean run
//! resets it and tells flow control the peer is no longer behind.
//!
//! There is no cooperative cancellation. The supervisor cancels by
//! closing the socket from outside; the blocked syscall errors, the
//! worker falls through the failure path and exits, releasing its peer
//! reference.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Submodules
// ------------------------------------------------------------------------------------------------

mod files;
mod wal_tail;
mod watcher;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, bounded};
use thiserror::Error;
use tracing::{error, info};

use crate::conn::{self, ConnError, FramedConn};
use crate::oracle::{OracleError, VersionOracle};
use crate::peer::{Peer, SyncStatus};
use crate::wal::{WalError, WalHead};
use crate::wire::{GREETING_RSP_LEN, Greeting, WireError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Everything that can end a retrieve run early. Nothing here is retried
/// in place — the run aborts and the supervisor decides about a restart.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// Socket I/O failed or a transfer came up short.
    #[error("connection error: {0}")]
    Conn(#[from] ConnError),

    /// A frame could not be encoded or decoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// A WAL record could not be read (oversized or checksum-failed).
    #[error("wal error: {0}")]
    Wal(#[from] WalError),

    /// The oracle reported `Busy` or failed outright.
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// The committed file set moved while streaming; the whole exchange
    /// is invalid and must restart.
    #[error("data files changed during retrieve")]
    FilesChanged,

    /// Local file I/O failed (open, stat, seek, read).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// SyncNode / SyncSupervisor
// ------------------------------------------------------------------------------------------------

/// Per-vnode context a retrieve worker runs against.
pub struct SyncNode {
    /// Replication group id.
    pub vg_id: u32,

    /// Vnode root directory; every wire-relative file and WAL name
    /// resolves under it.
    pub root: PathBuf,

    /// Leader identity carried in the greeting.
    pub fqdn: String,

    /// Leader sync port carried in the greeting.
    pub port: u16,

    /// Version facts about this vnode.
    pub oracle: Arc<dyn VersionOracle>,

    /// Owner of restart and flow-control policy.
    pub supervisor: Arc<dyn SyncSupervisor>,
}

/// Callbacks a retrieve worker makes into its supervisor.
pub trait SyncSupervisor: Send + Sync {
    /// A run failed after its connection was established. The supervisor
    /// owns the retry policy, typically backing off on
    /// [`Peer::num_of_retrieves`].
    fn restart_connection(&self, peer: &Arc<Peer>);

    /// Flow-control hint: nonzero while the peer keeps observing file
    /// mutations mid-run, zero once a run completes cleanly.
    fn notify_flow_ctrl(&self, _vg_id: u32, _retries: u32) {}
}

// ------------------------------------------------------------------------------------------------
// RetrieveHandle / spawn
// ------------------------------------------------------------------------------------------------

/// Handle to a spawned retrieve worker.
pub struct RetrieveHandle {
    outcome: Receiver<Result<(), RetrieveError>>,
    thread: JoinHandle<()>,
}

impl RetrieveHandle {
    /// Block until the run finishes and return its outcome.
    pub fn join(self) -> Result<(), RetrieveError> {
        let result = self.outcome.recv().unwrap_or_else(|_| {
            Err(RetrieveError::Io(std::io::Error::other(
                "retrieve worker exited without reporting",
            )))
        });
        let _ = self.thread.join();
        result
    }
}

/// Spawn the retrieve worker for one peer: a named OS thread running one
/// full catch-up attempt. The handle's channel carries the outcome; the
/// peer reference is released when the thread exits.
pub fn spawn(node: Arc<SyncNode>, peer: Arc<Peer>) -> std::io::Result<RetrieveHandle> {
    let (tx, rx) = bounded(1);
    let thread = thread::Builder::new()
        .name(format!("retrieve-{}", peer.vg_id))
        .spawn(move || {
            let result = run(&node, &peer);
            let _ = tx.send(result);
        })?;
    Ok(RetrieveHandle {
        outcome: rx,
        thread,
    })
}

// ------------------------------------------------------------------------------------------------
// Run
// ------------------------------------------------------------------------------------------------

/// One full retrieve attempt, including the exit epilogue. Runs on the
/// caller's thread; [`spawn`] is the usual entry point.
pub fn run(node: &SyncNode, peer: &Arc<Peer>) -> Result<(), RetrieveError> {
    conn::block_sigpipe();
    node.supervisor
        .notify_flow_ctrl(node.vg_id, peer.num_of_retrieves());

    let result = match FramedConn::connect(peer.addr) {
        Ok(mut conn) => {
            info!(peer = %peer.id, "sync tcp is set up");
            let result = run_once(node, peer, &mut conn);
            match &result {
                Ok(()) => info!(peer = %peer.id, "sync retrieve finished"),
                Err(e) => {
                    error!(peer = %peer.id, error = %e, "failed to retrieve data, restart connection");
                    node.supervisor.restart_connection(peer);
                }
            }
            result
        }
        Err(e) => {
            error!(peer = %peer.id, error = %e, "failed to open sync socket");
            Err(e.into())
        }
    };

    if peer.file_changed() {
        peer.bump_retrieves();
    } else {
        peer.reset_retrieves();
        node.supervisor.notify_flow_ctrl(node.vg_id, 0);
    }
    peer.set_file_changed(false);

    result
}

/// The state machine proper: greeting, file phase, WAL phase, sentinel.
fn run_once(node: &SyncNode, peer: &Peer, conn: &mut FramedConn) -> Result<(), RetrieveError> {
    info!(peer = %peer.id, status = peer.sstatus().as_str(), "start to retrieve");
    greeting(node, conn)?;

    peer.set_sversion(0);
    peer.advance_sstatus(SyncStatus::File);
    files::run(node, peer, conn)?;

    // If no file was shipped there must be wal to ship, and the wal phase
    // needs a nonzero floor to tell "nothing sent" from "target reached".
    if peer.sversion() == 0 {
        peer.set_sversion(1);
    }

    info!(peer = %peer.id, "start to retrieve wals");
    wal_tail::run(node, peer, conn)?;

    // Covers the no-wal path; a no-op when the tail already flipped it.
    peer.advance_sstatus(SyncStatus::Cache);
    info!(peer = %peer.id, "wal retrieve is finished");

    conn.write_exact(&WalHead::SENTINEL.encode())?;
    Ok(())
}

/// Exchange the opening frames; the response is opaque to the leader.
fn greeting(node: &SyncNode, conn: &mut FramedConn) -> Result<(), RetrieveError> {
    let pkt = Greeting::new(node.vg_id, node.fqdn.clone(), node.port);
    conn.write_exact(&pkt.encode()?)?;

    let mut rsp = [0u8; GREETING_RSP_LEN];
    conn.read_exact(&mut rsp)?;
    Ok(())
}
