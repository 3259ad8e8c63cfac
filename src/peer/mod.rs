//! Peer Session State
//!
//! One [`Peer`] per follower, shared via `Arc` between the supervisor
//! (which spawns and restarts retrieve runs), the retrieve worker (which
//! writes progress), and the live-forwarding path (which branches on
//! [`Peer::sstatus`]).
//!
//! Every mutable field is an independent atomic: the worker publishes
//! with release stores, observers read with acquire loads, and no
//! invariant spans two fields — the forwarding path only ever asks *"has
//! this peer reached [`SyncStatus::Cache`]?"*.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use tracing::info;

// ------------------------------------------------------------------------------------------------
// SyncStatus
// ------------------------------------------------------------------------------------------------

/// A peer's catch-up phase, as observed by the live-forwarding path.
///
/// Transitions only move forward: `Init → File → Cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SyncStatus {
    /// No retrieve run has made progress yet.
    Init = 0,

    /// Data files and WAL are being transferred.
    File = 1,

    /// The peer may receive live forwarded writes; the retrieve stream
    /// is finishing its final tail passes.
    Cache = 2,
}

impl SyncStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SyncStatus::Init,
            1 => SyncStatus::File,
            _ => SyncStatus::Cache,
        }
    }

    /// Short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Init => "init",
            SyncStatus::File => "file",
            SyncStatus::Cache => "cache",
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Peer
// ------------------------------------------------------------------------------------------------

/// Shared session state for one follower.
#[derive(Debug)]
pub struct Peer {
    /// Opaque identifier used as the log key.
    pub id: String,

    /// Replication group this peer belongs to.
    pub vg_id: u32,

    /// The peer's sync endpoint.
    pub addr: SocketAddr,

    /// Last record version successfully shipped this run.
    sversion: AtomicU64,

    /// Catch-up phase; see [`SyncStatus`].
    sstatus: AtomicU8,

    /// `fver` snapshot for file-mutation detection.
    last_fver: AtomicU64,

    /// `wver` snapshot for WAL-mutation detection.
    last_wver: AtomicU64,

    /// Whether the last mutation probe saw the file set move.
    file_changed: AtomicBool,

    /// Consecutive restarts caused by file mutations; consumed by
    /// external flow control for backoff.
    num_of_retrieves: AtomicU32,
}

impl Peer {
    /// A fresh peer session in [`SyncStatus::Init`].
    pub fn new(id: impl Into<String>, vg_id: u32, addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            vg_id,
            addr,
            sversion: AtomicU64::new(0),
            sstatus: AtomicU8::new(SyncStatus::Init as u8),
            last_fver: AtomicU64::new(0),
            last_wver: AtomicU64::new(0),
            file_changed: AtomicBool::new(false),
            num_of_retrieves: AtomicU32::new(0),
        }
    }

    /// Last record version shipped to this peer in the current run.
    pub fn sversion(&self) -> u64 {
        self.sversion.load(Ordering::Acquire)
    }

    pub(crate) fn set_sversion(&self, version: u64) {
        self.sversion.store(version, Ordering::Release);
    }

    /// Current catch-up phase.
    pub fn sstatus(&self) -> SyncStatus {
        SyncStatus::from_u8(self.sstatus.load(Ordering::Acquire))
    }

    /// Advance the catch-up phase; a phase never regresses, so storing
    /// an earlier status is a no-op.
    pub(crate) fn advance_sstatus(&self, status: SyncStatus) {
        let prev = self.sstatus.fetch_max(status as u8, Ordering::AcqRel);
        if prev < status as u8 {
            info!(peer = %self.id, status = status.as_str(), "sync status advanced");
        }
    }

    pub(crate) fn last_fver(&self) -> u64 {
        self.last_fver.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_fver(&self, fver: u64) {
        self.last_fver.store(fver, Ordering::Release);
    }

    pub(crate) fn last_wver(&self) -> u64 {
        self.last_wver.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_wver(&self, wver: u64) {
        self.last_wver.store(wver, Ordering::Release);
    }

    /// Whether the run observed the committed file set move under it.
    pub fn file_changed(&self) -> bool {
        self.file_changed.load(Ordering::Acquire)
    }

    pub(crate) fn set_file_changed(&self, changed: bool) {
        self.file_changed.store(changed, Ordering::Release);
    }

    /// Consecutive mutation-caused restarts, for supervisor backoff.
    pub fn num_of_retrieves(&self) -> u32 {
        self.num_of_retrieves.load(Ordering::Acquire)
    }

    pub(crate) fn bump_retrieves(&self) {
        self.num_of_retrieves.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn reset_retrieves(&self) {
        self.num_of_retrieves.store(0, Ordering::Release);
    }
}
