//! Version Oracle Contract
//!
//! The retrieve worker never inspects the vnode's storage directly — it
//! asks the surrounding vnode three questions through this trait: *what
//! is durable* ([`VersionOracle::versions`]), *which data file comes
//! next* ([`VersionOracle::file_info`]), and *which WAL segment comes
//! next* ([`VersionOracle::wal_info`]).
//!
//! The split matters for mutation detection: `fver` moves only when a
//! commit closes data files (invalidates file-phase work, restart), while
//! `wver` moves on every live append (expected during tailing, drives
//! continuation). While a commit is actually in flight the oracle
//! answers [`OracleError::Busy`] and the worker must treat the vnode's
//! state as unstable.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use thiserror::Error;

use crate::wire::FileInfo;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors an oracle probe can answer with.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The vnode is committing (flushing WAL into data files); durable
    /// versions are unstable until it finishes. Never retried inside a
    /// run — the whole retrieve restarts instead.
    #[error("vnode is committing")]
    Busy,

    /// The oracle could not answer (vnode dropped, internal failure).
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

// ------------------------------------------------------------------------------------------------
// Types
// ------------------------------------------------------------------------------------------------

/// A consistent snapshot of the vnode's durable versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeVersions {
    /// Highest record version durable in closed data files.
    pub fver: u64,

    /// Highest record version present in the live WAL.
    pub wver: u64,
}

/// One WAL segment, as enumerated by [`VersionOracle::wal_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalSegment {
    /// Segment file name relative to the vnode root.
    pub name: String,

    /// True for the currently-open segment: it must be *tailed*
    /// record-by-record instead of shipped whole.
    pub last: bool,
}

// ------------------------------------------------------------------------------------------------
// Trait
// ------------------------------------------------------------------------------------------------

/// The version facts a vnode must expose for its retrieve workers.
///
/// Implementations are shared across worker threads and answer from the
/// vnode's own synchronized state.
pub trait VersionOracle: Send + Sync {
    /// Current `(fver, wver)` pair, or [`OracleError::Busy`] while a
    /// commit is in flight.
    fn versions(&self, vg_id: u32) -> Result<NodeVersions, OracleError>;

    /// The data file at cursor `index`, or the end-of-files sentinel
    /// (see [`FileInfo::is_end`]) once the committed set is exhausted.
    /// The worker only ever advances `index` monotonically; what a
    /// cursor position maps to is the oracle's business.
    fn file_info(&self, vg_id: u32, index: u32) -> Result<FileInfo, OracleError>;

    /// The WAL segment at cursor `index`, oldest first, advancing the
    /// cursor past returned segments. `None` means the vnode has no WAL
    /// at all; [`WalSegment::last`] marks the live segment and always
    /// ends the enumeration.
    fn wal_info(&self, vg_id: u32, index: &mut u64) -> Result<Option<WalSegment>, OracleError>;

    /// Highest record version known to this node right now — the
    /// high-water mark a finishing tail must reach.
    fn node_version(&self) -> u64;
}
