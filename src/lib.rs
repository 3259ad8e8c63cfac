//! # horolog-sync
//!
//! The leader-to-follower **catch-up (retrieve) protocol** of a HorologDB
//! replicated time-series vnode. When a follower falls behind, the leader
//! spawns one retrieve worker for it; the worker streams every piece of
//! durable state — committed data files plus write-ahead-log records —
//! over a dedicated TCP connection until the follower is current enough
//! to receive live forwarded writes.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      RetrieveWorker (one thread per peer)     │
//! │                                                               │
//! │  greeting ──► FileStreamer ──► WalStreamer ──► end sentinel   │
//! │                 │                │                            │
//! │                 │ per-file ack   │ rotated segments whole,    │
//! │                 │                │ then live tail + handoff   │
//! │                 ▼                ▼                            │
//! │           ┌──────────────────────────────┐                    │
//! │           │   FramedConn (blocking TCP)  │                    │
//! │           └──────────────────────────────┘                    │
//! │                                                               │
//! │  MutationWatcher ──► VersionOracle (fver / wver probes)       │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`retrieve`] | Per-peer worker: state machine, streamers, mutation watcher |
//! | [`conn`] | Framed blocking TCP I/O and zero-copy file transfer |
//! | [`wire`] | Fixed-layout sync frames (greeting, file info, file ack) |
//! | [`wal`] | WAL record format, segment appender, tail reader |
//! | [`oracle`] | Version oracle contract the worker consumes |
//! | [`peer`] | Shared peer session state (status, shipped version, retries) |
//!
//! ## Key guarantees
//!
//! - **Monotonic shipping** — within one run, records reach the peer in
//!   strictly increasing version order, and `sversion` never decreases.
//! - **Forward-only status** — a peer's catch-up phase only advances
//!   `Init → File → Cache`; the flip to `Cache` is the handoff point
//!   after which live forwarding owns every newer record.
//! - **Mutation safety** — any change to the committed file set during a
//!   run (including a commit in progress) aborts the run; the supervisor
//!   restarts it with backoff.
//! - **Tail tolerance** — a partially-appended record at the live WAL's
//!   end is never an error; the worker reopens at its tracked offset and
//!   retries until the record completes.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use horolog_sync::peer::Peer;
//! use horolog_sync::retrieve::{self, SyncNode};
//! # use horolog_sync::oracle::VersionOracle;
//! # use horolog_sync::retrieve::SyncSupervisor;
//! # fn vnode_oracle() -> Arc<dyn VersionOracle> { unimplemented!() }
//! # fn supervisor() -> Arc<dyn SyncSupervisor> { unimplemented!() }
//!
//! let node = Arc::new(SyncNode {
//!     vg_id: 7,
//!     root: PathBuf::from("/data/vnode7"),
//!     fqdn: "leader.example.com".to_string(),
//!     port: 6041,
//!     oracle: vnode_oracle(),
//!     supervisor: supervisor(),
//! });
//!
//! let peer = Arc::new(Peer::new("vgId:7 peer:2", 7, "10.0.0.2:6041".parse().unwrap()));
//! let handle = retrieve::spawn(node, peer).unwrap();
//! handle.join().unwrap();
//! ```

#![allow(dead_code)]

pub mod conn;
pub mod oracle;
pub mod peer;
pub mod retrieve;
pub mod wal;
pub mod wire;
