//! Shared harness for retrieve tests: a scripted version oracle, a
//! scripted follower endpoint on a localhost listener, and fixture
//! authoring helpers for data files and WAL segments.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing_subscriber::EnvFilter;

use crate::oracle::{NodeVersions, OracleError, VersionOracle, WalSegment};
use crate::peer::Peer;
use crate::retrieve::{SyncNode, SyncSupervisor};
use crate::wal::{Appender, WalHead, body_cksum};
use crate::wire::{FileAck, FileInfo, GREETING_RSP_LEN, Greeting};

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ------------------------------------------------------------------------------------------------
// Scripted oracle
// ------------------------------------------------------------------------------------------------

type Effect = Box<dyn FnOnce() + Send>;

struct VersionStep {
    result: Result<NodeVersions, OracleError>,
    effect: Option<Effect>,
}

/// A [`VersionOracle`] whose `versions()` probes are answered from a
/// queue of scripted steps, falling back to a fixed holding answer once
/// the queue drains. Steps may carry a side effect (append records,
/// move the holding answer) fired when the probe is served — that is
/// how tests mutate the vnode "between" two tail passes.
pub struct ScriptOracle {
    steps: Mutex<VecDeque<VersionStep>>,
    hold: Mutex<NodeVersions>,
    files: Mutex<Vec<FileInfo>>,
    wals: Mutex<Vec<WalSegment>>,
    node_version: AtomicU64,
    probes: AtomicU32,
}

impl ScriptOracle {
    pub fn new(fver: u64, wver: u64, node_version: u64) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(VecDeque::new()),
            hold: Mutex::new(NodeVersions { fver, wver }),
            files: Mutex::new(Vec::new()),
            wals: Mutex::new(Vec::new()),
            node_version: AtomicU64::new(node_version),
            probes: AtomicU32::new(0),
        })
    }

    /// Queue one probe answer.
    pub fn push_versions(&self, fver: u64, wver: u64) {
        self.steps.lock().unwrap().push_back(VersionStep {
            result: Ok(NodeVersions { fver, wver }),
            effect: None,
        });
    }

    /// Queue one probe answer with a side effect fired as it is served.
    pub fn push_versions_with(&self, fver: u64, wver: u64, effect: impl FnOnce() + Send + 'static) {
        self.steps.lock().unwrap().push_back(VersionStep {
            result: Ok(NodeVersions { fver, wver }),
            effect: Some(Box::new(effect)),
        });
    }

    /// Queue one commit-in-progress answer.
    pub fn push_busy(&self) {
        self.steps.lock().unwrap().push_back(VersionStep {
            result: Err(OracleError::Busy),
            effect: None,
        });
    }

    /// Change the answer given once the step queue is drained.
    pub fn set_hold(&self, fver: u64, wver: u64) {
        *self.hold.lock().unwrap() = NodeVersions { fver, wver };
    }

    pub fn add_file(&self, name: &str, size: i64, fversion: u64, magic: u32) {
        self.files.lock().unwrap().push(FileInfo {
            name: name.to_string(),
            index: 0,
            size,
            fversion,
            magic,
        });
    }

    pub fn add_wal(&self, name: &str, last: bool) {
        self.wals.lock().unwrap().push(WalSegment {
            name: name.to_string(),
            last,
        });
    }

    pub fn set_node_version(&self, version: u64) {
        self.node_version.store(version, Ordering::SeqCst);
    }

    /// How many `versions()` probes have been served.
    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

impl VersionOracle for ScriptOracle {
    fn versions(&self, _vg_id: u32) -> Result<NodeVersions, OracleError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(step) => {
                if let Some(effect) = step.effect {
                    effect();
                }
                step.result
            }
            None => Ok(*self.hold.lock().unwrap()),
        }
    }

    fn file_info(&self, _vg_id: u32, index: u32) -> Result<FileInfo, OracleError> {
        let files = self.files.lock().unwrap();
        match files.get(index as usize) {
            Some(info) => {
                let mut info = info.clone();
                info.index = index;
                Ok(info)
            }
            None => Ok(FileInfo::end_marker(index)),
        }
    }

    fn wal_info(&self, _vg_id: u32, index: &mut u64) -> Result<Option<WalSegment>, OracleError> {
        let wals = self.wals.lock().unwrap();
        let segment = wals.get(*index as usize).cloned();
        if segment.is_some() {
            *index += 1;
        }
        Ok(segment)
    }

    fn node_version(&self) -> u64 {
        self.node_version.load(Ordering::SeqCst)
    }
}

// ------------------------------------------------------------------------------------------------
// Mock supervisor
// ------------------------------------------------------------------------------------------------

/// Records every supervisor callback the worker makes.
#[derive(Debug, Default)]
pub struct MockSupervisor {
    pub restarts: AtomicU32,
    pub flow_ctrl: Mutex<Vec<u32>>,
}

impl SyncSupervisor for MockSupervisor {
    fn restart_connection(&self, _peer: &Arc<Peer>) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_flow_ctrl(&self, _vg_id: u32, retries: u32) {
        self.flow_ctrl.lock().unwrap().push(retries);
    }
}

// ------------------------------------------------------------------------------------------------
// Node / peer builders
// ------------------------------------------------------------------------------------------------

pub fn test_node(
    root: &Path,
    oracle: Arc<ScriptOracle>,
    supervisor: Arc<MockSupervisor>,
) -> Arc<SyncNode> {
    Arc::new(SyncNode {
        vg_id: 1,
        root: root.to_path_buf(),
        fqdn: "leader.test".to_string(),
        port: 6041,
        oracle,
        supervisor,
    })
}

pub fn test_peer(addr: SocketAddr) -> Arc<Peer> {
    Arc::new(Peer::new("vgId:1 peer:2", 1, addr))
}

// ------------------------------------------------------------------------------------------------
// Fixtures
// ------------------------------------------------------------------------------------------------

/// Write a data file with pseudo-random contents; returns the bytes so
/// tests can compare what arrived.
pub fn write_data_file(root: &Path, name: &str, size: usize) -> Vec<u8> {
    use rand::RngCore;

    let mut body = vec![0u8; size];
    rand::rng().fill_bytes(&mut body);
    std::fs::write(root.join(name), &body).unwrap();
    body
}

/// Append complete records (one byte pattern per version) to a segment.
pub fn append_records(
    root: &Path,
    name: &str,
    versions: std::ops::RangeInclusive<u64>,
    body_len: usize,
) -> Vec<(u64, Vec<u8>)> {
    let mut appender = Appender::open(root.join(name)).unwrap();
    let mut out = Vec::new();
    for version in versions {
        let body = vec![version as u8; body_len];
        appender.append(version, &body).unwrap();
        out.push((version, body));
    }
    appender.sync().unwrap();
    out
}

/// Append only the first `keep` bytes of a record's frame — a torn,
/// in-flight append.
pub fn append_torn_record(root: &Path, name: &str, version: u64, body: &[u8], keep: usize) {
    let frame = record_frame(version, body);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(root.join(name))
        .unwrap();
    file.write_all(&frame[..keep]).unwrap();
    file.sync_all().unwrap();
}

/// Append the bytes a torn record is still missing, completing it.
pub fn complete_torn_record(root: &Path, name: &str, version: u64, body: &[u8], skip: usize) {
    let frame = record_frame(version, body);
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(root.join(name))
        .unwrap();
    file.write_all(&frame[skip..]).unwrap();
    file.sync_all().unwrap();
}

fn record_frame(version: u64, body: &[u8]) -> Vec<u8> {
    let head = WalHead {
        version,
        len: body.len() as u32,
        cksum: body_cksum(body),
    };
    let mut frame = head.encode().to_vec();
    frame.extend_from_slice(body);
    frame
}

// ------------------------------------------------------------------------------------------------
// Scripted follower
// ------------------------------------------------------------------------------------------------

/// What the scripted follower should do at each protocol phase.
pub struct FollowerScript {
    /// Expect and answer the greeting frame first.
    pub greeting: bool,
    /// Serve the file phase (decode offers, answer acks, absorb bodies).
    pub files: bool,
    /// Parse WAL records until the zero-head sentinel.
    pub wal: bool,
    /// Per-offer answers; missing entries default to "send it".
    pub acks: Vec<bool>,
    /// Drop the connection right after sending the n-th ack (1-based).
    pub close_after_ack: Option<usize>,
}

impl Default for FollowerScript {
    fn default() -> Self {
        Self {
            greeting: true,
            files: true,
            wal: true,
            acks: Vec::new(),
            close_after_ack: None,
        }
    }
}

/// Everything the follower captured off the wire.
#[derive(Debug, Default)]
pub struct Captured {
    pub greeting: Option<Greeting>,
    pub offers: Vec<FileInfo>,
    pub file_bodies: Vec<Vec<u8>>,
    pub wal_records: Vec<(u64, Vec<u8>)>,
    pub saw_sentinel: bool,
}

pub struct FollowerHandle {
    pub addr: SocketAddr,
    thread: JoinHandle<Captured>,
}

impl FollowerHandle {
    pub fn join(self) -> Captured {
        self.thread.join().unwrap()
    }
}

/// Bind a localhost listener and serve one retrieve exchange on a
/// background thread, capturing everything that arrives. The serving
/// loop never panics on connection loss — error-path tests tear the
/// socket down mid-exchange on purpose.
pub fn spawn_follower(script: FollowerScript) -> FollowerHandle {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let thread = std::thread::spawn(move || match listener.accept() {
        Ok((stream, _)) => serve(stream, script),
        Err(_) => Captured::default(),
    });
    FollowerHandle { addr, thread }
}

fn serve(mut stream: TcpStream, script: FollowerScript) -> Captured {
    let mut cap = Captured::default();

    if script.greeting {
        let mut buf = [0u8; Greeting::WIRE_SIZE];
        if stream.read_exact(&mut buf).is_err() {
            return cap;
        }
        cap.greeting = Greeting::decode(&buf).ok();
        if stream.write_all(&[0u8; GREETING_RSP_LEN]).is_err() {
            return cap;
        }
    }

    if script.files {
        let mut acked = 0usize;
        loop {
            let mut buf = [0u8; FileInfo::WIRE_SIZE];
            if stream.read_exact(&mut buf).is_err() {
                return cap;
            }
            let Ok(info) = FileInfo::decode(&buf) else {
                return cap;
            };
            if info.is_end() {
                break;
            }

            let sync = script.acks.get(acked).copied().unwrap_or(true);
            acked += 1;
            if stream.write_all(&FileAck { sync }.encode()).is_err() {
                return cap;
            }
            if script.close_after_ack == Some(acked) {
                return cap;
            }

            cap.offers.push(info.clone());
            if sync {
                let mut body = vec![0u8; info.size as usize];
                if stream.read_exact(&mut body).is_err() {
                    return cap;
                }
                cap.file_bodies.push(body);
            }
        }
    }

    if script.wal {
        loop {
            let mut buf = [0u8; WalHead::WIRE_SIZE];
            if stream.read_exact(&mut buf).is_err() {
                return cap;
            }
            let head = WalHead::decode(&buf);
            if head.is_sentinel() {
                cap.saw_sentinel = true;
                break;
            }
            let mut body = vec![0u8; head.len as usize];
            if stream.read_exact(&mut body).is_err() {
                return cap;
            }
            cap.wal_records.push((head.version, body));
        }
    }

    cap
}
