//! Framed Connection
//!
//! One blocking TCP connection per retrieve run, with all-or-nothing
//! semantics on every operation: a short read, short write, or short file
//! transfer is an error, and any error makes the connection unusable —
//! the worker discards it and the supervisor decides whether to start a
//! fresh run.
//!
//! # File transfer
//!
//! [`FramedConn::send_file_range`] streams a byte range straight from an
//! open file to the socket. On Linux this uses `sendfile(2)`, so the
//! bytes never cross into userspace; elsewhere it falls back to a
//! buffered read/write loop. Either way the transfer starts at the
//! file's current offset and sends **exactly** the requested length.
//!
//! # SIGPIPE
//!
//! Retrieve workers call [`block_sigpipe`] at thread start. With the
//! signal masked, writing into a connection the peer has torn down
//! surfaces as an `EPIPE` I/O error instead of killing the process.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};

use thiserror::Error;
use tracing::{debug, trace};

/// Chunk size for the portable file-to-socket copy loop.
const COPY_BUF_SIZE: usize = 64 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by connection I/O.
#[derive(Debug, Error)]
pub enum ConnError {
    /// Underlying socket or file I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A file transfer ended before the full range was sent.
    #[error("short transfer: sent {sent} of {expected} bytes")]
    ShortTransfer {
        /// Bytes actually shipped before the transfer stopped.
        sent: u64,
        /// Bytes the transfer was asked to ship.
        expected: u64,
    },
}

// ------------------------------------------------------------------------------------------------
// FramedConn
// ------------------------------------------------------------------------------------------------

/// A single-use blocking sync connection.
#[derive(Debug)]
pub struct FramedConn {
    stream: TcpStream,
}

impl FramedConn {
    /// Open a connection to a peer's sync port.
    pub fn connect(addr: SocketAddr) -> Result<Self, ConnError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        debug!(%addr, "sync connection opened");
        Ok(Self { stream })
    }

    /// Wrap an already-accepted stream (the follower side of the
    /// exchange, and test harnesses).
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Write the whole buffer or fail.
    pub fn write_exact(&mut self, buf: &[u8]) -> Result<(), ConnError> {
        self.stream.write_all(buf)?;
        Ok(())
    }

    /// Fill the whole buffer or fail.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ConnError> {
        self.stream.read_exact(buf)?;
        Ok(())
    }

    /// Stream exactly `len` bytes from the file's current offset to the
    /// peer. Hitting end-of-file early is a [`ConnError::ShortTransfer`].
    pub fn send_file_range(&mut self, file: &File, len: u64) -> Result<(), ConnError> {
        #[cfg(target_os = "linux")]
        {
            self.sendfile_loop(file, len)
        }
        #[cfg(not(target_os = "linux"))]
        {
            self.copy_loop(file, len)
        }
    }

    #[cfg(target_os = "linux")]
    fn sendfile_loop(&mut self, file: &File, len: u64) -> Result<(), ConnError> {
        use std::os::fd::AsFd;

        let mut sent: u64 = 0;
        while sent < len {
            let chunk = usize::try_from(len - sent).unwrap_or(usize::MAX);
            match nix::sys::sendfile::sendfile(self.stream.as_fd(), file.as_fd(), None, chunk) {
                Ok(0) => {
                    return Err(ConnError::ShortTransfer {
                        sent,
                        expected: len,
                    });
                }
                Ok(n) => sent += n as u64,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(ConnError::Io(io::Error::from_raw_os_error(e as i32))),
            }
        }
        trace!(sent, "file range sent");
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn copy_loop(&mut self, file: &File, len: u64) -> Result<(), ConnError> {
        let mut reader = file;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut sent: u64 = 0;
        while sent < len {
            let want = usize::try_from((len - sent).min(COPY_BUF_SIZE as u64)).unwrap_or(COPY_BUF_SIZE);
            let n = reader.read(&mut buf[..want])?;
            if n == 0 {
                return Err(ConnError::ShortTransfer {
                    sent,
                    expected: len,
                });
            }
            self.stream.write_all(&buf[..n])?;
            sent += n as u64;
        }
        trace!(sent, "file range sent");
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// SIGPIPE
// ------------------------------------------------------------------------------------------------

/// Mask SIGPIPE on the calling thread, so a torn-down peer surfaces as a
/// write error on this thread's sockets instead of a process signal.
#[cfg(unix)]
pub fn block_sigpipe() {
    use nix::sys::signal::{SigSet, SigmaskHow, Signal, pthread_sigmask};

    let mut set = SigSet::empty();
    set.add(Signal::SIGPIPE);
    let _ = pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), None);
}

/// No SIGPIPE to mask on this platform.
#[cfg(not(unix))]
pub fn block_sigpipe() {}
