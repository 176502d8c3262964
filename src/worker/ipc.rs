//! Pipe primitives for talking to worker processes.
//!
//! Read ends are switched to non-blocking mode so the master can poll every
//! worker from one thread. All reads and writes retry on EINTR.

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Chunk size for draining a readable pipe.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A file descriptor wrapper that implements Read/Write with EINTR handling.
#[derive(Debug)]
pub struct PipeFd {
    fd: OwnedFd,
}

/// Result of a non-blocking drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were available. The peer may still be open.
    Data(Vec<u8>),
    /// Nothing to read right now.
    Empty,
    /// The write end is closed and nothing was pending.
    Closed,
}

impl PipeFd {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Create from a raw file descriptor (takes ownership).
    ///
    /// # Safety
    /// The caller must ensure `fd` is a valid file descriptor that can be owned.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }

    /// Toggle `O_NONBLOCK` on the descriptor.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let bits = fcntl(&self.fd, FcntlArg::F_GETFL).map_err(errno_to_io)?;
        let mut flags = OFlag::from_bits_truncate(bits);
        flags.set(OFlag::O_NONBLOCK, nonblocking);
        fcntl(&self.fd, FcntlArg::F_SETFL(flags)).map_err(errno_to_io)?;
        Ok(())
    }

    /// Whether `O_NONBLOCK` is currently set.
    pub fn is_nonblocking(&self) -> io::Result<bool> {
        let bits = fcntl(&self.fd, FcntlArg::F_GETFL).map_err(errno_to_io)?;
        Ok(OFlag::from_bits_truncate(bits).contains(OFlag::O_NONBLOCK))
    }

    /// Read once without blocking.
    ///
    /// `Ok(None)` means the read would block. `Ok(Some(0))` is end of file.
    pub fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Drain every byte currently readable from a non-blocking descriptor.
    pub fn try_read_available(&mut self) -> io::Result<ReadOutcome> {
        let mut collected = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match self.try_read(&mut chunk)? {
                Some(0) if collected.is_empty() => return Ok(ReadOutcome::Closed),
                Some(0) | None => break,
                Some(n) => collected.extend_from_slice(&chunk[..n]),
            }
        }
        if collected.is_empty() {
            Ok(ReadOutcome::Empty)
        } else {
            Ok(ReadOutcome::Data(collected))
        }
    }
}

fn errno_to_io(e: Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl From<OwnedFd> for PipeFd {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(errno_to_io(e)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(errno_to_io(e)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Close-on-exec pipe, so children spawned by concurrent tests never hold
/// the write end open.
#[cfg(test)]
pub(crate) fn create_pipe() -> (PipeFd, PipeFd) {
    let (reader, writer) = std::io::pipe().expect("Failed to create pipe");
    (
        PipeFd::new(OwnedFd::from(reader)),
        PipeFd::new(OwnedFd::from(writer)),
    )
}
