//! Descriptor binding
//!
//! A connection reads and writes a caller-owned descriptor directly. The
//! descriptor is never closed here; its lifetime belongs to the caller.

use std::io::{self, Read, Write};
use std::os::fd::RawFd;
use std::time::Duration;

/// I/O direction a would-block result is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Wait until the descriptor is readable
    Read,
    /// Wait until the descriptor is writable
    Write,
}

/// Borrowed byte-stream descriptor
#[derive(Debug)]
pub(crate) struct FdStream {
    fd: RawFd,
}

impl FdStream {
    pub(crate) fn new(fd: RawFd) -> Self {
        FdStream { fd }
    }
}

impl Read for FdStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl Write for FdStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let n = unsafe { libc::write(self.fd, buf.as_ptr().cast(), buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Wait until `fd` is ready for `direction`.
///
/// Returns `Ok(false)` when `timeout` elapses first; `None` waits forever.
pub fn wait(fd: RawFd, direction: Direction, timeout: Option<Duration>) -> io::Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match direction {
            Direction::Read => POLLIN,
            Direction::Write => POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = timeout
        .map(|d| i32::try_from(d.as_millis()).unwrap_or(i32::MAX))
        .unwrap_or(-1);

    loop {
        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };
        if result >= 0 {
            return Ok(result > 0);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
