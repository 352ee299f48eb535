//! Non-blocking TLS connections
//!
//! A [`Connection`] runs the TLS protocol over a caller-owned, non-blocking
//! descriptor. Every operation performs at most one step and reports whether
//! it finished, must be retried once the descriptor is readable or writable,
//! or found the peer closed the session.
//!
//! ```text
//! Handshaking --handshake()--> Established --close()--> Closed
//!      |                                                  ^
//!      +--------------------close()-----------------------+
//! ```
//!
//! `close()` only sends `close_notify` once the handshake has completed. A
//! connection dropped without `close()` is freed without any shutdown
//! exchange.

use std::fmt;
use std::os::fd::RawFd;
use std::sync::Arc;

use log::{debug, trace};
use openssl::ssl::{self, ErrorCode, ShutdownResult, Ssl, SslStream};

use crate::client::ClientConfig;
use crate::error::{self, Error, Result};
use crate::fd::{Direction, FdStream};
use crate::server::ServerConfig;
use crate::vars::TlsVars;

/// Read size used when `read` is given a zero `max_len`
pub const DEFAULT_READ_SIZE: usize = 8192;

/// Side of the handshake a connection plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Handshaking,
    Established,
    Closed,
}

/// Outcome of `handshake` and `close`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The step completed
    Done,
    /// Retry once the descriptor is ready in this direction
    WouldBlock(Direction),
    /// The peer closed the TLS session
    PeerClosed,
}

/// Outcome of `read` and `read_into`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus<T> {
    Data(T),
    WouldBlock(Direction),
    PeerClosed,
}

/// Outcome of `write`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The whole buffer was written
    Written(usize),
    /// Only a prefix was written; retry with the rest once writable
    Partial(usize),
    WouldBlock(Direction),
    PeerClosed,
}

/// Configuration a connection keeps alive
pub(crate) enum ConfigRef {
    Client(Arc<ClientConfig>),
    Server(Arc<ServerConfig>),
}

struct Inner {
    stream: SslStream<FdStream>,
    established: bool,
    // dropped after the stream
    _config: ConfigRef,
}

enum Interrupted {
    WouldBlock(Direction),
    PeerClosed,
}

fn interrupted(err: &ssl::Error) -> Option<Interrupted> {
    match err.code() {
        ErrorCode::WANT_READ => Some(Interrupted::WouldBlock(Direction::Read)),
        ErrorCode::WANT_WRITE => Some(Interrupted::WouldBlock(Direction::Write)),
        ErrorCode::ZERO_RETURN => Some(Interrupted::PeerClosed),
        _ => None,
    }
}

/// TLS connection over a non-blocking descriptor
pub struct Connection {
    role: Role,
    fd: RawFd,
    inner: Option<Inner>,
}

impl Connection {
    pub(crate) fn new(role: Role, ssl: Ssl, fd: RawFd, config: ConfigRef) -> Result<Self> {
        let stream = SslStream::new(ssl, FdStream::new(fd))
            .map_err(|e| Error::tls("SSL_set_fd", "failed to bind file descriptor", &e))?;
        Ok(Connection {
            role,
            fd,
            inner: Some(Inner {
                stream,
                established: false,
                _config: config,
            }),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Descriptor this connection was created with
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn state(&self) -> State {
        match &self.inner {
            None => State::Closed,
            Some(inner) if inner.established => State::Established,
            Some(_) => State::Handshaking,
        }
    }

    /// Snapshot of the negotiated parameters
    pub fn vars(&self) -> TlsVars {
        match &self.inner {
            Some(inner) => TlsVars::from_ssl(inner.stream.ssl(), inner.established),
            None => TlsVars::default(),
        }
    }

    /// Run one handshake step. Once established this returns `Done` without
    /// touching the descriptor.
    pub fn handshake(&mut self) -> Result<Progress> {
        let (op, message) = match self.role {
            Role::Client => ("SSL_connect", "failed to initiate SSL/TLS handshake with server"),
            Role::Server => ("SSL_accept", "failed to initiate SSL/TLS handshake with client"),
        };
        let inner = self.inner.as_mut().ok_or_else(|| Error::closed(op))?;
        if inner.established {
            return Ok(Progress::Done);
        }

        error::clear();
        let result = match self.role {
            Role::Client => inner.stream.connect(),
            Role::Server => inner.stream.accept(),
        };

        match result {
            Ok(()) => {
                inner.established = true;
                let ssl = inner.stream.ssl();
                debug!(
                    "handshake complete on fd {}: {} {}",
                    self.fd,
                    ssl.version_str(),
                    ssl.current_cipher().map_or("<undef>", |c| c.name())
                );
                Ok(Progress::Done)
            }
            Err(e) => match interrupted(&e) {
                Some(Interrupted::WouldBlock(direction)) => {
                    trace!("handshake on fd {} waiting for {:?}", self.fd, direction);
                    Ok(Progress::WouldBlock(direction))
                }
                Some(Interrupted::PeerClosed) => Ok(Progress::PeerClosed),
                None => Err(Error::from_ssl(op, message, &e)),
            },
        }
    }

    /// Read up to `max_len` bytes; zero means [`DEFAULT_READ_SIZE`]
    pub fn read(&mut self, max_len: usize) -> Result<ReadStatus<Vec<u8>>> {
        let len = if max_len == 0 { DEFAULT_READ_SIZE } else { max_len };
        let mut buf = vec![0u8; len];
        Ok(match self.read_into(&mut buf)? {
            ReadStatus::Data(n) => {
                buf.truncate(n);
                ReadStatus::Data(buf)
            }
            ReadStatus::WouldBlock(direction) => ReadStatus::WouldBlock(direction),
            ReadStatus::PeerClosed => ReadStatus::PeerClosed,
        })
    }

    /// Read into `buf`, returning the number of bytes read
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<ReadStatus<usize>> {
        let inner = self.inner.as_mut().ok_or_else(|| Error::closed("SSL_read"))?;
        if buf.is_empty() {
            return Ok(ReadStatus::Data(0));
        }

        error::clear();
        match inner.stream.ssl_read(buf) {
            Ok(n) => Ok(ReadStatus::Data(n)),
            Err(e) => match interrupted(&e) {
                Some(Interrupted::WouldBlock(direction)) => {
                    trace!("read on fd {} waiting for {:?}", self.fd, direction);
                    Ok(ReadStatus::WouldBlock(direction))
                }
                Some(Interrupted::PeerClosed) => Ok(ReadStatus::PeerClosed),
                None => Err(Error::from_ssl("SSL_read", "failed to read data", &e)),
            },
        }
    }

    /// Write as much of `buf` as the descriptor accepts
    pub fn write(&mut self, buf: &[u8]) -> Result<WriteStatus> {
        let inner = self.inner.as_mut().ok_or_else(|| Error::closed("SSL_write"))?;
        if buf.is_empty() {
            return Ok(WriteStatus::Written(0));
        }

        error::clear();
        match inner.stream.ssl_write(buf) {
            Ok(n) if n == buf.len() => Ok(WriteStatus::Written(n)),
            Ok(n) => {
                trace!("short write on fd {}: {} of {} bytes", self.fd, n, buf.len());
                Ok(WriteStatus::Partial(n))
            }
            Err(e) => match interrupted(&e) {
                Some(Interrupted::WouldBlock(direction)) => {
                    trace!("write on fd {} waiting for {:?}", self.fd, direction);
                    Ok(WriteStatus::WouldBlock(direction))
                }
                Some(Interrupted::PeerClosed) => Ok(WriteStatus::PeerClosed),
                None => Err(Error::from_ssl("SSL_write", "failed to write data", &e)),
            },
        }
    }

    /// Shut the session down and release it.
    ///
    /// An established connection sends `close_notify` first; if that would
    /// block nothing changes and `close` must be called again. Otherwise the
    /// session is released even when the shutdown fails, and the failure is
    /// returned afterwards. Closing a closed connection returns `Done`.
    pub fn close(&mut self) -> Result<Progress> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(Progress::Done);
        };

        let mut failure = None;
        if inner.established {
            error::clear();
            match inner.stream.shutdown() {
                Ok(ShutdownResult::Sent) | Ok(ShutdownResult::Received) => {}
                Err(e) => match e.code() {
                    ErrorCode::WANT_READ => return Ok(Progress::WouldBlock(Direction::Read)),
                    ErrorCode::WANT_WRITE => return Ok(Progress::WouldBlock(Direction::Write)),
                    _ => failure = Some(Error::from_ssl("SSL_shutdown", "failed to shutdown SSL context", &e)),
                },
            }
        }

        self.inner = None;
        debug!("closed connection on fd {}", self.fd);
        match failure {
            Some(err) => Err(err),
            None => Ok(Progress::Done),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("fd", &self.fd)
            .field("state", &self.state())
            .finish()
    }
}
