//! nbtls - non-blocking TLS over caller-owned descriptors
//!
//! This crate wraps OpenSSL for event-loop driven programs: the caller owns
//! the socket, makes it non-blocking, and calls back into a [`Connection`]
//! whenever the descriptor becomes ready. No call blocks on network I/O.
//!
//! # Architecture
//!
//! 1. [`ClientConfig`] / [`ServerConfig`] hold an OpenSSL context and the
//!    policy applied to it (protocol range, cipher list, session cache,
//!    trust store, OCSP stapling, SNI dispatch)
//! 2. `connect` / `accept` bind a [`Connection`] to a descriptor; the
//!    connection keeps its configuration alive through an `Arc`
//! 3. `handshake`, `read`, `write` and `close` each perform one step and
//!    return either a result, a would-block direction, or peer closure
//!
//! # Example
//!
//! ```no_run
//! use std::net::TcpStream;
//! use std::os::fd::AsRawFd;
//! use std::sync::Arc;
//!
//! use nbtls::{fd, ClientConfig, ConnectOptions, Progress};
//!
//! let config = Arc::new(ClientConfig::builder().cache_timeout(300).build()?);
//! let socket = TcpStream::connect("example.com:443")?;
//! socket.set_nonblocking(true)?;
//!
//! let mut conn = config.connect(socket.as_raw_fd(), &ConnectOptions::servername("example.com"))?;
//! loop {
//!     match conn.handshake()? {
//!         Progress::Done => break,
//!         Progress::WouldBlock(direction) => {
//!             fd::wait(socket.as_raw_fd(), direction, None)?;
//!         }
//!         Progress::PeerClosed => return Ok(()),
//!     }
//! }
//! println!("negotiated {}", conn.vars().version);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cert;
pub mod client;
pub mod config;
pub mod error;
pub mod fd;
pub mod ocsp;
pub mod provider;
pub mod server;
pub mod session;
pub mod vars;

mod cache;
mod sys;

pub use cert::CertInfo;
pub use client::{ClientConfig, ClientConfigBuilder, ConnectOptions};
pub use config::{CipherPolicy, Protocol, DEFAULT_SESSION_CACHE_SIZE, DEFAULT_SESSION_TIMEOUT};
pub use error::{BoxError, Error, ErrorRecord, ErrorTrace, Result};
pub use fd::Direction;
pub use server::{ServerConfig, ServerConfigBuilder, SniCallback};
pub use session::{Connection, Progress, ReadStatus, Role, State, WriteStatus, DEFAULT_READ_SIZE};
pub use vars::TlsVars;
