//! Protocol and cipher policy shared by client and server configurations

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use openssl::error::ErrorStack;
use openssl::ssl::{SslContextBuilder, SslVersion};

use crate::error::Error;

/// OpenSSL's default session cache size
pub const DEFAULT_SESSION_CACHE_SIZE: u32 = 1024 * 20;

/// Default server-side session timeout, in seconds
pub const DEFAULT_SESSION_TIMEOUT: u32 = 300;

/// Negotiable protocol range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// TLS 1.2 and newer
    #[default]
    Default,
    /// TLS 1.0 and newer
    Tls1,
    /// TLS 1.0 only
    Tls10,
    /// TLS 1.1 only
    Tls11,
    /// TLS 1.2 only
    Tls12,
    /// TLS 1.3 only
    Tls13,
}

impl Protocol {
    /// Minimum and maximum versions; `None` leaves the maximum open
    pub fn bounds(&self) -> (SslVersion, Option<SslVersion>) {
        match self {
            Protocol::Default => (SslVersion::TLS1_2, None),
            Protocol::Tls1 => (SslVersion::TLS1, None),
            Protocol::Tls10 => (SslVersion::TLS1, Some(SslVersion::TLS1)),
            Protocol::Tls11 => (SslVersion::TLS1_1, Some(SslVersion::TLS1_1)),
            Protocol::Tls12 => (SslVersion::TLS1_2, Some(SslVersion::TLS1_2)),
            Protocol::Tls13 => (SslVersion::TLS1_3, Some(SslVersion::TLS1_3)),
        }
    }

    /// Option name as accepted by `from_str`
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Default => "default",
            Protocol::Tls1 => "tlsv1",
            Protocol::Tls10 => "tlsv1.0",
            Protocol::Tls11 => "tlsv1.1",
            Protocol::Tls12 => "tlsv1.2",
            Protocol::Tls13 => "tlsv1.3",
        }
    }

    pub(crate) fn apply(&self, builder: &mut SslContextBuilder) -> Result<(), ErrorStack> {
        let (min, max) = self.bounds();
        builder.set_min_proto_version(Some(min))?;
        if max.is_some() {
            builder.set_max_proto_version(max)?;
        }
        Ok(())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Protocol::Default),
            "tlsv1" => Ok(Protocol::Tls1),
            "tlsv1.0" => Ok(Protocol::Tls10),
            "tlsv1.1" => Ok(Protocol::Tls11),
            "tlsv1.2" => Ok(Protocol::Tls12),
            "tlsv1.3" => Ok(Protocol::Tls13),
            _ => Err(Error::InvalidProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cipher list policy (TLS 1.2 and older; TLS 1.3 suites are unaffected)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherPolicy {
    /// `HIGH:!aNULL`; also selected by "default"
    #[default]
    Secure,
    /// `HIGH:MEDIUM:!aNULL`
    Legacy,
    /// `ALL:!aNULL:!eNULL`
    All,
}

impl CipherPolicy {
    /// OpenSSL cipher list string
    pub fn cipher_list(&self) -> &'static str {
        match self {
            CipherPolicy::Secure => "HIGH:!aNULL",
            CipherPolicy::Legacy => "HIGH:MEDIUM:!aNULL",
            CipherPolicy::All => "ALL:!aNULL:!eNULL",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CipherPolicy::Secure => "secure",
            CipherPolicy::Legacy => "legacy",
            CipherPolicy::All => "all",
        }
    }

    pub(crate) fn apply(&self, builder: &mut SslContextBuilder) -> Result<(), ErrorStack> {
        builder.set_cipher_list(self.cipher_list())
    }
}

impl FromStr for CipherPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" | "secure" => Ok(CipherPolicy::Secure),
            "legacy" => Ok(CipherPolicy::Legacy),
            "all" => Ok(CipherPolicy::All),
            _ => Err(Error::InvalidCipherPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for CipherPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IP literals are never sent as SNI nor dispatched on
pub(crate) fn is_ip_literal(name: &str) -> bool {
    name.parse::<IpAddr>().is_ok()
}
