//! Client-side session cache
//!
//! OpenSSL stores client sessions only when asked to and never looks them up
//! on its own, so the client configuration keeps resumable sessions in a
//! `moka` cache bounded by size and expiring after the session timeout.

use std::hash::Hash;
use std::time::Duration;

use moka::sync::Cache;
use openssl::ssl::SslSession;

use crate::client::ConnectOptions;

/// What a cached session may be offered to: the same server name, verified
/// the same way. A session from a connection that skipped a check is only
/// ever resumed by connections that skip it too.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SessionKey {
    pub(crate) servername: String,
    pub(crate) noverify_name: bool,
    pub(crate) noverify_time: bool,
    pub(crate) noverify_cert: bool,
}

impl SessionKey {
    pub(crate) fn new(servername: &str, options: &ConnectOptions) -> Self {
        SessionKey {
            servername: servername.to_string(),
            noverify_name: options.noverify_name,
            noverify_time: options.noverify_time,
            noverify_cert: options.noverify_cert,
        }
    }
}

pub(crate) type SessionCache = Cache<SessionKey, SslSession>;

/// Cache whose entries live for `timeout`; `capacity == 0` leaves it
/// unbounded
pub(crate) fn expiring_cache<K, V>(timeout: Duration, capacity: u64) -> Cache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let builder = Cache::builder().time_to_live(timeout);
    if capacity > 0 {
        builder.max_capacity(capacity).build()
    } else {
        builder.build()
    }
}
