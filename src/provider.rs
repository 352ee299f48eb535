//! OpenSSL bootstrap
//!
//! OpenSSL is initialised once per process and never cleaned up: another
//! library in the same process may have initialised it first, and tearing
//! it down underneath that caller is not safe.

use once_cell::sync::OnceCell;
use openssl::error::ErrorStack;
use openssl::ex_data::Index;
use openssl::ssl::Ssl;

use crate::cache::SessionKey;

static SESSION_KEY_INDEX: OnceCell<Index<Ssl, SessionKey>> = OnceCell::new();

/// Initialise OpenSSL (algorithm and error-string tables).
///
/// Safe to call any number of times from any thread.
pub fn ensure_initialized() {
    openssl::init();
}

/// Per-`SSL` slot holding the session cache key of a client connection
pub(crate) fn session_key_index() -> Result<Index<Ssl, SessionKey>, ErrorStack> {
    SESSION_KEY_INDEX
        .get_or_try_init(|| {
            ensure_initialized();
            Ssl::new_ex_index::<SessionKey>()
        })
        .copied()
}
