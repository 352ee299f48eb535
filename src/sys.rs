//! Raw OpenSSL calls not wrapped by the `openssl` crate
//!
//! The safe wrapper only lets a context be tuned while it is still an
//! `SslContextBuilder`; the trust-store mutators on a built client context and
//! a few `SSL_CTX_ctrl` macros need the raw API.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use foreign_types::{ForeignType, ForeignTypeRef};
use libc::{c_int, c_long, c_ulong};
use openssl::error::ErrorStack;
use openssl::ssl::{SslContext, SslContextBuilder, SslMode};
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::X509Crl;
use openssl_sys as ffi;

const SSL_CTRL_SET_SESS_CACHE_SIZE: c_int = 42;
const SSL_CTRL_CLEAR_MODE: c_int = 78;
const SSL_CTRL_SET_DH_AUTO: c_int = 118;

extern "C" {
    fn SSL_CTX_set_timeout(ctx: *mut ffi::SSL_CTX, t: c_long) -> c_long;
    fn X509_STORE_add_crl(store: *mut ffi::X509_STORE, crl: *mut ffi::X509_CRL) -> c_int;
}

fn ctrl(builder: &mut SslContextBuilder, cmd: c_int, larg: c_long) -> c_long {
    unsafe { ffi::SSL_CTX_ctrl(builder.as_ptr(), cmd, larg, ptr::null_mut()) }
}

pub(crate) fn clear_mode(builder: &mut SslContextBuilder, mode: SslMode) {
    ctrl(builder, SSL_CTRL_CLEAR_MODE, mode.bits() as c_long);
}

pub(crate) fn set_session_timeout(builder: &mut SslContextBuilder, seconds: u32) {
    unsafe {
        SSL_CTX_set_timeout(builder.as_ptr(), c_long::from(seconds));
    }
}

pub(crate) fn set_session_cache_size(builder: &mut SslContextBuilder, size: u32) {
    ctrl(builder, SSL_CTRL_SET_SESS_CACHE_SIZE, c_long::from(size));
}

/// Let OpenSSL pick DH parameters matching the configured ciphers
pub(crate) fn set_dh_auto(builder: &mut SslContextBuilder) -> Result<(), ErrorStack> {
    if ctrl(builder, SSL_CTRL_SET_DH_AUTO, 1) == 1 {
        Ok(())
    } else {
        Err(ErrorStack::get())
    }
}

// The functions below mutate a context that connections may already
// reference. Callers hold `&mut ClientConfig`, i.e. the only handle to it.

pub(crate) fn set_verify_depth(ctx: &SslContext, depth: u32) {
    let depth = c_int::try_from(depth).unwrap_or(c_int::MAX);
    unsafe { ffi::SSL_CTX_set_verify_depth(ctx.as_ptr(), depth) }
}

fn path_to_cstring(path: &Path) -> Option<CString> {
    CString::new(path.as_os_str().as_bytes()).ok()
}

pub(crate) fn load_verify_locations(
    ctx: &SslContext,
    ca_file: Option<&Path>,
    ca_path: Option<&Path>,
) -> Result<(), ErrorStack> {
    let file = ca_file.map(path_to_cstring);
    let dir = ca_path.map(path_to_cstring);
    // interior NUL: OpenSSL could never open it
    if matches!(file, Some(None)) || matches!(dir, Some(None)) {
        return Err(ErrorStack::get());
    }
    let file = file.flatten();
    let dir = dir.flatten();

    let rc = unsafe {
        ffi::SSL_CTX_load_verify_locations(
            ctx.as_ptr(),
            file.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            dir.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
        )
    };
    if rc == 1 {
        Ok(())
    } else {
        Err(ErrorStack::get())
    }
}

pub(crate) fn add_crl(ctx: &SslContext, crl: &X509Crl) -> Result<(), ErrorStack> {
    let store = ctx.cert_store().as_ptr();
    // the store takes its own reference to the CRL
    if unsafe { X509_STORE_add_crl(store, crl.as_ptr()) } == 1 {
        Ok(())
    } else {
        Err(ErrorStack::get())
    }
}

pub(crate) fn set_store_flags(ctx: &SslContext, flags: X509VerifyFlags) -> Result<(), ErrorStack> {
    let store = ctx.cert_store().as_ptr();
    if unsafe { ffi::X509_STORE_set_flags(store, flags.bits() as c_ulong) } == 1 {
        Ok(())
    } else {
        Err(ErrorStack::get())
    }
}

/// Read back a built context's options; the safe wrapper only exposes this on
/// `SslContextBuilder`
#[cfg(test)]
pub(crate) fn context_options(ctx: &openssl::ssl::SslContextRef) -> openssl::ssl::SslOptions {
    let bits = unsafe { ffi::SSL_CTX_get_options(ctx.as_ptr()) };
    openssl::ssl::SslOptions::from_bits_retain(bits as _)
}
