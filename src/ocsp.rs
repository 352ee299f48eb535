//! OCSP stapling
//!
//! The client side checks a stapled OCSP response while the handshake is in
//! progress. A missing staple is treated as "no information" and accepted;
//! a response that cannot be decoded, verified or matched to the leaf
//! certificate fails closed. Only an explicit "good" status for a fresh
//! response is accepted, and "revoked" is rejected whatever its freshness.
//!
//! Diagnostics go to the client configuration's error callback, or to
//! stderr when no callback is registered or the callback fails.

use std::sync::Arc;

use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::ocsp::{OcspCertId, OcspCertStatus, OcspFlag, OcspResponse, OcspResponseStatus};
use openssl::ssl::SslRef;
use openssl::x509::X509VerifyResult;

use crate::error::{BoxError, ErrorTrace};

/// Allowed clock skew when checking `thisUpdate`/`nextUpdate`, in seconds
pub const MAX_CLOCK_SKEW: u32 = 60;

/// Maximum age of a response's `thisUpdate`, in seconds
pub const MAX_RESPONSE_AGE: u32 = 14 * 24 * 60 * 60;

/// Receives `(operation, message)` diagnostics
pub type ErrorCallback = dyn Fn(&str, &str) -> Result<(), BoxError> + Send + Sync;

/// Outcome of checking a staple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Accept,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Diagnostic {
    pub(crate) operation: &'static str,
    pub(crate) message: String,
}

impl Diagnostic {
    fn new(operation: &'static str, message: &str) -> Self {
        Diagnostic {
            operation,
            message: message.to_string(),
        }
    }

    fn provider(operation: &'static str, message: &str, stack: &ErrorStack) -> Self {
        if stack.errors().is_empty() {
            return Diagnostic::new(operation, message);
        }
        let trace = ErrorTrace::from_stack(stack, operation, message);
        Diagnostic {
            operation,
            message: format!("{} ({})", message, trace),
        }
    }
}

/// Delivers diagnostics to the registered callback, falling back to stderr
#[derive(Clone, Default)]
pub(crate) struct Reporter {
    callback: Option<Arc<ErrorCallback>>,
}

impl Reporter {
    pub(crate) fn new(callback: Option<Arc<ErrorCallback>>) -> Self {
        Reporter { callback }
    }

    pub(crate) fn report(&self, operation: &str, message: &str) {
        if let Some(callback) = &self.callback {
            match callback(operation, message) {
                Ok(()) => return,
                Err(e) => eprintln!("failed to call error callback: {}", e),
            }
        }
        eprintln!("{}: {}", operation, message);
    }
}

fn response_status_error(status: OcspResponseStatus) -> Option<&'static str> {
    if status == OcspResponseStatus::SUCCESSFUL {
        None
    } else if status == OcspResponseStatus::MALFORMED_REQUEST {
        Some("invalid OCSP status: OCSP_RESPONSE_STATUS_MALFORMEDREQUEST")
    } else if status == OcspResponseStatus::INTERNAL_ERROR {
        Some("invalid OCSP status: OCSP_RESPONSE_STATUS_INTERNALERROR")
    } else if status == OcspResponseStatus::TRY_LATER {
        Some("invalid OCSP status: OCSP_RESPONSE_STATUS_TRYLATER")
    } else if status == OcspResponseStatus::SIG_REQUIRED {
        Some("invalid OCSP status: OCSP_RESPONSE_STATUS_SIGREQUIRED")
    } else if status == OcspResponseStatus::UNAUTHORIZED {
        Some("invalid OCSP status: OCSP_RESPONSE_STATUS_UNAUTHORIZED")
    } else {
        Some("invalid OCSP status: unsupported OCSP response status")
    }
}

/// Map a certificate status to a verdict. `freshness` is only consulted
/// for non-revoked statuses.
pub(crate) fn classify<F>(status: OcspCertStatus, freshness: F) -> Result<Verdict, Diagnostic>
where
    F: FnOnce() -> Result<(), ErrorStack>,
{
    if status == OcspCertStatus::REVOKED {
        return Ok(Verdict::Reject);
    }
    freshness().map_err(|e| Diagnostic::provider("OCSP_check_validity", "ocsp response not current", &e))?;
    if status == OcspCertStatus::GOOD {
        Ok(Verdict::Accept)
    } else {
        Err(Diagnostic::new("OCSP_resp_find_status", "unknown OCSP response status"))
    }
}

/// Check the response the server stapled to this handshake
pub(crate) fn verify_staple(ssl: &SslRef) -> Result<Verdict, Diagnostic> {
    let raw = match ssl.ocsp_status() {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(Verdict::Accept),
    };

    let response = OcspResponse::from_der(raw)
        .map_err(|e| Diagnostic::provider("d2i_OCSP_RESPONSE", "failed to decode OCSP response", &e))?;
    if let Some(message) = response_status_error(response.status()) {
        return Err(Diagnostic::new("OCSP_response_status", message));
    }
    let basic = response
        .basic()
        .map_err(|e| Diagnostic::provider("OCSP_response_get1_basic", "failed to decode OCSP response", &e))?;

    let leaf = ssl
        .peer_certificate()
        .ok_or_else(|| Diagnostic::new("SSL_get_peer_certificate", "failed to get peer certificate"))?;
    let chain = ssl
        .peer_cert_chain()
        .ok_or_else(|| Diagnostic::new("SSL_get_peer_cert_chain", "failed to get peer certificate chain"))?;
    let store = ssl.ssl_context().cert_store();

    basic
        .verify(chain, store, OcspFlag::empty())
        .map_err(|e| Diagnostic::provider("OCSP_basic_verify", "failed to verify OCSP basic response", &e))?;

    let issuer = chain
        .iter()
        .find(|candidate| candidate.issued(&leaf) == X509VerifyResult::OK)
        .ok_or_else(|| Diagnostic::new("X509_check_issued", "failed to find issuer certificate"))?;

    let id = OcspCertId::from_cert(MessageDigest::sha1(), &leaf, issuer)
        .map_err(|e| Diagnostic::provider("OCSP_cert_to_id", "failed to create certificate id", &e))?;
    let status = basic
        .find_status(&id)
        .ok_or_else(|| Diagnostic::new("OCSP_resp_find_status", "failed to find status"))?;

    classify(status.status, || {
        status.check_validity(MAX_CLOCK_SKEW, Some(MAX_RESPONSE_AGE))
    })
}

/// Client status callback: `Ok(true)` accepts, `Ok(false)` rejects, `Err`
/// aborts the handshake with an internal error.
pub(crate) fn status_callback(
    reporter: Reporter,
) -> impl Fn(&mut SslRef) -> Result<bool, ErrorStack> + Send + Sync + 'static {
    move |ssl| match verify_staple(ssl) {
        Ok(Verdict::Accept) => Ok(true),
        Ok(Verdict::Reject) => {
            log::debug!("stapled OCSP response reports the certificate as revoked");
            Ok(false)
        }
        Err(diag) => {
            reporter.report(diag.operation, &diag.message);
            Err(ErrorStack::get())
        }
    }
}

/// Server status callback stapling a fixed DER response
pub(crate) fn staple_callback(
    response: Arc<[u8]>,
) -> impl Fn(&mut SslRef) -> Result<bool, ErrorStack> + Send + Sync + 'static {
    move |ssl| {
        ssl.set_ocsp_status(&response)?;
        Ok(true)
    }
}
