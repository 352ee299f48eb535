//! Error aggregation
//!
//! OpenSSL reports failures through a thread-local queue of error records.
//! Every failure exit in this crate turns that queue into an [`ErrorTrace`]:
//! an ordered, never-empty list of `(operation, message)` pairs, oldest
//! provider error first. Draining the queue completely keeps stale records
//! from leaking into an unrelated later operation.

use std::fmt;

use openssl::error::ErrorStack;
use openssl::ssl;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by caller-supplied callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One `(operation, message)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Function the provider attributes the error to
    pub operation: String,
    /// Human readable message
    pub message: String,
}

/// Ordered provider errors, oldest first. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorTrace {
    records: Vec<ErrorRecord>,
}

impl ErrorTrace {
    /// Build a trace from an already drained error stack.
    ///
    /// An empty stack yields a single record made of the defaults.
    pub fn from_stack(stack: &ErrorStack, default_operation: &str, default_message: &str) -> Self {
        let mut records: Vec<ErrorRecord> = stack
            .errors()
            .iter()
            .map(|e| ErrorRecord {
                operation: e.function().unwrap_or(default_operation).to_string(),
                message: e.to_string(),
            })
            .collect();

        if records.is_empty() {
            records.push(ErrorRecord {
                operation: default_operation.to_string(),
                message: default_message.to_string(),
            });
        }

        ErrorTrace { records }
    }

    /// All records, oldest first
    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    /// Oldest (root cause) record
    pub fn first(&self) -> &ErrorRecord {
        // never empty, see constructors
        &self.records[0]
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false; present for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn with_detail(mut self, detail: &str) -> Self {
        if let Some(last) = self.records.last_mut() {
            last.message = format!("{}: {}", last.message, detail);
        }
        self
    }
}

impl fmt::Display for ErrorTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", record.operation, record.message)?;
        }
        Ok(())
    }
}

/// Pull every pending provider error into a trace.
pub fn drain_errors(default_operation: &str, default_message: &str) -> ErrorTrace {
    ErrorTrace::from_stack(&ErrorStack::get(), default_operation, default_message)
}

/// Discard stale records before starting a provider operation
pub(crate) fn clear() {
    let stale = ErrorStack::get();
    if !stale.errors().is_empty() {
        log::trace!("discarding {} stale OpenSSL error(s)", stale.errors().len());
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Building or mutating a configuration failed
    #[error("configuration error in {op}: {trace}")]
    Config { op: &'static str, trace: ErrorTrace },

    /// Handshake, read, write, shutdown or OCSP failure
    #[error("TLS error in {op}: {trace}")]
    Tls { op: &'static str, trace: ErrorTrace },

    #[error("Invalid TLS protocol: {0}")]
    InvalidProtocol(String),

    #[error("Invalid cipher policy: {0}")]
    InvalidCipherPolicy(String),
}

impl Error {
    pub(crate) fn config(op: &'static str, message: &str, stack: &ErrorStack) -> Self {
        Error::Config {
            op,
            trace: ErrorTrace::from_stack(stack, op, message),
        }
    }

    pub(crate) fn config_drained(op: &'static str, message: &str) -> Self {
        Error::Config {
            op,
            trace: drain_errors(op, message),
        }
    }

    pub(crate) fn tls(op: &'static str, message: &str, stack: &ErrorStack) -> Self {
        Error::Tls {
            op,
            trace: ErrorTrace::from_stack(stack, op, message),
        }
    }

    /// Error from a failed `SSL_*` call. The `openssl` crate has already
    /// drained the queue into `err`.
    pub(crate) fn from_ssl(op: &'static str, message: &str, err: &ssl::Error) -> Self {
        let trace = match (err.ssl_error(), err.io_error()) {
            (Some(stack), _) => ErrorTrace::from_stack(stack, op, message),
            (None, Some(io)) => {
                ErrorTrace::from_stack(&ErrorStack::get(), op, message).with_detail(&io.to_string())
            }
            (None, None) => drain_errors(op, message),
        };
        Error::Tls { op, trace }
    }

    pub(crate) fn closed(op: &'static str) -> Self {
        Error::Tls {
            op,
            trace: drain_errors(op, "connection is closed"),
        }
    }

    /// Name of the step that failed
    pub fn operation(&self) -> &str {
        match self {
            Error::Config { op, .. } | Error::Tls { op, .. } => op,
            Error::InvalidProtocol(_) | Error::InvalidCipherPolicy(_) => "parse",
        }
    }

    /// Provider error records, if this error carries any
    pub fn trace(&self) -> Option<&ErrorTrace> {
        match self {
            Error::Config { trace, .. } | Error::Tls { trace, .. } => Some(trace),
            _ => None,
        }
    }

    /// True for configuration failures
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config { .. })
    }

    /// True for handshake/IO/shutdown failures
    pub fn is_tls(&self) -> bool {
        matches!(self, Error::Tls { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::x509::X509;

    #[test]
    fn test_empty_queue_synthesizes_default() {
        clear();
        let trace = drain_errors("SSL_CTX_new", "failed to create SSL_CTX");
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.first().operation, "SSL_CTX_new");
        assert_eq!(trace.first().message, "failed to create SSL_CTX");
    }

    #[test]
    fn test_drain_empties_queue() {
        clear();
        // the openssl crate drains the queue into its own ErrorStack, so
        // push the records back onto the raw queue
        let stack = X509::from_pem(b"garbage").unwrap_err();
        stack.put();
        let trace = drain_errors("PEM_read_bio_X509", "failed");
        assert!(!trace.is_empty());
        assert!(ErrorStack::get().errors().is_empty());
    }

    #[test]
    fn test_stack_records_keep_order_and_operation() {
        let stack = X509::from_pem(b"garbage").unwrap_err();
        let trace = ErrorTrace::from_stack(&stack, "load", "failed to load");
        assert_eq!(trace.len(), stack.errors().len().max(1));
        for (record, err) in trace.records().iter().zip(stack.errors()) {
            assert_eq!(record.operation, err.function().unwrap_or("load"));
        }
    }

    #[test]
    fn test_display_joins_records() {
        let trace = ErrorTrace {
            records: vec![
                ErrorRecord { operation: "a".into(), message: "first".into() },
                ErrorRecord { operation: "b".into(), message: "second".into() },
            ],
        };
        assert_eq!(trace.to_string(), "a: first; b: second");
    }

    #[test]
    fn test_operation_accessor() {
        let err = Error::config_drained("SSL_CTX_load_verify_locations", "failed to load verify locations");
        assert!(err.is_config());
        assert_eq!(err.operation(), "SSL_CTX_load_verify_locations");
        assert!(err.to_string().contains("SSL_CTX_load_verify_locations"));
    }
}
