//! Client configuration
//!
//! A `ClientConfig` owns an OpenSSL client context and is shared, through an
//! `Arc`, by every connection made with it. The trust store can still be
//! changed after construction with `set_verify_depth`,
//! `load_verify_locations` and `set_crls`; those take `&mut self`, so they
//! are only possible while no connection holds the configuration.

use std::os::fd::RawFd;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use openssl::ssl::{
    Ssl, SslContext, SslContextBuilder, SslMethod, SslMode, SslOptions, SslRef, SslSession,
    SslSessionCacheMode, SslVerifyMode, StatusType,
};
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509Crl, X509StoreContextRef};
use openssl_sys as ffi;

use crate::cache::{self, SessionCache, SessionKey};
use crate::config::{is_ip_literal, CipherPolicy, Protocol, DEFAULT_SESSION_CACHE_SIZE};
use crate::error::{BoxError, Error, Result};
use crate::ocsp::{self, ErrorCallback, Reporter};
use crate::provider;
use crate::session::{ConfigRef, Connection, Role};
use crate::sys;

const CRL_TAG: &str = "X509 CRL";

/// Per-connection options for [`ClientConfig::connect`]
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Server name sent via SNI and checked against the certificate.
    /// IP literals are neither sent nor checked.
    pub servername: Option<String>,
    /// Skip hostname verification
    pub noverify_name: bool,
    /// Accept expired and not-yet-valid certificates
    pub noverify_time: bool,
    /// Skip peer certificate verification entirely
    pub noverify_cert: bool,
}

impl ConnectOptions {
    /// Options with a server name and full verification
    pub fn servername(name: impl Into<String>) -> Self {
        ConnectOptions {
            servername: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn noverify_name(mut self, skip: bool) -> Self {
        self.noverify_name = skip;
        self
    }

    pub fn noverify_time(mut self, skip: bool) -> Self {
        self.noverify_time = skip;
        self
    }

    pub fn noverify_cert(mut self, skip: bool) -> Self {
        self.noverify_cert = skip;
        self
    }
}

/// TLS client configuration
pub struct ClientConfig {
    ctx: SslContext,
    sessions: Option<SessionCache>,
}

impl ClientConfig {
    /// Create a new client configuration builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Configuration with session caching disabled and server cipher
    /// preference
    pub fn new(protocol: Protocol, cipher_policy: CipherPolicy) -> Result<Self> {
        ClientConfig::builder()
            .protocol(protocol)
            .cipher_policy(cipher_policy)
            .build()
    }

    /// Limit the certificate chain verification depth
    pub fn set_verify_depth(&mut self, depth: u32) {
        sys::set_verify_depth(&self.ctx, depth);
    }

    /// Add trust anchors from a PEM file and/or a hashed certificate
    /// directory
    pub fn load_verify_locations(&mut self, ca_file: Option<&Path>, ca_path: Option<&Path>) -> Result<()> {
        sys::load_verify_locations(&self.ctx, ca_file, ca_path).map_err(|e| {
            Error::config("SSL_CTX_load_verify_locations", "failed to load verify locations", &e)
        })
    }

    /// Install the CRLs found in `pem` and turn on CRL checking for the
    /// whole chain.
    ///
    /// Not transactional: CRLs added before a failing entry stay installed.
    pub fn set_crls(&mut self, pem: &[u8]) -> Result<()> {
        let blocks = crl_blocks(pem)
            .filter(|blocks| !blocks.is_empty())
            .ok_or_else(|| Error::config_drained("PEM_read_bio_X509_CRL", "failed to read CRLs"))?;

        for block in blocks {
            let crl = X509Crl::from_der(block.contents())
                .map_err(|e| Error::config("PEM_read_bio_X509_CRL", "failed to read CRLs", &e))?;
            sys::add_crl(&self.ctx, &crl)
                .map_err(|e| Error::config("X509_STORE_add_crl", "failed to add CRL", &e))?;
        }

        sys::set_store_flags(&self.ctx, X509VerifyFlags::CRL_CHECK | X509VerifyFlags::CRL_CHECK_ALL)
            .map_err(|e| Error::config("X509_STORE_set_flags", "failed to set CRL flags", &e))
    }

    /// Start a client connection over `fd`. The handshake is driven by
    /// [`Connection::handshake`].
    pub fn connect(self: &Arc<Self>, fd: RawFd, options: &ConnectOptions) -> Result<Connection> {
        let ssl = self.new_ssl(options)?;
        debug!(
            "client connection on fd {} (servername: {:?})",
            fd, options.servername
        );
        Connection::new(Role::Client, ssl, fd, ConfigRef::Client(Arc::clone(self)))
    }

    /// Number of resumable sessions currently cached
    pub fn cached_sessions(&self) -> usize {
        self.sessions.as_ref().map_or(0, |cache| {
            cache.run_pending_tasks();
            usize::try_from(cache.entry_count()).unwrap_or(usize::MAX)
        })
    }

    fn new_ssl(&self, options: &ConnectOptions) -> Result<Ssl> {
        let mut ssl = Ssl::new(&self.ctx)
            .map_err(|e| Error::tls("SSL_new", "failed to create SSL context", &e))?;

        ssl.set_status_type(StatusType::OCSP)
            .map_err(|e| Error::tls("SSL_set_tlsext_status_type", "failed to request OCSP stapling", &e))?;

        let hostname = options
            .servername
            .as_deref()
            .filter(|name| !name.is_empty() && !is_ip_literal(name));

        if let Some(name) = hostname {
            ssl.set_hostname(name).map_err(|e| {
                Error::tls("SSL_set_tlsext_host_name", "failed to set server name indication (SNI)", &e)
            })?;
            if !options.noverify_name {
                ssl.param_mut()
                    .set_host(name)
                    .map_err(|e| Error::tls("SSL_set1_host", "failed to set hostname for verification", &e))?;
            }
            if let Some(cache) = &self.sessions {
                offer_cached_session(&mut ssl, cache, SessionKey::new(name, options))?;
            }
        }

        if options.noverify_cert {
            ssl.set_verify(SslVerifyMode::NONE);
        } else if options.noverify_time {
            ssl.set_verify_callback(SslVerifyMode::PEER, tolerate_validity_period);
        } else {
            ssl.set_verify(SslVerifyMode::PEER);
        }

        Ok(ssl)
    }
}

/// Client configuration builder
pub struct ClientConfigBuilder {
    protocol: Protocol,
    cipher_policy: CipherPolicy,
    cache_timeout: i64,
    cache_size: i64,
    prefer_client_ciphers: bool,
    error_callback: Option<Arc<ErrorCallback>>,
}

impl ClientConfigBuilder {
    fn new() -> Self {
        ClientConfigBuilder {
            protocol: Protocol::Default,
            cipher_policy: CipherPolicy::Secure,
            cache_timeout: 0,
            cache_size: i64::from(DEFAULT_SESSION_CACHE_SIZE),
            prefer_client_ciphers: false,
            error_callback: None,
        }
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn cipher_policy(mut self, cipher_policy: CipherPolicy) -> Self {
        self.cipher_policy = cipher_policy;
        self
    }

    /// Session lifetime in seconds; `<= 0` disables caching and tickets
    pub fn cache_timeout(mut self, seconds: i64) -> Self {
        self.cache_timeout = seconds;
        self
    }

    /// Maximum cached sessions; `<= 0` leaves the cache unbounded
    pub fn cache_size(mut self, entries: i64) -> Self {
        self.cache_size = entries;
        self
    }

    /// Keep the client's cipher order instead of the server's
    pub fn prefer_client_ciphers(mut self, prefer: bool) -> Self {
        self.prefer_client_ciphers = prefer;
        self
    }

    /// Receive OCSP diagnostics as `(operation, message)`
    pub fn error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.error_callback = Some(Arc::new(callback));
        self
    }

    /// Build the client configuration
    pub fn build(self) -> Result<ClientConfig> {
        provider::ensure_initialized();

        let mut builder = SslContextBuilder::new(SslMethod::tls_client())
            .map_err(|e| Error::config("SSL_CTX_new", "failed to create SSL_CTX", &e))?;

        sys::clear_mode(&mut builder, SslMode::AUTO_RETRY);
        builder.set_mode(SslMode::ENABLE_PARTIAL_WRITE | SslMode::ACCEPT_MOVING_WRITE_BUFFER);

        self.protocol
            .apply(&mut builder)
            .map_err(|e| Error::config("tls_set_protocol_vers", "failed to set protocol version", &e))?;
        self.cipher_policy
            .apply(&mut builder)
            .map_err(|e| Error::config("tls_set_cipher_suite", "failed to set cipher suite", &e))?;

        let sessions = if self.cache_timeout <= 0 {
            builder.set_session_cache_mode(SslSessionCacheMode::OFF);
            builder.set_options(SslOptions::NO_TICKET);
            builder
                .set_num_tickets(0)
                .map_err(|e| Error::config("SSL_CTX_set_num_tickets", "failed to set number of tickets", &e))?;
            None
        } else {
            let timeout = u32::try_from(self.cache_timeout).unwrap_or(u32::MAX);
            builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);
            sys::set_session_timeout(&mut builder, timeout);
            let capacity = match u32::try_from(self.cache_size) {
                Ok(size) if size > 0 => {
                    sys::set_session_cache_size(&mut builder, size);
                    u64::from(size)
                }
                _ => 0,
            };
            builder
                .set_num_tickets(2)
                .map_err(|e| Error::config("SSL_CTX_set_num_tickets", "failed to set number of tickets", &e))?;

            let cache: SessionCache = cache::expiring_cache(Duration::from_secs(u64::from(timeout)), capacity);
            let sink = cache.clone();
            builder.set_new_session_callback(move |ssl, session| remember_session(&sink, ssl, session));
            Some(cache)
        };

        if !self.prefer_client_ciphers {
            builder.set_options(SslOptions::CIPHER_SERVER_PREFERENCE);
        }

        builder.set_default_verify_paths().map_err(|e| {
            Error::config("SSL_CTX_set_default_verify_paths", "failed to set default verify paths", &e)
        })?;

        builder
            .set_status_callback(ocsp::status_callback(Reporter::new(self.error_callback)))
            .map_err(|e| Error::config("SSL_CTX_set_tlsext_status_cb", "failed to set default OCSP callback", &e))?;

        debug!(
            "client config: protocol {}, ciphers {}, session cache {}",
            self.protocol,
            self.cipher_policy,
            if sessions.is_some() { "on" } else { "off" }
        );

        Ok(ClientConfig {
            ctx: builder.build(),
            sessions,
        })
    }
}

fn remember_session(cache: &SessionCache, ssl: &SslRef, session: SslSession) {
    let Ok(index) = provider::session_key_index() else {
        return;
    };
    if let Some(key) = ssl.ex_data(index) {
        debug!("caching session for {}", key.servername);
        cache.insert(key.clone(), session);
    }
}

fn offer_cached_session(ssl: &mut SslRef, cache: &SessionCache, key: SessionKey) -> Result<()> {
    let index = provider::session_key_index()
        .map_err(|e| Error::tls("SSL_get_ex_new_index", "failed to allocate session slot", &e))?;

    if let Some(session) = cache.get(&key) {
        // every cached session was negotiated through this configuration's context
        unsafe { ssl.set_session(&session) }
            .map_err(|e| Error::tls("SSL_set_session", "failed to set cached session", &e))?;
        debug!("offering cached session for {}", key.servername);
    }
    ssl.set_ex_data(index, key);
    Ok(())
}

fn tolerate_validity_period(preverify_ok: bool, ctx: &mut X509StoreContextRef) -> bool {
    if preverify_ok {
        return true;
    }
    let code = ctx.error().as_raw();
    code == ffi::X509_V_ERR_CERT_HAS_EXPIRED || code == ffi::X509_V_ERR_CERT_NOT_YET_VALID
}

/// `X509 CRL` blocks of a PEM blob; text between blocks and blocks with
/// other labels are skipped
fn crl_blocks(blob: &[u8]) -> Option<Vec<pem::Pem>> {
    let blocks = pem::parse_many(blob).ok()?;
    Some(blocks.into_iter().filter(|block| block.tag() == CRL_TAG).collect())
}
