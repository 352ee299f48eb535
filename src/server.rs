//! Server configuration
//!
//! A `ServerConfig` loads a certificate chain and key into an OpenSSL server
//! context. A server name hook can redirect a connection to another
//! configuration during the handshake, based on the SNI hostname the client
//! sent.
//!
//! The hook is stored behind a lock shared with the context's servername
//! callback, so it can be replaced or cleared while connections are being
//! accepted. A hook that owns an `Arc` of its own configuration keeps that
//! configuration alive until `clear_sni_callback` is called.

use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, warn};
use openssl::ssl::{
    NameType, SniError, Ssl, SslContext, SslContextBuilder, SslFiletype, SslMethod, SslMode,
    SslOptions, SslRef, SslSessionCacheMode,
};

use crate::config::{
    is_ip_literal, CipherPolicy, Protocol, DEFAULT_SESSION_CACHE_SIZE, DEFAULT_SESSION_TIMEOUT,
};
use crate::error::{BoxError, Error, Result};
use crate::ocsp;
use crate::provider;
use crate::session::{ConfigRef, Connection, Role};
use crate::sys;

/// Server name hook: the configuration to switch to, or `None` to keep the
/// current one
pub type SniCallback =
    dyn Fn(&str) -> std::result::Result<Option<Arc<ServerConfig>>, BoxError> + Send + Sync;

type SniSlot = Arc<RwLock<Option<Arc<SniCallback>>>>;

/// TLS server configuration
pub struct ServerConfig {
    ctx: SslContext,
    sni: SniSlot,
}

impl ServerConfig {
    /// Create a new server configuration builder from PEM files.
    ///
    /// `cert` may hold the leaf followed by intermediates; the whole chain
    /// is presented to clients.
    pub fn builder(cert: impl AsRef<Path>, key: impl AsRef<Path>) -> ServerConfigBuilder {
        ServerConfigBuilder::new(cert.as_ref().to_path_buf(), key.as_ref().to_path_buf())
    }

    /// Configuration with the default session timeout and cache size
    pub fn new(
        cert: impl AsRef<Path>,
        key: impl AsRef<Path>,
        protocol: Protocol,
        cipher_policy: CipherPolicy,
    ) -> Result<Self> {
        ServerConfig::builder(cert, key)
            .protocol(protocol)
            .cipher_policy(cipher_policy)
            .build()
    }

    /// Install the server name hook, replacing any previous one
    pub fn set_sni_callback<F>(&self, callback: F)
    where
        F: Fn(&str) -> std::result::Result<Option<Arc<ServerConfig>>, BoxError> + Send + Sync + 'static,
    {
        let mut slot = self.sni.write().unwrap_or_else(PoisonError::into_inner);
        drop(slot.take());
        *slot = Some(Arc::new(callback));
    }

    /// Remove the server name hook
    pub fn clear_sni_callback(&self) {
        let mut slot = self.sni.write().unwrap_or_else(PoisonError::into_inner);
        drop(slot.take());
    }

    /// Start a server connection over `fd`. The handshake is driven by
    /// [`Connection::handshake`].
    pub fn accept(self: &Arc<Self>, fd: RawFd) -> Result<Connection> {
        let ssl = Ssl::new(&self.ctx)
            .map_err(|e| Error::tls("SSL_new", "failed to create SSL context", &e))?;
        debug!("server connection on fd {}", fd);
        Connection::new(Role::Server, ssl, fd, ConfigRef::Server(Arc::clone(self)))
    }

    pub(crate) fn context(&self) -> &SslContext {
        &self.ctx
    }
}

/// Server configuration builder
pub struct ServerConfigBuilder {
    cert: PathBuf,
    key: PathBuf,
    protocol: Protocol,
    cipher_policy: CipherPolicy,
    session_timeout: u32,
    session_cache_size: u32,
    ocsp_staple: Option<Arc<[u8]>>,
}

impl ServerConfigBuilder {
    fn new(cert: PathBuf, key: PathBuf) -> Self {
        ServerConfigBuilder {
            cert,
            key,
            protocol: Protocol::Default,
            cipher_policy: CipherPolicy::Secure,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            session_cache_size: DEFAULT_SESSION_CACHE_SIZE,
            ocsp_staple: None,
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

    /// Session lifetime in seconds
    pub fn session_timeout(mut self, seconds: u32) -> Self {
        self.session_timeout = seconds;
        self
    }

    pub fn session_cache_size(mut self, entries: u32) -> Self {
        self.session_cache_size = entries;
        self
    }

    /// Staple this DER-encoded OCSP response when a client asks for one
    pub fn ocsp_staple(mut self, der: impl Into<Vec<u8>>) -> Self {
        self.ocsp_staple = Some(Arc::from(der.into()));
        self
    }

    /// Build the server configuration
    pub fn build(self) -> Result<ServerConfig> {
        provider::ensure_initialized();

        let mut builder = SslContextBuilder::new(SslMethod::tls_server())
            .map_err(|e| Error::config("SSL_CTX_new", "failed to create SSL_CTX", &e))?;

        sys::clear_mode(&mut builder, SslMode::AUTO_RETRY);
        builder.set_mode(SslMode::ENABLE_PARTIAL_WRITE | SslMode::ACCEPT_MOVING_WRITE_BUFFER);

        builder
            .set_certificate_chain_file(&self.cert)
            .map_err(|e| Error::config("SSL_CTX_use_certificate_file", "failed to load certificate", &e))?;
        builder
            .set_private_key_file(&self.key, SslFiletype::PEM)
            .map_err(|e| Error::config("SSL_CTX_use_PrivateKey_file", "failed to load private key", &e))?;
        builder
            .check_private_key()
            .map_err(|e| Error::config("SSL_CTX_use_PrivateKey_file", "private key does not match certificate", &e))?;

        self.protocol
            .apply(&mut builder)
            .map_err(|e| Error::config("tls_set_protocol_vers", "failed to set protocol version", &e))?;
        self.cipher_policy
            .apply(&mut builder)
            .map_err(|e| Error::config("tls_set_cipher_suite", "failed to set cipher suite", &e))?;
        sys::set_dh_auto(&mut builder)
            .map_err(|e| Error::config("SSL_CTX_set_dh_auto", "failed to enable automatic DH parameters", &e))?;

        builder.set_session_cache_mode(SslSessionCacheMode::SERVER);
        sys::set_session_timeout(&mut builder, self.session_timeout);
        sys::set_session_cache_size(&mut builder, self.session_cache_size);
        builder.set_options(SslOptions::NO_TICKET | SslOptions::CIPHER_SERVER_PREFERENCE);

        let sni: SniSlot = Arc::new(RwLock::new(None));
        let slot = Arc::clone(&sni);
        builder.set_servername_callback(move |ssl, _alert| dispatch_servername(&slot, ssl));

        if let Some(staple) = self.ocsp_staple {
            builder
                .set_status_callback(ocsp::staple_callback(staple))
                .map_err(|e| Error::config("SSL_CTX_set_tlsext_status_cb", "failed to set OCSP staple callback", &e))?;
        }

        debug!(
            "server config: cert {}, protocol {}, ciphers {}",
            self.cert.display(),
            self.protocol,
            self.cipher_policy
        );

        Ok(ServerConfig {
            ctx: builder.build(),
            sni,
        })
    }
}

fn dispatch_servername(slot: &RwLock<Option<Arc<SniCallback>>>, ssl: &mut SslRef) -> std::result::Result<(), SniError> {
    let name = match ssl.servername(NameType::HOST_NAME) {
        Some(name) if !is_ip_literal(name) => name.to_string(),
        _ => return Err(SniError::NOACK),
    };

    // call without holding the lock; the hook may replace itself
    let hook = match slot.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
        Some(hook) => Arc::clone(hook),
        None => return Err(SniError::NOACK),
    };

    match hook(&name) {
        Ok(Some(config)) => {
            ssl.set_ssl_context(config.context()).map_err(|e| {
                warn!("failed to switch context for {}: {}", name, e);
                SniError::ALERT_FATAL
            })?;
            debug!("switched to the configuration for {}", name);
            Ok(())
        }
        Ok(None) => {
            debug!("keeping default configuration for {}", name);
            Err(SniError::NOACK)
        }
        Err(e) => {
            warn!("server name callback failed for {}: {}", name, e);
            // sent as a fatal unrecognized_name (112) alert; `SslAlert` has
            // no internal_error value to set instead
            Err(SniError::ALERT_FATAL)
        }
    }
}
