//! Negotiated connection parameters
//!
//! A snapshot taken from a connection, available by field or by dotted
//! name (`tls.version`, `tls.cert1.issuer`, ...).

use openssl::ssl::{NameType, SslRef};

use crate::cert::{peer_chain, CertInfo};

const UNDEF: &str = "<undef>";

/// Parameters of a connection
#[derive(Debug, Clone)]
pub struct TlsVars {
    /// Negotiated TLS version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// Server name sent (client) or received (server) via SNI
    pub servername: Option<String>,

    /// Whether the handshake has completed
    pub established: bool,

    /// Certificate chain (index 0 is peer cert)
    pub cert_chain: Vec<CertInfo>,

    /// Whether session was resumed
    pub sess_reused: bool,
}

impl TlsVars {
    pub(crate) fn from_ssl(ssl: &SslRef, established: bool) -> Self {
        if !established {
            return TlsVars {
                servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
                ..Default::default()
            };
        }

        TlsVars {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| UNDEF.to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            established,
            cert_chain: peer_chain(ssl),
            sess_reused: ssl.session_reused(),
        }
    }

    /// Certificate info by index (0 = peer cert, 1+ = chain)
    pub fn cert(&self, index: usize) -> Option<&CertInfo> {
        self.cert_chain.get(index)
    }

    /// Look a parameter up by name
    pub fn get(&self, name: &str) -> Option<String> {
        let flag = |b: bool| Some(if b { "true" } else { "false" }.to_string());
        match name {
            "tls.version" => Some(self.version.clone()),
            "tls.cipher" => Some(self.cipher.clone()),
            "tls.servername" => Some(self.servername.clone().unwrap_or_else(|| UNDEF.to_string())),
            "tls.established" => flag(self.established),
            "tls.sess_reused" => flag(self.sess_reused),
            _ if name.starts_with("tls.cert") => self.cert_var(name),
            _ => None,
        }
    }

    // tls.certN.field, or tls.cert.field for N = 0
    fn cert_var(&self, name: &str) -> Option<String> {
        let remaining = name.strip_prefix("tls.cert")?;
        let (index, field) = match remaining.strip_prefix('.') {
            Some(field) => (0, field),
            None => {
                let (index, field) = remaining.split_once('.')?;
                (index.parse().ok()?, field)
            }
        };

        let cert = self.cert(index)?;
        match field {
            "subject" => Some(cert.subject.clone()),
            "issuer" => Some(cert.issuer.clone()),
            "subject_alt_names" if cert.subject_alt_names.is_empty() => Some(UNDEF.to_string()),
            "subject_alt_names" => Some(cert.subject_alt_names.join(", ")),
            _ => None,
        }
    }
}

impl Default for TlsVars {
    fn default() -> Self {
        TlsVars {
            version: UNDEF.to_string(),
            cipher: UNDEF.to_string(),
            servername: None,
            established: false,
            cert_chain: Vec::new(),
            sess_reused: false,
        }
    }
}
