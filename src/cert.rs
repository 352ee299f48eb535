//! Peer certificate summaries

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use openssl::nid::Nid;
use openssl::ssl::SslRef;
use openssl::x509::{X509NameRef, X509Ref};

const UNDEF: &str = "<undef>";

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names, as `DNS:name` or `IP:addr`
    pub subject_alt_names: Vec<String>,
}

impl CertInfo {
    pub fn from_x509(cert: &X509Ref) -> Self {
        CertInfo {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            subject_alt_names: subject_alt_names(cert),
        }
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| UNDEF.to_string())
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let Some(names) = cert.subject_alt_names() else {
        return Vec::new();
    };

    names
        .iter()
        .filter_map(|name| {
            if let Some(dns) = name.dnsname() {
                return Some(format!("DNS:{}", dns));
            }
            let ip = match name.ipaddress()? {
                [a, b, c, d] => IpAddr::V4(Ipv4Addr::new(*a, *b, *c, *d)),
                raw => IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(raw).ok()?)),
            };
            Some(format!("IP:{}", ip))
        })
        .collect()
}

/// Peer certificate first, then the rest of the presented chain.
///
/// A client sees the leaf repeated at the head of the chain; it is listed
/// once.
pub fn peer_chain(ssl: &SslRef) -> Vec<CertInfo> {
    let mut chain = Vec::new();
    let leaf = ssl.peer_certificate();
    let leaf_der = leaf.as_ref().and_then(|cert| cert.to_der().ok());

    if let Some(cert) = &leaf {
        chain.push(CertInfo::from_x509(cert));
    }

    if let Some(presented) = ssl.peer_cert_chain() {
        for (i, cert) in presented.iter().enumerate() {
            if i == 0 && leaf_der.is_some() && cert.to_der().ok() == leaf_der {
                continue;
            }
            chain.push(CertInfo::from_x509(cert));
        }
    }

    chain
}
