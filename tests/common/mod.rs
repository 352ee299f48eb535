//! Shared helpers for the integration tests
//!
//! Certificates and OCSP responses are generated at runtime, the
//! certificates into a temporary directory; the CRL/OCSP fixtures under
//! `tests/fixtures/` come from `generate.sh`.

#![allow(dead_code)]

use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use nbtls::{ClientConfig, ConnectOptions, Connection, Progress, ServerConfig};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey, PointConversionForm};
use openssl::hash::{hash, MessageDigest};
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509Name, X509NameBuilder, X509};
use tempfile::TempDir;

static SERIAL: AtomicU32 = AtomicU32::new(1);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Connected, non-blocking socket pair
pub fn socket_pair() -> (UnixStream, UnixStream) {
    let (a, b) = UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();
    b.set_nonblocking(true).unwrap();
    (a, b)
}

fn new_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn name(cn: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_text("CN", cn).unwrap();
    builder.build()
}

fn serial_number(serial: u32) -> openssl::asn1::Asn1Integer {
    BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap()
}

/// Certificate and key files for a server
pub struct Identity {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Throwaway CA writing its certificates into a temporary directory
pub struct Pki {
    dir: TempDir,
    ca_cert: X509,
    ca_key: PKey<Private>,
    pub ca_file: PathBuf,
}

impl Pki {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ca_key = new_key();
        let ca_name = name("runtime test CA");

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial_number(1)).unwrap();
        builder.set_subject_name(&ca_name).unwrap();
        builder.set_issuer_name(&ca_name).unwrap();
        builder.set_pubkey(&ca_key).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(3650).unwrap()).unwrap();
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .digital_signature()
                    .build()
                    .unwrap(),
            )
            .unwrap();
        builder.sign(&ca_key, MessageDigest::sha256()).unwrap();
        let ca_cert = builder.build();

        let ca_file = dir.path().join("ca.pem");
        std::fs::write(&ca_file, ca_cert.to_pem().unwrap()).unwrap();

        Pki {
            dir,
            ca_cert,
            ca_key,
            ca_file,
        }
    }

    /// Leaf for `cn`, valid from yesterday for 30 days
    pub fn leaf(&self, cn: &str) -> Identity {
        let now = unix_now();
        self.issue(
            cn,
            &Asn1Time::from_unix(now - 86_400).unwrap(),
            &Asn1Time::from_unix(now + 30 * 86_400).unwrap(),
        )
    }

    /// Leaf for `cn` that expired a week ago
    pub fn expired_leaf(&self, cn: &str) -> Identity {
        let now = unix_now();
        self.issue(
            cn,
            &Asn1Time::from_unix(now - 30 * 86_400).unwrap(),
            &Asn1Time::from_unix(now - 7 * 86_400).unwrap(),
        )
    }

    /// Leaf with SAN `DNS:cn`; the certificate file also carries the CA
    pub fn issue(&self, cn: &str, not_before: &Asn1TimeRef, not_after: &Asn1TimeRef) -> Identity {
        let key = new_key();
        let serial = SERIAL.fetch_add(1, Ordering::Relaxed) + 1;

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial_number(serial)).unwrap();
        builder.set_subject_name(&name(cn)).unwrap();
        builder.set_issuer_name(self.ca_cert.subject_name()).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.set_not_before(not_before).unwrap();
        builder.set_not_after(not_after).unwrap();
        builder
            .append_extension(BasicConstraints::new().build().unwrap())
            .unwrap();
        builder
            .append_extension(ExtendedKeyUsage::new().server_auth().build().unwrap())
            .unwrap();
        let san = SubjectAlternativeName::new()
            .dns(cn)
            .build(&builder.x509v3_context(Some(self.ca_cert.as_ref()), None))
            .unwrap();
        builder.append_extension(san).unwrap();
        builder.sign(&self.ca_key, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        let cert_path = self.dir.path().join(format!("{}-{}.pem", cn, serial));
        let key_path = self.dir.path().join(format!("{}-{}.key", cn, serial));

        let mut chain = cert.to_pem().unwrap();
        chain.extend(self.ca_cert.to_pem().unwrap());
        std::fs::write(&cert_path, chain).unwrap();
        std::fs::write(&key_path, key.private_key_to_pem_pkcs8().unwrap()).unwrap();

        Identity {
            cert: cert_path,
            key: key_path,
        }
    }

    /// DER OCSP response, signed by this CA, reporting `identity` as good
    /// for `[this_update, next_update]` (unix seconds)
    pub fn good_ocsp_response(&self, identity: &Identity, this_update: i64, next_update: i64) -> Vec<u8> {
        let pem = std::fs::read(&identity.cert).unwrap();
        let leaf = X509::from_pem(&pem).unwrap();

        let name_der = self.ca_cert.subject_name().to_der().unwrap();
        let ca_pub = self.ca_cert.public_key().unwrap().ec_key().unwrap();
        let mut ctx = BigNumContext::new().unwrap();
        let key_bits = ca_pub
            .public_key()
            .to_bytes(ca_pub.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)
            .unwrap();

        let mut serial = leaf.serial_number().to_bn().unwrap().to_vec();
        if serial.first().map_or(true, |b| b & 0x80 != 0) {
            serial.insert(0, 0);
        }

        let cert_id = der(
            0x30,
            &[
                SHA1_ALGORITHM.to_vec(),
                der(0x04, &hash(MessageDigest::sha1(), &name_der).unwrap()),
                der(0x04, &hash(MessageDigest::sha1(), &key_bits).unwrap()),
                der(0x02, &serial),
            ]
            .concat(),
        );
        let single = der(
            0x30,
            &[
                cert_id,
                vec![0x80, 0x00],
                generalized_time(this_update),
                der(0xa0, &generalized_time(next_update)),
            ]
            .concat(),
        );
        let tbs = der(
            0x30,
            &[
                der(0xa1, &name_der),
                generalized_time(this_update),
                der(0x30, &single),
            ]
            .concat(),
        );

        let mut signer = Signer::new(MessageDigest::sha256(), &self.ca_key).unwrap();
        let signature = signer.sign_oneshot_to_vec(&tbs).unwrap();
        let basic = der(
            0x30,
            &[
                tbs,
                ECDSA_SHA256_ALGORITHM.to_vec(),
                der(0x03, &[&[0u8][..], signature.as_slice()].concat()),
            ]
            .concat(),
        );

        let bytes = der(0x30, &[OCSP_BASIC_OID.to_vec(), der(0x04, &basic)].concat());
        der(0x30, &[vec![0x0a, 0x01, 0x00], der(0xa0, &bytes)].concat())
    }

    /// Server configuration for `identity` with default policy
    pub fn server(&self, identity: &Identity) -> Arc<ServerConfig> {
        Arc::new(
            ServerConfig::builder(&identity.cert, &identity.key)
                .build()
                .unwrap(),
        )
    }

    /// Client configuration trusting this CA
    pub fn client(&self) -> Arc<ClientConfig> {
        let mut config = ClientConfig::builder().build().unwrap();
        config.load_verify_locations(Some(&self.ca_file), None).unwrap();
        Arc::new(config)
    }
}

// AlgorithmIdentifier { sha1, NULL }
const SHA1_ALGORITHM: &[u8] = &[0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00];
// AlgorithmIdentifier { ecdsa-with-SHA256 }
const ECDSA_SHA256_ALGORITHM: &[u8] = &[0x30, 0x0a, 0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];
// id-pkix-ocsp-basic
const OCSP_BASIC_OID: &[u8] = &[0x06, 0x09, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01, 0x01];

fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

/// DER GeneralizedTime for a unix timestamp
fn generalized_time(unix: i64) -> Vec<u8> {
    let days = unix.div_euclid(86_400);
    let secs = unix.rem_euclid(86_400);
    // civil-from-days, proleptic Gregorian
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    let text = format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}Z",
        year,
        month,
        day,
        secs / 3_600,
        secs / 60 % 60,
        secs % 60
    );
    der(0x18, text.as_bytes())
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Both ends of a connection, plus the sockets they run over
pub struct Pair {
    pub client: Connection,
    pub server: Connection,
    pub client_socket: UnixStream,
    pub server_socket: UnixStream,
}

impl Pair {
    pub fn new(client: &Arc<ClientConfig>, server: &Arc<ServerConfig>, options: &ConnectOptions) -> Self {
        let (client_socket, server_socket) = socket_pair();
        let client = client.connect(client_socket.as_raw_fd(), options).unwrap();
        let server = server.accept(server_socket.as_raw_fd()).unwrap();
        Pair {
            client,
            server,
            client_socket,
            server_socket,
        }
    }

    /// Alternate handshake steps until neither side would block
    pub fn handshake(&mut self) -> (nbtls::Result<Progress>, nbtls::Result<Progress>) {
        let mut client = Ok(Progress::WouldBlock(nbtls::Direction::Read));
        let mut server = Ok(Progress::WouldBlock(nbtls::Direction::Read));

        for _ in 0..200 {
            if pending(&client) {
                client = self.client.handshake();
            }
            if pending(&server) {
                server = self.server.handshake();
            }
            if !pending(&client) && !pending(&server) {
                break;
            }
        }
        (client, server)
    }

    /// Handshake that must succeed on both sides
    pub fn establish(&mut self) {
        let (client, server) = self.handshake();
        assert_eq!(client.unwrap(), Progress::Done);
        assert_eq!(server.unwrap(), Progress::Done);
    }
}

fn pending(result: &nbtls::Result<Progress>) -> bool {
    matches!(result, Ok(Progress::WouldBlock(_)))
}
