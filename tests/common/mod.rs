//! Shared test fixtures: a CA with server and client certificates, CRLs
//! and on-disk PEM files, all minted with rcgen.

#![allow(dead_code)]

use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, Ia5String, IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose,
    RevokedCertParams, SanType, SerialNumber,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use time::{Duration as TimeDuration, OffsetDateTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub const KEY_PASSWORD: &str = "test123";
pub const CLIENT_SERIAL: &[u8] = &[0x4a, 0x2b, 0x3c, 0x1d];

/// A CA plus one server and one client certificate, written to a temp dir
/// the way an operator would lay them out on disk.
pub struct CertsBundle {
    pub dir: TempDir,

    pub ca_cert: PathBuf,
    pub empty_crl: PathBuf,
    pub client_crl: PathBuf,

    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub server_key_encrypted: PathBuf,

    pub client_cert: PathBuf,
    pub client_key: PathBuf,

    ca_der: CertificateDer<'static>,
    client_der: CertificateDer<'static>,
    client_key_der: Vec<u8>,
}

impl CertsBundle {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");

        let ca_key = KeyPair::generate().expect("CA key");
        let mut ca_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "test-ca");
        ca_params.distinguished_name = dn;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        ca_params.serial_number = Some(SerialNumber::from(vec![0x01]));
        let ca = ca_params.self_signed(&ca_key).expect("CA cert");

        let server_key = KeyPair::generate().expect("server key");
        let mut server_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "test-server");
        server_params.distinguished_name = dn;
        server_params.subject_alt_names = vec![
            SanType::DnsName(Ia5String::try_from("localhost").expect("dns san")),
            SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        ];
        server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        server_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        server_params.serial_number = Some(SerialNumber::from(vec![0x02]));
        let server = server_params
            .signed_by(&server_key, &ca, &ca_key)
            .expect("server cert");

        let client_key = KeyPair::generate().expect("client key");
        let mut client_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "test-client");
        client_params.distinguished_name = dn;
        client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        client_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        client_params.serial_number = Some(SerialNumber::from(CLIENT_SERIAL.to_vec()));
        let client = client_params
            .signed_by(&client_key, &ca, &ca_key)
            .expect("client cert");

        let empty_crl_pem = crl_pem(&ca, &ca_key, &[]);
        let client_crl_pem = crl_pem(&ca, &ca_key, &[CLIENT_SERIAL]);

        fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
            let path = dir.path().join(name);
            std::fs::write(&path, contents).expect("write fixture");
            path
        }

        let server_key_pem = server_key.serialize_pem();
        let encrypted = cert_source::keyutil::encrypt_private_key_pem(
            server_key_pem.as_bytes(),
            KEY_PASSWORD,
        )
        .expect("encrypt server key");

        Self {
            ca_cert: write(&dir, "ca-cert.pem", &ca.pem()),
            empty_crl: write(&dir, "ca-empty-crl.pem", &empty_crl_pem),
            client_crl: write(&dir, "client-crl.pem", &client_crl_pem),
            server_cert: write(&dir, "server-cert.pem", &server.pem()),
            server_key: write(&dir, "server-key.pem", &server_key_pem),
            server_key_encrypted: write(&dir, "server-key-encrypted.pem", &encrypted),
            client_cert: write(&dir, "client-cert.pem", &client.pem()),
            client_key: write(&dir, "client-key.pem", &client_key.serialize_pem()),
            ca_der: ca.der().clone(),
            client_der: client.der().clone(),
            client_key_der: client_key.serialize_der(),
            dir,
        }
    }

    pub fn expected_client_serial(&self) -> String {
        CLIENT_SERIAL
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    }

    fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca_der.clone()).expect("CA into roots");
        roots
    }

    /// Client config trusting this bundle's CA and presenting its client
    /// certificate.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::builder()
            .with_root_certificates(self.roots())
            .with_client_auth_cert(
                vec![self.client_der.clone()],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.client_key_der.clone())),
            )
            .expect("client config")
    }

    /// Client config trusting this bundle's CA without a client certificate.
    pub fn client_config_no_cert(&self) -> ClientConfig {
        ClientConfig::builder()
            .with_root_certificates(self.roots())
            .with_no_client_auth()
    }
}

fn crl_pem(ca: &rcgen::Certificate, ca_key: &KeyPair, revoked: &[&[u8]]) -> String {
    let params = CertificateRevocationListParams {
        this_update: OffsetDateTime::now_utc() - TimeDuration::minutes(1),
        next_update: OffsetDateTime::now_utc() + TimeDuration::hours(1),
        crl_number: SerialNumber::from(vec![0x09]),
        issuing_distribution_point: None,
        revoked_certs: revoked
            .iter()
            .map(|serial| RevokedCertParams {
                serial_number: SerialNumber::from(serial.to_vec()),
                revocation_time: OffsetDateTime::now_utc() - TimeDuration::minutes(1),
                reason_code: None,
                invalidity_date: None,
            })
            .collect(),
        key_identifier_method: KeyIdMethod::Sha256,
    };
    params.signed_by(ca, ca_key).expect("CRL").pem().expect("CRL PEM")
}

/// Accepts a single TLS connection, echoes one byte, and returns the
/// server-side result. Handshake failures surface here as errors.
pub async fn serve_one(listener: TcpListener, config: ServerConfig) -> std::io::Result<()> {
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let (tcp, _) = listener.accept().await?;
    let mut tls = acceptor.accept(tcp).await?;

    let mut buf = [0u8; 1];
    tls.read_exact(&mut buf).await?;
    tls.write_all(&buf).await?;
    tls.shutdown().await?;
    Ok(())
}

/// Connects, writes one byte and expects it echoed back.
pub async fn roundtrip(addr: SocketAddr, config: ClientConfig) -> std::io::Result<()> {
    let connector = TlsConnector::from(Arc::new(config));
    let tcp = TcpStream::connect(addr).await?;
    let name = ServerName::try_from("localhost").expect("server name");
    let mut tls = connector.connect(name, tcp).await?;

    tls.write_all(b"x").await?;
    let mut buf = [0u8; 1];
    tls.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"x");
    let _ = tls.shutdown().await;
    Ok(())
}
