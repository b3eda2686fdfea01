//! Parsed, immutable credential snapshots.
//!
//! A snapshot is built from a raw PEM bundle in one step: certificates and
//! key are parsed and checked for consistency, CA pools are assembled, and
//! any CRLs are verified against the client-CA pool (issuer match,
//! signature, not expired). A bundle that fails any of these checks never
//! becomes a snapshot; the previous snapshot stays in force.

use crate::error::{Error, Result};
use crate::keyutil;
use crate::pem::{ClientPems, ContentDigest, ServerPems};
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};
use x509_parser::prelude::{CertificateRevocationList, FromDer, X509Certificate};

static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();

/// Installs this crate's crypto provider as the process default before any
/// certified key or TLS configuration is built. Safe to call repeatedly; a
/// provider already installed by the application wins.
pub(crate) fn install_provider() {
    PROVIDER_INSTALLED.get_or_init(|| {
        let _ = crypto_provider().install_default();
    });
}

/// The crypto provider selected by the crate's feature flags, used both as
/// the process default and as the base for cipher-suite and key-exchange
/// overrides in the server factory.
#[cfg(all(feature = "ring", not(feature = "aws-lc-rs")))]
pub(crate) fn crypto_provider() -> rustls::crypto::CryptoProvider {
    rustls::crypto::ring::default_provider()
}

/// The crypto provider selected by the crate's feature flags, used both as
/// the process default and as the base for cipher-suite and key-exchange
/// overrides in the server factory.
#[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
pub(crate) fn crypto_provider() -> rustls::crypto::CryptoProvider {
    rustls::crypto::aws_lc_rs::default_provider()
}

/// Client-CA material for mutual TLS: the verification pool plus the raw
/// CA certificates for CRL issuer matching.
#[derive(Debug, Clone)]
pub(crate) struct ClientCaPool {
    pub(crate) roots: Arc<RootCertStore>,
    pub(crate) ca_ders: Vec<CertificateDer<'static>>,
}

/// A parsed CRL: issuer, revoked serials and validity window. Signature
/// verification happened at snapshot-build time.
#[derive(Debug, Clone)]
pub struct CrlSummary {
    issuer_raw: Vec<u8>,
    issuer: String,
    revoked_serials: Vec<Vec<u8>>,
    next_update: Option<u64>,
}

impl CrlSummary {
    /// Distinguished name of the CRL issuer.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Serial numbers revoked by this CRL.
    pub fn revoked_count(&self) -> usize {
        self.revoked_serials.len()
    }

    pub(crate) fn matches_issuer(&self, issuer_name_der: &[u8]) -> bool {
        self.issuer_raw == issuer_name_der
    }

    /// A CRL whose `NextUpdate` has passed is treated as absent.
    pub(crate) fn is_stale(&self, now: UnixTime) -> bool {
        matches!(self.next_update, Some(next) if next < now.as_secs())
    }

    pub(crate) fn revokes(&self, raw_serial: &[u8]) -> bool {
        self.revoked_serials.iter().any(|s| s == raw_serial)
    }
}

/// Parsed server credentials: certificate chain with private key, optional
/// client-CA pool for mutual TLS and optional verified CRLs, plus the
/// digest of the bundle they were parsed from.
#[derive(Clone)]
pub struct ServerSnapshot {
    digest: ContentDigest,
    certified_key: Arc<CertifiedKey>,
    client_cas: Option<ClientCaPool>,
    crls: Vec<CrlSummary>,
}

impl ServerSnapshot {
    /// Parses and verifies a raw server bundle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for malformed PEM, a certificate chain and
    /// key that do not match, an unusable client-CA pool, or a CRL that
    /// fails verification against the client-CA pool.
    pub fn from_pems(pems: &ServerPems) -> Result<Self> {
        let certified_key = certified_key_from_pems(&pems.cert, &pems.key)?;

        let client_cas = pems
            .client_ca
            .as_deref()
            .map(client_ca_pool_from_pem)
            .transpose()?;

        let crls = match (pems.client_crl.as_deref(), client_cas.as_ref()) {
            (None, _) => Vec::new(),
            (Some(_), None) => {
                return Err(Error::Parse(
                    "client CRL configured without a client CA pool".into(),
                ))
            }
            (Some(crl_pem), Some(pool)) => parse_and_verify_crls(crl_pem, &pool.ca_ders)?,
        };

        Ok(Self {
            digest: pems.digest(),
            certified_key,
            client_cas,
            crls,
        })
    }

    /// Digest of the bundle this snapshot was parsed from.
    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    /// Current server certificate chain and signing key.
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified_key)
    }

    /// Whether a client-CA pool is configured (mutual TLS).
    pub fn has_client_cas(&self) -> bool {
        self.client_cas.is_some()
    }

    pub(crate) fn client_ca_roots(&self) -> Option<Arc<RootCertStore>> {
        self.client_cas.as_ref().map(|p| Arc::clone(&p.roots))
    }

    /// CRLs carried by this snapshot, verified at build time.
    pub fn crls(&self) -> &[CrlSummary] {
        &self.crls
    }
}

impl fmt::Debug for ServerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSnapshot")
            .field("digest", &self.digest)
            .field("certified_key", &"<CertifiedKey>")
            .field("client_cas", &self.client_cas.is_some())
            .field("crls", &self.crls.len())
            .finish()
    }
}

/// Parsed client credentials: optional certificate with key, optional root
/// pool, and the verification flags, plus the source bundle digest.
#[derive(Clone)]
pub struct ClientSnapshot {
    digest: ContentDigest,
    certified_key: Option<Arc<CertifiedKey>>,
    roots: Option<Arc<RootCertStore>>,
    use_system_roots: bool,
    insecure_skip_verify: bool,
}

impl ClientSnapshot {
    /// Parses a raw client bundle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for malformed PEM, a certificate configured
    /// without a key (or vice versa), or an unusable root pool.
    pub fn from_pems(
        pems: &ClientPems,
        use_system_roots: bool,
        insecure_skip_verify: bool,
    ) -> Result<Self> {
        let certified_key = match (pems.cert.as_deref(), pems.key.as_deref()) {
            (Some(cert), Some(key)) => Some(certified_key_from_pems(cert, key)?),
            (None, None) => None,
            _ => {
                return Err(Error::Parse(
                    "client certificate and key must be present together".into(),
                ))
            }
        };

        let roots = pems
            .root_cas
            .as_deref()
            .map(|pem| {
                let ders = certs_from_pem(pem)?;
                root_store_from_ders(ders.iter().cloned(), "root CA")
            })
            .transpose()?;

        Ok(Self {
            digest: pems.digest(),
            certified_key,
            roots,
            use_system_roots,
            insecure_skip_verify,
        })
    }

    /// Digest of the bundle this snapshot was parsed from.
    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    /// Current client certificate chain and signing key, when configured.
    pub fn certified_key(&self) -> Option<Arc<CertifiedKey>> {
        self.certified_key.clone()
    }

    pub(crate) fn roots(&self) -> Option<Arc<RootCertStore>> {
        self.roots.clone()
    }

    /// Whether the process-wide pool was requested for server verification.
    pub fn use_system_roots(&self) -> bool {
        self.use_system_roots
    }

    /// Whether server certificate verification is disabled.
    pub fn insecure_skip_verify(&self) -> bool {
        self.insecure_skip_verify
    }
}

impl fmt::Debug for ClientSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSnapshot")
            .field("digest", &self.digest)
            .field("certified_key", &self.certified_key.is_some())
            .field("roots", &self.roots.is_some())
            .field("use_system_roots", &self.use_system_roots)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

fn certs_from_pem(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Parse(format!("invalid certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(Error::Parse("no certificates found".into()));
    }
    Ok(certs)
}

fn root_store_from_ders(
    ders: impl Iterator<Item = CertificateDer<'static>>,
    what: &str,
) -> Result<Arc<RootCertStore>> {
    let mut store = RootCertStore::empty();
    let _added = store.add_parsable_certificates(ders);
    if store.is_empty() {
        return Err(Error::Parse(format!(
            "no usable {what} certificates in pool"
        )));
    }
    Ok(Arc::new(store))
}

fn client_ca_pool_from_pem(pem: &[u8]) -> Result<ClientCaPool> {
    let ca_ders = certs_from_pem(pem)?;
    let roots = root_store_from_ders(ca_ders.iter().cloned(), "client CA")?;
    Ok(ClientCaPool { roots, ca_ders })
}

/// Builds a `CertifiedKey` from chain and key PEM, verifying that the
/// private key matches the end-entity certificate.
fn certified_key_from_pems(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<CertifiedKey>> {
    install_provider();

    let cert_chain = certs_from_pem(cert_pem)?;
    let key = keyutil::read_private_key(key_pem)?;

    let provider = rustls::crypto::CryptoProvider::get_default()
        .ok_or_else(|| Error::Internal("rustls crypto provider is not installed".into()))?;

    let certified = CertifiedKey::from_der(cert_chain, key, provider)
        .map_err(|e| Error::Parse(format!("certificate/key pair rejected: {e}")))?;

    Ok(Arc::new(certified))
}

/// Parses every CRL block, requiring each to be issued and signed by a CA
/// from the client-CA pool and to still be within its validity window.
fn parse_and_verify_crls(
    crl_pem: &[u8],
    ca_ders: &[CertificateDer<'static>],
) -> Result<Vec<CrlSummary>> {
    let crl_ders: Vec<_> = rustls_pemfile::crls(&mut &crl_pem[..])
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Parse(format!("invalid CRL PEM: {e}")))?;
    if crl_ders.is_empty() {
        return Err(Error::Parse("no CRL found in client CRL file".into()));
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Internal(format!("system clock before epoch: {e}")))?
        .as_secs();

    crl_ders
        .iter()
        .map(|der| verify_one_crl(der.as_ref(), ca_ders, now))
        .collect()
}

fn verify_one_crl(
    crl_der: &[u8],
    ca_ders: &[CertificateDer<'static>],
    now_secs: u64,
) -> Result<CrlSummary> {
    let (_, crl) = CertificateRevocationList::from_der(crl_der)
        .map_err(|e| Error::Parse(format!("invalid CRL: {e}")))?;

    let issuer = crl.issuer().to_string();
    let issuer_raw = crl.issuer().as_raw().to_vec();

    let ca = ca_ders
        .iter()
        .find_map(|ca_der| {
            X509Certificate::from_der(ca_der.as_ref())
                .ok()
                .map(|(_, cert)| cert)
                .filter(|cert| cert.subject().as_raw() == issuer_raw.as_slice())
        })
        .ok_or_else(|| {
            Error::Parse(format!("CRL issuer is not in the client CA pool: {issuer}"))
        })?;

    crl.verify_signature(ca.public_key())
        .map_err(|e| Error::Parse(format!("CRL signature verification failed ({issuer}): {e}")))?;

    let next_update = crl.next_update().map(|t| {
        u64::try_from(t.timestamp()).unwrap_or_default()
    });
    if let Some(next) = next_update {
        if next < now_secs {
            return Err(Error::Parse(format!("CRL is expired: {issuer}")));
        }
    }

    Ok(CrlSummary {
        issuer_raw,
        issuer,
        revoked_serials: crl
            .iter_revoked_certificates()
            .map(|revoked| revoked.raw_serial().to_vec())
            .collect(),
        next_update,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{
        BasicConstraints, CertificateParams, CertificateRevocationListParams, IsCa, KeyIdMethod,
        KeyPair, KeyUsagePurpose, RevokedCertParams, SerialNumber,
    };
    use time::{Duration as TimeDuration, OffsetDateTime};

    struct TestCa {
        cert: rcgen::Certificate,
        key: KeyPair,
    }

    fn make_ca() -> TestCa {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        let cert = params.self_signed(&key).unwrap();
        TestCa { cert, key }
    }

    fn make_leaf(ca: &TestCa, serial: &[u8]) -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.serial_number = Some(SerialNumber::from(serial.to_vec()));
        let cert = params.signed_by(&key, &ca.cert, &ca.key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    fn make_crl(ca: &TestCa, revoked: &[&[u8]], next_update: OffsetDateTime) -> String {
        let this_update = next_update - TimeDuration::minutes(1);
        let params = CertificateRevocationListParams {
            this_update,
            next_update,
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
        params.signed_by(&ca.cert, &ca.key).unwrap().pem().unwrap()
    }

    fn server_pems(ca: &TestCa, crl_pem: Option<String>) -> ServerPems {
        let (cert, key) = make_leaf(ca, &[0x10, 0x20]);
        ServerPems {
            cert: cert.into_bytes(),
            key: key.into_bytes(),
            client_ca: Some(ca.cert.pem().into_bytes()),
            client_crl: crl_pem.map(String::into_bytes),
        }
    }

    #[test]
    fn parses_server_bundle_with_empty_crl() {
        let ca = make_ca();
        let crl = make_crl(&ca, &[], OffsetDateTime::now_utc() + TimeDuration::hours(1));
        let snapshot = ServerSnapshot::from_pems(&server_pems(&ca, Some(crl))).unwrap();

        assert!(snapshot.has_client_cas());
        assert_eq!(snapshot.crls().len(), 1);
        assert_eq!(snapshot.crls()[0].revoked_count(), 0);
    }

    #[test]
    fn snapshot_digest_matches_bundle_digest() {
        let ca = make_ca();
        let pems = server_pems(&ca, None);
        let snapshot = ServerSnapshot::from_pems(&pems).unwrap();
        assert_eq!(snapshot.digest(), &pems.digest());
    }

    #[test]
    fn rejects_mismatched_key_and_cert() {
        let ca = make_ca();
        let (cert, _) = make_leaf(&ca, &[0x11]);
        let (_, other_key) = make_leaf(&ca, &[0x12]);
        let pems = ServerPems {
            cert: cert.into_bytes(),
            key: other_key.into_bytes(),
            client_ca: None,
            client_crl: None,
        };
        let err = ServerSnapshot::from_pems(&pems).unwrap_err();
        assert!(matches!(err, Error::Parse(_)), "got {err}");
    }

    #[test]
    fn rejects_crl_signed_by_unknown_ca() {
        let ca = make_ca();
        let other_ca = make_ca();
        let foreign_crl = make_crl(
            &other_ca,
            &[],
            OffsetDateTime::now_utc() + TimeDuration::hours(1),
        );
        let err = ServerSnapshot::from_pems(&server_pems(&ca, Some(foreign_crl))).unwrap_err();
        assert!(err.to_string().contains("client CA pool"), "got {err}");
    }

    #[test]
    fn rejects_expired_crl_at_build_time() {
        let ca = make_ca();
        let stale = make_crl(&ca, &[], OffsetDateTime::now_utc() - TimeDuration::hours(1));
        let err = ServerSnapshot::from_pems(&server_pems(&ca, Some(stale))).unwrap_err();
        assert!(err.to_string().contains("expired"), "got {err}");
    }

    #[test]
    fn crl_summary_tracks_revoked_serials() {
        let ca = make_ca();
        let serial: &[u8] = &[0x4a, 0x2b, 0x3c];
        let crl = make_crl(
            &ca,
            &[serial],
            OffsetDateTime::now_utc() + TimeDuration::hours(1),
        );
        let snapshot = ServerSnapshot::from_pems(&server_pems(&ca, Some(crl))).unwrap();

        let summary = &snapshot.crls()[0];
        assert!(summary.revokes(serial));
        assert!(!summary.revokes(&[0x01]));
        assert!(!summary.is_stale(UnixTime::now()));
    }

    #[test]
    fn client_snapshot_requires_cert_and_key_together() {
        let ca = make_ca();
        let (cert, _) = make_leaf(&ca, &[0x21]);
        let pems = ClientPems {
            cert: Some(cert.into_bytes()),
            key: None,
            root_cas: None,
        };
        let err = ClientSnapshot::from_pems(&pems, false, false).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn client_snapshot_with_roots_only() {
        let ca = make_ca();
        let pems = ClientPems {
            cert: None,
            key: None,
            root_cas: Some(ca.cert.pem().into_bytes()),
        };
        let snapshot = ClientSnapshot::from_pems(&pems, false, false).unwrap();
        assert!(snapshot.certified_key().is_none());
        assert!(snapshot.roots().is_some());
    }
}
