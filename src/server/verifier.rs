//! Client-certificate verification pipeline.
//!
//! After rustls's built-in chain verification against the snapshot's
//! client-CA pool, two further stages run in order: CRL revocation and
//! caller-supplied verifier functions. The pipeline short-circuits on the
//! first failure and the failing error is surfaced to the TLS stack
//! unchanged, aborting the handshake.
//!
//! Certificate presence is enforced by rustls itself: this crate only
//! surfaces the require-and-verify client-auth mode, so the verifier is
//! never invoked without a presented chain.

use crate::error::Error;
use crate::pem::ContentDigest;
use crate::snapshot::ServerSnapshot;
use crate::store::SnapshotStore;
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex};
use tracing::debug;
use x509_parser::prelude::{FromDer, X509Certificate};

/// The peer chain handed to user verifier functions.
#[derive(Debug)]
pub struct PeerCertificates<'a> {
    /// The raw DER chain the peer presented, end-entity first.
    pub raw: &'a [CertificateDer<'a>],
    /// Whether chain verification against the client-CA pool has already
    /// run for this chain.
    pub chain_verified: bool,
}

/// A caller-supplied peer-certificate verifier.
///
/// Runs after chain verification and the CRL check, in registration order.
pub type VerifyPeerCertificate =
    Arc<dyn Fn(&PeerCertificates<'_>) -> Result<(), Error> + Send + Sync>;

/// Ordered composition of user verifier functions.
///
/// `None` slots are transparent: they are skipped without changing the
/// order of the remainder. The chain short-circuits on the first failure
/// and returns that error unchanged.
#[derive(Clone, Default)]
pub(crate) struct VerifierChain {
    funcs: Vec<Option<VerifyPeerCertificate>>,
}

impl VerifierChain {
    pub(crate) fn new(funcs: Vec<Option<VerifyPeerCertificate>>) -> Self {
        Self { funcs }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.funcs.iter().all(Option::is_none)
    }

    pub(crate) fn verify(&self, peer: &PeerCertificates<'_>) -> Result<(), Error> {
        for func in self.funcs.iter().flatten() {
            func(peer)?;
        }
        Ok(())
    }
}

impl Debug for VerifierChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifierChain")
            .field("funcs", &self.funcs.len())
            .finish()
    }
}

fn other_err<E>(e: E) -> rustls::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rustls::Error::Other(rustls::OtherError(Arc::new(e)))
}

fn fmt_serial(raw: &[u8]) -> String {
    raw.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Checks every presented certificate against the snapshot's CRLs.
///
/// A CRL applies to a certificate when its issuer matches the certificate
/// issuer; the CRLs themselves were verified against the client-CA pool at
/// snapshot-build time. A CRL whose `NextUpdate` has passed is treated as
/// absent.
pub(crate) fn check_revocation(
    snapshot: &ServerSnapshot,
    raw: &[CertificateDer<'_>],
    now: UnixTime,
) -> Result<(), Error> {
    if snapshot.crls().is_empty() {
        return Ok(());
    }

    for cert_der in raw {
        let (_, cert) = X509Certificate::from_der(cert_der.as_ref())
            .map_err(|e| Error::Verify(format!("failed parsing peer certificate: {e}")))?;

        for crl in snapshot.crls() {
            if !crl.matches_issuer(cert.issuer().as_raw()) {
                continue;
            }
            if crl.is_stale(now) {
                debug!(issuer = crl.issuer(), "CRL past NextUpdate; treated as absent");
                continue;
            }
            if crl.revokes(cert.raw_serial()) {
                return Err(Error::Revoked {
                    issuer: crl.issuer().to_string(),
                    serial: fmt_serial(cert.raw_serial()),
                });
            }
        }
    }

    Ok(())
}

struct VerifierCache {
    digest: ContentDigest,
    verifier: Arc<dyn ClientCertVerifier>,
    schemes: Vec<SignatureScheme>,
}

/// Client-certificate verifier backed by the live snapshot store.
///
/// The inner WebPKI verifier is rebuilt only when the snapshot digest
/// changes, so a handshake pays one atomic load plus a cache hit.
pub(crate) struct RotatingClientVerifier {
    store: Arc<SnapshotStore<ServerSnapshot>>,
    extra: VerifierChain,
    cache: Mutex<Option<VerifierCache>>,
}

impl RotatingClientVerifier {
    pub(crate) fn new(store: Arc<SnapshotStore<ServerSnapshot>>, extra: VerifierChain) -> Self {
        Self {
            store,
            extra,
            cache: Mutex::new(None),
        }
    }

    fn inner_for(
        &self,
        snapshot: &ServerSnapshot,
    ) -> Result<Arc<dyn ClientCertVerifier>, Error> {
        let roots = snapshot
            .client_ca_roots()
            .ok_or_else(|| Error::Verify("no client CA pool in current credentials".into()))?;

        let mut guard = self
            .cache
            .lock()
            .map_err(|_| Error::Internal("client verifier cache mutex poisoned".into()))?;

        if let Some(cached) = guard.as_ref() {
            if &cached.digest == snapshot.digest() {
                return Ok(Arc::clone(&cached.verifier));
            }
        }

        let built = WebPkiClientVerifier::builder(roots)
            .build()
            .map_err(|e| Error::Verify(format!("building client verifier failed: {e}")))?;
        let schemes = built.supported_verify_schemes();

        *guard = Some(VerifierCache {
            digest: *snapshot.digest(),
            verifier: Arc::clone(&built),
            schemes,
        });

        Ok(built)
    }

    fn supported_schemes_cached(&self) -> Vec<SignatureScheme> {
        if let Ok(guard) = self.cache.lock() {
            if let Some(cached) = guard.as_ref() {
                return cached.schemes.clone();
            }
        }

        self.inner_for(&self.store.get())
            .map(|v| v.supported_verify_schemes())
            .unwrap_or_default()
    }
}

impl Debug for RotatingClientVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingClientVerifier").finish()
    }
}

impl ClientCertVerifier for RotatingClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        // An empty hint list does not weaken verification; it only affects
        // which certificates the peer might offer.
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let snapshot = self.store.get();

        let inner = self.inner_for(&snapshot).map_err(other_err)?;
        let verified = inner.verify_client_cert(end_entity, intermediates, now)?;

        let raw: Vec<CertificateDer<'_>> = std::iter::once(end_entity.clone())
            .chain(intermediates.iter().cloned())
            .collect();

        check_revocation(&snapshot, &raw, now).map_err(other_err)?;

        self.extra
            .verify(&PeerCertificates {
                raw: &raw,
                chain_verified: true,
            })
            .map_err(other_err)?;

        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        let inner = self.inner_for(&self.store.get()).map_err(other_err)?;
        inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        let inner = self.inner_for(&self.store.get()).map_err(other_err)?;
        inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported_schemes_cached()
    }
}
