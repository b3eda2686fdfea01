//! Client-side TLS: rotation handle and configuration factory.
//!
//! [`ClientTls`] owns a [`Rotation`] of client snapshots and produces
//! [`rustls::ClientConfig`] values from it. The client certificate is
//! resolved from the live store on every handshake; the root pool (or the
//! skip-verify mode) is fixed per factory call, so obtain a fresh config
//! per outbound connection batch to pick up rotated roots.

use crate::config::TlsClientConfig;
use crate::error::Result;
use crate::rotation::{Rotation, DEFAULT_INIT_TIMEOUT};
use crate::snapshot::{self, ClientSnapshot};
use crate::source::{FileClientSource, FileClientSourceConfig, SnapshotSource};
use crate::store::SnapshotStore;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::ResolvesClientCert;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Caller-tunable knobs applied on top of the client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientTlsSettings {
    /// ALPN protocols, most preferred first.
    pub alpn_protocols: Vec<Vec<u8>>,
}

/// Client-side credential rotation plus TLS-config factory.
#[derive(Debug)]
pub struct ClientTls {
    rotation: Rotation<ClientSnapshot>,
    settings: ClientTlsSettings,
}

impl ClientTls {
    /// Builds a file-backed client TLS handle from the configuration
    /// surface.
    ///
    /// Returns `Ok(None)` when `config.enable` is false.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] for an invalid configuration,
    /// [`crate::Error::InitialLoadTimeout`] when no snapshot could be
    /// loaded in time, or [`crate::Error::SourceClosed`] when a one-shot
    /// load fails outright.
    pub async fn from_config(
        config: &TlsClientConfig,
        settings: ClientTlsSettings,
    ) -> Result<Option<Self>> {
        config.validate()?;
        if !config.enable {
            return Ok(None);
        }
        let source = FileClientSource::new(FileClientSourceConfig::from_tls_config(config))?;
        Ok(Some(
            Self::from_source(&source, settings, DEFAULT_INIT_TIMEOUT).await?,
        ))
    }

    /// Starts a rotation over an arbitrary snapshot source.
    ///
    /// # Errors
    ///
    /// Propagates the rotation-start errors; see [`Rotation::start`].
    pub async fn from_source<Src>(
        source: &Src,
        settings: ClientTlsSettings,
        init_timeout: Duration,
    ) -> Result<Self>
    where
        Src: SnapshotSource<Snapshot = ClientSnapshot> + ?Sized,
    {
        let rotation = Rotation::start(source, init_timeout).await?;
        Ok(Self { rotation, settings })
    }

    /// Returns the rotation handle (shutdown, update subscriptions,
    /// current snapshot).
    pub fn rotation(&self) -> &Rotation<ClientSnapshot> {
        &self.rotation
    }

    /// Produces a fresh `ClientConfig` reflecting the current snapshot.
    ///
    /// The client certificate is resolved from the live store per
    /// handshake. The root pool (snapshot roots, or the bundled web-PKI
    /// pool when the snapshot carries none) and the skip-verify mode are
    /// fixed at the snapshot seen now.
    ///
    /// # Errors
    ///
    /// Currently infallible in practice; kept fallible for parity with the
    /// server factory and future root-pool sources.
    pub fn config(&self) -> Result<ClientConfig> {
        client_config(&self.rotation, &self.settings)
    }

    /// Stops the background refresh. The last snapshot stays readable.
    pub async fn shutdown(&self) {
        self.rotation.shutdown().await;
    }
}

fn default_root_store() -> RootCertStore {
    webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect()
}

/// Selects the verification roots for a snapshot: the configured file pool,
/// optionally layered on top of the process-wide pool, or the process-wide
/// pool alone when no file is configured.
fn root_pool(snapshot: &ClientSnapshot) -> Arc<RootCertStore> {
    match (snapshot.roots(), snapshot.use_system_roots()) {
        (Some(file_roots), false) => file_roots,
        (Some(file_roots), true) => {
            let mut merged = default_root_store();
            merged.roots.extend(file_roots.roots.iter().cloned());
            Arc::new(merged)
        }
        (None, _) => Arc::new(default_root_store()),
    }
}

fn client_config(
    rotation: &Rotation<ClientSnapshot>,
    settings: &ClientTlsSettings,
) -> Result<ClientConfig> {
    snapshot::install_provider();

    let snapshot = rotation.current();
    let store = rotation.store();

    let builder = ClientConfig::builder();
    let builder = if snapshot.insecure_skip_verify() {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
    } else {
        builder.with_root_certificates(root_pool(&snapshot))
    };

    let mut config = if snapshot.certified_key().is_some() {
        builder.with_client_cert_resolver(Arc::new(LiveClientCertResolver { store }))
    } else {
        builder.with_no_client_auth()
    };

    config.alpn_protocols = settings.alpn_protocols.clone();

    Ok(config)
}

/// Resolves the client certificate from the live store on every handshake.
#[derive(Debug)]
struct LiveClientCertResolver {
    store: Arc<SnapshotStore<ClientSnapshot>>,
}

impl ResolvesClientCert for LiveClientCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.store.get().certified_key()
    }

    fn has_certs(&self) -> bool {
        self.store.get().certified_key().is_some()
    }
}

/// Verifier that accepts any server certificate (`insecure_skip_verify`).
/// ALPN and SNI still apply; only chain and hostname verification are
/// disabled.
struct AcceptAnyServerCert;

impl fmt::Debug for AcceptAnyServerCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptAnyServerCert").finish()
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
