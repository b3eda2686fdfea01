//! Server-side TLS: rotation handle and configuration factory.
//!
//! [`ServerTls`] owns a [`Rotation`] of server snapshots and produces
//! [`rustls::ServerConfig`] values from it. Certificate selection is wired
//! to the live store, so a rotation is picked up on the next handshake.
//! Static parts of a configuration (the client-auth mode, the client-CA
//! pool inside the verifier cache) reflect the snapshot at the time
//! [`ServerTls::config`] is called, which is why it is a factory: call it
//! at the start of each serving period rather than caching one config for
//! the process lifetime.

mod verifier;

pub use verifier::{PeerCertificates, VerifyPeerCertificate};

use crate::config::TlsServerConfig;
use crate::error::Result;
use crate::rotation::{Rotation, DEFAULT_INIT_TIMEOUT};
use crate::snapshot::{self, ServerSnapshot};
use crate::source::{FileServerSource, FileServerSourceConfig, SnapshotSource};
use crate::store::SnapshotStore;
use rustls::crypto::{CryptoProvider, SupportedKxGroup};
use rustls::server::ResolvesServerCert;
use rustls::sign::CertifiedKey;
use rustls::{ServerConfig, SupportedCipherSuite};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use verifier::{RotatingClientVerifier, VerifierChain};

/// Caller-tunable knobs applied on top of the server configuration.
#[derive(Clone, Default)]
pub struct ServerTlsSettings {
    /// ALPN protocols, most preferred first (e.g. `b"h2"`, `b"http/1.1"`).
    pub alpn_protocols: Vec<Vec<u8>>,
    /// Restricts the cipher suites offered. `None` keeps the provider
    /// defaults.
    pub cipher_suites: Option<Vec<SupportedCipherSuite>>,
    /// Restricts the key-exchange groups (curve preferences). `None` keeps
    /// the provider defaults.
    pub kx_groups: Option<Vec<&'static dyn SupportedKxGroup>>,
    /// Additional peer verifiers, run in order after chain verification
    /// and the CRL check. `None` slots are skipped.
    pub verify_peer: Vec<Option<VerifyPeerCertificate>>,
}

impl fmt::Debug for ServerTlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTlsSettings")
            .field("alpn_protocols", &self.alpn_protocols.len())
            .field("cipher_suites", &self.cipher_suites.as_ref().map(Vec::len))
            .field("kx_groups", &self.kx_groups.as_ref().map(Vec::len))
            .field("verify_peer", &self.verify_peer.len())
            .finish()
    }
}

/// Server-side credential rotation plus TLS-config factory.
#[derive(Debug)]
pub struct ServerTls {
    rotation: Rotation<ServerSnapshot>,
    settings: ServerTlsSettings,
}

impl ServerTls {
    /// Builds a file-backed server TLS handle from the configuration
    /// surface.
    ///
    /// Returns `Ok(None)` when `config.enable` is false. Otherwise performs
    /// the initial load (with [`DEFAULT_INIT_TIMEOUT`]) and starts the
    /// background refresh according to `config.refresh`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] for an invalid configuration,
    /// [`crate::Error::InitialLoadTimeout`] when no snapshot could be
    /// loaded in time, or [`crate::Error::SourceClosed`] when a one-shot
    /// load fails outright.
    pub async fn from_config(
        config: &TlsServerConfig,
        settings: ServerTlsSettings,
    ) -> Result<Option<Self>> {
        config.validate()?;
        if !config.enable {
            return Ok(None);
        }
        let source = FileServerSource::new(FileServerSourceConfig::from_tls_config(config))?;
        Ok(Some(
            Self::from_source(&source, settings, DEFAULT_INIT_TIMEOUT).await?,
        ))
    }

    /// Starts a rotation over an arbitrary snapshot source.
    ///
    /// Use this instead of [`ServerTls::from_config`] when the source needs
    /// extra settings (key password, notify callback) or is not
    /// file-backed at all.
    ///
    /// # Errors
    ///
    /// Propagates the rotation-start errors; see [`Rotation::start`].
    pub async fn from_source<Src>(
        source: &Src,
        settings: ServerTlsSettings,
        init_timeout: Duration,
    ) -> Result<Self>
    where
        Src: SnapshotSource<Snapshot = ServerSnapshot> + ?Sized,
    {
        let rotation = Rotation::start(source, init_timeout).await?;
        Ok(Self { rotation, settings })
    }

    /// Returns the rotation handle (shutdown, update subscriptions,
    /// current snapshot).
    pub fn rotation(&self) -> &Rotation<ServerSnapshot> {
        &self.rotation
    }

    /// Produces a fresh `ServerConfig` reflecting the current snapshot.
    ///
    /// The certificate-selection callback and the peer-verification
    /// pipeline read the live store on every handshake; the client-auth
    /// mode is fixed at the snapshot seen now. Call once per serving
    /// period (per listener, typically).
    ///
    /// # Errors
    ///
    /// Returns an error if the protocol-version or cipher-suite selection
    /// is unsatisfiable for the configured provider.
    pub fn config(&self) -> Result<ServerConfig> {
        server_config(&self.rotation, &self.settings)
    }

    /// Stops the background refresh. The last snapshot stays readable.
    pub async fn shutdown(&self) {
        self.rotation.shutdown().await;
    }
}

fn effective_provider(settings: &ServerTlsSettings) -> Arc<CryptoProvider> {
    let mut provider = snapshot::crypto_provider();
    if let Some(suites) = settings.cipher_suites.as_ref() {
        provider.cipher_suites = suites.clone();
    }
    if let Some(groups) = settings.kx_groups.as_ref() {
        provider.kx_groups = groups.clone();
    }
    Arc::new(provider)
}

fn server_config(
    rotation: &Rotation<ServerSnapshot>,
    settings: &ServerTlsSettings,
) -> Result<ServerConfig> {
    snapshot::install_provider();

    let snapshot = rotation.current();
    let store = rotation.store();

    let resolver: Arc<dyn ResolvesServerCert> = Arc::new(LiveServerCertResolver {
        store: Arc::clone(&store),
    });

    let extra = VerifierChain::new(settings.verify_peer.clone());

    let builder = ServerConfig::builder_with_provider(effective_provider(settings))
        .with_safe_default_protocol_versions()?;

    let mut config = if snapshot.has_client_cas() {
        let client_verifier = Arc::new(RotatingClientVerifier::new(store, extra));
        builder
            .with_client_cert_verifier(client_verifier)
            .with_cert_resolver(resolver)
    } else {
        if !extra.is_empty() {
            warn!("peer verifiers configured without a client CA pool; they only run under mutual TLS");
        }
        builder.with_no_client_auth().with_cert_resolver(resolver)
    };

    config.alpn_protocols = settings.alpn_protocols.clone();

    Ok(config)
}

/// Resolves the server certificate from the live store on every handshake.
#[derive(Debug)]
struct LiveServerCertResolver {
    store: Arc<SnapshotStore<ServerSnapshot>>,
}

impl ResolvesServerCert for LiveServerCertResolver {
    fn resolve(
        &self,
        _client_hello: rustls::server::ClientHello<'_>,
    ) -> Option<Arc<CertifiedKey>> {
        Some(self.store.get().certified_key())
    }
}
