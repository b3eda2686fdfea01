//! File-backed source of server credential snapshots.

use crate::config::TlsServerConfig;
use crate::error::{Error, Result};
use crate::keyutil;
use crate::pem::{ContentDigest, ServerPems};
use crate::snapshot::ServerSnapshot;
use crate::source::file::{poll_snapshots, read_file, read_optional_file, Loaded, PemsLoader};
use crate::source::{NotifyFn, SnapshotSource, SnapshotStream};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`FileServerSource`].
#[derive(Clone, Default)]
pub struct FileServerSourceConfig {
    /// Path to the server certificate chain PEM.
    pub cert: PathBuf,
    /// Path to the server private key PEM (possibly encrypted PKCS#8).
    pub key: PathBuf,
    /// Optional path to the client CA pool; enables mutual TLS.
    pub client_ca: Option<PathBuf>,
    /// Optional path to the client CRL; requires `client_ca`.
    pub client_crl: Option<PathBuf>,
    /// Password for an encrypted private key.
    pub key_password: Option<String>,
    /// Polling interval; zero disables polling (one-shot initial load).
    pub refresh: Duration,
    /// Invoked after each rotation (not after the initial load).
    pub notify: Option<NotifyFn>,
}

impl FileServerSourceConfig {
    /// Builds a source configuration from the serializable config surface.
    /// Key password and notify callback start unset.
    pub fn from_tls_config(config: &TlsServerConfig) -> Self {
        Self {
            cert: config.file.cert.clone(),
            key: config.file.key.clone(),
            client_ca: config.file.client_ca.clone(),
            client_crl: config.file.client_crl.clone(),
            key_password: None,
            refresh: config.refresh,
            notify: None,
        }
    }

    /// Sets the private-key password.
    #[must_use]
    pub fn with_key_password(mut self, password: impl Into<String>) -> Self {
        self.key_password = Some(password.into());
        self
    }

    /// Sets the rotation notification callback.
    #[must_use]
    pub fn with_notify(mut self, notify: NotifyFn) -> Self {
        self.notify = Some(notify);
        self
    }
}

impl fmt::Debug for FileServerSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileServerSourceConfig")
            .field("cert", &self.cert)
            .field("key", &self.key)
            .field("client_ca", &self.client_ca)
            .field("client_crl", &self.client_crl)
            .field("key_password", &self.key_password.as_ref().map(|_| "<set>"))
            .field("refresh", &self.refresh)
            .field("notify", &self.notify.as_ref().map(|_| "<notify_fn>"))
            .finish()
    }
}

/// Polls a set of server credential files and emits a snapshot whenever
/// their combined content digest changes.
pub struct FileServerSource {
    loader: Arc<ServerPemsLoader>,
    refresh: Duration,
    notify: Option<NotifyFn>,
}

impl fmt::Debug for FileServerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileServerSource")
            .field("loader", &self.loader)
            .field("refresh", &self.refresh)
            .field("notify", &self.notify.as_ref().map(|_| "<notify_fn>"))
            .finish()
    }
}

impl FileServerSource {
    /// Creates a file source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required paths are missing or the CRL
    /// is configured without a client CA.
    pub fn new(config: FileServerSourceConfig) -> Result<Self> {
        if config.cert.as_os_str().is_empty() {
            return Err(Error::Config("server certificate file is required".into()));
        }
        if config.key.as_os_str().is_empty() {
            return Err(Error::Config("server key file is required".into()));
        }
        if config.client_crl.is_some() && config.client_ca.is_none() {
            return Err(Error::Config("client CRL requires a client CA file".into()));
        }

        Ok(Self {
            refresh: config.refresh,
            notify: config.notify.clone(),
            loader: Arc::new(ServerPemsLoader { config }),
        })
    }
}

impl SnapshotSource for FileServerSource {
    type Snapshot = ServerSnapshot;

    fn snapshots(&self) -> SnapshotStream<ServerSnapshot> {
        poll_snapshots(
            Arc::clone(&self.loader),
            self.refresh,
            self.notify.clone(),
        )
    }
}

#[derive(Debug)]
struct ServerPemsLoader {
    config: FileServerSourceConfig,
}

impl ServerPemsLoader {
    async fn read_pems(&self) -> Result<ServerPems> {
        let cert = read_file(&self.config.cert).await?;
        let raw_key = read_file(&self.config.key).await?;
        let key =
            keyutil::decrypt_private_key_pem(&raw_key, self.config.key_password.as_deref())?;
        let client_ca = read_optional_file(self.config.client_ca.as_deref()).await?;
        let client_crl = read_optional_file(self.config.client_crl.as_deref()).await?;

        Ok(ServerPems {
            cert,
            key: key.pem,
            client_ca,
            client_crl,
        })
    }
}

impl PemsLoader for ServerPemsLoader {
    type Snapshot = ServerSnapshot;

    fn load(
        &self,
        last: Option<ContentDigest>,
    ) -> impl Future<Output = Result<Loaded<ServerSnapshot>>> + Send {
        async move {
            let pems = self.read_pems().await?;
            let digest = pems.digest();
            if last == Some(digest) {
                return Ok(Loaded::Unchanged);
            }
            let snapshot = ServerSnapshot::from_pems(&pems)?;
            Ok(Loaded::New(digest, Arc::new(snapshot)))
        }
    }
}
