//! File-backed source of client credential snapshots.

use crate::config::TlsClientConfig;
use crate::error::{Error, Result};
use crate::keyutil;
use crate::pem::{ClientPems, ContentDigest};
use crate::snapshot::ClientSnapshot;
use crate::source::file::{poll_snapshots, read_optional_file, Loaded, PemsLoader};
use crate::source::{NotifyFn, SnapshotSource, SnapshotStream};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`FileClientSource`].
#[derive(Clone, Default)]
pub struct FileClientSourceConfig {
    /// Optional path to the client certificate chain PEM (mTLS client
    /// authentication). Requires `key`.
    pub cert: Option<PathBuf>,
    /// Optional path to the client private key PEM. Requires `cert`.
    pub key: Option<PathBuf>,
    /// Optional path to root CAs for server verification.
    pub root_ca: Option<PathBuf>,
    /// Use the process-wide root pool when no `root_ca` file is set.
    pub use_system_roots: bool,
    /// Disable server certificate verification.
    pub insecure_skip_verify: bool,
    /// Password for an encrypted private key.
    pub key_password: Option<String>,
    /// Polling interval; zero disables polling (one-shot initial load).
    pub refresh: Duration,
    /// Invoked after each rotation (not after the initial load).
    pub notify: Option<NotifyFn>,
}

impl FileClientSourceConfig {
    /// Builds a source configuration from the serializable config surface.
    /// Key password, system-pool opt-in and notify callback start unset.
    pub fn from_tls_config(config: &TlsClientConfig) -> Self {
        Self {
            cert: config.file.cert.clone(),
            key: config.file.key.clone(),
            root_ca: config.file.root_ca.clone(),
            use_system_roots: false,
            insecure_skip_verify: config.insecure_skip_verify,
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

    /// Opts into the process-wide root pool.
    #[must_use]
    pub fn with_system_roots(mut self, enabled: bool) -> Self {
        self.use_system_roots = enabled;
        self
    }

    /// Sets the rotation notification callback.
    #[must_use]
    pub fn with_notify(mut self, notify: NotifyFn) -> Self {
        self.notify = Some(notify);
        self
    }
}

impl fmt::Debug for FileClientSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileClientSourceConfig")
            .field("cert", &self.cert)
            .field("key", &self.key)
            .field("root_ca", &self.root_ca)
            .field("use_system_roots", &self.use_system_roots)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("key_password", &self.key_password.as_ref().map(|_| "<set>"))
            .field("refresh", &self.refresh)
            .field("notify", &self.notify.as_ref().map(|_| "<notify_fn>"))
            .finish()
    }
}

/// Polls a set of client credential files and emits a snapshot whenever
/// their combined content digest changes.
pub struct FileClientSource {
    loader: Arc<ClientPemsLoader>,
    refresh: Duration,
    notify: Option<NotifyFn>,
}

impl fmt::Debug for FileClientSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileClientSource")
            .field("loader", &self.loader)
            .field("refresh", &self.refresh)
            .field("notify", &self.notify.as_ref().map(|_| "<notify_fn>"))
            .finish()
    }
}

impl FileClientSource {
    /// Creates a file source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if only one of the client certificate and
    /// key paths is configured.
    pub fn new(config: FileClientSourceConfig) -> Result<Self> {
        if config.cert.is_some() != config.key.is_some() {
            return Err(Error::Config(
                "client certificate and key must be configured together".into(),
            ));
        }

        Ok(Self {
            refresh: config.refresh,
            notify: config.notify.clone(),
            loader: Arc::new(ClientPemsLoader { config }),
        })
    }
}

impl SnapshotSource for FileClientSource {
    type Snapshot = ClientSnapshot;

    fn snapshots(&self) -> SnapshotStream<ClientSnapshot> {
        poll_snapshots(
            Arc::clone(&self.loader),
            self.refresh,
            self.notify.clone(),
        )
    }
}

#[derive(Debug)]
struct ClientPemsLoader {
    config: FileClientSourceConfig,
}

impl ClientPemsLoader {
    async fn read_pems(&self) -> Result<ClientPems> {
        let cert = read_optional_file(self.config.cert.as_deref()).await?;
        let key = match read_optional_file(self.config.key.as_deref()).await? {
            Some(raw) => Some(
                keyutil::decrypt_private_key_pem(&raw, self.config.key_password.as_deref())?.pem,
            ),
            None => None,
        };
        let root_cas = read_optional_file(self.config.root_ca.as_deref()).await?;

        Ok(ClientPems {
            cert,
            key,
            root_cas,
        })
    }
}

impl PemsLoader for ClientPemsLoader {
    type Snapshot = ClientSnapshot;

    fn load(
        &self,
        last: Option<ContentDigest>,
    ) -> impl Future<Output = Result<Loaded<ClientSnapshot>>> + Send {
        async move {
            let pems = self.read_pems().await?;
            let digest = pems.digest();
            if last == Some(digest) {
                return Ok(Loaded::Unchanged);
            }
            let snapshot = ClientSnapshot::from_pems(
                &pems,
                self.config.use_system_roots,
                self.config.insecure_skip_verify,
            )?;
            Ok(Loaded::New(digest, Arc::new(snapshot)))
        }
    }
}
