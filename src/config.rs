//! Serializable TLS configuration surface.
//!
//! These structs mirror the file-based configuration layout: a server or
//! client section with an `enable` switch, a refresh interval and a `file.`
//! subsection of credential paths. Key passwords and notification callbacks
//! are runtime settings on the file sources, not part of this surface.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server-side TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TlsServerConfig {
    /// Enable server-side TLS.
    pub enable: bool,
    /// Interval for refreshing server TLS credentials. Zero disables
    /// polling (one-shot initial load).
    pub refresh: Duration,
    /// Credential file paths.
    pub file: TlsServerFiles,
}

/// Server-side credential file paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TlsServerFiles {
    /// Path to the server TLS key file.
    pub key: PathBuf,
    /// Path to the server TLS certificate file.
    pub cert: PathBuf,
    /// Optional path to the client CA file; enables mutual TLS.
    pub client_ca: Option<PathBuf>,
    /// Optional path to an X.509 CRL signed by the client CA; enables
    /// revocation checking and requires `client-ca`.
    pub client_crl: Option<PathBuf>,
}

impl TlsServerConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required paths are missing or the CRL
    /// is configured without a client CA. A disabled configuration is
    /// always valid.
    pub fn validate(&self) -> Result<()> {
        if !self.enable {
            return Ok(());
        }
        if self.file.cert.as_os_str().is_empty() {
            return Err(Error::Config("server certificate file is required".into()));
        }
        if self.file.key.as_os_str().is_empty() {
            return Err(Error::Config("server key file is required".into()));
        }
        if self.file.client_crl.is_some() && self.file.client_ca.is_none() {
            return Err(Error::Config(
                "client CRL requires a client CA file".into(),
            ));
        }
        Ok(())
    }
}

/// Client-side TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TlsClientConfig {
    /// Enable client-side TLS.
    pub enable: bool,
    /// Interval for refreshing client TLS credentials. Zero disables
    /// polling (one-shot initial load).
    pub refresh: Duration,
    /// Skip server certificate verification. ALPN and SNI are still
    /// honored.
    pub insecure_skip_verify: bool,
    /// Credential file paths.
    pub file: TlsClientFiles,
}

/// Client-side credential file paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TlsClientFiles {
    /// Optional path to the client TLS key file.
    pub key: Option<PathBuf>,
    /// Optional path to the client TLS certificate file.
    pub cert: Option<PathBuf>,
    /// Optional path to root CAs for server verification. When absent the
    /// platform default pool applies.
    pub root_ca: Option<PathBuf>,
}

impl TlsClientConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if only one of the client certificate and
    /// key is configured. A disabled configuration is always valid.
    pub fn validate(&self) -> Result<()> {
        if !self.enable {
            return Ok(());
        }
        if self.file.cert.is_some() != self.file.key.is_some() {
            return Err(Error::Config(
                "client certificate and key must be configured together".into(),
            ));
        }
        Ok(())
    }
}
