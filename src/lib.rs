#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # cert-source
//!
//! `cert-source` manages the lifecycle of X.509 credentials used by TLS
//! endpoints. It loads server and client credentials from a pluggable
//! [`SnapshotSource`], keeps the latest parsed snapshot in an atomically
//! swapped store, and builds [`rustls`] configurations whose per-handshake
//! callbacks always consult the live store. When credential files are
//! rotated on disk (atomic rename included), **new TLS handshakes
//! automatically use the updated material**, without restarting the
//! application.
//!
//! Rotation is detected by a SHA-256 digest over the raw PEM contents, so
//! rewriting a file with identical bytes never triggers a reload. A broken
//! reload keeps the previous good snapshot in force and is retried on the
//! next tick.
//!
//! Server-side peer verification composes the standard WebPKI chain
//! verification with CRL-based revocation of mutual-TLS clients and any
//! caller-supplied verifier functions, in that order.
//!
//! ## Example
//!
//! ```no_run
//! use cert_source::{ServerTls, ServerTlsSettings, TlsServerConfig, TlsServerFiles};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tls = ServerTls::from_config(
//!     &TlsServerConfig {
//!         enable: true,
//!         refresh: std::time::Duration::from_secs(30),
//!         file: TlsServerFiles {
//!             cert: "server.crt".into(),
//!             key: "server.key".into(),
//!             client_ca: Some("ca.crt".into()),
//!             client_crl: None,
//!         },
//!     },
//!     ServerTlsSettings::default(),
//! )
//! .await?
//! .expect("server TLS is enabled");
//!
//! // Per serving period: a fresh config with live certificate selection.
//! let config = tls.config()?;
//! # drop(config);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! Exactly **one** `rustls` crypto provider must be enabled:
//!
//! * `ring` (default)
//! * `aws-lc-rs`

#[cfg(all(feature = "ring", feature = "aws-lc-rs"))]
compile_error!("Enable only one crypto provider feature: `ring` or `aws-lc-rs`.");

#[cfg(not(any(feature = "ring", feature = "aws-lc-rs")))]
compile_error!("Enable one crypto provider feature: `ring` (default) or `aws-lc-rs`.");

mod config;
mod error;
pub mod keyutil;
mod pem;
mod rotation;
mod snapshot;
mod store;

pub mod client;
pub mod server;
pub mod source;

pub use client::{ClientTls, ClientTlsSettings};
pub use config::{TlsClientConfig, TlsClientFiles, TlsServerConfig, TlsServerFiles};
pub use error::{Error, Result};
pub use pem::{ClientPems, ContentDigest, ServerPems};
pub use rotation::{Rotation, RotationUpdates, DEFAULT_INIT_TIMEOUT};
pub use server::{PeerCertificates, ServerTls, ServerTlsSettings, VerifyPeerCertificate};
pub use snapshot::{ClientSnapshot, CrlSummary, ServerSnapshot};
pub use source::{
    FileClientSource, FileClientSourceConfig, FileServerSource, FileServerSourceConfig, NotifyFn,
    SnapshotSource, SnapshotStream,
};
pub use store::SnapshotStore;
