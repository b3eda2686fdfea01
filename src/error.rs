use std::io;
use std::path::PathBuf;

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by `cert-source`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The configuration is missing required paths or combines
    /// contradictory options.
    #[error("invalid TLS configuration: {0}")]
    Config(String),

    /// A credential file could not be read. Transient at steady state;
    /// surfaces at startup only through the initial-load timeout.
    #[error("failed reading {path}: {source}")]
    Load {
        /// Path of the file that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Credential material could not be parsed or is internally
    /// inconsistent (malformed PEM, key/cert mismatch, CRL that does not
    /// verify against the client-CA pool).
    #[error("failed parsing credentials: {0}")]
    Parse(String),

    /// The private key is encrypted and no password was configured.
    #[error("private key is encrypted and no key password was provided")]
    KeyPasswordRequired,

    /// The private key could not be decrypted with the configured password.
    #[error("failed decrypting private key: {0}")]
    Decrypt(String),

    /// No snapshot was produced within the initial-load window.
    #[error("timed out waiting for initial credentials")]
    InitialLoadTimeout,

    /// The snapshot source closed its stream, or the rotation was shut down.
    #[error("credential source closed")]
    SourceClosed,

    /// A stage of the peer-verification pipeline rejected the peer.
    #[error("certificate verification failed: {0}")]
    Verify(String),

    /// The peer presented a certificate revoked by a CRL.
    #[error("certificate revoked by CRL: issuer={issuer}, serial={serial}")]
    Revoked {
        /// Distinguished name of the CRL issuer.
        issuer: String,
        /// Serial number of the revoked certificate, colon-separated hex.
        serial: String,
    },

    /// A rustls error occurred.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}
