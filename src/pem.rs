//! Raw PEM credential bundles and their content digests.
//!
//! A bundle is the unparsed form of one side's credentials, read afresh
//! from disk on every tick. Its digest is the change detector: two bundles
//! with equal digests are treated as the same credentials and never
//! re-parsed or re-emitted.

use sha2::{Digest as _, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// SHA-256 digest over a bundle's canonical PEM concatenation.
///
/// Blocks are hashed in fixed order (certificate, key, roots-or-CA, CRL),
/// each in decrypted-PEM form; absent blocks contribute zero bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn of(blocks: &[Option<&[u8]>]) -> Self {
        let mut hash = Sha256::new();
        for block in blocks.iter().flatten() {
            hash.update(block);
        }
        Self(hash.finalize().into())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({self})")
    }
}

/// Raw server-side PEM bundle.
///
/// The key block is held in decrypted form; encrypted on-disk keys are
/// decrypted at read time so that the digest is stable across re-encryption
/// with a different salt.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ServerPems {
    /// Server certificate chain PEM.
    pub cert: Vec<u8>,
    /// Server private key PEM, decrypted.
    pub key: Vec<u8>,
    /// Client CA pool PEM, when mutual TLS is configured.
    #[zeroize(skip)]
    pub client_ca: Option<Vec<u8>>,
    /// Client CRL PEM, when revocation is configured.
    #[zeroize(skip)]
    pub client_crl: Option<Vec<u8>>,
}

impl ServerPems {
    /// Computes the bundle's content digest.
    pub fn digest(&self) -> ContentDigest {
        ContentDigest::of(&[
            Some(self.cert.as_slice()),
            Some(self.key.as_slice()),
            self.client_ca.as_deref(),
            self.client_crl.as_deref(),
        ])
    }
}

impl fmt::Debug for ServerPems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPems")
            .field("cert", &format_args!("{} bytes", self.cert.len()))
            .field("key", &"<redacted>")
            .field("client_ca", &self.client_ca.as_ref().map(Vec::len))
            .field("client_crl", &self.client_crl.as_ref().map(Vec::len))
            .finish()
    }
}

/// Raw client-side PEM bundle.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ClientPems {
    /// Client certificate chain PEM, when client authentication is
    /// configured.
    #[zeroize(skip)]
    pub cert: Option<Vec<u8>>,
    /// Client private key PEM, decrypted.
    pub key: Option<Vec<u8>>,
    /// Root CA pool PEM for server verification.
    #[zeroize(skip)]
    pub root_cas: Option<Vec<u8>>,
}

impl ClientPems {
    /// Computes the bundle's content digest.
    pub fn digest(&self) -> ContentDigest {
        ContentDigest::of(&[
            self.cert.as_deref(),
            self.key.as_deref(),
            self.root_cas.as_deref(),
        ])
    }
}

impl fmt::Debug for ClientPems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientPems")
            .field("cert", &self.cert.as_ref().map(Vec::len))
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("root_cas", &self.root_cas.as_ref().map(Vec::len))
            .finish()
    }
}
