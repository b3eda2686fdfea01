//! Private-key PEM helpers: decryption, encryption and canonical
//! re-encoding.
//!
//! Cleartext keys (`PRIVATE KEY`, `RSA PRIVATE KEY`, `EC PRIVATE KEY`) pass
//! through untouched. `ENCRYPTED PRIVATE KEY` blocks are decrypted with the
//! configured password and re-encoded as canonical cleartext PKCS#8, which
//! keeps content digests stable across re-encryption with a fresh salt.
//!
//! "Key is not encrypted" and "decryption failed" are distinct outcomes:
//! the former is reported through [`DecryptedKey::was_encrypted`], the
//! latter through [`Error::Decrypt`] / [`Error::KeyPasswordRequired`].

use crate::error::{Error, Result};
use pem_rfc7468::LineEnding;
use pkcs8::der::asn1::AnyRef;
use pkcs8::{AlgorithmIdentifierRef, EncryptedPrivateKeyInfo, ObjectIdentifier, PrivateKeyInfo};
use rand_core::OsRng;
use rustls::pki_types::PrivateKeyDer;

const PEM_LABEL_PKCS8: &str = "PRIVATE KEY";
const PEM_LABEL_PKCS8_ENCRYPTED: &str = "ENCRYPTED PRIVATE KEY";
const PEM_LABEL_PKCS1: &str = "RSA PRIVATE KEY";
const PEM_LABEL_SEC1: &str = "EC PRIVATE KEY";

/// `rsaEncryption` from RFC 8017, used to wrap PKCS#1 keys into PKCS#8.
const RSA_ENCRYPTION_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// A private key in cleartext PEM form.
#[derive(Debug)]
pub struct DecryptedKey {
    /// Cleartext key PEM. For keys that were encrypted on disk this is the
    /// canonical PKCS#8 re-encoding; otherwise the input bytes unchanged.
    pub pem: Vec<u8>,
    /// Whether the input was an encrypted PKCS#8 block.
    pub was_encrypted: bool,
}

/// Returns `true` if the PEM contains an `ENCRYPTED PRIVATE KEY` block.
pub fn private_key_is_encrypted(pem: &[u8]) -> bool {
    matches!(pem_rfc7468::decode_vec(pem), Ok((label, _)) if label == PEM_LABEL_PKCS8_ENCRYPTED)
}

/// Decrypts a private-key PEM if it is encrypted.
///
/// Cleartext keys pass through unchanged, whether or not a password is
/// configured. Inputs that are not a single PEM document (for example an
/// `EC PARAMETERS` + `EC PRIVATE KEY` pair) also pass through; they are
/// validated later when the key is parsed.
///
/// # Errors
///
/// Returns [`Error::KeyPasswordRequired`] for an encrypted key without a
/// password, or [`Error::Decrypt`] when decryption fails (wrong password or
/// malformed encryption parameters).
pub fn decrypt_private_key_pem(pem: &[u8], password: Option<&str>) -> Result<DecryptedKey> {
    let Ok((label, der)) = pem_rfc7468::decode_vec(pem) else {
        return Ok(DecryptedKey {
            pem: pem.to_vec(),
            was_encrypted: false,
        });
    };

    if label != PEM_LABEL_PKCS8_ENCRYPTED {
        return Ok(DecryptedKey {
            pem: pem.to_vec(),
            was_encrypted: false,
        });
    }

    let password = password.ok_or(Error::KeyPasswordRequired)?;

    let encrypted = EncryptedPrivateKeyInfo::try_from(der.as_slice())
        .map_err(|e| Error::Parse(format!("invalid encrypted PKCS#8 structure: {e}")))?;
    let decrypted = encrypted
        .decrypt(password)
        .map_err(|e| Error::Decrypt(e.to_string()))?;

    let pem = decrypted
        .to_pem(PEM_LABEL_PKCS8, LineEnding::LF)
        .map_err(|e| Error::Internal(format!("PKCS#8 PEM encoding failed: {e}")))?;

    Ok(DecryptedKey {
        pem: pem.as_bytes().to_vec(),
        was_encrypted: true,
    })
}

/// Encrypts a cleartext private-key PEM with the given password, producing
/// an `ENCRYPTED PRIVATE KEY` block (PKCS#8 with scrypt key derivation).
///
/// PKCS#1 (`RSA PRIVATE KEY`) input is wrapped into PKCS#8 before
/// encryption. SEC1 (`EC PRIVATE KEY`) input is not supported; convert the
/// key to PKCS#8 first.
///
/// # Errors
///
/// Returns [`Error::Parse`] for unsupported or malformed input, or
/// [`Error::Internal`] if the encryption itself fails.
pub fn encrypt_private_key_pem(pem: &[u8], password: &str) -> Result<String> {
    let (label, der) = pem_rfc7468::decode_vec(pem)
        .map_err(|e| Error::Parse(format!("invalid private key PEM: {e}")))?;

    let pkcs8_der;
    let info = match label {
        PEM_LABEL_PKCS8 => PrivateKeyInfo::try_from(der.as_slice())
            .map_err(|e| Error::Parse(format!("invalid PKCS#8 structure: {e}")))?,
        PEM_LABEL_PKCS1 => {
            let algorithm = AlgorithmIdentifierRef {
                oid: RSA_ENCRYPTION_OID,
                parameters: Some(AnyRef::NULL),
            };
            pkcs8_der = der.clone();
            PrivateKeyInfo::new(algorithm, &pkcs8_der)
        }
        PEM_LABEL_SEC1 => {
            return Err(Error::Parse(
                "SEC1 EC keys cannot be encrypted directly; convert to PKCS#8 first".into(),
            ))
        }
        PEM_LABEL_PKCS8_ENCRYPTED => {
            return Err(Error::Parse("private key is already encrypted".into()))
        }
        other => {
            return Err(Error::Parse(format!(
                "unsupported PEM label for private key: {other}"
            )))
        }
    };

    let encrypted = info
        .encrypt(OsRng, password)
        .map_err(|e| Error::Internal(format!("PKCS#8 encryption failed: {e}")))?;

    let pem = encrypted
        .to_pem(PEM_LABEL_PKCS8_ENCRYPTED, LineEnding::LF)
        .map_err(|e| Error::Internal(format!("PKCS#8 PEM encoding failed: {e}")))?;

    Ok(pem.to_string())
}

/// Re-encodes a single PEM block in canonical RFC 7468 form: 64-column
/// base64, LF line endings, no extra headers. Canonical input round-trips
/// byte-equal.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the input is not a single PEM document.
pub fn reencode_pem_block(pem: &[u8]) -> Result<String> {
    let (label, der) = pem_rfc7468::decode_vec(pem)
        .map_err(|e| Error::Parse(format!("invalid PEM: {e}")))?;
    pem_rfc7468::encode_string(label, LineEnding::LF, &der)
        .map_err(|e| Error::Internal(format!("PEM encoding failed: {e}")))
}

/// Parses the first private key from a (cleartext) PEM blob.
///
/// Accepts PKCS#8, PKCS#1 and SEC1 blocks.
pub(crate) fn read_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| Error::Parse(format!("invalid private key PEM: {e}")))?
        .ok_or_else(|| Error::Parse("no private key found".into()))
}
