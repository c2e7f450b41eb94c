/*!
Private-key delegation.

A TLS engine needs exactly one private-key operation from the bridge: sign a
digest it has already computed. [`SigningProvider`] is that seam. Two
backends implement it:

- [`ElementSigner`] sends the digest to the secure element
- [`SoftwareSigner`] signs with a host-held P-256 key

A connection binds one provider and one key into a [`BoundSigner`] before the
handshake starts and keeps it until the connection ends.
*/

use std::fmt;

use sha2::{Digest, Sha256, Sha384};

use crate::core::constants::sizes;
use crate::core::element::{KeyAlgorithm, KeyHandle, KeyUsage, ObjectKind, Presence};
use crate::core::error::{Error, Result};

pub mod bound;
pub mod element;
pub mod software;

pub use bound::BoundSigner;
pub use element::ElementSigner;
pub use software::SoftwareSigner;

/// Hash function the caller used to produce a digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
}

impl DigestAlgorithm {
    /// Digest length in bytes
    pub fn len(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => sizes::SHA256_DIGEST,
            DigestAlgorithm::Sha384 => sizes::SHA384_DIGEST,
        }
    }

    /// Digest that matches the strength of a curve
    pub fn for_key(algorithm: KeyAlgorithm) -> Self {
        match algorithm {
            KeyAlgorithm::EcNistP256 => DigestAlgorithm::Sha256,
            KeyAlgorithm::EcNistP384 => DigestAlgorithm::Sha384,
        }
    }

    /// Hash a message
    pub fn digest(self, message: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha256 => Sha256::digest(message).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(message).to_vec(),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha256 => write!(f, "SHA-256"),
            DigestAlgorithm::Sha384 => write!(f, "SHA-384"),
        }
    }
}

/// Produces signatures without exposing the private key
///
/// `digest` is always a finished hash. Implementations never hash, never
/// retry, and reject a request that does not fit the key before doing any
/// work.
pub trait SigningProvider: Send + Sync + fmt::Debug {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Sign `digest` with `key`, returning a DER-encoded ECDSA signature
    fn sign(&self, key: &KeyHandle, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>>;
}

/// Checks shared by every backend, performed before touching any key
pub(crate) fn check_request(key: &KeyHandle, digest: &[u8], algorithm: DigestAlgorithm) -> Result<()> {
    if key.kind() != ObjectKind::KeyPair || key.presence() != Presence::Present {
        return Err(Error::KeyNotFound(key.id()));
    }

    if DigestAlgorithm::for_key(key.algorithm()) != algorithm {
        return Err(Error::AlgorithmMismatch {
            key: key.algorithm().to_string(),
            requested: algorithm.to_string(),
        });
    }

    if digest.len() != algorithm.len() {
        return Err(Error::AlgorithmMismatch {
            key: key.algorithm().to_string(),
            requested: format!("{} byte digest", digest.len()),
        });
    }

    if !key.usage().contains(KeyUsage::SIGN) {
        return Err(Error::AlgorithmMismatch {
            key: format!("{} without sign usage", key.algorithm()),
            requested: algorithm.to_string(),
        });
    }

    Ok(())
}
