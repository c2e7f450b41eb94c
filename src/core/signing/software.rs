/*!
Host-memory signing backend.

Used where no secure element is fitted and as a reference backend in tests.
*/

use std::fmt;

use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::rand_core::OsRng;
use p256::pkcs8::DecodePrivateKey;

use super::{check_request, DigestAlgorithm, SigningProvider};
use crate::core::element::{KeyAlgorithm, KeyHandle, ObjectId};
use crate::core::error::{Error, Result};

/// Draw a fresh P-256 signing key from the OS generator
pub(crate) fn random_p256_key() -> SigningKey {
    SigningKey::random(&mut OsRng)
}

/// SEC1 uncompressed public key
pub(crate) fn encoded_public_key(key: &SigningKey) -> Vec<u8> {
    key.verifying_key().to_encoded_point(false).as_bytes().to_vec()
}

/// Signs with a P-256 key held in host memory
pub struct SoftwareSigner {
    id: ObjectId,
    key: SigningKey,
}

impl fmt::Debug for SoftwareSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareSigner").field("id", &self.id).finish()
    }
}

impl SoftwareSigner {
    /// Fresh random key under the given label
    pub fn generate(id: ObjectId) -> Self {
        Self {
            id,
            key: random_p256_key(),
        }
    }

    /// Key from PKCS#8 DER
    pub fn from_pkcs8_der(id: ObjectId, der: &[u8]) -> Result<Self> {
        let key = SigningKey::from_pkcs8_der(der)
            .map_err(|e| Error::Config(format!("invalid PKCS#8 key for {}: {}", id, e)))?;
        Ok(Self { id, key })
    }

    /// Handle describing this key
    pub fn handle(&self) -> KeyHandle {
        KeyHandle::detached(self.id, KeyAlgorithm::EcNistP256, encoded_public_key(&self.key))
    }
}

impl SigningProvider for SoftwareSigner {
    fn name(&self) -> &'static str {
        "software"
    }

    fn sign(&self, key: &KeyHandle, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        if key.id() != self.id || key.is_element_backed() {
            return Err(Error::KeyNotFound(key.id()));
        }
        check_request(key, digest, algorithm)?;

        let signature: Signature = self
            .key
            .sign_prehash(digest)
            .map_err(|e| Error::DeviceError(format!("software signing failed: {}", e)))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use p256::ecdsa::signature::hazmat::PrehashVerifier;
    use p256::ecdsa::VerifyingKey;

    #[test]
    fn test_software_signature_verifies() -> Result<()> {
        let signer = SoftwareSigner::generate(ObjectId(0x10));
        let handle = signer.handle();
        let digest = DigestAlgorithm::Sha256.digest(b"client hello transcript");

        let der = signer.sign(&handle, &digest, DigestAlgorithm::Sha256)?;
        let verifying = VerifyingKey::from_sec1_bytes(handle.public_key().unwrap()).unwrap();
        let signature = Signature::from_der(&der).unwrap();
        assert!(verifying.verify_prehash(&digest, &signature).is_ok());
        Ok(())
    }

    #[test]
    fn test_foreign_handle_rejected() -> Result<()> {
        let signer = SoftwareSigner::generate(ObjectId(0x10));
        let other = SoftwareSigner::generate(ObjectId(0x11)).handle();
        let err = signer.sign(&other, &[0u8; 32], DigestAlgorithm::Sha256).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyNotFound);
        Ok(())
    }

    #[test]
    fn test_generated_keys_are_distinct() {
        let first = encoded_public_key(&random_p256_key());
        let second = encoded_public_key(&random_p256_key());
        assert_eq!(first.len(), 65);
        assert_eq!(first[0], 0x04);
        assert_ne!(first, second);
    }
}
