/*!
A provider bound to one key for the lifetime of a connection.
*/

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use super::{DigestAlgorithm, SigningProvider};
use crate::core::element::KeyHandle;
use crate::core::error::{Error, Result};

/// Signing capability handed to a protocol engine
///
/// The engine calls it from inside its handshake and can only report a
/// generic failure back. The original error is parked here so the
/// connection driver can surface the real reason (for instance a retryable
/// `DeviceBusy`) instead of a protocol failure.
#[derive(Clone)]
pub struct BoundSigner {
    provider: Arc<dyn SigningProvider>,
    key: KeyHandle,
    digest: DigestAlgorithm,
    last_failure: Arc<Mutex<Option<Error>>>,
}

impl fmt::Debug for BoundSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundSigner")
            .field("provider", &self.provider.name())
            .field("key", &self.key.id())
            .field("digest", &self.digest)
            .finish()
    }
}

impl BoundSigner {
    /// Bind `provider` to `key`, using the digest that fits the key's curve
    pub fn new(provider: Arc<dyn SigningProvider>, key: KeyHandle) -> Self {
        let digest = DigestAlgorithm::for_key(key.algorithm());
        Self {
            provider,
            key,
            digest,
            last_failure: Arc::new(Mutex::new(None)),
        }
    }

    pub fn key(&self) -> &KeyHandle {
        &self.key
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Sign a finished digest
    pub fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>> {
        match self.provider.sign(&self.key, digest, self.digest) {
            Ok(signature) => Ok(signature),
            Err(e) => {
                log::warn!("{} signer failed for {}: {}", self.provider.name(), self.key.id(), e);
                let message = e.to_string();
                *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                Err(Error::DeviceError(message))
            }
        }
    }

    /// Hash `message` with the bound digest algorithm, then sign
    pub fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        let digest = self.digest.digest(message);
        self.sign_digest(&digest)
    }

    /// Take the error of the most recent failed signature, if any
    pub fn take_failure(&self) -> Option<Error> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
