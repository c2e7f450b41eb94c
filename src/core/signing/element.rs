/*!
Secure-element signing backend.
*/

use super::{check_request, DigestAlgorithm, SigningProvider};
use crate::core::element::KeyHandle;
use crate::core::error::{Error, Result};

/// Signs inside the secure element that owns the key handle
#[derive(Debug, Default, Clone, Copy)]
pub struct ElementSigner;

impl ElementSigner {
    pub fn new() -> Self {
        ElementSigner
    }
}

impl SigningProvider for ElementSigner {
    fn name(&self) -> &'static str {
        "secure-element"
    }

    fn sign(&self, key: &KeyHandle, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        if !key.is_element_backed() {
            return Err(Error::KeyNotFound(key.id()));
        }
        let session = key.session()?;
        if session.epoch() != Some(key.epoch()) {
            return Err(Error::SessionClosed);
        }
        check_request(key, digest, algorithm)?;

        // The session lock is held for this one command only
        let signature = session
            .transact_in(key.epoch(), |driver| driver.sign_digest(key.id(), digest))
            .map_err(|e| match e {
                Error::Timeout(ms) => {
                    log::warn!("Secure element timed out after {} ms while signing", ms);
                    Error::DeviceBusy
                }
                other => other,
            })?;

        log::debug!("Secure element signed {} digest with {}", algorithm, key.id());
        Ok(signature)
    }
}
