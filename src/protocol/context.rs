/*!
Explicit bridge context.

A `BridgeContext` bundles the open element session, the resolved client key
and its certificate. It is created once, passed to whatever needs to sign,
and torn down explicitly. Nothing about the element lives in globals.
*/

use std::sync::Arc;

use crate::core::config::BridgeConfig;
use crate::core::element::{
    load_certificate, verify_certificate_binding, ElementDriver, KeyHandle, Provisioned,
    SecureElementSession,
};
use crate::core::error::{Error, Result};
use crate::core::signing::{BoundSigner, ElementSigner};

/// Session, key and certificate used by one or more connections
#[derive(Debug)]
pub struct BridgeContext {
    session: SecureElementSession,
    key: KeyHandle,
    provisioned: Provisioned,
    certificate: Option<Vec<u8>>,
}

impl BridgeContext {
    /// Open a session over `driver` and provision it.
    ///
    /// The session is closed again when any step fails.
    pub fn open<D: ElementDriver + 'static>(driver: D, config: &BridgeConfig) -> Result<Self> {
        config.validate()?;
        let session = SecureElementSession::connect(driver, config.device)?;
        match Self::provision(session.clone(), config) {
            Ok(context) => Ok(context),
            Err(e) => {
                session.close();
                Err(e)
            }
        }
    }

    /// Resolve the client key and load its certificate on an open session
    pub fn provision(session: SecureElementSession, config: &BridgeConfig) -> Result<Self> {
        let (key, provisioned) = resolve_key(&session, config)?;

        let certificate = match config.certificate_id {
            Some(cert_id) => {
                let der = load_certificate(&session, cert_id)?;
                if config.verify_certificate_binding {
                    verify_certificate_binding(&der, &key).map_err(|e| match e {
                        Error::CertificateKeyMismatch(_) => Error::CertificateKeyMismatch(cert_id),
                        other => other,
                    })?;
                }
                Some(der)
            }
            None => None,
        };

        Ok(Self {
            session,
            key,
            provisioned,
            certificate,
        })
    }

    pub fn session(&self) -> &SecureElementSession {
        &self.session
    }

    pub fn key(&self) -> &KeyHandle {
        &self.key
    }

    /// Whether the key was found or generated
    pub fn provisioned(&self) -> Provisioned {
        self.provisioned
    }

    /// Client certificate, DER encoded
    pub fn certificate(&self) -> Option<&[u8]> {
        self.certificate.as_deref()
    }

    /// Element signer bound to the client key
    pub fn bound_signer(&self) -> BoundSigner {
        BoundSigner::new(Arc::new(ElementSigner::new()), self.key.clone())
    }

    /// Close the session. Handles derived from it stop working.
    pub fn teardown(self) {
        self.session.close();
        log::debug!("Bridge context for {} torn down", self.key.id());
    }
}

/// Resolve the key, retrying once on a transient element condition
fn resolve_key(session: &SecureElementSession, config: &BridgeConfig) -> Result<(KeyHandle, Provisioned)> {
    match KeyHandle::resolve_or_create(session, config.key_id, &config.key_spec) {
        Err(e) if e.is_retryable() => {
            log::warn!("Key resolution for {} failed ({}), retrying once", config.key_id, e);
            KeyHandle::resolve_or_create(session, config.key_id, &config.key_spec)
        }
        other => other,
    }
}
