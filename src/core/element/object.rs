/*!
Binary objects stored in the secure element.

Certificates are kept as opaque binary objects next to their key pair. The
accessors here never leave a partially written object behind: size limits
are checked before the element is touched.
*/

use x509_parser::prelude::*;

use super::{KeyHandle, ObjectId, ObjectKind, SecureElementSession};
use crate::core::constants::sizes;
use crate::core::error::{Error, Result};

/// Store `data` under `id`, replacing an existing binary object
pub fn store_binary(session: &SecureElementSession, id: ObjectId, data: &[u8]) -> Result<()> {
    if !id.is_assignable() {
        return Err(Error::AllocationFailed(format!("identifier {} is reserved", id)));
    }

    session.transact_store(|driver, _| {
        let capacity = driver.binary_capacity();
        if data.len() > capacity {
            return Err(Error::CapacityExceeded {
                requested: data.len(),
                capacity,
            });
        }

        if let Some(info) = driver.object_info(id)? {
            if info.kind != ObjectKind::Binary {
                return Err(Error::AllocationFailed(format!(
                    "object {} is not a binary object",
                    id
                )));
            }
        }

        driver.write_binary(id, data)
    })?;

    log::debug!("Stored {} bytes at {}", data.len(), id);
    Ok(())
}

/// Read the binary object under `id` into a buffer of at most `max_len` bytes
pub fn load_binary(session: &SecureElementSession, id: ObjectId, max_len: usize) -> Result<Vec<u8>> {
    session.transact_store(|driver, _| {
        let info = driver.object_info(id)?.ok_or(Error::NotFound(id))?;
        if info.kind != ObjectKind::Binary {
            return Err(Error::NotFound(id));
        }
        if info.size > max_len {
            return Err(Error::BufferTooSmall {
                required: info.size,
                provided: max_len,
            });
        }
        driver.read_binary(id)
    })
}

/// Load a DER certificate, growing the buffer when the object is larger
/// than the initial certificate buffer, and check that it parses.
pub fn load_certificate(session: &SecureElementSession, id: ObjectId) -> Result<Vec<u8>> {
    let der = match load_binary(session, id, sizes::CERT_BUFFER) {
        Err(Error::BufferTooSmall { required, .. }) => {
            log::debug!("Certificate at {} needs {} bytes, retrying", id, required);
            load_binary(session, id, required)?
        }
        other => other?,
    };

    parse_x509_certificate(&der).map_err(|e| {
        Error::DeviceError(format!("object {} is not a valid certificate: {}", id, e))
    })?;

    log::info!("Loaded {} byte certificate from {}", der.len(), id);
    Ok(der)
}

/// Check that the certificate carries the public key of `key`
pub fn verify_certificate_binding(cert_der: &[u8], key: &KeyHandle) -> Result<()> {
    let (_, cert) = parse_x509_certificate(cert_der)
        .map_err(|e| Error::DeviceError(format!("certificate does not parse: {}", e)))?;

    let public_key = key.public_key().ok_or(Error::KeyNotFound(key.id()))?;
    if cert.public_key().subject_public_key.data.as_ref() != public_key {
        log::warn!("Certificate subject key does not match key {}", key.id());
        return Err(Error::CertificateKeyMismatch(key.id()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::element::{DeviceParams, SimulatedElement};
    use crate::core::error::ErrorKind;

    #[test]
    fn test_store_and_load() -> Result<()> {
        let session = SecureElementSession::connect(SimulatedElement::new(), DeviceParams::default())?;
        let id = ObjectId(0xF000_0002);

        store_binary(&session, id, &[0xAB; 700])?;
        assert_eq!(load_binary(&session, id, 1024)?, vec![0xAB; 700]);

        let err = load_binary(&session, id, 512).unwrap_err();
        assert!(matches!(err, Error::BufferTooSmall { required: 700, provided: 512 }));
        Ok(())
    }

    #[test]
    fn test_store_over_capacity_keeps_previous() -> Result<()> {
        let element = SimulatedElement::with_capacity(1024);
        let session = SecureElementSession::connect(element, DeviceParams::default())?;
        let id = ObjectId(0xF000_0002);

        store_binary(&session, id, b"original")?;
        let err = store_binary(&session, id, &[0u8; 2048]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
        assert_eq!(load_binary(&session, id, 64)?, b"original".to_vec());
        Ok(())
    }

    #[test]
    fn test_store_refused_without_key_store() -> Result<()> {
        let element = SimulatedElement::new();
        element.fail_key_store(true);
        let session = SecureElementSession::connect(element.clone(), DeviceParams::default())?;
        let id = ObjectId(0xF000_0002);

        let err = store_binary(&session, id, b"certificate").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert!(!element.contains(id));

        let err = load_binary(&session, id, 64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        Ok(())
    }

    #[test]
    fn test_load_missing() -> Result<()> {
        let session = SecureElementSession::connect(SimulatedElement::new(), DeviceParams::default())?;
        let err = load_binary(&session, ObjectId(0xF000_0099), 64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[test]
    fn test_garbage_certificate_rejected() -> Result<()> {
        let session = SecureElementSession::connect(SimulatedElement::new(), DeviceParams::default())?;
        let id = ObjectId(0xF000_0002);
        store_binary(&session, id, b"definitely not DER")?;

        let err = load_certificate(&session, id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceError);
        Ok(())
    }
}
