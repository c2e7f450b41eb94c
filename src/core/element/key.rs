/*!
Key handles and provisioning.

A [`KeyHandle`] names a key pair inside the element by identifier. It never
holds private material. Handles are tied to the session and the epoch they
were resolved in.
*/

use std::fmt;
use std::sync::Weak;

use super::session::{SecureElementSession, SessionShared};
use super::{KeyAlgorithm, KeySpec, KeyUsage, ObjectId, ObjectKind};
use crate::core::error::{Error, Result};

/// What is known about the object behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Not yet looked up
    Unknown,
    /// Looked up and absent
    Absent,
    /// Exists in the element
    Present,
}

/// Outcome of [`KeyHandle::resolve_or_create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// The key already existed and was reused
    Existing,
    /// A fresh key pair was generated
    Generated,
}

/// Reference to a key pair stored in the secure element
#[derive(Clone)]
pub struct KeyHandle {
    id: ObjectId,
    kind: ObjectKind,
    algorithm: KeyAlgorithm,
    usage: KeyUsage,
    presence: Presence,
    public_key: Option<Vec<u8>>,
    session: Option<Weak<SessionShared>>,
    epoch: u64,
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .field("presence", &self.presence)
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl KeyHandle {
    /// Allocate an unresolved handle for `id` in an open session
    pub fn allocate(session: &SecureElementSession, id: ObjectId, spec: &KeySpec) -> Result<Self> {
        if !id.is_assignable() {
            return Err(Error::AllocationFailed(format!("identifier {} is reserved", id)));
        }
        let epoch = session.epoch().ok_or(Error::SessionClosed)?;

        Ok(Self {
            id,
            kind: ObjectKind::KeyPair,
            algorithm: spec.algorithm,
            usage: spec.usage,
            presence: Presence::Unknown,
            public_key: None,
            session: Some(session.downgrade()),
            epoch,
        })
    }

    /// Bind `id` to a key pair, generating one only when none exists.
    ///
    /// Lookup and generation run under one session lock so that two callers
    /// in this process cannot both generate. An existing key is never
    /// replaced; if it has a different kind or algorithm the call fails with
    /// `AllocationFailed`. Fails with `StoreUnavailable` when the key store
    /// cannot be loaded.
    pub fn resolve_or_create(
        session: &SecureElementSession,
        id: ObjectId,
        spec: &KeySpec,
    ) -> Result<(Self, Provisioned)> {
        let mut handle = Self::allocate(session, id, spec)?;

        let outcome = session.transact_store(|driver, epoch| {
            if epoch != handle.epoch {
                return Err(Error::SessionClosed);
            }

            let outcome = match driver.object_info(id)? {
                Some(info) => {
                    if info.kind != ObjectKind::KeyPair {
                        return Err(Error::AllocationFailed(format!(
                            "object {} is not a key pair",
                            id
                        )));
                    }
                    if info.algorithm != Some(spec.algorithm) {
                        return Err(Error::AllocationFailed(format!(
                            "object {} holds a different key type",
                            id
                        )));
                    }
                    handle.usage = info.usage;
                    Provisioned::Existing
                }
                None => {
                    driver.generate_key_pair(id, spec)?;
                    Provisioned::Generated
                }
            };

            handle.public_key = Some(driver.public_key(id)?);
            Ok(outcome)
        })?;

        handle.presence = Presence::Present;
        match outcome {
            Provisioned::Existing => log::info!("Found existing key pair at {}", id),
            Provisioned::Generated => log::info!("Generated new {} key pair at {}", spec.algorithm, id),
        }

        Ok((handle, outcome))
    }

    /// Handle for a key that lives outside any element
    pub fn detached(id: ObjectId, algorithm: KeyAlgorithm, public_key: Vec<u8>) -> Self {
        Self {
            id,
            kind: ObjectKind::KeyPair,
            algorithm,
            usage: KeyUsage::SIGN | KeyUsage::VERIFY,
            presence: Presence::Present,
            public_key: Some(public_key),
            session: None,
            epoch: 0,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn usage(&self) -> KeyUsage {
        self.usage
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }

    /// SEC1 public key, known once resolved
    pub fn public_key(&self) -> Option<&[u8]> {
        self.public_key.as_deref()
    }

    /// Session epoch this handle was resolved in
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the handle is backed by a session
    pub fn is_element_backed(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the owning session is still open in the same epoch
    pub fn is_live(&self) -> bool {
        match self.session() {
            Ok(session) => session.epoch() == Some(self.epoch),
            Err(_) => false,
        }
    }

    /// Owning session
    pub(crate) fn session(&self) -> Result<SecureElementSession> {
        self.session
            .as_ref()
            .and_then(SecureElementSession::upgrade)
            .ok_or(Error::SessionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::element::{DeviceParams, SimulatedElement};
    use crate::core::error::ErrorKind;

    fn open_session(element: &SimulatedElement) -> Result<SecureElementSession> {
        SecureElementSession::connect(element.clone(), DeviceParams::default())
    }

    #[test]
    fn test_generate_then_reuse() -> Result<()> {
        let element = SimulatedElement::new();
        let session = open_session(&element)?;
        let id = ObjectId(0xF000_0001);

        let (first, outcome) = KeyHandle::resolve_or_create(&session, id, &KeySpec::default())?;
        assert_eq!(outcome, Provisioned::Generated);
        assert_eq!(first.presence(), Presence::Present);

        let (second, outcome) = KeyHandle::resolve_or_create(&session, id, &KeySpec::default())?;
        assert_eq!(outcome, Provisioned::Existing);
        assert_eq!(first.public_key(), second.public_key());
        assert_eq!(element.generation_count(), 1);
        Ok(())
    }

    #[test]
    fn test_reserved_identifier_rejected() -> Result<()> {
        let session = open_session(&SimulatedElement::new())?;
        let err = KeyHandle::resolve_or_create(&session, ObjectId(0x7FFF_0001), &KeySpec::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllocationFailed);
        Ok(())
    }

    #[test]
    fn test_existing_binary_object_is_not_a_key() -> Result<()> {
        let element = SimulatedElement::new();
        let session = open_session(&element)?;
        let id = ObjectId(0xF000_0010);
        crate::core::element::store_binary(&session, id, b"not a key")?;

        let err = KeyHandle::resolve_or_create(&session, id, &KeySpec::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllocationFailed);
        assert_eq!(element.generation_count(), 0);
        Ok(())
    }

    #[test]
    fn test_unloadable_store_blocks_provisioning() -> Result<()> {
        let element = SimulatedElement::new();
        element.fail_key_store(true);
        let session = open_session(&element)?;
        let id = ObjectId(0xF000_0001);

        let err = KeyHandle::resolve_or_create(&session, id, &KeySpec::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert_eq!(element.generation_count(), 0);
        assert!(!element.contains(id));

        element.fail_key_store(false);
        let (_, outcome) = KeyHandle::resolve_or_create(&session, id, &KeySpec::default())?;
        assert_eq!(outcome, Provisioned::Generated);
        Ok(())
    }

    #[test]
    fn test_handle_dies_with_session_epoch() -> Result<()> {
        let session = open_session(&SimulatedElement::new())?;
        let (handle, _) =
            KeyHandle::resolve_or_create(&session, ObjectId(0xF000_0001), &KeySpec::default())?;
        assert!(handle.is_live());

        session.close();
        assert!(!handle.is_live());

        session.open()?;
        assert!(!handle.is_live());
        Ok(())
    }

    #[test]
    fn test_allocate_on_closed_session() {
        let session = SecureElementSession::new(SimulatedElement::new(), DeviceParams::default());
        let err = KeyHandle::allocate(&session, ObjectId(0xF000_0001), &KeySpec::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionClosed);
    }
}
