/*!
In-process secure element.

`SimulatedElement` implements [`ElementDriver`] on top of host P-256 keys.
Objects persist across sessions as long as one clone of the element is
alive, which mirrors non-volatile storage. Clones share the same device, so
tests keep one clone for inspection while a session owns another.

Fault injection covers the conditions a real element reports: an absent
device, rejected channel authentication, an unloadable key store, busy and
timed-out commands, and failing key generation.
*/

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;

use super::{
    AuthMode, DeviceParams, ElementDriver, KeyAlgorithm, KeySpec, KeyUsage, ObjectId, ObjectInfo,
    ObjectKind,
};
use crate::core::constants::sizes;
use crate::core::error::{Error, Result};
use crate::core::signing::software::{encoded_public_key, random_p256_key};

/// Reported duration of a simulated bus timeout
const BUS_TIMEOUT_MS: u64 = 50;

enum StoredObject {
    Key {
        algorithm: KeyAlgorithm,
        usage: KeyUsage,
        // None for keys of curves the simulator cannot compute with
        key: Option<SigningKey>,
    },
    Binary(Vec<u8>),
}

struct DeviceState {
    objects: HashMap<ObjectId, StoredObject>,
    channel_open: bool,
    reachable: bool,
    scp03_keys: bool,
    busy_commands: u32,
    timeout_commands: u32,
    fail_generation: bool,
    store_unavailable: bool,
    capacity: usize,
    transactions: u64,
    generations: u64,
    signatures: u64,
}

/// Simulated secure element
pub struct SimulatedElement {
    state: Arc<Mutex<DeviceState>>,
    holds_channel: bool,
}

// A clone refers to the same device but never inherits an open channel
impl Clone for SimulatedElement {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            holds_channel: false,
        }
    }
}

impl Default for SimulatedElement {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedElement {
    /// Empty, reachable element
    pub fn new() -> Self {
        Self::with_capacity(sizes::MAX_BINARY_OBJECT)
    }

    /// Empty element with a custom binary-object capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                objects: HashMap::new(),
                channel_open: false,
                reachable: true,
                scp03_keys: false,
                busy_commands: 0,
                timeout_commands: 0,
                fail_generation: false,
                store_unavailable: false,
                capacity,
                transactions: 0,
                generations: 0,
                signatures: 0,
            })),
            holds_channel: false,
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the device for one command, applying injected faults
    fn command(&self) -> Result<MutexGuard<'_, DeviceState>> {
        let mut state = self.state();
        if !self.holds_channel || !state.channel_open {
            return Err(Error::SessionClosed);
        }
        state.transactions += 1;

        if state.busy_commands > 0 {
            state.busy_commands -= 1;
            return Err(Error::DeviceBusy);
        }
        if state.timeout_commands > 0 {
            state.timeout_commands -= 1;
            return Err(Error::Timeout(BUS_TIMEOUT_MS));
        }
        Ok(state)
    }

    /// Make the device answer or stay silent on its bus
    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Provision secure-channel keys so SCP03 sessions authenticate
    pub fn set_scp03_keys(&self, provisioned: bool) {
        self.state().scp03_keys = provisioned;
    }

    /// Answer the next `count` commands with "busy"
    pub fn fail_busy(&self, count: u32) {
        self.state().busy_commands = count;
    }

    /// Let the next `count` commands time out
    pub fn fail_timeout(&self, count: u32) {
        self.state().timeout_commands = count;
    }

    /// Make key generation fail until reset
    pub fn fail_generation(&self, fail: bool) {
        self.state().fail_generation = fail;
    }

    /// Make loading the key store fail until reset
    pub fn fail_key_store(&self, fail: bool) {
        self.state().store_unavailable = fail;
    }

    /// Import a P-256 key pair from PKCS#8 DER, as done at provisioning time
    pub fn import_p256_pkcs8(&self, id: ObjectId, der: &[u8]) -> Result<()> {
        let key = SigningKey::from_pkcs8_der(der)
            .map_err(|e| Error::GenerationFailed(format!("PKCS#8 import failed: {}", e)))?;
        self.state().objects.insert(
            id,
            StoredObject::Key {
                algorithm: KeyAlgorithm::EcNistP256,
                usage: KeyUsage::SIGN | KeyUsage::VERIFY,
                key: Some(key),
            },
        );
        log::debug!("Imported P-256 key pair at {}", id);
        Ok(())
    }

    /// Place a key object of another curve under `id`.
    ///
    /// The simulator cannot sign with it. It exists so callers can see how
    /// provisioning treats an identifier already used by a different key.
    pub fn preload_foreign_key(&self, id: ObjectId, algorithm: KeyAlgorithm) {
        self.state().objects.insert(
            id,
            StoredObject::Key {
                algorithm,
                usage: KeyUsage::SIGN,
                key: None,
            },
        );
    }

    /// Whether an object exists under `id`
    pub fn contains(&self, id: ObjectId) -> bool {
        self.state().objects.contains_key(&id)
    }

    /// Whether some session currently holds the channel
    pub fn is_channel_open(&self) -> bool {
        self.state().channel_open
    }

    /// Commands issued since creation
    pub fn transaction_count(&self) -> u64 {
        self.state().transactions
    }

    /// Key pairs generated since creation
    pub fn generation_count(&self) -> u64 {
        self.state().generations
    }

    /// Signatures produced since creation
    pub fn signature_count(&self) -> u64 {
        self.state().signatures
    }
}

impl ElementDriver for SimulatedElement {
    fn open(&mut self, params: &DeviceParams) -> Result<()> {
        let mut state = self.state();
        if !state.reachable {
            return Err(Error::DeviceUnreachable(format!("no answer from {}", params)));
        }
        if state.channel_open {
            return Err(Error::AlreadyOpen);
        }
        if params.auth == AuthMode::Scp03 && !state.scp03_keys {
            return Err(Error::AuthFailed);
        }
        state.channel_open = true;
        drop(state);
        self.holds_channel = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.holds_channel {
            self.state().channel_open = false;
            self.holds_channel = false;
        }
    }

    fn load_key_store(&mut self) -> Result<()> {
        let state = self.state();
        if !self.holds_channel || !state.channel_open {
            return Err(Error::SessionClosed);
        }
        if state.store_unavailable {
            return Err(Error::StoreUnavailable("key store could not be loaded".into()));
        }
        Ok(())
    }

    fn object_info(&mut self, id: ObjectId) -> Result<Option<ObjectInfo>> {
        let state = self.command()?;
        Ok(state.objects.get(&id).map(|object| match object {
            StoredObject::Key { algorithm, usage, .. } => ObjectInfo {
                kind: ObjectKind::KeyPair,
                algorithm: Some(*algorithm),
                usage: *usage,
                size: algorithm.bits() / 8,
            },
            StoredObject::Binary(data) => ObjectInfo {
                kind: ObjectKind::Binary,
                algorithm: None,
                usage: KeyUsage::PRESERVE,
                size: data.len(),
            },
        }))
    }

    fn generate_key_pair(&mut self, id: ObjectId, spec: &KeySpec) -> Result<()> {
        let mut state = self.command()?;
        if state.fail_generation {
            return Err(Error::GenerationFailed(format!("element refused to generate at {}", id)));
        }
        if state.objects.contains_key(&id) {
            return Err(Error::DeviceError(format!("object {} already exists", id)));
        }
        if spec.algorithm != KeyAlgorithm::EcNistP256 {
            return Err(Error::GenerationFailed(format!("{} is not supported", spec.algorithm)));
        }

        let key = random_p256_key();
        state.objects.insert(
            id,
            StoredObject::Key {
                algorithm: spec.algorithm,
                usage: spec.usage,
                key: Some(key),
            },
        );
        state.generations += 1;
        Ok(())
    }

    fn public_key(&mut self, id: ObjectId) -> Result<Vec<u8>> {
        let state = self.command()?;
        match state.objects.get(&id) {
            Some(StoredObject::Key { key: Some(key), .. }) => Ok(encoded_public_key(key)),
            // Placeholder keys report a zeroed point of the right length
            Some(StoredObject::Key { key: None, algorithm, .. }) => {
                Ok(vec![0u8; 1 + 2 * algorithm.bits() / 8])
            }
            _ => Err(Error::KeyNotFound(id)),
        }
    }

    fn write_binary(&mut self, id: ObjectId, data: &[u8]) -> Result<()> {
        let mut state = self.command()?;
        if data.len() > state.capacity {
            return Err(Error::CapacityExceeded {
                requested: data.len(),
                capacity: state.capacity,
            });
        }
        if let Some(StoredObject::Key { .. }) = state.objects.get(&id) {
            return Err(Error::DeviceError(format!("object {} is a key pair", id)));
        }
        state.objects.insert(id, StoredObject::Binary(data.to_vec()));
        Ok(())
    }

    fn read_binary(&mut self, id: ObjectId) -> Result<Vec<u8>> {
        let state = self.command()?;
        match state.objects.get(&id) {
            Some(StoredObject::Binary(data)) => Ok(data.clone()),
            _ => Err(Error::NotFound(id)),
        }
    }

    fn sign_digest(&mut self, id: ObjectId, digest: &[u8]) -> Result<Vec<u8>> {
        let mut state = self.command()?;
        let key = match state.objects.get(&id) {
            Some(StoredObject::Key { usage, .. }) if !usage.contains(KeyUsage::SIGN) => {
                return Err(Error::DeviceError(format!("key {} does not allow signing", id)));
            }
            Some(StoredObject::Key { key: Some(key), .. }) => key.clone(),
            Some(StoredObject::Key { key: None, .. }) => {
                return Err(Error::DeviceError(format!("key {} cannot sign here", id)));
            }
            _ => return Err(Error::KeyNotFound(id)),
        };

        let signature: Signature = key
            .sign_prehash(digest)
            .map_err(|e| Error::DeviceError(format!("signing failed: {}", e)))?;
        state.signatures += 1;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn binary_capacity(&self) -> usize {
        self.state().capacity
    }
}
