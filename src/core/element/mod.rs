/*!
Secure-element access for the bridge.

The element is reached through an [`ElementDriver`], the command-layer seam
(session open/close, object lookup, key generation, blob I/O and signing, all
addressed by 32-bit object identifiers). Transport framing stays inside the
driver. On top of it sit the [`SecureElementSession`], [`KeyHandle`] and the
binary-object accessors.
*/

use std::fmt;
use std::ops::BitOr;

use crate::core::constants::reserved;
use crate::core::error::Result;

pub mod key;
pub mod object;
pub mod session;
pub mod simulated;

pub use key::{KeyHandle, Presence, Provisioned};
pub use object::{load_binary, load_certificate, store_binary, verify_certificate_binding};
pub use session::SecureElementSession;
pub use simulated::SimulatedElement;

/// Identifier of an object stored inside the secure element
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Whether this identifier may be used for application objects
    pub fn is_assignable(self) -> bool {
        self.0 != 0 && !(reserved::FIRST..=reserved::LAST).contains(&self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<u32> for ObjectId {
    fn from(value: u32) -> Self {
        ObjectId(value)
    }
}

/// Kind of object held under an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Asymmetric key pair
    KeyPair,
    /// Opaque binary data (certificates)
    Binary,
}

/// Elliptic-curve key algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum KeyAlgorithm {
    /// NIST P-256
    EcNistP256,
    /// NIST P-384
    EcNistP384,
}

impl KeyAlgorithm {
    /// Curve size in bits
    pub fn bits(self) -> usize {
        match self {
            KeyAlgorithm::EcNistP256 => 256,
            KeyAlgorithm::EcNistP384 => 384,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::EcNistP256 => write!(f, "EC NIST P-256"),
            KeyAlgorithm::EcNistP384 => write!(f, "EC NIST P-384"),
        }
    }
}

/// Usage policy attached to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyUsage(u8);

impl KeyUsage {
    pub const SIGN: KeyUsage = KeyUsage(0x01);
    pub const VERIFY: KeyUsage = KeyUsage(0x02);
    pub const PRESERVE: KeyUsage = KeyUsage(0x04);

    /// Whether all bits of `other` are set
    pub fn contains(self, other: KeyUsage) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bit value
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for KeyUsage {
    type Output = KeyUsage;

    fn bitor(self, rhs: KeyUsage) -> KeyUsage {
        KeyUsage(self.0 | rhs.0)
    }
}

/// What a key object must look like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct KeySpec {
    pub algorithm: KeyAlgorithm,
    pub usage: KeyUsage,
}

impl KeySpec {
    /// P-256 key pair usable for signing and verification
    pub fn p256_sign_verify() -> Self {
        Self {
            algorithm: KeyAlgorithm::EcNistP256,
            usage: KeyUsage::SIGN | KeyUsage::VERIFY,
        }
    }

    /// P-256 key pair usable for signing only
    pub fn p256_sign_only() -> Self {
        Self {
            algorithm: KeyAlgorithm::EcNistP256,
            usage: KeyUsage::SIGN,
        }
    }
}

impl Default for KeySpec {
    fn default() -> Self {
        Self::p256_sign_verify()
    }
}

/// Metadata the element reports for an existing object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub kind: ObjectKind,
    /// Present for key pairs only
    pub algorithm: Option<KeyAlgorithm>,
    pub usage: KeyUsage,
    /// Stored length for binary objects
    pub size: usize,
}

/// Physical bus the element sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionKind {
    I2c,
    Spi,
}

/// Channel protection between host and element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum AuthMode {
    /// Plain commands
    Plain,
    /// Pre-shared-key secure channel (SCP03)
    Scp03,
}

/// How to reach the secure element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceParams {
    pub kind: ConnectionKind,
    pub address: u8,
    pub auth: AuthMode,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            kind: ConnectionKind::I2c,
            address: crate::core::constants::DEFAULT_I2C_ADDRESS,
            auth: AuthMode::Plain,
        }
    }
}

impl fmt::Display for DeviceParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@0x{:02X} ({:?})", self.kind, self.address, self.auth)
    }
}

/// Command layer of a secure element
///
/// Implementations translate each call into device commands. Every call is a
/// blocking transaction bounded by the driver's bus timeout; a timeout is
/// reported as [`Error::Timeout`](crate::core::error::Error::Timeout).
pub trait ElementDriver: Send {
    /// Open the channel
    fn open(&mut self, params: &DeviceParams) -> Result<()>;

    /// Load the key store on an open channel.
    ///
    /// Key and object commands need a loaded store. A failure is reported
    /// as [`Error::StoreUnavailable`](crate::core::error::Error::StoreUnavailable).
    fn load_key_store(&mut self) -> Result<()>;

    /// Release the channel; must tolerate a partially opened channel
    fn close(&mut self);

    /// Look up an object, `None` when absent
    fn object_info(&mut self, id: ObjectId) -> Result<Option<ObjectInfo>>;

    /// Generate a key pair under `id`
    fn generate_key_pair(&mut self, id: ObjectId, spec: &KeySpec) -> Result<()>;

    /// Public half of a key pair, SEC1 uncompressed
    fn public_key(&mut self, id: ObjectId) -> Result<Vec<u8>>;

    /// Replace the content of a binary object, creating it when absent
    fn write_binary(&mut self, id: ObjectId, data: &[u8]) -> Result<()>;

    /// Content of a binary object
    fn read_binary(&mut self, id: ObjectId) -> Result<Vec<u8>>;

    /// ECDSA signature over a precomputed digest, DER encoded
    fn sign_digest(&mut self, id: ObjectId, digest: &[u8]) -> Result<Vec<u8>>;

    /// Largest binary object accepted
    fn binary_capacity(&self) -> usize;
}
