/*!
Constants for the secure-element TLS bridge.

This module contains default object identifiers, device addressing,
timeouts and the peer-certificate verification flag bits.
*/

use std::time::Duration;

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default object identifier of the TLS client key pair
pub const TLS_KEY_ID: u32 = 0xF000_0001;

/// Default object identifier of the client certificate blob
pub const TLS_CERT_ID: u32 = 0xF000_0002;

/// Default I2C address of the secure element
pub const DEFAULT_I2C_ADDRESS: u8 = 0x48;

/// Default server host name
pub const DEFAULT_SERVER_NAME: &str = "httpbin.org";

/// Default server port
pub const DEFAULT_SERVER_PORT: u16 = 443;

/// Object identifier range reserved by the secure element itself
pub mod reserved {
    /// First reserved identifier
    pub const FIRST: u32 = 0x7FFF_0000;

    /// Last reserved identifier
    pub const LAST: u32 = 0x7FFF_FFFF;
}

/// Timeouts used by the connection driver
pub mod timeouts {
    use super::Duration;

    /// Transport connect timeout
    pub const CONNECT: Duration = Duration::from_secs(10);

    /// Upper bound for one complete handshake
    pub const HANDSHAKE: Duration = Duration::from_secs(30);

    /// Upper bound for one application read or write
    pub const IO: Duration = Duration::from_secs(30);

    /// Upper bound for one request/response exchange
    pub const EXCHANGE: Duration = Duration::from_secs(60);

    /// Socket read timeout between deadline checks
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
}

/// Size limits
pub mod sizes {
    /// Largest binary object the secure element stores
    pub const MAX_BINARY_OBJECT: usize = 4096;

    /// Initial buffer used when loading a certificate
    pub const CERT_BUFFER: usize = 2048;

    /// Read buffer for application data
    pub const READ_BUFFER: usize = 1024;

    /// Largest response accepted by one exchange
    pub const MAX_RESPONSE: usize = 64 * 1024;

    /// SHA-256 digest length
    pub const SHA256_DIGEST: usize = 32;

    /// SHA-384 digest length
    pub const SHA384_DIGEST: usize = 48;

    /// Uncompressed SEC1 P-256 public key length
    pub const P256_PUBLIC_KEY: usize = 65;
}

/// Peer certificate verification flags
///
/// The bit layout is the conventional X.509 verification bitmask used by
/// embedded TLS stacks, so values can be compared with device logs.
pub mod verify {
    pub const EXPIRED: u32 = 0x01;
    pub const REVOKED: u32 = 0x02;
    pub const CN_MISMATCH: u32 = 0x04;
    pub const NOT_TRUSTED: u32 = 0x08;
    pub const MISSING: u32 = 0x40;
    pub const SKIP_VERIFY: u32 = 0x80;
    pub const OTHER: u32 = 0x0100;
    pub const FUTURE: u32 = 0x0200;
    pub const KEY_USAGE: u32 = 0x0800;
    pub const EXT_KEY_USAGE: u32 = 0x1000;
    pub const BAD_MD: u32 = 0x4000;
    pub const BAD_PK: u32 = 0x8000;
    pub const BAD_KEY: u32 = 0x1_0000;
}
