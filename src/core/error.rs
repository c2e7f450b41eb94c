/*!
Error handling for the secure-element TLS bridge.

Every failure the bridge can report is a variant of [`Error`]. Connections
remember their terminal failure as an [`ErrorKind`], which is `Copy` and can
be compared in tests and by callers deciding whether to retry.
*/

use std::io;
use thiserror::Error;

use crate::core::element::ObjectId;

/// Result type for the bridge
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the bridge
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The secure element did not answer on its bus
    #[error("Secure element unreachable: {0}")]
    DeviceUnreachable(String),

    /// Secure channel authentication was rejected
    #[error("Secure element channel authentication failed")]
    AuthFailed,

    /// The session is already open
    #[error("Secure element session already open")]
    AlreadyOpen,

    /// The owning session has been closed
    #[error("Secure element session is closed")]
    SessionClosed,

    /// No key object under this identifier
    #[error("Key object {0} not found")]
    KeyNotFound(ObjectId),

    /// No binary object under this identifier
    #[error("Object {0} not found")]
    NotFound(ObjectId),

    /// Digest algorithm does not fit the key
    #[error("Algorithm mismatch: key is {key}, request is {requested}")]
    AlgorithmMismatch {
        key: String,
        requested: String,
    },

    /// The secure element is busy or timed out
    #[error("Secure element busy")]
    DeviceBusy,

    /// The secure element rejected a command
    #[error("Secure element error: {0}")]
    DeviceError(String),

    /// A handle could not be bound to the identifier
    #[error("Object allocation failed: {0}")]
    AllocationFailed(String),

    /// Key-pair generation failed inside the element
    #[error("Key generation failed: {0}")]
    GenerationFailed(String),

    /// The key store could not be used
    #[error("Key store unavailable: {0}")]
    StoreUnavailable(String),

    /// Payload larger than the object capacity
    #[error("Capacity exceeded: {requested} bytes requested, {capacity} available")]
    CapacityExceeded {
        requested: usize,
        capacity: usize,
    },

    /// Caller buffer cannot hold the object
    #[error("Buffer too small: {required} bytes required, {provided} provided")]
    BufferTooSmall {
        required: usize,
        provided: usize,
    },

    /// The peer could not be reached
    #[error("Transport unreachable: {0}")]
    TransportUnreachable(String),

    /// Peer certificate verification failed
    #[error("Peer certificate untrusted (flags 0x{flags:08X})")]
    CertificateUntrusted {
        flags: u32,
    },

    /// Certificate public key does not belong to the element key
    #[error("Certificate {0} does not match the element key")]
    CertificateKeyMismatch(ObjectId),

    /// The protocol engine reported a fatal error
    #[error("Protocol error -0x{code:04X}: {message}")]
    ProtocolFatal {
        code: i32,
        message: String,
    },

    /// Deadline elapsed
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// Operation not allowed in the current state
    #[error("Invalid state: expected {expected}, but was {actual}")]
    InvalidState {
        expected: String,
        actual: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Discriminant of [`Error`] without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    DeviceUnreachable,
    AuthFailed,
    AlreadyOpen,
    SessionClosed,
    KeyNotFound,
    NotFound,
    AlgorithmMismatch,
    DeviceBusy,
    DeviceError,
    AllocationFailed,
    GenerationFailed,
    StoreUnavailable,
    CapacityExceeded,
    BufferTooSmall,
    TransportUnreachable,
    CertificateUntrusted,
    CertificateKeyMismatch,
    ProtocolFatal,
    Timeout,
    InvalidState,
    Config,
}

impl Error {
    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::DeviceUnreachable(_) => ErrorKind::DeviceUnreachable,
            Error::AuthFailed => ErrorKind::AuthFailed,
            Error::AlreadyOpen => ErrorKind::AlreadyOpen,
            Error::SessionClosed => ErrorKind::SessionClosed,
            Error::KeyNotFound(_) => ErrorKind::KeyNotFound,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlgorithmMismatch { .. } => ErrorKind::AlgorithmMismatch,
            Error::DeviceBusy => ErrorKind::DeviceBusy,
            Error::DeviceError(_) => ErrorKind::DeviceError,
            Error::AllocationFailed(_) => ErrorKind::AllocationFailed,
            Error::GenerationFailed(_) => ErrorKind::GenerationFailed,
            Error::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Error::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Error::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
            Error::TransportUnreachable(_) => ErrorKind::TransportUnreachable,
            Error::CertificateUntrusted { .. } => ErrorKind::CertificateUntrusted,
            Error::CertificateKeyMismatch(_) => ErrorKind::CertificateKeyMismatch,
            Error::ProtocolFatal { .. } => ErrorKind::ProtocolFatal,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the caller may retry the failed operation.
    ///
    /// Only transient element and deadline conditions qualify; algorithm and
    /// allocation failures indicate misconfiguration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::DeviceBusy | Error::Timeout(_))
    }
}

/// Create an invalid state error
#[macro_export]
macro_rules! invalid_state_err {
    ($expected:expr, $actual:expr) => {
        Err($crate::core::error::Error::InvalidState {
            expected: $expected.to_string(),
            actual: $actual.to_string(),
        })
    };
}

/// Create a configuration error
#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        Err($crate::core::error::Error::Config($msg.to_string()))
    };
    ($fmt:expr, $($arg:tt)*) => {
        Err($crate::core::error::Error::Config(format!($fmt, $($arg)*)))
    };
}

/// Convert from Error to io::Error (for use behind `Read`/`Write`)
impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(io_error) => io_error,
            Error::Timeout(ms) => io::Error::new(
                io::ErrorKind::TimedOut,
                format!("Operation timed out after {} ms", ms),
            ),
            Error::TransportUnreachable(msg) => io::Error::new(io::ErrorKind::ConnectionRefused, msg),
            Error::SessionClosed => io::Error::new(io::ErrorKind::NotConnected, "Session closed"),
            Error::InvalidState { expected, actual } => io::Error::new(
                io::ErrorKind::NotConnected,
                format!("Invalid state: expected {}, but was {}", expected, actual),
            ),
            denied @ (Error::CertificateUntrusted { .. }
            | Error::CertificateKeyMismatch(_)
            | Error::AuthFailed) => io::Error::new(io::ErrorKind::PermissionDenied, denied.to_string()),
            Error::DeviceBusy => io::Error::new(io::ErrorKind::WouldBlock, "Secure element busy"),
            other => io::Error::other(other.to_string()),
        }
    }
}
