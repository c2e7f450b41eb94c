//! Core components for the secure-element TLS bridge.
//!
//! This module contains the fundamental building blocks: secure-element
//! access, signing backends, connection state, configuration and error
//! handling.

// Secure element session, keys and objects
pub mod element;

// Private-key delegation
pub mod signing;

// Connection state management
pub mod session;

// Bridge configuration
pub mod config;

// Bridge constants
pub mod constants;

// Error handling
pub mod error;

// Re-exports for convenience
pub use self::config::{BridgeConfig, SecurityPreset};
pub use self::constants::VERSION;
pub use self::element::{DeviceParams, KeyHandle, ObjectId, SecureElementSession};
pub use self::error::{Error, ErrorKind, Result};
pub use self::session::{ConnectionState, Role};
pub use self::signing::{BoundSigner, DigestAlgorithm, SigningProvider};
