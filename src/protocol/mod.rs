//! Protocol driver for the TLS bridge.
//!
//! This module contains the protocol engine seam, the transports, the
//! connection state machine and the client that ties them to a secure
//! element.

// Engine seam
pub mod engine;

// Network transports
pub mod transport;

// Connection state machine driver
pub mod connection;

// Session, key and certificate context
pub mod context;

// End-to-end client
pub mod client;

// Builder
pub mod builder;

// Scripted engine and in-memory transport
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

// rustls adapter
#[cfg(feature = "rustls")]
pub mod rustls_engine;

// Re-export for convenience
pub use builder::BridgeConfigBuilder;
pub use client::SecureClient;
pub use connection::{ConnectionTimeouts, TlsConnection};
pub use context::BridgeContext;
pub use engine::{EngineConfig, HandshakeStep, IoStep, ProtocolEngine, VerifyFlags};
pub use transport::{Connector, TcpConnector, Transport};

#[cfg(feature = "rustls")]
pub use rustls_engine::RustlsEngine;
