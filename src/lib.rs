/*!
# SE TLS Bridge

A TLS client whose private-key operations are delegated to a hardware
secure element. The host holds only a handle to the key object inside the
element; every handshake signature is computed by the element.

## Overview

This library provides:

- Secure-element session and key-object lifecycle with create-or-reuse
  provisioning and certificate storage
- A signing seam polymorphic over secure-element and software backends
- A connection state machine that drives a non-blocking TLS handshake and
  data exchange, with deadlines and exactly-once cleanup
- A rustls adapter that presents the element-backed key for client
  authentication
- A simulated secure element for tests and demos

## Example

```no_run
use se_tls_bridge::{BridgeConfigBuilder, SimulatedElement};

# fn main() -> se_tls_bridge::Result<()> {
let client = BridgeConfigBuilder::new()
    .with_server("httpbin.org", 443)
    .build_client()?;
let response = client.run_tls(SimulatedElement::new())?;
println!("{}", String::from_utf8_lossy(&response));
# Ok(())
# }
```
*/

// Core components
pub mod core;

// Protocol driver
pub mod protocol;

// Re-export commonly used types for convenience
pub use crate::core::config::{BridgeConfig, SecurityPreset};
pub use crate::core::constants::{sizes, timeouts, verify, VERSION};
pub use crate::core::element::{
    AuthMode, ConnectionKind, DeviceParams, ElementDriver, KeyAlgorithm, KeyHandle, KeySpec,
    KeyUsage, ObjectId, Presence, Provisioned, SecureElementSession, SimulatedElement,
};
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::session::{ConnectionState, Role};
pub use crate::core::signing::{BoundSigner, DigestAlgorithm, ElementSigner, SigningProvider, SoftwareSigner};

// Re-export protocol components
pub use protocol::builder::BridgeConfigBuilder;
pub use protocol::client::SecureClient;
pub use protocol::connection::{ConnectionTimeouts, TlsConnection};
pub use protocol::context::BridgeContext;
pub use protocol::engine::{EngineConfig, HandshakeStep, IoStep, ProtocolEngine, VerifyFlags};
pub use protocol::transport::{Connector, TcpConnector, Transport};

#[cfg(feature = "rustls")]
pub use protocol::rustls_engine::RustlsEngine;
