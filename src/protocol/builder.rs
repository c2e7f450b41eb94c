/*!
Configuration builder for the TLS bridge.

This module provides a builder pattern for creating a validated
[`BridgeConfig`] and the client that runs it.
*/

use std::time::Duration;

use crate::core::{
    config::{BridgeConfig, SecurityPreset},
    element::{AuthMode, ConnectionKind, DeviceParams, KeySpec, ObjectId},
    error::Result,
};
use crate::protocol::client::SecureClient;

/// Builder for bridge configurations
#[derive(Debug, Clone, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the minimal demo profile
    pub fn minimal_demo(mut self) -> Self {
        self.config = BridgeConfig::minimal_demo();
        self
    }

    /// Set the server to connect to
    pub fn with_server(mut self, host: &str, port: u16) -> Self {
        self.config.server_name = host.to_string();
        self.config.server_port = port;
        self
    }

    /// Set the key object identifier
    pub fn with_key_id(mut self, id: u32) -> Self {
        self.config.key_id = ObjectId(id);
        self
    }

    /// Set the certificate object identifier
    pub fn with_certificate_id(mut self, id: u32) -> Self {
        self.config.certificate_id = Some(ObjectId(id));
        self
    }

    /// Set the device connection parameters
    pub fn with_device(mut self, device: DeviceParams) -> Self {
        self.config.device = device;
        self
    }

    /// Reach the element on I2C at `address`
    pub fn with_i2c_address(mut self, address: u8) -> Self {
        self.config.device.kind = ConnectionKind::I2c;
        self.config.device.address = address;
        self
    }

    /// Set the channel authentication mode
    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.config.device.auth = auth;
        self
    }

    /// Set the key generated when the key object is empty
    pub fn with_key_spec(mut self, spec: KeySpec) -> Self {
        self.config.key_spec = spec;
        self
    }

    /// Generate sign-only keys
    pub fn sign_only(mut self) -> Self {
        self.config.key_spec = KeySpec::p256_sign_only();
        self
    }

    /// Use a cipher-suite preset
    pub fn with_preset(mut self, preset: SecurityPreset) -> Self {
        self.config.preset = preset;
        self
    }

    /// Restrict to ECDHE-ECDSA with AES-GCM
    pub fn suite_b(mut self) -> Self {
        self.config.preset = SecurityPreset::SuiteB;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    /// Deadline for one request/response exchange
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.config.exchange_timeout = timeout;
        self
    }

    /// Largest response one exchange accepts
    pub fn with_max_response_len(mut self, len: usize) -> Self {
        self.config.max_response_len = len;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Enable or disable the certificate/key binding check
    pub fn with_certificate_binding_check(mut self, enabled: bool) -> Self {
        self.config.verify_certificate_binding = enabled;
        self
    }

    /// Add a DER trust anchor for the server certificate
    pub fn with_ca_certificate(mut self, der: Vec<u8>) -> Self {
        self.config.ca_certificates.push(der);
        self
    }

    /// Build a validated configuration
    pub fn build(self) -> Result<BridgeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build a client
    pub fn build_client(self) -> Result<SecureClient> {
        SecureClient::new(self.build()?)
    }
}
