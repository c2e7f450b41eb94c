/*!
Bridge configuration.

Everything the bridge needs is provided once, at startup: where the server
is, which element objects hold the key and certificate, how the element is
reached, and the deadlines for each phase. There is no runtime
reconfiguration.
*/

use std::time::Duration;

use crate::config_err;
use crate::core::constants::{self, sizes, timeouts};
use crate::core::element::{DeviceParams, KeySpec, ObjectId};
use crate::core::error::Result;

/// Cipher-suite policy handed to the protocol engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum SecurityPreset {
    /// The engine's default suite list
    #[default]
    Default,
    /// ECDHE-ECDSA with AES-GCM only
    SuiteB,
}

/// Configuration of one bridge run
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct BridgeConfig {
    /// Server host name, also used for SNI and name verification
    pub server_name: String,
    pub server_port: u16,
    /// Element object holding the client key pair
    pub key_id: ObjectId,
    /// Element object holding the client certificate, if any
    pub certificate_id: Option<ObjectId>,
    pub device: DeviceParams,
    /// Key generated when `key_id` is empty
    pub key_spec: KeySpec,
    pub preset: SecurityPreset,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub io_timeout: Duration,
    /// Deadline for a whole request/response exchange
    pub exchange_timeout: Duration,
    /// Largest response an exchange accepts
    pub max_response_len: usize,
    /// Transport read timeout between deadline checks
    pub poll_interval: Duration,
    /// Check that the certificate carries the element public key
    pub verify_certificate_binding: bool,
    /// Trust anchors for the server certificate, DER encoded
    pub ca_certificates: Vec<Vec<u8>>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_name: constants::DEFAULT_SERVER_NAME.to_string(),
            server_port: constants::DEFAULT_SERVER_PORT,
            key_id: ObjectId(constants::TLS_KEY_ID),
            certificate_id: None,
            device: DeviceParams::default(),
            key_spec: KeySpec::p256_sign_verify(),
            preset: SecurityPreset::Default,
            connect_timeout: timeouts::CONNECT,
            handshake_timeout: timeouts::HANDSHAKE,
            io_timeout: timeouts::IO,
            exchange_timeout: timeouts::EXCHANGE,
            max_response_len: sizes::MAX_RESPONSE,
            poll_interval: timeouts::POLL_INTERVAL,
            verify_certificate_binding: true,
            ca_certificates: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Smaller demo profile: `example.com` with a sign-only key
    pub fn minimal_demo() -> Self {
        Self {
            server_name: "example.com".to_string(),
            key_spec: KeySpec::p256_sign_only(),
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server_name.trim().is_empty() {
            return config_err!("server name is empty");
        }
        if self.server_port == 0 {
            return config_err!("server port must not be 0");
        }
        if !self.key_id.is_assignable() {
            return config_err!("key object {} is not assignable", self.key_id);
        }
        if let Some(cert_id) = self.certificate_id {
            if !cert_id.is_assignable() {
                return config_err!("certificate object {} is not assignable", cert_id);
            }
            if cert_id == self.key_id {
                return config_err!("certificate and key share object {}", cert_id);
            }
        }

        let deadlines = [
            ("connect", self.connect_timeout),
            ("handshake", self.handshake_timeout),
            ("io", self.io_timeout),
            ("exchange", self.exchange_timeout),
            ("poll", self.poll_interval),
        ];
        for (name, value) in deadlines {
            if value.is_zero() {
                return config_err!("{} timeout must not be zero", name);
            }
        }
        if self.max_response_len == 0 {
            return config_err!("maximum response length must not be zero");
        }

        Ok(())
    }
}
