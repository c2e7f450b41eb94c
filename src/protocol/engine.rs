/*!
Protocol engine seam.

The bridge does not implement TLS. It drives an engine that does, through a
small step-wise interface: every call either makes progress, asks for more
I/O, finishes, or fails. The engine never blocks on its own; it reads and
writes through the [`Transport`] the driver passes in.
*/

use std::fmt;

use crate::core::config::SecurityPreset;
use crate::core::constants::verify;
use crate::core::error::Result;
use crate::core::session::Role;
use crate::core::signing::BoundSigner;
use crate::protocol::transport::Transport;

/// Kind of transport the engine runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Reliable byte stream (TLS)
    #[default]
    Stream,
    /// Datagrams (DTLS)
    Datagram,
}

/// Engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub role: Role,
    pub transport: TransportKind,
    pub preset: SecurityPreset,
}

impl EngineConfig {
    /// Stream client with the given preset
    pub fn client(preset: SecurityPreset) -> Self {
        Self {
            role: Role::Client,
            transport: TransportKind::Stream,
            preset,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::client(SecurityPreset::Default)
    }
}

/// Fatal engine error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFault {
    /// Engine-specific error code
    pub code: i32,
    pub message: String,
}

impl EngineFault {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-0x{:04X}: {}", self.code, self.message)
    }
}

/// Result of one handshake step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Some progress was made, call again
    Progress,
    /// Waiting for bytes from the peer
    WantRead,
    /// Outgoing bytes could not all be written yet
    WantWrite,
    /// Handshake finished; check [`ProtocolEngine::verify_result`]
    Complete,
    /// Unrecoverable failure
    Fatal(EngineFault),
}

/// Result of one application-data operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoStep<T> {
    Done(T),
    WantRead,
    WantWrite,
    /// The peer sent an orderly close
    Closed,
    Fatal(EngineFault),
}

/// Peer-certificate verification result, zero when trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerifyFlags(pub u32);

const FLAG_NAMES: &[(u32, &str)] = &[
    (verify::EXPIRED, "certificate expired"),
    (verify::REVOKED, "certificate revoked"),
    (verify::CN_MISMATCH, "name mismatch"),
    (verify::NOT_TRUSTED, "not trusted by any CA"),
    (verify::MISSING, "certificate missing"),
    (verify::SKIP_VERIFY, "verification skipped"),
    (verify::OTHER, "other verification failure"),
    (verify::FUTURE, "certificate not yet valid"),
    (verify::KEY_USAGE, "key usage mismatch"),
    (verify::EXT_KEY_USAGE, "extended key usage mismatch"),
    (verify::BAD_MD, "unacceptable hash"),
    (verify::BAD_PK, "unacceptable public key algorithm"),
    (verify::BAD_KEY, "unacceptable key"),
];

impl VerifyFlags {
    pub const TRUSTED: VerifyFlags = VerifyFlags(0);

    pub fn is_trusted(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Names of the set bits
    pub fn describe(self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = FLAG_NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect();

        let known = FLAG_NAMES.iter().fold(0u32, |acc, (bit, _)| acc | bit);
        if self.0 & !known != 0 {
            names.push("unknown verification failure");
        }
        names
    }
}

impl fmt::Display for VerifyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_trusted() {
            write!(f, "trusted")
        } else {
            write!(f, "0x{:08X} ({})", self.0, self.describe().join(", "))
        }
    }
}

/// A TLS implementation driven step by step
pub trait ProtocolEngine {
    /// Configuration the engine was built with
    fn config(&self) -> &EngineConfig;

    /// Install the private-key operation used for client authentication.
    ///
    /// Called once, before the first handshake step.
    fn bind_signer(&mut self, signer: BoundSigner) -> Result<()>;

    /// Advance the handshake
    fn handshake_step(&mut self, io: &mut dyn Transport) -> HandshakeStep;

    /// Peer verification outcome after `Complete`
    fn verify_result(&self) -> VerifyFlags;

    /// Encrypt and send application data
    fn write(&mut self, io: &mut dyn Transport, data: &[u8]) -> IoStep<usize>;

    /// Receive and decrypt application data
    fn read(&mut self, io: &mut dyn Transport, buf: &mut [u8]) -> IoStep<usize>;

    /// Send the close notification
    fn close_notify(&mut self, io: &mut dyn Transport) -> Result<()>;

    /// Negotiated cipher suite after the handshake
    fn cipher_suite(&self) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_flags() {
        assert!(VerifyFlags::TRUSTED.describe().is_empty());

        let flags = VerifyFlags(verify::EXPIRED | verify::NOT_TRUSTED);
        assert_eq!(flags.describe(), vec!["certificate expired", "not trusted by any CA"]);
        assert!(flags.to_string().starts_with("0x00000009"));

        let flags = VerifyFlags(0x8000_0000);
        assert_eq!(flags.describe(), vec!["unknown verification failure"]);
    }
}
