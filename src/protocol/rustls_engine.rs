/*!
`rustls` adapter for the protocol engine seam.

The adapter supplies rustls with three things and interprets one:

- a client-certificate resolver whose signing key forwards every signature
  to the bound [`BoundSigner`], so the private key never enters rustls
- a server-certificate verifier that runs the WebPKI checks but records
  failures as verification flags instead of aborting; the connection driver
  rejects any non-zero result after the handshake
- a crypto provider restricted according to the security preset

Record processing and chain validation stay inside rustls.
*/

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{ResolvesClientCert, WebPkiServerVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::sign::{CertifiedKey, Signer, SigningKey};
use rustls::{
    CertificateError, CipherSuite, ClientConfig, ClientConnection, DigitallySignedStruct, NamedGroup,
    RootCertStore, SignatureAlgorithm, SignatureScheme,
};

use crate::core::config::{BridgeConfig, SecurityPreset};
use crate::core::constants::verify;
use crate::core::error::{Error, Result};
use crate::core::session::Role;
use crate::core::signing::{BoundSigner, DigestAlgorithm};
use crate::protocol::engine::{
    EngineConfig, EngineFault, HandshakeStep, IoStep, ProtocolEngine, TransportKind, VerifyFlags,
};
use crate::protocol::transport::{Transport, TransportIo};

/// Fault codes reported by the adapter
pub mod fault {
    pub const TRANSPORT: i32 = 0x0050;
    pub const PEER_CLOSED: i32 = 0x7880;
    pub const CERTIFICATE: i32 = 0x2700;
    pub const ALERT: i32 = 0x7780;
    pub const SIGNATURE: i32 = 0x7080;
    pub const OTHER: i32 = 0x7100;
}

/// Parse PEM certificates into DER blobs
pub fn parse_pem_certificates(pem: &[u8]) -> Result<Vec<Vec<u8>>> {
    CertificateDer::pem_slice_iter(pem)
        .map(|cert| cert.map(|der| der.as_ref().to_vec()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("failed to parse certificates: {}", e)))
}

fn provider_for(preset: SecurityPreset) -> CryptoProvider {
    let mut provider = ring::default_provider();
    if preset == SecurityPreset::SuiteB {
        provider.cipher_suites.retain(|suite| {
            matches!(
                suite.suite(),
                CipherSuite::TLS13_AES_128_GCM_SHA256
                    | CipherSuite::TLS13_AES_256_GCM_SHA384
                    | CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
                    | CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384
            )
        });
        provider
            .kx_groups
            .retain(|group| matches!(group.name(), NamedGroup::secp256r1 | NamedGroup::secp384r1));
    }
    provider
}

fn flag_for(error: &CertificateError) -> u32 {
    match error {
        CertificateError::Expired | CertificateError::ExpiredContext { .. } => verify::EXPIRED,
        CertificateError::NotValidYet | CertificateError::NotValidYetContext { .. } => verify::FUTURE,
        CertificateError::Revoked => verify::REVOKED,
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. } => {
            verify::CN_MISMATCH
        }
        CertificateError::UnknownIssuer | CertificateError::BadSignature => verify::NOT_TRUSTED,
        CertificateError::InvalidPurpose => verify::EXT_KEY_USAGE,
        _ => verify::OTHER,
    }
}

fn fault_for(error: &rustls::Error) -> EngineFault {
    let code = match error {
        rustls::Error::InvalidCertificate(_) => fault::CERTIFICATE,
        rustls::Error::AlertReceived(_) => fault::ALERT,
        rustls::Error::General(_) => fault::SIGNATURE,
        _ => fault::OTHER,
    };
    EngineFault::new(code, error.to_string())
}

fn transport_fault(error: &io::Error) -> EngineFault {
    EngineFault::new(fault::TRANSPORT, error.to_string())
}

/// WebPKI verification that records failures instead of aborting
#[derive(Debug)]
struct RecordingVerifier {
    inner: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
    flags: Arc<AtomicU32>,
}

impl RecordingVerifier {
    fn new(roots: RootCertStore, provider: Arc<CryptoProvider>, flags: Arc<AtomicU32>) -> Result<Self> {
        let inner = if roots.is_empty() {
            None
        } else {
            let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                .build()
                .map_err(|e| Error::Config(format!("server verifier error: {}", e)))?;
            Some(verifier)
        };
        Ok(Self {
            inner,
            provider,
            flags,
        })
    }

    fn record(&self, bits: u32) {
        self.flags.fetch_or(bits, Ordering::SeqCst);
    }
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let Some(inner) = self.inner.as_ref() else {
            log::warn!("No trust anchors configured, server certificate is untrusted");
            self.record(verify::NOT_TRUSTED);
            return Ok(ServerCertVerified::assertion());
        };

        match inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now) {
            Ok(verified) => Ok(verified),
            Err(rustls::Error::InvalidCertificate(error)) => {
                log::warn!("Server certificate rejected: {:?}", error);
                self.record(flag_for(&error));
                Ok(ServerCertVerified::assertion())
            }
            Err(other) => Err(other),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Signing key whose operations run through the bound signer
#[derive(Debug)]
struct DelegatedKey {
    signer: BoundSigner,
    scheme: SignatureScheme,
}

impl SigningKey for DelegatedKey {
    fn choose_scheme(&self, offered: &[SignatureScheme]) -> Option<Box<dyn Signer>> {
        if !offered.contains(&self.scheme) {
            log::warn!("Server offered no scheme usable with {:?}", self.scheme);
            return None;
        }
        Some(Box::new(DelegatedSigner {
            signer: self.signer.clone(),
            scheme: self.scheme,
        }))
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::ECDSA
    }
}

#[derive(Debug)]
struct DelegatedSigner {
    signer: BoundSigner,
    scheme: SignatureScheme,
}

impl Signer for DelegatedSigner {
    fn sign(&self, message: &[u8]) -> std::result::Result<Vec<u8>, rustls::Error> {
        self.signer
            .sign_message(message)
            .map_err(|e| rustls::Error::General(format!("delegated signature failed: {}", e)))
    }

    fn scheme(&self) -> SignatureScheme {
        self.scheme
    }
}

/// Client certificate resolver filled when the signer is bound
#[derive(Debug, Default)]
struct SlotResolver {
    slot: Mutex<Option<Arc<CertifiedKey>>>,
}

impl SlotResolver {
    fn fill(&self, key: Arc<CertifiedKey>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(key);
    }

    fn current(&self) -> Option<Arc<CertifiedKey>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ResolvesClientCert for SlotResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        let key = self.current();
        if key.is_none() {
            log::warn!("Server requested a client certificate but none is configured");
        }
        key
    }

    fn has_certs(&self) -> bool {
        self.current().is_some()
    }
}

/// Protocol engine backed by a rustls client connection
pub struct RustlsEngine {
    config: EngineConfig,
    conn: ClientConnection,
    resolver: Arc<SlotResolver>,
    flags: Arc<AtomicU32>,
    client_certificate: Option<CertificateDer<'static>>,
}

impl RustlsEngine {
    /// Create a client engine for `server_name`
    ///
    /// `ca_certificates` are DER trust anchors. `client_certificate` is the
    /// DER certificate presented with the bound signer; without it the
    /// client does not authenticate.
    pub fn new(
        config: EngineConfig,
        server_name: &str,
        ca_certificates: &[Vec<u8>],
        client_certificate: Option<Vec<u8>>,
    ) -> Result<Self> {
        if config.role != Role::Client {
            return Err(Error::Config("rustls engine supports the client role only".into()));
        }
        if config.transport != TransportKind::Stream {
            return Err(Error::Config("rustls engine supports stream transports only".into()));
        }

        let mut roots = RootCertStore::empty();
        for der in ca_certificates {
            roots
                .add(CertificateDer::from(der.clone()))
                .map_err(|e| Error::Config(format!("failed to add CA certificate: {}", e)))?;
        }

        let provider = Arc::new(provider_for(config.preset));
        let flags = Arc::new(AtomicU32::new(0));
        let verifier = Arc::new(RecordingVerifier::new(roots, provider.clone(), flags.clone())?);
        let resolver = Arc::new(SlotResolver::default());

        let client_config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Config(format!("client config error: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_client_cert_resolver(resolver.clone());

        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| Error::Config(format!("invalid server name {}: {}", server_name, e)))?;
        let conn = ClientConnection::new(Arc::new(client_config), name)
            .map_err(|e| Error::Config(format!("client connection error: {}", e)))?;

        Ok(Self {
            config,
            conn,
            resolver,
            flags,
            client_certificate: client_certificate.map(CertificateDer::from),
        })
    }

    /// Create an engine from the bridge configuration
    pub fn from_bridge_config(config: &BridgeConfig, client_certificate: Option<Vec<u8>>) -> Result<Self> {
        Self::new(
            EngineConfig::client(config.preset),
            &config.server_name,
            &config.ca_certificates,
            client_certificate,
        )
    }

    /// Write pending records. `Some` carries the step to report when
    /// writing could not finish.
    fn flush(&mut self, io: &mut dyn Transport) -> Option<IoStep<usize>> {
        let mut io = TransportIo(io);
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut io) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Some(IoStep::WantWrite),
                Err(e) => return Some(IoStep::Fatal(transport_fault(&e))),
            }
        }
        None
    }
}

impl ProtocolEngine for RustlsEngine {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn bind_signer(&mut self, signer: BoundSigner) -> Result<()> {
        let Some(certificate) = self.client_certificate.clone() else {
            log::debug!("No client certificate, {} signer stays unused", signer.provider_name());
            return Ok(());
        };

        let scheme = match signer.digest_algorithm() {
            DigestAlgorithm::Sha256 => SignatureScheme::ECDSA_NISTP256_SHA256,
            DigestAlgorithm::Sha384 => SignatureScheme::ECDSA_NISTP384_SHA384,
        };
        let key = Arc::new(DelegatedKey { signer, scheme });
        self.resolver.fill(Arc::new(CertifiedKey::new(vec![certificate], key)));
        Ok(())
    }

    fn handshake_step(&mut self, io: &mut dyn Transport) -> HandshakeStep {
        if self.conn.wants_write() {
            let sent = self.conn.write_tls(&mut TransportIo(io));
            return match sent {
                Ok(_) => HandshakeStep::Progress,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => HandshakeStep::WantWrite,
                Err(e) => HandshakeStep::Fatal(transport_fault(&e)),
            };
        }

        if !self.conn.is_handshaking() {
            return HandshakeStep::Complete;
        }

        let received = self.conn.read_tls(&mut TransportIo(io));
        match received {
            Ok(0) => HandshakeStep::Fatal(EngineFault::new(
                fault::PEER_CLOSED,
                "peer closed the connection during the handshake",
            )),
            Ok(_) => match self.conn.process_new_packets() {
                Ok(_) => HandshakeStep::Progress,
                Err(e) => {
                    // Best effort: let the peer see our alert
                    let _ = self.conn.write_tls(&mut TransportIo(io));
                    HandshakeStep::Fatal(fault_for(&e))
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => HandshakeStep::WantRead,
            Err(e) => HandshakeStep::Fatal(transport_fault(&e)),
        }
    }

    fn verify_result(&self) -> VerifyFlags {
        VerifyFlags(self.flags.load(Ordering::SeqCst))
    }

    fn write(&mut self, io: &mut dyn Transport, data: &[u8]) -> IoStep<usize> {
        if let Some(step) = self.flush(io) {
            return step;
        }

        let written = match self.conn.writer().write(data) {
            Ok(written) => written,
            Err(e) => return IoStep::Fatal(transport_fault(&e)),
        };

        match self.flush(io) {
            // Plaintext is accepted; the records go out on the next call
            None | Some(IoStep::WantWrite) => IoStep::Done(written),
            Some(step) => step,
        }
    }

    fn read(&mut self, io: &mut dyn Transport, buf: &mut [u8]) -> IoStep<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(0) => return IoStep::Closed,
                Ok(read) => return IoStep::Done(read),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    log::warn!("Peer closed without a close notification");
                    return IoStep::Closed;
                }
                Err(e) => return IoStep::Fatal(transport_fault(&e)),
            }

            if let Some(step) = self.flush(io) {
                return step;
            }

            let received = self.conn.read_tls(&mut TransportIo(io));
            match received {
                Ok(_) => {
                    if let Err(e) = self.conn.process_new_packets() {
                        let _ = self.conn.write_tls(&mut TransportIo(io));
                        return IoStep::Fatal(fault_for(&e));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return IoStep::WantRead,
                Err(e) => return IoStep::Fatal(transport_fault(&e)),
            }
        }
    }

    fn close_notify(&mut self, io: &mut dyn Transport) -> Result<()> {
        self.conn.send_close_notify();
        match self.flush(io) {
            None => Ok(()),
            Some(IoStep::Fatal(fault)) => Err(Error::Io(io::Error::other(fault.message))),
            Some(_) => Err(Error::Io(io::Error::from(io::ErrorKind::WouldBlock))),
        }
    }

    fn cipher_suite(&self) -> Option<String> {
        self.conn
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_b_restricts_provider() {
        let provider = provider_for(SecurityPreset::SuiteB);
        assert!(!provider.cipher_suites.is_empty());
        assert!(provider.cipher_suites.iter().all(|suite| !matches!(
            suite.suite(),
            CipherSuite::TLS13_CHACHA20_POLY1305_SHA256
                | CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
        )));
        assert!(provider
            .kx_groups
            .iter()
            .all(|group| group.name() != NamedGroup::X25519));
    }

    #[test]
    fn test_certificate_error_flags() {
        assert_eq!(flag_for(&CertificateError::Expired), verify::EXPIRED);
        assert_eq!(flag_for(&CertificateError::UnknownIssuer), verify::NOT_TRUSTED);
        assert_eq!(flag_for(&CertificateError::NotValidForName), verify::CN_MISMATCH);
        assert_eq!(flag_for(&CertificateError::BadEncoding), verify::OTHER);
    }

    #[test]
    fn test_rejects_datagram_transport() {
        let config = EngineConfig {
            transport: TransportKind::Datagram,
            ..EngineConfig::default()
        };
        assert!(RustlsEngine::new(config, "localhost", &[], None).is_err());
    }

    #[test]
    fn test_rejects_bad_pem() {
        assert!(parse_pem_certificates(b"-----BEGIN CERTIFICATE-----\n!!!\n-----END CERTIFICATE-----\n").is_err());
        assert!(parse_pem_certificates(b"").map(|certs| certs.is_empty()).unwrap_or(false));
    }
}
