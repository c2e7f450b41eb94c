/*!
TLS connection driver.

`TlsConnection` owns one protocol engine, one transport and the signer bound
for client authentication, and drives them through

```text
Idle -> TransportConnecting -> Handshaking -> Established -> Closing -> Closed
```

with `Failed` reachable from every non-terminal state. Flow-control results
(`WantRead`/`WantWrite`) are retried until the phase deadline passes. The
transport and engine are released exactly once, on close, on failure or on
drop, whichever comes first.
*/

use std::io;
use std::time::{Duration, Instant};

use crate::core::config::BridgeConfig;
use crate::core::constants::{sizes, timeouts};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::session::{ConnectionState, Role, StateManager};
use crate::core::signing::BoundSigner;
use crate::invalid_state_err;
use crate::protocol::engine::{EngineFault, HandshakeStep, IoStep, ProtocolEngine, VerifyFlags};
use crate::protocol::transport::{Connector, Transport};

/// Per-phase deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    pub handshake: Duration,
    pub io: Duration,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            handshake: timeouts::HANDSHAKE,
            io: timeouts::IO,
        }
    }
}

impl ConnectionTimeouts {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            handshake: config.handshake_timeout,
            io: config.io_timeout,
        }
    }
}

/// Client-side TLS connection with delegated private-key operations
pub struct TlsConnection<E: ProtocolEngine> {
    engine: Option<E>,
    transport: Option<Box<dyn Transport>>,
    signer: BoundSigner,
    state: StateManager,
    timeouts: ConnectionTimeouts,
    failure: Option<ErrorKind>,
    verify: VerifyFlags,
    cipher_suite: Option<String>,
    peer_closed: bool,
}

impl<E: ProtocolEngine> TlsConnection<E> {
    /// Create an idle connection. The signer stays bound for its lifetime.
    pub fn new(engine: E, signer: BoundSigner, timeouts: ConnectionTimeouts) -> Self {
        Self {
            engine: Some(engine),
            transport: None,
            signer,
            state: StateManager::new(Role::Client),
            timeouts,
            failure: None,
            verify: VerifyFlags::TRUSTED,
            cipher_suite: None,
            peer_closed: false,
        }
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    /// Reason the connection failed, if it did
    pub fn failure(&self) -> Option<ErrorKind> {
        self.failure
    }

    /// Peer verification result of the last completed handshake
    pub fn verify_result(&self) -> VerifyFlags {
        self.verify
    }

    /// Negotiated cipher suite once established
    pub fn cipher_suite(&self) -> Option<&str> {
        self.cipher_suite.as_deref()
    }

    pub fn signer(&self) -> &BoundSigner {
        &self.signer
    }

    /// Whether engine and transport have been released
    pub fn is_released(&self) -> bool {
        self.engine.is_none() && self.transport.is_none()
    }

    /// Connect and complete the handshake within the handshake timeout
    pub fn connect(&mut self, connector: &dyn Connector, host: &str, port: u16) -> Result<()> {
        let deadline = Instant::now() + self.timeouts.handshake;
        self.connect_until(connector, host, port, deadline)
    }

    /// Connect and complete the handshake before `deadline`
    pub fn connect_until(
        &mut self,
        connector: &dyn Connector,
        host: &str,
        port: u16,
        deadline: Instant,
    ) -> Result<()> {
        if !self.state.can_connect() {
            return invalid_state_err!(ConnectionState::Idle, self.state());
        }
        let started = Instant::now();

        self.state.transition_to_connecting();
        log::info!("Connecting to {}:{}", host, port);
        let transport = match connector.connect(host, port) {
            Ok(transport) => transport,
            Err(e) => return Err(self.fail(e)),
        };
        self.transport = Some(transport);

        let bound = match self.engine.as_mut() {
            Some(engine) => engine.bind_signer(self.signer.clone()),
            None => Err(Error::SessionClosed),
        };
        if let Err(e) = bound {
            return Err(self.fail(e));
        }
        self.state.transition_to_handshaking();

        log::info!(
            "Performing TLS handshake with {} signer for {}",
            self.signer.provider_name(),
            self.signer.key().id()
        );
        self.handshake_until(started, deadline)
    }

    fn handshake_until(&mut self, started: Instant, deadline: Instant) -> Result<()> {
        loop {
            if Instant::now() >= deadline {
                let elapsed = started.elapsed().as_millis() as u64;
                return Err(self.fail(Error::Timeout(elapsed)));
            }

            let step = match (self.engine.as_mut(), self.transport.as_deref_mut()) {
                (Some(engine), Some(transport)) => engine.handshake_step(transport),
                _ => return Err(self.fail(Error::SessionClosed)),
            };

            match step {
                HandshakeStep::Progress => {}
                HandshakeStep::WantRead | HandshakeStep::WantWrite => {
                    log::trace!("Handshake waiting on transport: {:?}", step);
                }
                HandshakeStep::Complete => return self.finish_handshake(),
                HandshakeStep::Fatal(fault) => {
                    let error = self.engine_failure(fault);
                    return Err(self.fail(error));
                }
            }
        }
    }

    fn finish_handshake(&mut self) -> Result<()> {
        let (flags, suite) = match self.engine.as_ref() {
            Some(engine) => (engine.verify_result(), engine.cipher_suite()),
            None => return Err(self.fail(Error::SessionClosed)),
        };
        self.verify = flags;

        if !flags.is_trusted() {
            log::error!("Server certificate verification failed: {}", flags);
            return Err(self.fail(Error::CertificateUntrusted { flags: flags.bits() }));
        }

        self.cipher_suite = suite;
        self.state.transition_to_established();
        log::info!(
            "Handshake complete, cipher suite {}",
            self.cipher_suite.as_deref().unwrap_or("unknown")
        );
        Ok(())
    }

    /// Map an engine fault, preferring the signer's own error when the fault
    /// came from the delegated signature
    fn engine_failure(&mut self, fault: EngineFault) -> Error {
        match self.signer.take_failure() {
            Some(e) if e.is_retryable() => Error::DeviceBusy,
            Some(e) => e,
            None => Error::ProtocolFatal {
                code: fault.code,
                message: fault.message,
            },
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        log::error!("Connection failed in state {}: {}", self.state(), error);
        self.failure = Some(error.kind());
        self.state.transition_to_failed();
        self.release();
        error
    }

    fn release(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
        }
        if self.engine.take().is_some() {
            log::debug!("Protocol engine released");
        }
    }

    fn ensure_established(&self) -> Result<()> {
        if !self.state.can_transfer_data() {
            return invalid_state_err!(ConnectionState::Established, self.state());
        }
        Ok(())
    }

    /// Send application data, returning how much the engine accepted
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_established()?;
        let started = Instant::now();
        let deadline = started + self.timeouts.io;

        loop {
            if Instant::now() >= deadline {
                let elapsed = started.elapsed().as_millis() as u64;
                return Err(self.fail(Error::Timeout(elapsed)));
            }

            let step = match (self.engine.as_mut(), self.transport.as_deref_mut()) {
                (Some(engine), Some(transport)) => engine.write(transport, data),
                _ => return Err(self.fail(Error::SessionClosed)),
            };

            match step {
                IoStep::Done(written) => return Ok(written),
                IoStep::WantRead | IoStep::WantWrite => {
                    log::trace!("Write waiting on transport");
                }
                IoStep::Closed => {
                    let error = Error::Io(io::Error::from(io::ErrorKind::BrokenPipe));
                    return Err(self.fail(error));
                }
                IoStep::Fatal(fault) => {
                    let error = self.engine_failure(fault);
                    return Err(self.fail(error));
                }
            }
        }
    }

    /// Send all of `data`
    pub fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let written = self.write(data)?;
            if written == 0 {
                let error = Error::Io(io::Error::from(io::ErrorKind::WriteZero));
                return Err(self.fail(error));
            }
            data = &data[written..];
        }
        Ok(())
    }

    /// Receive application data. `Ok(0)` means the peer closed the
    /// connection, or that `buf` is empty.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_established()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + self.timeouts.io;
        self.read_before(buf, deadline)
    }

    /// Receive until the peer closes.
    ///
    /// The whole exchange must finish before `deadline` and yield at most
    /// `max_len` bytes; otherwise the connection fails with `Timeout` or
    /// `CapacityExceeded`.
    pub fn read_to_end(&mut self, max_len: usize, deadline: Instant) -> Result<Vec<u8>> {
        self.ensure_established()?;
        let mut data = Vec::new();
        let mut buf = [0u8; sizes::READ_BUFFER];

        loop {
            let chunk_deadline = deadline.min(Instant::now() + self.timeouts.io);
            let read = self.read_before(&mut buf, chunk_deadline)?;
            if read == 0 {
                return Ok(data);
            }
            if data.len() + read > max_len {
                let error = Error::CapacityExceeded {
                    requested: data.len() + read,
                    capacity: max_len,
                };
                return Err(self.fail(error));
            }
            data.extend_from_slice(&buf[..read]);
        }
    }

    fn read_before(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize> {
        if self.peer_closed {
            return Ok(0);
        }
        let started = Instant::now();

        loop {
            if Instant::now() >= deadline {
                let elapsed = started.elapsed().as_millis() as u64;
                return Err(self.fail(Error::Timeout(elapsed)));
            }

            let step = match (self.engine.as_mut(), self.transport.as_deref_mut()) {
                (Some(engine), Some(transport)) => engine.read(transport, buf),
                _ => return Err(self.fail(Error::SessionClosed)),
            };

            match step {
                IoStep::Done(read) => return Ok(read),
                IoStep::WantRead | IoStep::WantWrite => {
                    log::trace!("Read waiting on transport");
                }
                IoStep::Closed => {
                    log::info!("Peer closed the connection");
                    self.peer_closed = true;
                    return Ok(0);
                }
                IoStep::Fatal(fault) => {
                    let error = self.engine_failure(fault);
                    return Err(self.fail(error));
                }
            }
        }
    }

    /// Close the connection.
    ///
    /// The close notification is best effort; transport and engine are
    /// released whether or not it could be sent.
    pub fn close(&mut self) {
        if self.state().is_terminal() {
            return;
        }
        self.state.transition_to_closing();

        if let (Some(engine), Some(transport)) = (self.engine.as_mut(), self.transport.as_deref_mut()) {
            if let Err(e) = engine.close_notify(transport) {
                log::debug!("Close notification not sent: {}", e);
            }
        }

        self.release();
        self.state.transition_to_closed();
        log::info!("Connection closed");
    }
}

impl<E: ProtocolEngine> Drop for TlsConnection<E> {
    fn drop(&mut self) {
        self.close();
        self.release();
    }
}
