/*!
Scripted engine and in-memory transport.

`ScriptedEngine` plays back a fixed sequence of handshake results instead of
running TLS. It signs a fixed transcript through the bound signer at a chosen
point, so the delegation path is exercised for real. Application data is
passed through unencrypted. Together with [`MemoryTransport`] and
[`ScriptedConnector`] it lets the connection driver run without a network.
*/

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::error::{Error, Result};
use crate::core::signing::BoundSigner;
use crate::protocol::engine::{
    EngineConfig, EngineFault, HandshakeStep, IoStep, ProtocolEngine, VerifyFlags,
};
use crate::protocol::transport::{Connector, Transport};

/// Fault code reported when the bound signer fails
pub const FAULT_SIGNATURE: i32 = 0x7080;

/// Fault code reported for transport errors
pub const FAULT_TRANSPORT: i32 = 0x0050;

/// Transcript signed during the scripted handshake
pub const TRANSCRIPT: &[u8] = b"scripted handshake transcript";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One entry of a handshake script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedStep {
    /// Report this result
    Report(HandshakeStep),
    /// Sign the transcript through the bound signer, then report `Progress`
    SignTranscript,
}

#[derive(Debug, Default)]
struct MonitorState {
    handshake_steps: usize,
    signatures: Vec<Vec<u8>>,
    bytes_read: usize,
    bytes_written: usize,
    close_notify_sent: bool,
}

/// Observes a scripted engine after it was moved into a connection
#[derive(Debug, Clone, Default)]
pub struct ScriptMonitor {
    state: Arc<Mutex<MonitorState>>,
}

impl ScriptMonitor {
    /// Handshake steps the driver invoked
    pub fn handshake_steps(&self) -> usize {
        lock(&self.state).handshake_steps
    }

    /// Signatures produced during the handshake, DER encoded
    pub fn signatures(&self) -> Vec<Vec<u8>> {
        lock(&self.state).signatures.clone()
    }

    /// Application bytes delivered to the caller
    pub fn bytes_read(&self) -> usize {
        lock(&self.state).bytes_read
    }

    /// Application bytes accepted from the caller
    pub fn bytes_written(&self) -> usize {
        lock(&self.state).bytes_written
    }

    pub fn close_notify_sent(&self) -> bool {
        lock(&self.state).close_notify_sent
    }
}

/// Engine that replays a handshake script
#[derive(Debug)]
pub struct ScriptedEngine {
    config: EngineConfig,
    script: VecDeque<ScriptedStep>,
    signer: Option<BoundSigner>,
    verify: VerifyFlags,
    cipher_suite: String,
    fail_close_notify: bool,
    stall_writes: bool,
    complete: bool,
    monitor: ScriptMonitor,
}

impl ScriptedEngine {
    /// Engine whose handshake signs once and completes
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            script: VecDeque::from(vec![
                ScriptedStep::Report(HandshakeStep::Progress),
                ScriptedStep::SignTranscript,
                ScriptedStep::Report(HandshakeStep::Complete),
            ]),
            signer: None,
            verify: VerifyFlags::TRUSTED,
            cipher_suite: "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256".to_string(),
            fail_close_notify: false,
            stall_writes: false,
            complete: false,
            monitor: ScriptMonitor::default(),
        }
    }

    /// Replace the handshake script
    pub fn with_script(mut self, script: Vec<ScriptedStep>) -> Self {
        self.script = script.into();
        self
    }

    /// Report `WantRead` `count` times before the script starts
    pub fn with_want_reads(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.script.push_front(ScriptedStep::Report(HandshakeStep::WantRead));
        }
        self
    }

    /// Verification result reported after completion
    pub fn with_verify_flags(mut self, flags: VerifyFlags) -> Self {
        self.verify = flags;
        self
    }

    pub fn with_cipher_suite(mut self, suite: &str) -> Self {
        self.cipher_suite = suite.to_string();
        self
    }

    /// Make the close notification fail
    pub fn fail_close_notify(mut self) -> Self {
        self.fail_close_notify = true;
        self
    }

    /// Accept no application data on write
    pub fn with_stalled_writes(mut self) -> Self {
        self.stall_writes = true;
        self
    }

    pub fn monitor(&self) -> ScriptMonitor {
        self.monitor.clone()
    }

    fn sign_transcript(&mut self) -> HandshakeStep {
        let Some(signer) = self.signer.as_ref() else {
            return HandshakeStep::Fatal(EngineFault::new(FAULT_SIGNATURE, "no signer bound"));
        };
        match signer.sign_message(TRANSCRIPT) {
            Ok(signature) => {
                lock(&self.monitor.state).signatures.push(signature);
                HandshakeStep::Progress
            }
            Err(e) => HandshakeStep::Fatal(EngineFault::new(FAULT_SIGNATURE, e.to_string())),
        }
    }
}

fn transport_step(e: io::Error) -> IoStep<usize> {
    match e.kind() {
        io::ErrorKind::WouldBlock => IoStep::WantRead,
        _ => IoStep::Fatal(EngineFault::new(FAULT_TRANSPORT, e.to_string())),
    }
}

impl ProtocolEngine for ScriptedEngine {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn bind_signer(&mut self, signer: BoundSigner) -> Result<()> {
        if self.signer.is_some() {
            return Err(Error::InvalidState {
                expected: "no signer".into(),
                actual: "signer bound".into(),
            });
        }
        self.signer = Some(signer);
        Ok(())
    }

    fn handshake_step(&mut self, _io: &mut dyn Transport) -> HandshakeStep {
        lock(&self.monitor.state).handshake_steps += 1;
        let step = match self.script.pop_front() {
            Some(ScriptedStep::Report(step)) => step,
            Some(ScriptedStep::SignTranscript) => self.sign_transcript(),
            None => HandshakeStep::Complete,
        };
        if step == HandshakeStep::Complete {
            self.complete = true;
        }
        step
    }

    fn verify_result(&self) -> VerifyFlags {
        self.verify
    }

    fn write(&mut self, io: &mut dyn Transport, data: &[u8]) -> IoStep<usize> {
        if self.stall_writes {
            return IoStep::Done(0);
        }
        match io.send(data) {
            Ok(written) => {
                lock(&self.monitor.state).bytes_written += written;
                IoStep::Done(written)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => IoStep::WantWrite,
            Err(e) => transport_step(e),
        }
    }

    fn read(&mut self, io: &mut dyn Transport, buf: &mut [u8]) -> IoStep<usize> {
        match io.recv(buf) {
            Ok(0) => IoStep::Closed,
            Ok(read) => {
                lock(&self.monitor.state).bytes_read += read;
                IoStep::Done(read)
            }
            Err(e) => transport_step(e),
        }
    }

    fn close_notify(&mut self, _io: &mut dyn Transport) -> Result<()> {
        if self.fail_close_notify {
            return Err(Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        lock(&self.monitor.state).close_notify_sent = true;
        Ok(())
    }

    fn cipher_suite(&self) -> Option<String> {
        self.complete.then(|| self.cipher_suite.clone())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    peer_closed: bool,
    shutdowns: usize,
}

/// In-memory transport; clones share the same buffers
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the engine to receive
    pub fn push_inbound(&self, data: &[u8]) {
        lock(&self.state).inbound.extend(data);
    }

    /// Let the peer close its side once the queued bytes are consumed
    pub fn close_inbound(&self) {
        lock(&self.state).peer_closed = true;
    }

    /// Bytes the engine sent
    pub fn outbound(&self) -> Vec<u8> {
        lock(&self.state).outbound.clone()
    }

    /// Times the transport was shut down
    pub fn shutdown_count(&self) -> usize {
        lock(&self.state).shutdowns
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.shutdowns > 0 {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        state.outbound.extend_from_slice(data);
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.inbound.is_empty() {
            return if state.peer_closed {
                Ok(0)
            } else {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            };
        }
        let count = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn shutdown(&mut self) {
        lock(&self.state).shutdowns += 1;
    }
}

/// Connector handing out a [`MemoryTransport`], or refusing
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    transport: Option<MemoryTransport>,
    attempts: Arc<Mutex<usize>>,
}

impl ScriptedConnector {
    /// Connector that succeeds with `transport`
    pub fn new(transport: MemoryTransport) -> Self {
        Self {
            transport: Some(transport),
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    /// Connector for a host that cannot be reached
    pub fn unreachable() -> Self {
        Self {
            transport: None,
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    pub fn attempts(&self) -> usize {
        *lock(&self.attempts)
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Transport>> {
        *lock(&self.attempts) += 1;
        match &self.transport {
            Some(transport) => Ok(Box::new(transport.clone())),
            None => Err(Error::TransportUnreachable(format!("{}:{}: unreachable", host, port))),
        }
    }
}
