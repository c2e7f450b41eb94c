/*!
Network transport for the protocol engine.

Transports are blocking with a short read timeout. A read that times out is
reported as `WouldBlock`, which the engine turns into `WantRead`; the
connection driver checks its deadline and calls again.
*/

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::core::error::{Error, Result};

/// Byte-stream transport
pub trait Transport: Send {
    /// Send bytes, returning how many were accepted
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Receive into `buf`; `Ok(0)` means the peer closed the stream
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Shut the stream down; errors are of no interest to callers
    fn shutdown(&mut self);
}

/// Opens transports
pub trait Connector {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Transport>>;
}

/// `Read`/`Write` view of a transport, for engines built on std I/O
pub struct TransportIo<'a>(pub &'a mut dyn Transport);

impl Read for TransportIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.recv(buf)
    }
}

impl Write for TransportIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// TCP transport
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap a connected stream, polling reads every `poll_interval`
    pub fn new(stream: TcpStream, poll_interval: Duration) -> Result<Self> {
        stream.set_read_timeout(Some(poll_interval))?;
        stream.set_write_timeout(Some(poll_interval))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

fn would_block(e: io::Error) -> io::Error {
    match e.kind() {
        io::ErrorKind::TimedOut => io::Error::from(io::ErrorKind::WouldBlock),
        _ => e,
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.stream.write(data).map_err(would_block)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).map_err(would_block)
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Connects over TCP
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            connect_timeout,
            poll_interval,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Transport>> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::TransportUnreachable(format!("{}:{}: {}", host, port, e)))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    log::debug!("Connected to {} ({}:{})", addr, host, port);
                    return Ok(Box::new(TcpTransport::new(stream, self.poll_interval)?));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(Error::TransportUnreachable(match last_error {
            Some(e) => format!("{}:{}: {}", host, port, e),
            None => format!("{}:{}: no addresses", host, port),
        }))
    }
}
