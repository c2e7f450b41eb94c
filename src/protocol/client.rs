/*!
End-to-end client run.

`SecureClient` performs the whole sequence: open the element, provision the
key, connect, handshake with delegated signing, exchange one HTTP request and
clean everything up, whatever the outcome.
*/

use std::time::Instant;

use crate::core::config::BridgeConfig;
use crate::core::element::ElementDriver;
use crate::core::error::Result;
use crate::protocol::connection::{ConnectionTimeouts, TlsConnection};
use crate::protocol::context::BridgeContext;
use crate::protocol::engine::ProtocolEngine;
use crate::protocol::transport::Connector;

/// Minimal HTTP/1.1 GET that asks the server to close afterwards
pub fn http_get_request(host: &str, path: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host
    )
}

/// Client running one request over a secure-element-backed TLS connection
#[derive(Debug, Clone)]
pub struct SecureClient {
    config: BridgeConfig,
}

impl SecureClient {
    /// Create a client from a validated configuration
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Connect and handshake with the context's key
    pub fn connect<E: ProtocolEngine>(
        &self,
        context: &BridgeContext,
        engine: E,
        connector: &dyn Connector,
    ) -> Result<TlsConnection<E>> {
        let mut connection = TlsConnection::new(
            engine,
            context.bound_signer(),
            ConnectionTimeouts::from_config(&self.config),
        );
        connection.connect(connector, &self.config.server_name, self.config.server_port)?;
        Ok(connection)
    }

    /// Send a GET for `path` and read the response until the peer closes.
    ///
    /// The exchange is bounded by the configured exchange timeout and
    /// maximum response length; exceeding either fails the connection.
    pub fn exchange<E: ProtocolEngine>(
        &self,
        connection: &mut TlsConnection<E>,
        path: &str,
    ) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.config.exchange_timeout;
        let request = http_get_request(&self.config.server_name, path);
        connection.write_all(request.as_bytes())?;
        log::info!("Sent {} byte request for {}", request.len(), path);

        let response = connection.read_to_end(self.config.max_response_len, deadline)?;
        log::info!("Received {} byte response", response.len());
        Ok(response)
    }

    /// Run the full sequence against an element driver.
    ///
    /// `make_engine` receives the provisioned context, so the engine can be
    /// built with the client certificate read from the element.
    pub fn run<D, E, F>(&self, driver: D, make_engine: F, connector: &dyn Connector) -> Result<Vec<u8>>
    where
        D: ElementDriver + 'static,
        E: ProtocolEngine,
        F: FnOnce(&BridgeContext) -> Result<E>,
    {
        let context = BridgeContext::open(driver, &self.config)?;
        let result = self.run_with_context(&context, make_engine, connector);
        context.teardown();
        result
    }

    fn run_with_context<E, F>(
        &self,
        context: &BridgeContext,
        make_engine: F,
        connector: &dyn Connector,
    ) -> Result<Vec<u8>>
    where
        E: ProtocolEngine,
        F: FnOnce(&BridgeContext) -> Result<E>,
    {
        let engine = make_engine(context)?;
        let mut connection = self.connect(context, engine, connector)?;
        let result = self.exchange(&mut connection, "/");
        connection.close();
        result
    }

    /// Run over TCP with the rustls engine
    #[cfg(feature = "rustls")]
    pub fn run_tls<D: ElementDriver + 'static>(&self, driver: D) -> Result<Vec<u8>> {
        use crate::protocol::rustls_engine::RustlsEngine;
        use crate::protocol::transport::TcpConnector;

        let connector = TcpConnector::new(self.config.connect_timeout, self.config.poll_interval);
        self.run(
            driver,
            |context| {
                RustlsEngine::from_bridge_config(&self.config, context.certificate().map(<[u8]>::to_vec))
            },
            &connector,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_format() {
        let request = http_get_request("httpbin.org", "/get");
        assert!(request.starts_with("GET /get HTTP/1.1\r\n"));
        assert!(request.contains("Host: httpbin.org\r\n"));
        assert!(request.contains("Connection: close\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = BridgeConfig {
            server_name: String::new(),
            ..BridgeConfig::default()
        };
        assert!(SecureClient::new(config).is_err());
    }
}
