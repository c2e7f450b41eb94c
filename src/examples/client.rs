use se_tls_bridge::protocol::rustls_engine::parse_pem_certificates;
use se_tls_bridge::{BridgeConfigBuilder, Result, SimulatedElement};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Secure Element TLS Client Example");
    println!("=================================");

    // Usage: client [host] [port] [ca.pem]
    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "httpbin.org".to_string());
    let port = match args.next() {
        Some(port) => port
            .parse()
            .map_err(|_| se_tls_bridge::Error::Config(format!("invalid port {}", port)))?,
        None => 443,
    };

    let mut builder = BridgeConfigBuilder::new().with_server(&host, port);
    if let Some(path) = args.next() {
        let pem = std::fs::read(&path)?;
        for der in parse_pem_certificates(&pem)? {
            builder = builder.with_ca_certificate(der);
        }
        println!("Loaded trust anchors from {}", path);
    }
    let client = builder.build_client()?;

    // No element hardware on a development host; the simulated element
    // provisions its key the same way the device would.
    let element = SimulatedElement::new();

    println!("Connecting to {}:{}...", host, port);
    let response = client.run_tls(element.clone())?;

    println!("Response:");
    println!("{}", String::from_utf8_lossy(&response));
    println!(
        "Secure element transactions: {}, signatures: {}",
        element.transaction_count(),
        element.signature_count()
    );

    Ok(())
}
