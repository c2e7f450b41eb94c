// tests/integration_test.rs
use std::time::{Duration, Instant};

use se_tls_bridge::core::element::{load_binary, store_binary};
use se_tls_bridge::protocol::engine::EngineFault;
use se_tls_bridge::protocol::scripted::{
    MemoryTransport, ScriptedConnector, ScriptedEngine, ScriptedStep,
};
use se_tls_bridge::{
    verify, BridgeConfig, BridgeContext, ConnectionState, ConnectionTimeouts, DeviceParams,
    DigestAlgorithm, ElementSigner, EngineConfig, ErrorKind, HandshakeStep, KeyHandle, KeySpec,
    ObjectId, Provisioned, Result, SecureClient, SecureElementSession, SigningProvider,
    SimulatedElement, TcpConnector, TlsConnection, VerifyFlags,
};

const KEY_ID: ObjectId = ObjectId(0xF000_0001);

fn context(element: &SimulatedElement) -> Result<BridgeContext> {
    BridgeContext::open(element.clone(), &BridgeConfig::default())
}

fn short_timeouts() -> ConnectionTimeouts {
    ConnectionTimeouts {
        handshake: Duration::from_secs(5),
        io: Duration::from_secs(5),
    }
}

#[test]
fn test_full_client_run() -> Result<()> {
    let element = SimulatedElement::new();
    let transport = MemoryTransport::new();
    transport.push_inbound(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    transport.close_inbound();
    let connector = ScriptedConnector::new(transport.clone());

    let client = SecureClient::new(BridgeConfig::default())?;
    println!("Running scripted client...");
    let response = client.run(
        element.clone(),
        |_| Ok(ScriptedEngine::new(EngineConfig::default())),
        &connector,
    )?;

    assert!(response.starts_with(b"HTTP/1.1 200 OK"));
    let request = String::from_utf8(transport.outbound()).unwrap();
    assert!(request.starts_with("GET / HTTP/1.1\r\n"));
    assert!(request.contains("Host: httpbin.org\r\n"));
    assert!(request.contains("Connection: close\r\n"));

    assert_eq!(element.signature_count(), 1);
    assert_eq!(transport.shutdown_count(), 1);
    assert!(!element.is_channel_open());
    Ok(())
}

#[test]
fn test_provisioning_is_idempotent() -> Result<()> {
    let element = SimulatedElement::new();
    let session = SecureElementSession::connect(element.clone(), DeviceParams::default())?;
    assert!(!element.contains(KEY_ID));

    let (first, outcome) = KeyHandle::resolve_or_create(&session, KEY_ID, &KeySpec::default())?;
    assert_eq!(outcome, Provisioned::Generated);

    let (second, outcome) = KeyHandle::resolve_or_create(&session, KEY_ID, &KeySpec::default())?;
    assert_eq!(outcome, Provisioned::Existing);
    assert_eq!(first.public_key(), second.public_key());
    assert_eq!(element.generation_count(), 1);

    // Persistent across sessions
    session.close();
    let session = SecureElementSession::connect(element.clone(), DeviceParams::default())?;
    let (third, outcome) = KeyHandle::resolve_or_create(&session, KEY_ID, &KeySpec::default())?;
    assert_eq!(outcome, Provisioned::Existing);
    assert_eq!(first.public_key(), third.public_key());
    assert_eq!(element.generation_count(), 1);
    Ok(())
}

#[test]
fn test_foreign_key_is_not_replaced() -> Result<()> {
    let element = SimulatedElement::new();
    element.preload_foreign_key(KEY_ID, se_tls_bridge::KeyAlgorithm::EcNistP384);

    let err = context(&element).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AllocationFailed);
    assert_eq!(element.generation_count(), 0);
    assert!(!element.is_channel_open());
    Ok(())
}

#[test]
fn test_algorithm_mismatch_has_no_side_effect() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;
    let before = element.transaction_count();

    let err = ElementSigner::new()
        .sign(ctx.key(), &[0u8; 48], DigestAlgorithm::Sha384)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlgorithmMismatch);
    assert_eq!(element.transaction_count(), before);
    assert_eq!(element.signature_count(), 0);
    Ok(())
}

#[test]
fn test_closed_session_rejects_everything() -> Result<()> {
    let element = SimulatedElement::new();
    let session = SecureElementSession::connect(element.clone(), DeviceParams::default())?;
    let (key, _) = KeyHandle::resolve_or_create(&session, KEY_ID, &KeySpec::default())?;
    store_binary(&session, ObjectId(0xF000_0002), b"blob")?;
    session.close();

    let err = ElementSigner::new()
        .sign(&key, &[0u8; 32], DigestAlgorithm::Sha256)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionClosed);

    let err = KeyHandle::resolve_or_create(&session, KEY_ID, &KeySpec::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionClosed);

    let err = load_binary(&session, ObjectId(0xF000_0002), 64).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionClosed);

    let err = store_binary(&session, ObjectId(0xF000_0002), b"x").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionClosed);
    Ok(())
}

#[test]
fn test_oversized_blob_leaves_previous() -> Result<()> {
    let element = SimulatedElement::with_capacity(512);
    let session = SecureElementSession::connect(element.clone(), DeviceParams::default())?;
    let id = ObjectId(0xF000_0002);

    store_binary(&session, id, &[1u8; 100])?;
    let err = store_binary(&session, id, &[2u8; 513]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    assert_eq!(load_binary(&session, id, 512)?, vec![1u8; 100]);
    Ok(())
}

#[test]
fn test_unreachable_peer_leaves_element_untouched() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;
    let before = element.transaction_count();

    let engine = ScriptedEngine::new(EngineConfig::default());
    let monitor = engine.monitor();
    let mut connection = TlsConnection::new(engine, ctx.bound_signer(), short_timeouts());

    let connector = ScriptedConnector::unreachable();
    let err = connection.connect(&connector, "bad-host", 443).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportUnreachable);
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert_eq!(connection.failure(), Some(ErrorKind::TransportUnreachable));
    assert!(connection.is_released());

    assert_eq!(monitor.handshake_steps(), 0);
    assert_eq!(element.transaction_count(), before);
    Ok(())
}

#[test]
fn test_refused_tcp_port() -> Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let element = SimulatedElement::new();
    let ctx = context(&element)?;
    let before = element.transaction_count();

    let mut connection = TlsConnection::new(
        ScriptedEngine::new(EngineConfig::default()),
        ctx.bound_signer(),
        short_timeouts(),
    );
    let connector = TcpConnector::new(Duration::from_secs(2), Duration::from_millis(20));
    let err = connection.connect(&connector, "127.0.0.1", port).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransportUnreachable);
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert_eq!(element.transaction_count(), before);
    Ok(())
}

#[test]
fn test_untrusted_peer_never_established() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;

    for flags in [verify::EXPIRED, verify::CN_MISMATCH, verify::NOT_TRUSTED, verify::REVOKED | verify::OTHER] {
        let transport = MemoryTransport::new();
        let engine = ScriptedEngine::new(EngineConfig::default()).with_verify_flags(VerifyFlags(flags));
        let monitor = engine.monitor();
        let mut connection = TlsConnection::new(engine, ctx.bound_signer(), short_timeouts());

        let err = connection
            .connect(&ScriptedConnector::new(transport.clone()), "localhost", 443)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CertificateUntrusted);
        assert_eq!(connection.state(), ConnectionState::Failed);
        assert_eq!(connection.verify_result(), VerifyFlags(flags));
        assert_eq!(transport.shutdown_count(), 1);

        // No application data can follow
        assert_eq!(connection.write(b"data").unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(monitor.bytes_written(), 0);
    }
    Ok(())
}

#[test]
fn test_want_read_is_retried() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;
    let transport = MemoryTransport::new();
    transport.push_inbound(b"pending application data");

    let engine = ScriptedEngine::new(EngineConfig::default()).with_want_reads(25);
    let monitor = engine.monitor();
    let mut connection = TlsConnection::new(engine, ctx.bound_signer(), short_timeouts());
    connection.connect(&ScriptedConnector::new(transport), "localhost", 443)?;

    assert_eq!(connection.state(), ConnectionState::Established);
    assert_eq!(connection.failure(), None);
    assert_eq!(monitor.handshake_steps(), 25 + 3);
    assert_eq!(monitor.bytes_read(), 0);
    assert!(connection.cipher_suite().is_some());
    Ok(())
}

#[test]
fn test_handshake_deadline() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;
    let transport = MemoryTransport::new();

    let engine = ScriptedEngine::new(EngineConfig::default()).with_want_reads(1000);
    let monitor = engine.monitor();
    let mut connection = TlsConnection::new(engine, ctx.bound_signer(), short_timeouts());

    // A deadline already in the past fails before the first step
    let deadline = Instant::now();
    let err = connection
        .connect_until(&ScriptedConnector::new(transport.clone()), "localhost", 443, deadline)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert_eq!(connection.failure(), Some(ErrorKind::Timeout));
    assert_eq!(monitor.handshake_steps(), 0);
    assert_eq!(element.signature_count(), 0);
    assert_eq!(transport.shutdown_count(), 1);

    // A failed connection cannot be reused
    let err = connection
        .connect(&ScriptedConnector::new(transport.clone()), "localhost", 443)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    Ok(())
}

#[test]
fn test_busy_element_is_retryable() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;
    element.fail_timeout(1);

    let mut connection = TlsConnection::new(
        ScriptedEngine::new(EngineConfig::default()),
        ctx.bound_signer(),
        short_timeouts(),
    );
    let err = connection
        .connect(&ScriptedConnector::new(MemoryTransport::new()), "localhost", 443)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceBusy);
    assert!(err.is_retryable());
    assert_eq!(connection.state(), ConnectionState::Failed);

    // Retrying the whole handshake works once the element is free
    let mut connection = TlsConnection::new(
        ScriptedEngine::new(EngineConfig::default()),
        ctx.bound_signer(),
        short_timeouts(),
    );
    connection.connect(&ScriptedConnector::new(MemoryTransport::new()), "localhost", 443)?;
    assert_eq!(connection.state(), ConnectionState::Established);
    Ok(())
}

#[test]
fn test_engine_fault_without_signer_error() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;

    let engine = ScriptedEngine::new(EngineConfig::default()).with_script(vec![
        ScriptedStep::Report(HandshakeStep::Progress),
        ScriptedStep::Report(HandshakeStep::Fatal(EngineFault::new(0x7780, "handshake failure alert"))),
    ]);
    let mut connection = TlsConnection::new(engine, ctx.bound_signer(), short_timeouts());
    let err = connection
        .connect(&ScriptedConnector::new(MemoryTransport::new()), "localhost", 443)
        .unwrap_err();

    assert!(matches!(err, se_tls_bridge::Error::ProtocolFatal { code: 0x7780, .. }));
    assert_eq!(connection.failure(), Some(ErrorKind::ProtocolFatal));
    Ok(())
}

#[test]
fn test_close_survives_failed_notify() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;
    let transport = MemoryTransport::new();

    let engine = ScriptedEngine::new(EngineConfig::default()).fail_close_notify();
    let monitor = engine.monitor();
    let mut connection = TlsConnection::new(engine, ctx.bound_signer(), short_timeouts());
    connection.connect(&ScriptedConnector::new(transport.clone()), "localhost", 443)?;

    connection.close();
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(connection.failure(), None);
    assert!(!monitor.close_notify_sent());
    assert!(connection.is_released());

    connection.close();
    drop(connection);
    assert_eq!(transport.shutdown_count(), 1);
    Ok(())
}

#[test]
fn test_peer_close_ends_reading() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;
    let transport = MemoryTransport::new();

    let mut connection = TlsConnection::new(
        ScriptedEngine::new(EngineConfig::default()),
        ctx.bound_signer(),
        short_timeouts(),
    );
    connection.connect(&ScriptedConnector::new(transport.clone()), "localhost", 443)?;

    transport.push_inbound(b"abc");
    transport.close_inbound();
    let mut buf = [0u8; 16];
    assert_eq!(connection.read(&mut buf)?, 3);
    assert_eq!(connection.read(&mut buf)?, 0);
    assert_eq!(connection.read(&mut buf)?, 0);
    assert_eq!(connection.state(), ConnectionState::Established);

    connection.close();
    assert_eq!(connection.state(), ConnectionState::Closed);
    Ok(())
}

#[test]
fn test_context_retries_busy_once() -> Result<()> {
    let element = SimulatedElement::new();
    element.fail_busy(1);
    let ctx = context(&element)?;
    assert_eq!(ctx.provisioned(), Provisioned::Generated);
    ctx.teardown();
    assert!(!element.is_channel_open());

    let element = SimulatedElement::new();
    element.fail_busy(2);
    let err = context(&element).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceBusy);
    assert!(!element.is_channel_open());
    Ok(())
}

#[test]
fn test_handles_die_with_teardown() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;
    let signer = ctx.bound_signer();
    assert!(signer.sign_message(b"before").is_ok());

    ctx.teardown();
    assert!(signer.sign_message(b"after").is_err());
    assert_eq!(signer.take_failure().map(|e| e.kind()), Some(ErrorKind::SessionClosed));
    Ok(())
}

#[test]
fn test_empty_read_keeps_pending_data() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;
    let transport = MemoryTransport::new();

    let mut connection = TlsConnection::new(
        ScriptedEngine::new(EngineConfig::default()),
        ctx.bound_signer(),
        short_timeouts(),
    );
    connection.connect(&ScriptedConnector::new(transport.clone()), "localhost", 443)?;

    transport.push_inbound(b"payload");
    assert_eq!(connection.read(&mut [])?, 0);

    let mut buf = [0u8; 16];
    assert_eq!(connection.read(&mut buf)?, 7);
    assert_eq!(&buf[..7], b"payload");
    assert_eq!(connection.state(), ConnectionState::Established);
    Ok(())
}

#[test]
fn test_stalled_write_fails_connection() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;
    let transport = MemoryTransport::new();

    let engine = ScriptedEngine::new(EngineConfig::default()).with_stalled_writes();
    let mut connection = TlsConnection::new(engine, ctx.bound_signer(), short_timeouts());
    connection.connect(&ScriptedConnector::new(transport.clone()), "localhost", 443)?;

    let err = connection.write_all(b"request").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert_eq!(connection.failure(), Some(ErrorKind::Io));
    assert!(connection.is_released());
    assert_eq!(transport.shutdown_count(), 1);
    Ok(())
}

#[test]
fn test_exchange_deadline_on_open_ended_response() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;
    let transport = MemoryTransport::new();
    // The peer answers but never closes
    transport.push_inbound(b"HTTP/1.1 200 OK\r\n");

    let config = BridgeConfig {
        exchange_timeout: Duration::from_millis(50),
        ..BridgeConfig::default()
    };
    let client = SecureClient::new(config)?;
    let mut connection = client.connect(
        &ctx,
        ScriptedEngine::new(EngineConfig::default()),
        &ScriptedConnector::new(transport.clone()),
    )?;

    let started = Instant::now();
    let err = client.exchange(&mut connection, "/").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert_eq!(connection.failure(), Some(ErrorKind::Timeout));
    assert_eq!(transport.shutdown_count(), 1);
    Ok(())
}

#[test]
fn test_exchange_response_limit() -> Result<()> {
    let element = SimulatedElement::new();
    let ctx = context(&element)?;
    let transport = MemoryTransport::new();
    transport.push_inbound(&[b'x'; 100]);
    transport.close_inbound();

    let config = BridgeConfig {
        max_response_len: 64,
        ..BridgeConfig::default()
    };
    let client = SecureClient::new(config)?;
    let mut connection = client.connect(
        &ctx,
        ScriptedEngine::new(EngineConfig::default()),
        &ScriptedConnector::new(transport.clone()),
    )?;

    let err = client.exchange(&mut connection, "/").unwrap_err();
    assert!(matches!(
        err,
        se_tls_bridge::Error::CapacityExceeded { requested: 100, capacity: 64 }
    ));
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert_eq!(connection.failure(), Some(ErrorKind::CapacityExceeded));
    assert_eq!(transport.shutdown_count(), 1);
    Ok(())
}

#[test]
fn test_unloadable_key_store_fails_context() -> Result<()> {
    let element = SimulatedElement::new();
    element.fail_key_store(true);

    let err = context(&element).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    assert!(!err.is_retryable());
    assert_eq!(element.generation_count(), 0);
    assert!(!element.is_channel_open());

    element.fail_key_store(false);
    let ctx = context(&element)?;
    assert_eq!(ctx.provisioned(), Provisioned::Generated);
    Ok(())
}
