// tests/integration/connection_test.rs

use super::test_helpers::{MockBackend, Script, reply_to};
use gatewire::GatewireError;
use gatewire::WireMessage;
use gatewire::connection::{Connection, ConnectionState};
use gatewire::core::transport::{TlsAttributes, TransportAddress};
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::test]
async fn test_echo_round_trip() {
    let backend = MockBackend::echo().await;
    let mut conn = Connection::new(backend.address.clone());
    assert_eq!(conn.state(), ConnectionState::Unconnected);

    conn.connect().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert!(!conn.is_tls());

    let request = WireMessage::parse(b"[AOECHO;]").unwrap();
    conn.send(&request).await.unwrap();
    let reply = conn.receive().await.unwrap();

    assert_eq!(reply.command(), Some("ECHO"));
    assert_eq!(reply.get("ST"), Some("OK"));
    assert_eq!(backend.received(), vec![request]);
}

#[tokio::test]
async fn test_connect_refused_is_connect_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut conn = Connection::new(TransportAddress::tcp("127.0.0.1", port));
    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, GatewireError::ConnectFailed { .. }));
    assert_eq!(conn.state(), ConnectionState::Unconnected);
}

#[tokio::test]
async fn test_unresolvable_host_is_connect_failed() {
    let mut conn = Connection::new(TransportAddress::tcp("no-such-host.invalid", 4000))
        .with_connect_timeout(Duration::from_secs(5));
    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, GatewireError::ConnectFailed { .. }));
}

#[tokio::test]
async fn test_connect_twice_is_invalid_state() {
    let backend = MockBackend::echo().await;
    let mut conn = Connection::new(backend.address.clone());
    conn.connect().await.unwrap();
    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, GatewireError::InvalidState(_)));
}

#[tokio::test]
async fn test_receive_after_peer_hangup() {
    let backend = MockBackend::start(|_| Script::Hangup).await;
    let mut conn = Connection::new(backend.address.clone());
    conn.connect().await.unwrap();

    conn.send(&WireMessage::with_command("BYE")).await.unwrap();
    let err = conn.receive().await.unwrap_err();
    assert_eq!(err, GatewireError::ConnectionClosed);
    assert_eq!(conn.state(), ConnectionState::Closed);

    // A closed connection cannot be reused.
    let err = conn.send(&WireMessage::with_command("ECHO")).await.unwrap_err();
    assert_eq!(err, GatewireError::ConnectionClosed);
    let err = conn.connect().await.unwrap_err();
    assert_eq!(err, GatewireError::ConnectionClosed);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let backend = MockBackend::echo().await;
    let mut conn = Connection::new(backend.address.clone());
    conn.connect().await.unwrap();

    conn.close().await;
    conn.close().await;
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(conn.receive().await.is_err());
}

#[tokio::test]
async fn test_messages_arrive_in_order_on_one_connection() {
    let backend = MockBackend::start(|req| {
        let first = reply_to(req);
        let mut second = reply_to(req);
        second.set("SQ", "2").unwrap();
        Script::Reply(vec![first, second])
    })
    .await;
    let mut conn = Connection::new(backend.address.clone());
    conn.connect().await.unwrap();

    conn.send(&WireMessage::with_command("LIST")).await.unwrap();
    let first = conn.receive().await.unwrap();
    let second = conn.receive().await.unwrap();
    assert_eq!(first.get("SQ"), None);
    assert_eq!(second.get("SQ"), Some("2"));
}

#[tokio::test]
async fn test_partial_tls_attributes_connect_in_plaintext() {
    let backend = MockBackend::echo().await;
    let attributes = TlsAttributes {
        cert_path: Some("/nonexistent/client.crt".into()),
        ..Default::default()
    };
    let address = backend.address.clone().with_tls(attributes);
    assert!(!address.is_tls());

    let mut conn = Connection::new(address);
    conn.connect().await.unwrap();
    assert!(!conn.is_tls());
    conn.send(&WireMessage::with_command("ECHO")).await.unwrap();
    assert_eq!(conn.receive().await.unwrap().get("ST"), Some("OK"));
}

#[tokio::test]
async fn test_complete_tls_with_missing_files_fails_to_connect() {
    let backend = MockBackend::echo().await;
    let address = backend.address.clone().with_tls(TlsAttributes {
        key_path: Some("/nonexistent/client.key".into()),
        cert_path: Some("/nonexistent/client.crt".into()),
        cipher: Some("TLS13_AES_256_GCM_SHA384".into()),
        version: Some("TLSv1.3".into()),
    });
    assert!(address.is_tls());

    let mut conn = Connection::new(address);
    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, GatewireError::ConnectFailed { .. }));
    assert!(backend.received().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_socket_echo() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backend.sock");
    let backend = MockBackend::start_local(&path, |req| Script::Reply(vec![reply_to(req)])).await;

    let mut conn = Connection::new(TransportAddress::local(&path));
    conn.connect().await.unwrap();
    conn.send(&WireMessage::with_command("ECHO")).await.unwrap();
    let reply = conn.receive().await.unwrap();
    assert_eq!(reply.command(), Some("ECHO"));
    assert_eq!(backend.connections(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_missing_local_socket_is_connect_failed() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = Connection::new(TransportAddress::local(dir.path().join("absent.sock")));
    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, GatewireError::ConnectFailed { .. }));
}
