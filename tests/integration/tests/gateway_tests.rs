//! Gateway Integration Tests
//!
//! Each test binds its own upgrade host on an ephemeral port and talks to it
//! with a real WebSocket client or a raw TCP socket.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use futures_util::SinkExt;
use integration_tests::{
    next_close_code, next_event, next_message, order_created, queue_metrics, raw_upgrade_request,
    test_config, unique_queue, TestServer, CLIENT_KEY, EXPECTED_ACCEPT, RECV_TIMEOUT,
};
use pos_gateway::{EventKind, GatewayEvent, GatewayState};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_websocket_client_connects() {
    let server = TestServer::start().await.expect("Failed to start server");
    assert_eq!(server.gateway.state(), GatewayState::Bound);

    let _ws = server.connect().await.expect("Handshake failed");
    assert_eq!(server.gateway.connection_count(), 1);
}

#[tokio::test]
async fn test_raw_handshake_accept_value() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(raw_upgrade_request("/ws/pos", &[CLIENT_KEY]).as_bytes())
        .await
        .unwrap();

    let mut response = Vec::new();
    let mut chunk = [0u8; 1024];
    while !response.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = tokio::time::timeout(RECV_TIMEOUT, stream.read(&mut chunk))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "server closed before responding");
        response.extend_from_slice(&chunk[..n]);
    }

    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));

    // Header names are case-insensitive on the wire
    let header = |name: &str| {
        response.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim().to_string())
        })
    };
    assert_eq!(header("Sec-WebSocket-Accept").as_deref(), Some(EXPECTED_ACCEPT));
    assert_eq!(header("Sec-WebSocket-Version").as_deref(), Some("13"));
    assert_eq!(header("Sec-WebSocket-Extensions"), None);

    // Frames follow on the same socket
    server.wait_for_connections(1).await.unwrap();
}

#[tokio::test]
async fn test_missing_key_is_refused() {
    let server = TestServer::start().await.expect("Failed to start server");

    let response = server
        .raw_request(&raw_upgrade_request("/ws/pos", &[]))
        .await
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 400"), "got {response:?}");
    assert_eq!(server.gateway.connection_count(), 0);
}

#[tokio::test]
async fn test_duplicate_key_is_refused() {
    let server = TestServer::start().await.expect("Failed to start server");

    let response = server
        .raw_request(&raw_upgrade_request("/ws/pos", &[CLIENT_KEY, CLIENT_KEY]))
        .await
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 400"), "got {response:?}");
    assert_eq!(server.gateway.connection_count(), 0);
}

#[tokio::test]
async fn test_malformed_request_line_is_refused() {
    let server = TestServer::start().await.expect("Failed to start server");

    let response = server
        .raw_request("GET /ws pos HTTP/1.1\r\nUpgrade: websocket\r\n\r\n")
        .await
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 400"), "got {response:?}");
    assert_eq!(server.gateway.connection_count(), 0);
}

#[tokio::test]
async fn test_other_upgrade_paths_are_not_handled() {
    let server = TestServer::start().await.expect("Failed to start server");

    let response = server
        .raw_request(&raw_upgrade_request("/ws/other", &[CLIENT_KEY]))
        .await
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 404"));
    assert_eq!(server.gateway.connection_count(), 0);
}

#[tokio::test]
async fn test_host_health_check() {
    let server = TestServer::start().await.expect("Failed to start server");

    let response = server
        .raw_request("GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with("OK"));
}

#[tokio::test]
async fn test_stats_share_the_gateway_port() {
    let server = TestServer::start().await.expect("Failed to start server");
    let _ws = server.connect().await.unwrap();

    let response = server
        .raw_request("GET /stats HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let stats: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(stats["state"], "BOUND");
    assert_eq!(stats["connections"], 1);
}

// ============================================================================
// Broadcast Tests
// ============================================================================

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut first = server.connect().await.unwrap();
    let mut second = server.connect().await.unwrap();

    let sent = server.gateway.broadcast_named("order.created", order_created(1001));
    assert_eq!(sent, 2);

    for ws in [&mut first, &mut second] {
        let event = next_event(ws).await.unwrap();
        assert_eq!(event["event"], "order.created");
        assert_eq!(event["payload"], order_created(1001));
    }
}

#[tokio::test]
async fn test_queue_metrics_envelope() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut ws = server.connect().await.unwrap();
    let queue = unique_queue();

    server
        .gateway
        .broadcast_queue_metrics(queue.clone(), queue_metrics(3, 0));

    let event = next_event(&mut ws).await.unwrap();
    assert_eq!(event["event"], "queue.metrics");
    assert_eq!(event["payload"]["queue"], queue);
    assert_eq!(event["payload"]["metrics"], queue_metrics(3, 0));
    assert!(event["payload"]["updatedAt"].is_string());
}

#[tokio::test]
async fn test_late_join_replay() {
    let server = TestServer::start().await.expect("Failed to start server");
    server
        .gateway
        .broadcast_queue_metrics("fiscal-signing", queue_metrics(5, 1));
    server
        .gateway
        .broadcast_queue_metrics("accounting-export", queue_metrics(0, 0));
    server
        .gateway
        .broadcast_queue_metrics("fiscal-signing", queue_metrics(2, 1));
    server.gateway.broadcast_system_error(
        "fiscal-signing",
        "signing service unreachable",
        Some(json!({"attempt": 3})),
    );

    let mut ws = server.connect().await.unwrap();

    let first = next_event(&mut ws).await.unwrap();
    assert_eq!(first["event"], "queue.metrics");
    assert_eq!(first["payload"]["queue"], "fiscal-signing");
    assert_eq!(first["payload"]["metrics"], queue_metrics(2, 1));

    let second = next_event(&mut ws).await.unwrap();
    assert_eq!(second["payload"]["queue"], "accounting-export");

    let third = next_event(&mut ws).await.unwrap();
    assert_eq!(third["event"], "system.error");
    assert_eq!(third["payload"]["source"], "fiscal-signing");
    assert_eq!(third["payload"]["message"], "signing service unreachable");
    assert_eq!(third["payload"]["details"], json!({"attempt": 3}));

    server.gateway.broadcast_named("order.created", order_created(7));
    assert_eq!(next_event(&mut ws).await.unwrap()["event"], "order.created");
}

#[tokio::test]
async fn test_in_process_listener_without_clients() {
    let server = TestServer::start().await.expect("Failed to start server");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    server.gateway.on(EventKind::SystemError, move |event| {
        if let GatewayEvent::SystemError(error) = event {
            sink.lock().unwrap().push(error.message.clone());
        }
    });

    assert_eq!(server.gateway.broadcast_system_error("pos", "drawer stuck", None), 0);
    assert_eq!(*seen.lock().unwrap(), vec!["drawer stuck".to_string()]);
}

// ============================================================================
// Connection Behavior Tests
// ============================================================================

#[tokio::test]
async fn test_ping_answered_with_pong() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut ws = server.connect().await.unwrap();

    ws.send(Message::Ping(b"till-4".to_vec())).await.unwrap();

    loop {
        match next_message(&mut ws).await.unwrap() {
            Message::Pong(payload) => {
                assert_eq!(payload, b"till-4");
                break;
            }
            Message::Ping(_) => {}
            other => panic!("expected pong, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_keepalive_ping() {
    let config = pos_common::GatewayConfig {
        keepalive_secs: 1,
        ..test_config()
    };
    let server = TestServer::start_with_config(config).await.unwrap();
    let mut ws = server.connect().await.unwrap();

    let message = next_message(&mut ws).await.unwrap();
    assert!(matches!(message, Message::Ping(_)), "got {message:?}");
}

#[tokio::test]
async fn test_client_text_is_ignored() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut ws = server.connect().await.unwrap();

    ws.send(Message::Text("hello".to_string())).await.unwrap();
    ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    server.gateway.broadcast_named("order.created", order_created(2));

    assert_eq!(next_event(&mut ws).await.unwrap()["event"], "order.created");
    assert_eq!(server.gateway.connection_count(), 1);
}

#[tokio::test]
async fn test_client_close_is_echoed() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut ws = server.connect().await.unwrap();

    ws.send(Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    })))
    .await
    .unwrap();

    assert_eq!(next_close_code(&mut ws).await.unwrap(), Some(1000));
    server.wait_for_connections(0).await.unwrap();
}

#[tokio::test]
async fn test_dropped_client_is_removed() {
    let server = TestServer::start().await.expect("Failed to start server");
    let ws = server.connect().await.unwrap();
    let _other = server.connect().await.unwrap();

    drop(ws);
    server.wait_for_connections(1).await.unwrap();
}

#[tokio::test]
async fn test_oversized_frame_closes_with_1009() {
    let config = pos_common::GatewayConfig {
        max_frame_bytes: 16,
        ..test_config()
    };
    let server = TestServer::start_with_config(config).await.unwrap();
    let mut ws = server.connect().await.unwrap();

    ws.send(Message::Binary(vec![0u8; 100])).await.unwrap();

    assert_eq!(next_close_code(&mut ws).await.unwrap(), Some(1009));
    server.wait_for_connections(0).await.unwrap();
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_sends_going_away() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut ws = server.connect().await.unwrap();

    server.gateway.shutdown();

    assert_eq!(next_close_code(&mut ws).await.unwrap(), Some(1001));
    assert_eq!(server.gateway.state(), GatewayState::Shutdown);
    assert_eq!(server.gateway.connection_count(), 0);
    assert_eq!(server.host().handler_count(), 0);

    // Detached: further upgrades are left to the host's 404
    let response = server
        .raw_request(&raw_upgrade_request("/ws/pos", &[CLIENT_KEY]))
        .await
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 404"));
}
