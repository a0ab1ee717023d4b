//! End-to-end tests against a real WebSocket server on localhost.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use cluster_rpc::{ClientConfig, ClientError, ClientEvent, ConnectionState, EventKind, JsonRpcClient};

/// Answer `Cluster.*` requests until the client asks for `Cluster.Hangup`,
/// which drops the connection without replying.
async fn serve(listener: TcpListener) {
    while let Ok((tcp, _)) = listener.accept().await {
        tokio::spawn(async move {
            let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                return;
            };
            while let Some(Ok(message)) = ws.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let request: Value = serde_json::from_str(&text).unwrap();
                let id = request["id"].clone();
                let reply = match request["method"].as_str().unwrap() {
                    "Cluster.Version" => json!({"jsonrpc": "2.0", "id": id, "result": "2.1.0"}),
                    "Cluster.Echo" => {
                        json!({"jsonrpc": "2.0", "id": id, "result": request["params"].clone()})
                    }
                    "Cluster.Hangup" => return,
                    other => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": format!("method not found: {}", other)}
                    }),
                };
                if ws.send(Message::Text(reply.to_string())).await.is_err() {
                    return;
                }
            }
        });
    }
}

async fn start_server() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(serve(listener));
    (format!("ws://{}/api/webrpc/v0", addr), handle)
}

fn config(endpoint: &str) -> ClientConfig {
    ClientConfig::new(endpoint)
        .with_method_prefix("Cluster.")
        .with_timeout(Duration::from_secs(5))
        .with_reconnect(Duration::from_millis(50), 2)
}

#[tokio::test]
async fn test_websocket_calls() {
    let (endpoint, _server) = start_server().await;
    let client = JsonRpcClient::new(config(&endpoint)).unwrap();
    client.connect().await.unwrap();
    assert!(client.is_connected());

    let version: String = client.call("Version", vec![]).await.unwrap();
    assert_eq!(version, "2.1.0");

    let echoed: Vec<Value> = client
        .call("Echo", vec![json!(1000), json!("f01234")])
        .await
        .unwrap();
    assert_eq!(echoed, vec![json!(1000), json!("f01234")]);

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_websocket_concurrent_calls() {
    let (endpoint, _server) = start_server().await;
    let client = JsonRpcClient::new(config(&endpoint)).unwrap();
    client.connect().await.unwrap();

    let results = futures::future::join_all(
        (0..25).map(|i| client.call::<Vec<Value>>("Echo", vec![json!(i)])),
    )
    .await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), vec![json!(i)]);
    }
}

#[tokio::test]
async fn test_websocket_server_error() {
    let (endpoint, _server) = start_server().await;
    let client = JsonRpcClient::new(config(&endpoint)).unwrap();
    client.connect().await.unwrap();

    let err = client.call::<Value>("Missing", vec![]).await.unwrap_err();
    match err {
        ClientError::Rpc { code, message, .. } => {
            assert_eq!(code, -32601);
            assert_eq!(message, "method not found: Cluster.Missing");
        }
        other => panic!("Expected Rpc error, got {:?}", other),
    }
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_http_endpoint_is_rewritten() {
    let (endpoint, _server) = start_server().await;
    let http = endpoint.replacen("ws://", "http://", 1);
    let client = JsonRpcClient::new(config(&http)).unwrap();

    client.connect().await.unwrap();
    let version: String = client.call("Version", vec![]).await.unwrap();
    assert_eq!(version, "2.1.0");
}

#[tokio::test]
async fn test_websocket_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = JsonRpcClient::new(config(&format!("ws://{}/rpc", addr))).unwrap();
    let err = client.connect().await.unwrap_err();

    assert!(matches!(err, ClientError::ConnectionFailed { .. }));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_server_loss_reconnects_then_gives_up() {
    let (endpoint, server) = start_server().await;
    let client = JsonRpcClient::new(config(&endpoint)).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in [EventKind::Reconnecting, EventKind::Error, EventKind::Disconnected] {
        let sink = Arc::clone(&events);
        client.on(kind, move |event| sink.lock().unwrap().push(event.clone()));
    }
    let mut state = client.subscribe_state();

    client.connect().await.unwrap();

    // Stop listening, then have the open connection dropped
    server.abort();
    let _ = server.await;
    let err = client.call::<Value>("Hangup", vec![]).await.unwrap_err();
    assert!(err.is_connection_closed());

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .expect("client should give up reconnecting")
    .unwrap();

    let events = events.lock().unwrap().clone();
    assert_eq!(events.len(), 4, "events: {:?}", events);
    assert_eq!(events[0], ClientEvent::Reconnecting { attempt: 1 });
    assert_eq!(events[1], ClientEvent::Reconnecting { attempt: 2 });
    assert_eq!(events[2].kind(), EventKind::Error);
    assert_eq!(events[3], ClientEvent::Disconnected);
    assert_eq!(client.reconnect_attempts(), 2);
}
