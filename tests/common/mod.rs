//! In-memory transport for driving `JsonRpcClient` from tests.
//!
//! `MockConnector` plays back a script of connection outcomes. Each accepted
//! connection hands the test a `MockServer` holding the far end of two
//! channels; dropping it looks like the peer closing the transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::future::{self, BoxFuture};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};

use cluster_rpc::rpc::{Connector, Endpoint, FramedTransport, TransportError};
use cluster_rpc::{ClientEvent, EventKind, JsonRpcClient};

pub const ENDPOINT: &str = "ws://cluster.test/api/webrpc/v0";

/// Outcome of one connection attempt.
pub enum Script {
    Accept,
    Refuse(&'static str),
    /// Never resolves, like a peer that accepts TCP but stalls the handshake.
    Hang,
}

pub struct MockConnector {
    script: Mutex<VecDeque<Script>>,
    servers: UnboundedSender<MockServer>,
    attempts: AtomicUsize,
    delay: Duration,
}

impl MockConnector {
    pub fn new(script: impl IntoIterator<Item = Script>) -> (Arc<Self>, UnboundedReceiver<MockServer>) {
        Self::with_delay(script, Duration::ZERO)
    }

    /// Every attempt takes `delay` before resolving.
    pub fn with_delay(
        script: impl IntoIterator<Item = Script>,
        delay: Duration,
    ) -> (Arc<Self>, UnboundedReceiver<MockServer>) {
        let (servers, accepted) = mpsc::unbounded();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            servers,
            attempts: AtomicUsize::new(0),
            delay,
        });
        (connector, accepted)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        _endpoint: &Endpoint,
    ) -> BoxFuture<'static, Result<FramedTransport, TransportError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Refuse("script exhausted"));
        let servers = self.servers.clone();
        let delay = self.delay;

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match next {
                Script::Refuse(reason) => Err(TransportError::Connect(reason.to_string())),
                Script::Hang => future::pending().await,
                Script::Accept => {
                    let (client_tx, server_rx) = mpsc::unbounded::<String>();
                    let (server_tx, client_rx) = mpsc::unbounded::<String>();
                    servers
                        .unbounded_send(MockServer {
                            requests: server_rx,
                            responses: server_tx,
                        })
                        .expect("test dropped the server receiver");
                    Ok(FramedTransport::new(
                        client_tx.sink_map_err(|e| TransportError::Closed(e.to_string())),
                        client_rx.map(Ok),
                    ))
                }
            }
        })
    }
}

/// Far end of an accepted mock connection.
pub struct MockServer {
    requests: UnboundedReceiver<String>,
    responses: UnboundedSender<String>,
}

impl MockServer {
    /// Next request the client sent, parsed.
    pub async fn next_request(&mut self) -> Value {
        let text = self.requests.next().await.expect("client closed the transport");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Wait for the client side to go away. `false` if it sent a request
    /// instead.
    pub async fn closed(&mut self) -> bool {
        self.requests.next().await.is_none()
    }

    pub fn respond(&self, id: &Value, result: Value) {
        self.send_raw(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string());
    }

    pub fn respond_error(&self, id: &Value, code: i32, message: &str) {
        self.send_raw(
            json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
                .to_string(),
        );
    }

    /// Stop accepting requests; further client sends fail.
    pub fn close_requests(&mut self) {
        self.requests.close();
    }

    pub fn send_raw(&self, text: impl Into<String>) {
        // The client may already be gone; tests assert on the client side
        let _ = self.responses.unbounded_send(text.into());
    }
}

/// Record every lifecycle event the client emits.
pub fn record_events(client: &JsonRpcClient) -> Arc<Mutex<Vec<ClientEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Reconnecting,
        EventKind::Error,
    ] {
        let sink = Arc::clone(&events);
        client.on(kind, move |event| sink.lock().unwrap().push(event.clone()));
    }
    events
}
