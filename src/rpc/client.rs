//! Multiplexing JSON-RPC client with automatic reconnection.
//!
//! `JsonRpcClient` owns one transport to one endpoint. Any number of tasks may
//! call it concurrently; each call gets a fresh correlation id and waits on
//! its own channel, so responses complete in arrival order without
//! head-of-line blocking.
//!
//! A background driver task reads frames, dispatches responses, and on
//! unexpected transport loss runs the reconnect loop:
//!
//! ```text
//!  Disconnected --connect()--> Connecting --ok--> Connected
//!        ^                         |                 |
//!        |<--------failed----------+        transport lost
//!        |                                           v
//!        |<--attempts exhausted-- Reconnecting <-----+
//!        |                            |
//!        |                            +--ok--> Connected
//!        +<------------- disconnect() from any state
//! ```

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::rpc::error::{ClientError, TransportError};
use crate::rpc::events::{ClientEvent, EventKind, EventRegistry, ListenerId};
use crate::rpc::pending::{PendingInfo, PendingTable};
use crate::rpc::protocol::{Inbound, JsonRpcRequest};
use crate::rpc::transport::{
    Connector, DefaultConnector, Endpoint, FrameSink, FrameStream, FramedTransport,
};

/// Upper bound on waiting for a graceful close during `disconnect()`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

type SharedSink = Arc<AsyncMutex<FrameSink>>;

struct Session {
    generation: u64,
    sink: SharedSink,
}

/// Everything guarded by the lifecycle lock. State transitions on the watch
/// channel happen only while this lock is held.
#[derive(Default)]
struct Lifecycle {
    session: Option<Session>,
    driver: Option<JoinHandle<()>>,
    generation: u64,
    /// Bumped whenever `connect()` claims the `Connecting` state.
    attempt: u64,
    last_error: Option<String>,
}

struct Inner {
    config: ClientConfig,
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    lifecycle: Mutex<Lifecycle>,
    pending: Mutex<PendingTable>,
    next_id: AtomicU64,
    reconnect_attempts: AtomicU32,
    events: EventRegistry,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// JSON-RPC client for one endpoint.
///
/// Construct it once and share it by reference (`Arc<JsonRpcClient>`) with
/// every consumer. Dropping the last handle tears the connection down and
/// rejects pending calls.
///
/// # Call policy
///
/// - `Connected`: the request is sent immediately.
/// - `Connecting` / `Reconnecting`: the call waits for the connection to
///   settle, bounded by its own timeout.
/// - `Disconnected`: the call fails with `ConnectionClosed` at once.
///
/// # Example
///
/// ```ignore
/// use cluster_rpc::{ClientConfig, JsonRpcClient};
///
/// let config = ClientConfig::new("ws://127.0.0.1:4701/api/webrpc/v0")
///     .with_method_prefix("CurioWeb.");
/// let client = JsonRpcClient::new(config)?;
/// client.connect().await?;
///
/// let version: String = client.call("Version", vec![]).await?;
/// ```
pub struct JsonRpcClient {
    inner: Arc<Inner>,
}

impl JsonRpcClient {
    /// Create a client using the built-in WebSocket / Unix socket transports.
    ///
    /// The client starts `Disconnected`; call [`connect`](Self::connect).
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_connector(config, Arc::new(DefaultConnector))
    }

    /// Create a client with a custom transport connector.
    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ClientError> {
        let endpoint = config.validate()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                endpoint,
                connector,
                state,
                lifecycle: Mutex::new(Lifecycle::default()),
                pending: Mutex::new(PendingTable::default()),
                next_id: AtomicU64::new(1),
                reconnect_attempts: AtomicU32::new(0),
                events: EventRegistry::default(),
            }),
        })
    }

    /// Establish the transport.
    ///
    /// No-op when already connected. While a connection or reconnection
    /// attempt is in flight, waits for that attempt instead of starting
    /// another one.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ConnectionFailed` if the attempt fails, times
    /// out, or is cancelled by `disconnect()`.
    ///
    /// The attempt runs on its own task. Dropping the returned future does
    /// not abandon it; the client still settles in `Connected` or
    /// `Disconnected`.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut state_rx = self.inner.state.subscribe();

        let attempt = loop {
            let current = {
                let mut lifecycle = lock(&self.inner.lifecycle);
                let claimed = self.inner.state.send_if_modified(|state| {
                    if *state == ConnectionState::Disconnected {
                        *state = ConnectionState::Connecting;
                        true
                    } else {
                        false
                    }
                });
                if claimed {
                    lifecycle.attempt += 1;
                    break lifecycle.attempt;
                }
                *state_rx.borrow_and_update()
            };

            match current {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected => continue,
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    debug!(state = ?current, "Joining in-flight connection attempt");
                    let settled = state_rx
                        .wait_for(|s| {
                            matches!(s, ConnectionState::Connected | ConnectionState::Disconnected)
                        })
                        .await
                        .map(|s| *s);
                    return match settled {
                        Ok(ConnectionState::Connected) => Ok(()),
                        _ => Err(self.inner.connection_failed()),
                    };
                }
            }
        };

        let inner = Arc::clone(&self.inner);
        match tokio::spawn(async move { inner.establish(attempt).await }).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Connection attempt task failed");
                Err(self.inner.connection_failed())
            }
        }
    }

    /// Tear down the transport and stop reconnecting.
    ///
    /// Every pending call fails with `ConnectionClosed`. Safe to call
    /// repeatedly; only the first call that changes state emits
    /// `Disconnected`.
    pub async fn disconnect(&self) {
        let Some(sink) = self.inner.shutdown(true) else {
            return;
        };
        let closed = timeout(CLOSE_TIMEOUT, async {
            let mut sink = sink.lock().await;
            sink.close().await
        })
        .await;
        match closed {
            Ok(Ok(())) => debug!("Transport closed"),
            Ok(Err(e)) => debug!(error = %e, "Transport close failed"),
            Err(_) => debug!("Transport close timed out"),
        }
    }

    /// Call `method` with positional `params` and decode the result.
    ///
    /// The configured method prefix is prepended and the configured timeout
    /// applies.
    ///
    /// # Errors
    ///
    /// - `ClientError::Timeout` if no response arrives in time
    /// - `ClientError::Rpc` if the server answers with an error object
    /// - `ClientError::ConnectionClosed` if the client is disconnected or the
    ///   transport drops before the response
    /// - `ClientError::Decode` if the result does not fit `R`
    ///
    /// # Example
    ///
    /// ```ignore
    /// let sectors: Vec<SectorInfo> = client.call("SectorList", vec![json!(1000)]).await?;
    /// ```
    pub async fn call<R>(&self, method: &str, params: Vec<Value>) -> Result<R, ClientError>
    where
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, params, self.inner.config.timeout())
            .await
    }

    /// Like [`call`](Self::call) with a per-call timeout.
    pub async fn call_with_timeout<R>(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Duration,
    ) -> Result<R, ClientError>
    where
        R: DeserializeOwned,
    {
        let value = self.inner.call(method, params, timeout).await?;
        serde_json::from_value(value).map_err(|e| ClientError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    /// Subscribe to lifecycle events of one kind.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    /// Remove a listener registered with [`on`](Self::on).
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.current_state()
    }

    /// Watch lifecycle state changes (for UI connection indicators).
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Consecutive failed or in-progress reconnect attempts since the last
    /// successful connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Snapshot of in-flight requests, ordered by id.
    pub fn pending_requests(&self) -> Vec<PendingInfo> {
        lock(&self.inner.pending).snapshot()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl Drop for JsonRpcClient {
    fn drop(&mut self) {
        self.inner.shutdown(false);
    }
}

impl Inner {
    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn connection_failed(&self) -> ClientError {
        let reason = lock(&self.lifecycle)
            .last_error
            .clone()
            .unwrap_or_else(|| "connection attempt did not complete".to_string());
        ClientError::ConnectionFailed {
            endpoint: self.endpoint.to_string(),
            reason,
        }
    }

    /// Whether `attempt` still owns the `Connecting` state. Caller holds the
    /// lifecycle lock.
    fn owns_attempt(&self, lifecycle: &Lifecycle, attempt: u64) -> bool {
        lifecycle.attempt == attempt && self.current_state() == ConnectionState::Connecting
    }

    /// Open a transport, bounded by the configured timeout.
    async fn open_transport(&self) -> Result<FramedTransport, TransportError> {
        let limit = self.config.timeout();
        match timeout(limit, self.connector.connect(&self.endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Connect(format!(
                "timed out after {}ms",
                limit.as_millis()
            ))),
        }
    }

    /// Perform the claimed connection attempt `attempt`.
    async fn establish(self: &Arc<Self>, attempt: u64) -> Result<(), ClientError> {
        info!(endpoint = %self.endpoint, attempt, "Connecting");

        let transport = match self.open_transport().await {
            Ok(transport) => transport,
            Err(e) => {
                let reason = e.to_string();
                {
                    let mut lifecycle = lock(&self.lifecycle);
                    if self.owns_attempt(&lifecycle, attempt) {
                        lifecycle.last_error = Some(reason.clone());
                        self.state.send_replace(ConnectionState::Disconnected);
                    }
                }
                warn!(endpoint = %self.endpoint, error = %reason, "Connection failed");
                self.events.emit(&ClientEvent::Error {
                    message: format!("connection to {} failed: {}", self.endpoint, reason),
                });
                return Err(ClientError::ConnectionFailed {
                    endpoint: self.endpoint.to_string(),
                    reason,
                });
            }
        };

        let FramedTransport { sink, stream } = transport;
        {
            let mut lifecycle = lock(&self.lifecycle);
            if !self.owns_attempt(&lifecycle, attempt) {
                // disconnect() won the race; the new transport is dropped here
                let reason = "connection attempt cancelled by disconnect".to_string();
                if lifecycle.attempt == attempt {
                    lifecycle.last_error = Some(reason.clone());
                }
                return Err(ClientError::ConnectionFailed {
                    endpoint: self.endpoint.to_string(),
                    reason,
                });
            }
            let generation = self.install_session(&mut lifecycle, sink);
            if let Some(stale) = lifecycle.driver.take() {
                stale.abort();
            }
            lifecycle.driver = Some(tokio::spawn(drive(Arc::clone(self), generation, stream)));
        }

        info!(endpoint = %self.endpoint, "Connected");
        self.events.emit(&ClientEvent::Connected);
        Ok(())
    }

    /// Make `sink` the active session and mark the client connected.
    /// Caller holds the lifecycle lock.
    fn install_session(&self, lifecycle: &mut Lifecycle, sink: FrameSink) -> u64 {
        lifecycle.generation += 1;
        let generation = lifecycle.generation;
        lifecycle.session = Some(Session {
            generation,
            sink: Arc::new(AsyncMutex::new(sink)),
        });
        lifecycle.last_error = None;
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Connected);
        generation
    }

    /// Move to `Disconnected`, drop the session, and reject pending calls.
    ///
    /// Returns the sink of the dropped session so the caller can close it.
    fn shutdown(&self, notify: bool) -> Option<SharedSink> {
        let (was, sink) = {
            let mut lifecycle = lock(&self.lifecycle);
            let was = self.state.send_replace(ConnectionState::Disconnected);
            if let Some(driver) = lifecycle.driver.take() {
                driver.abort();
            }
            let sink = lifecycle.session.take().map(|session| session.sink);
            if was != ConnectionState::Disconnected {
                lifecycle.last_error = Some("disconnected by client".into());
            }
            (was, sink)
        };

        let rejected = lock(&self.pending).reject_all();
        if was != ConnectionState::Disconnected {
            info!(endpoint = %self.endpoint, rejected, "Disconnected");
            if notify {
                self.events.emit(&ClientEvent::Disconnected);
            }
        }
        sink
    }

    fn session(&self) -> (ConnectionState, Option<(u64, SharedSink)>) {
        let lifecycle = lock(&self.lifecycle);
        let session = lifecycle
            .session
            .as_ref()
            .map(|s| (s.generation, Arc::clone(&s.sink)));
        (self.current_state(), session)
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.lifecycle)
            .session
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    /// Wait until a session is available or the client settles disconnected.
    async fn ready_session(
        &self,
        deadline: Instant,
        timed_out: impl Fn() -> ClientError,
    ) -> Result<(u64, SharedSink), ClientError> {
        let mut state_rx = self.state.subscribe();
        loop {
            state_rx.borrow_and_update();
            let (state, session) = self.session();
            if let Some(session) = session {
                return Ok(session);
            }
            if state == ConnectionState::Disconnected {
                return Err(ClientError::ConnectionClosed);
            }

            debug!(state = ?state, "Waiting for connection before sending");
            match timeout_at(deadline, state_rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
                Err(_) => return Err(timed_out()),
            }
        }
    }

    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let deadline = Instant::now() + timeout;
        let method = format!("{}{}", self.config.method_prefix, method);
        let timed_out = || ClientError::Timeout {
            method: method.clone(),
            timeout_ms: timeout.as_millis() as u64,
        };

        let (generation, sink) = self.ready_session(deadline, timed_out).await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method.as_str(), params);
        let frame = serde_json::to_string(&request)
            .map_err(|e| ClientError::Protocol(format!("Failed to serialize request: {}", e)))?;

        let mut response = lock(&self.pending).register(id, &method);
        let _withdraw = Withdraw {
            pending: &self.pending,
            id,
        };

        // A loss between taking the session and registering would have
        // missed this request in the bulk rejection
        if !self.is_current(generation) {
            return Err(ClientError::ConnectionClosed);
        }

        let sent = timeout_at(deadline, async {
            let mut sink = sink.lock().await;
            sink.send(frame).await
        })
        .await;
        match sent {
            Ok(Ok(())) => debug!(id, method = %method, "Request sent"),
            Ok(Err(e)) => {
                debug!(id, method = %method, error = %e, "Send failed");
                return Err(ClientError::ConnectionClosed);
            }
            Err(_) => return Err(timed_out()),
        }

        match timeout_at(deadline, &mut response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                if lock(&self.pending).remove(id) {
                    warn!(id, method = %method, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                    Err(timed_out())
                } else {
                    // Completed between the deadline and the removal
                    response
                        .try_recv()
                        .unwrap_or(Err(ClientError::ConnectionClosed))
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match Inbound::parse(text) {
            Ok(Inbound::Response { id, outcome }) => {
                let outcome = outcome.map_err(ClientError::from);
                if !lock(&self.pending).complete(id, outcome) {
                    debug!(id, "Dropping response with no pending request");
                }
            }
            Ok(Inbound::Notification { method, params }) => {
                debug!(method = %method, params = %params, "Ignoring server-originated message");
            }
            Err(e) => warn!(error = %e, "Dropping malformed inbound message"),
        }
    }

    /// Handle loss of the session `generation`. Returns whether the driver
    /// should run the reconnect loop.
    fn transport_lost(&self, generation: u64) -> bool {
        let reconnect = {
            let mut lifecycle = lock(&self.lifecycle);
            let current = lifecycle
                .session
                .as_ref()
                .is_some_and(|s| s.generation == generation);
            if !current || self.current_state() != ConnectionState::Connected {
                return false;
            }
            lifecycle.session = None;
            let reconnect = self.config.max_reconnect_attempts > 0;
            if !reconnect {
                lifecycle.last_error = Some("transport closed".into());
                self.state.send_replace(ConnectionState::Disconnected);
            } else {
                self.state.send_replace(ConnectionState::Reconnecting);
            }
            reconnect
        };

        let rejected = lock(&self.pending).reject_all();
        warn!(endpoint = %self.endpoint, rejected, reconnect, "Transport closed unexpectedly");

        if !reconnect {
            self.events.emit(&ClientEvent::Disconnected);
        }
        reconnect
    }

    /// Fixed-interval reconnect loop. Returns the new session on success.
    async fn reconnect(&self) -> Option<(u64, FrameStream)> {
        let interval = self.config.reconnect_interval();
        let max_attempts = self.config.max_reconnect_attempts;

        loop {
            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            info!(attempt, max_attempts, interval_ms = interval.as_millis() as u64, "Reconnecting");
            self.events.emit(&ClientEvent::Reconnecting { attempt });

            sleep(interval).await;
            if self.current_state() != ConnectionState::Reconnecting {
                debug!("Reconnect abandoned");
                return None;
            }

            match self.open_transport().await {
                Ok(FramedTransport { sink, stream }) => {
                    let generation = {
                        let mut lifecycle = lock(&self.lifecycle);
                        if self.current_state() != ConnectionState::Reconnecting {
                            return None;
                        }
                        self.install_session(&mut lifecycle, sink)
                    };
                    info!(attempt, "Reconnected");
                    self.events.emit(&ClientEvent::Connected);
                    return Some((generation, stream));
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Reconnect attempt failed");
                    if attempt < max_attempts {
                        continue;
                    }

                    let message = format!(
                        "gave up reconnecting to {} after {} attempts: {}",
                        self.endpoint, attempt, e
                    );
                    {
                        let mut lifecycle = lock(&self.lifecycle);
                        if self.current_state() != ConnectionState::Reconnecting {
                            return None;
                        }
                        lifecycle.last_error = Some(message.clone());
                        self.state.send_replace(ConnectionState::Disconnected);
                    }
                    warn!(endpoint = %self.endpoint, attempts = attempt, "Reconnection exhausted");
                    self.events.emit(&ClientEvent::Error { message });
                    self.events.emit(&ClientEvent::Disconnected);
                    return None;
                }
            }
        }
    }
}

/// Withdraws a pending entry when the call ends early or its future is
/// dropped. Removing an already completed entry is a no-op.
struct Withdraw<'a> {
    pending: &'a Mutex<PendingTable>,
    id: u64,
}

impl Drop for Withdraw<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(self.id);
    }
}

/// Driver task: read frames until the transport ends, then reconnect.
async fn drive(inner: Arc<Inner>, mut generation: u64, mut stream: FrameStream) {
    loop {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(text) => inner.dispatch(&text),
                Err(e) if e.is_recoverable() => warn!(error = %e, "Skipping unreadable frame"),
                Err(e) => {
                    debug!(error = %e, "Transport read failed");
                    break;
                }
            }
        }

        if !inner.transport_lost(generation) {
            return;
        }

        match inner.reconnect().await {
            Some((next_generation, next_stream)) => {
                generation = next_generation;
                stream = next_stream;
            }
            None => return,
        }
    }
}
