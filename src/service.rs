//! Application-facing adapter over one shared [`JsonRpcClient`].
//!
//! Built once in the composition root and cloned into every consumer; all
//! clones talk through the same connection.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::rpc::{ClientError, ClientEvent, ConnectionState, EventKind, JsonRpcClient, ListenerId};

#[derive(Clone)]
pub struct ApiService {
    client: Arc<JsonRpcClient>,
}

impl ApiService {
    /// Build the shared client from configuration.
    ///
    /// # Errors
    ///
    /// `ClientError::Config` when no endpoint is configured or the settings
    /// are invalid.
    pub fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        if !config.is_configured() {
            return Err(ClientError::Config {
                reason: "no endpoint configured".into(),
            });
        }
        Ok(Self::new(Arc::new(JsonRpcClient::new(config)?)))
    }

    pub fn new(client: Arc<JsonRpcClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<JsonRpcClient> {
        &self.client
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        self.client.connect().await
    }

    pub async fn disconnect(&self) {
        self.client.disconnect().await
    }

    pub async fn call<R>(&self, method: &str, params: Vec<Value>) -> Result<R, ClientError>
    where
        R: DeserializeOwned,
    {
        self.client.call(method, params).await
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.client.on(kind, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.client.off(id)
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    /// Version string reported by the endpoint.
    pub async fn version(&self) -> Result<String, ClientError> {
        self.call("Version", vec![]).await
    }
}
