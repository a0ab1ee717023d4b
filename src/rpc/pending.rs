//! Table of in-flight requests keyed by correlation id.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::rpc::error::ClientError;

pub(crate) type Outcome = Result<Value, ClientError>;

struct PendingRequest {
    method: String,
    created_at: DateTime<Utc>,
    started: Instant,
    sink: oneshot::Sender<Outcome>,
}

/// Diagnostic view of one in-flight request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingInfo {
    pub id: u64,
    pub method: String,
    pub created_at: DateTime<Utc>,
}

/// Every entry is removed exactly once: by `complete`, `remove`, or
/// `reject_all`.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<u64, PendingRequest>,
}

impl PendingTable {
    /// Register a request and get the receiver its outcome will arrive on.
    pub fn register(&mut self, id: u64, method: &str) -> oneshot::Receiver<Outcome> {
        let (sink, receiver) = oneshot::channel();
        let previous = self.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                created_at: Utc::now(),
                started: Instant::now(),
                sink,
            },
        );
        debug_assert!(previous.is_none(), "correlation id {} reused", id);
        receiver
    }

    /// Deliver an outcome to the matching request. Returns `false` when no
    /// request with that id is outstanding.
    pub fn complete(&mut self, id: u64, outcome: Outcome) -> bool {
        let Some(request) = self.entries.remove(&id) else {
            return false;
        };
        tracing::debug!(
            id,
            method = %request.method,
            elapsed_ms = request.started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "Response received"
        );
        // The caller may have given up already; nothing to do then
        let _ = request.sink.send(outcome);
        true
    }

    /// Withdraw a request without completing it.
    pub fn remove(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Reject every outstanding request with `ConnectionClosed`.
    pub fn reject_all(&mut self) -> usize {
        let count = self.entries.len();
        for (_, request) in self.entries.drain() {
            let _ = request.sink.send(Err(ClientError::ConnectionClosed));
        }
        count
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn snapshot(&self) -> Vec<PendingInfo> {
        let mut infos: Vec<PendingInfo> = self
            .entries
            .iter()
            .map(|(id, request)| PendingInfo {
                id: *id,
                method: request.method.clone(),
                created_at: request.created_at,
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }
}
