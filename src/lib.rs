//! Cluster RPC client library
//!
//! This library provides the connection layer a cluster operations dashboard
//! uses to talk to its management endpoint:
//!
//! - `rpc` - multiplexing JSON-RPC client with automatic reconnection
//! - `config` - client settings (defaults, JSON file, environment)
//! - `service` - `ApiService`, the shared handle application code calls through
//!
//! # Usage
//!
//! ```ignore
//! use cluster_rpc::{ApiService, ClientConfig};
//!
//! let config = ClientConfig::new("ws://127.0.0.1:4701/api/webrpc/v0")
//!     .with_method_prefix("CurioWeb.");
//! let api = ApiService::from_config(config)?;
//! api.connect().await?;
//! let version = api.version().await?;
//! ```

pub mod config;
pub mod rpc;
pub mod service;

pub use config::ClientConfig;
pub use rpc::{ClientError, ClientEvent, ConnectionState, EventKind, JsonRpcClient};
pub use service::ApiService;
