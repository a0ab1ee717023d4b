//! JSON-RPC connection manager for the cluster management endpoint.
//!
//! One [`JsonRpcClient`] holds one persistent transport, multiplexes any
//! number of concurrent calls over it, and reconnects on unexpected loss.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   call()   ┌───────────────┐   frames   ┌──────────────────┐
//! │  ApiService  │ ─────────► │ JsonRpcClient │ ◄────────► │ cluster endpoint │
//! │  (consumers) │ ◄───────── │ pending table │  ws / unix │  (JSON-RPC 2.0)  │
//! └──────────────┘  on(event) └───────────────┘            └──────────────────┘
//! ```
//!
//! # Protocol
//!
//! Requests carry positional parameters and a numeric correlation id:
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"CurioWeb.Version","params":[]}
//! {"jsonrpc":"2.0","id":1,"result":"2.1.0"}
//! ```
//!
//! Over WebSocket each message is one text frame. Over Unix sockets messages
//! use Content-Length framing (see [`framing`]).

mod client;
mod error;
mod events;
pub mod framing;
mod pending;
mod protocol;
mod transport;

pub use client::{ConnectionState, JsonRpcClient};
pub use error::{ClientError, TransportError};
pub use events::{ClientEvent, EventKind, ListenerId};
pub use pending::PendingInfo;
pub use protocol::{Inbound, JsonRpcError, JsonRpcRequest};
pub use transport::{
    connect_unix, connect_websocket, Connector, DefaultConnector, Endpoint, FrameSink,
    FrameStream, FramedTransport,
};
