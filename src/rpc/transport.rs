//! Message-oriented transports carrying JSON-RPC text frames.
//!
//! A transport is a pair of a frame sink and a frame stream. The client never
//! looks below that seam, so WebSocket, Unix socket, and in-memory test
//! transports are interchangeable behind [`Connector`].

use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;

use futures::future::{self, BoxFuture};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::rpc::error::{ClientError, TransportError};

/// Outgoing half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Incoming half of a transport. The stream ending means the peer closed.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An established transport.
pub struct FramedTransport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl FramedTransport {
    pub fn new<S, T>(sink: S, stream: T) -> Self
    where
        S: Sink<String, Error = TransportError> + Send + 'static,
        T: Stream<Item = Result<String, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Where the client connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `ws://` or `wss://` URL.
    WebSocket(Url),
    /// Path of a Unix domain socket speaking Content-Length framing.
    Unix(PathBuf),
}

impl Endpoint {
    /// Parse an endpoint string.
    ///
    /// `http://` and `https://` are rewritten to `ws://` and `wss://`, since
    /// dashboards usually store the HTTP address of the API.
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ClientError::Config {
                reason: "endpoint is empty".into(),
            });
        }

        let mut url = Url::parse(raw).map_err(|e| ClientError::Config {
            reason: format!("invalid endpoint '{}': {}", raw, e),
        })?;

        match url.scheme() {
            "ws" | "wss" => Ok(Endpoint::WebSocket(url)),
            "http" | "https" => {
                let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
                url.set_scheme(scheme).map_err(|_| ClientError::Config {
                    reason: format!("cannot use '{}' as a WebSocket endpoint", raw),
                })?;
                Ok(Endpoint::WebSocket(url))
            }
            "unix" => {
                let path = url.path();
                if path.is_empty() || path == "/" {
                    return Err(ClientError::Config {
                        reason: format!("unix endpoint '{}' has no socket path", raw),
                    });
                }
                Ok(Endpoint::Unix(PathBuf::from(path)))
            }
            other => Err(ClientError::Config {
                reason: format!("unsupported endpoint scheme '{}'", other),
            }),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::WebSocket(url) => write!(f, "{}", url),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Opens transports to an endpoint.
///
/// Implementations must be cheap to call repeatedly; the client calls
/// `connect` once per connection and once per reconnect attempt.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, endpoint: &Endpoint)
        -> BoxFuture<'static, Result<FramedTransport, TransportError>>;
}

/// Connector for the built-in WebSocket and Unix socket transports.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

impl Connector for DefaultConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> BoxFuture<'static, Result<FramedTransport, TransportError>> {
        match endpoint.clone() {
            Endpoint::WebSocket(url) => Box::pin(connect_websocket(url)),
            Endpoint::Unix(path) => Box::pin(connect_unix(path)),
        }
    }
}

/// Open a WebSocket and expose it as text frames.
///
/// Binary frames are accepted when they hold UTF-8; ping/pong and close
/// frames are handled by tungstenite and skipped here.
pub async fn connect_websocket(url: Url) -> Result<FramedTransport, TransportError> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    let (sink, stream) = ws_stream.split();

    let sink = sink
        .sink_map_err(|e| TransportError::Closed(e.to_string()))
        .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text))));

    let stream = stream.filter_map(|message| {
        future::ready(match message {
            Ok(Message::Text(text)) => Some(Ok(text)),
            Ok(Message::Binary(bytes)) => Some(String::from_utf8(bytes).map_err(|_| {
                TransportError::Malformed("binary frame is not valid UTF-8".into())
            })),
            Ok(_) => None,
            Err(e) => Some(Err(TransportError::Closed(e.to_string()))),
        })
    });

    Ok(FramedTransport::new(sink, stream))
}

/// Connect to a Unix domain socket using Content-Length framing.
#[cfg(unix)]
pub async fn connect_unix(path: PathBuf) -> Result<FramedTransport, TransportError> {
    use tokio::io::BufReader;
    use tokio::net::UnixStream;

    use crate::rpc::framing::{read_message, write_message};

    let stream = UnixStream::connect(&path).await.map_err(|e| {
        TransportError::Connect(format!("{}: {}", path.display(), e))
    })?;
    let (read_half, write_half) = stream.into_split();

    let frames = futures::stream::unfold(
        Some(BufReader::new(read_half)),
        |reader| async move {
            let mut reader = reader?;
            match read_message(&mut reader).await {
                Ok(Some(body)) => Some((Ok(body), Some(reader))),
                Ok(None) => None,
                Err(e) if e.is_recoverable() => Some((Err(e), Some(reader))),
                // Fatal error: yield it, then end the stream
                Err(e) => Some((Err(e), None)),
            }
        },
    );

    let sink = futures::sink::unfold(write_half, |mut writer, body: String| async move {
        write_message(&mut writer, &body).await?;
        Ok::<_, TransportError>(writer)
    });

    Ok(FramedTransport::new(sink, frames))
}

#[cfg(not(unix))]
pub async fn connect_unix(path: PathBuf) -> Result<FramedTransport, TransportError> {
    Err(TransportError::Connect(format!(
        "unix sockets are not supported on this platform: {}",
        path.display()
    )))
}
