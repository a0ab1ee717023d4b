//! Content-Length message framing for JSON-RPC over byte streams.
//!
//! Used by the Unix socket transport to carve a stream into messages, in the
//! same layout the Language Server Protocol uses:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! Header names are case-insensitive and both CRLF and LF line endings are
//! accepted.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::rpc::error::TransportError;

/// Maximum message size (100MB) to prevent OOM from malicious/buggy servers.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Read one framed message.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between
/// messages. A body that is not UTF-8 is reported as
/// [`TransportError::Malformed`]; the stream stays aligned on the next frame.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<String>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            if saw_header {
                return Err(TransportError::Closed(
                    "Connection closed inside message headers".into(),
                ));
            }
            return Ok(None);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            if saw_header {
                break;
            }
            // Stray blank line between messages
            continue;
        }
        saw_header = true;

        if let Some((key, value)) = trimmed.split_once(':') {
            if key.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(value.parse().map_err(|_| {
                    TransportError::Closed(format!("Invalid Content-Length value: {}", value))
                })?);
            }
        }
    }

    let size = content_length
        .ok_or_else(|| TransportError::Closed("Missing Content-Length header".into()))?;

    if size > MAX_MESSAGE_SIZE {
        return Err(TransportError::Closed(format!(
            "Message size {} exceeds maximum {} bytes",
            size, MAX_MESSAGE_SIZE
        )));
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;

    String::from_utf8(body)
        .map(Some)
        .map_err(|_| TransportError::Malformed("Message body is not valid UTF-8".into()))
}

/// Write one framed message and flush.
pub async fn write_message<W>(writer: &mut W, body: &str) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let body_bytes = body.as_bytes();
    let header = format!("Content-Length: {}\r\n\r\n", body_bytes.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(body_bytes).await?;
    writer.flush().await?;

    Ok(())
}
