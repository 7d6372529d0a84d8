//! Content-Length message framing for JSON-RPC over Unix sockets.
//!
//! Each message carries an HTTP-style header block, the same way LSP frames
//! messages on a byte stream:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! Header names are matched case-insensitively, and both CRLF and LF line
//! endings are accepted. Unknown headers are skipped.

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest body accepted from a service (1 MiB). Braille payloads are tiny.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Longest header line accepted, terminator included.
const MAX_HEADER_LINE: usize = 8 * 1024;

/// Read one framed message.
///
/// Returns `Ok(None)` on a clean end of stream before any header byte, so the
/// caller can tell an orderly close from a truncated frame.
///
/// # Errors
///
/// - the stream ends in the middle of a frame
/// - a header line is longer than 8 KiB
/// - no Content-Length header is present
/// - the declared length exceeds [`MAX_MESSAGE_SIZE`]
/// - the body is not valid UTF-8
pub async fn read_message<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let bytes_read = (&mut *reader)
            .take(MAX_HEADER_LINE as u64)
            .read_line(&mut line)
            .await
            .context("Failed to read header line")?;
        if bytes_read == MAX_HEADER_LINE && !line.ends_with('\n') {
            return Err(anyhow!(
                "Header line exceeds maximum {} bytes",
                MAX_HEADER_LINE
            ));
        }

        if bytes_read == 0 {
            if saw_header {
                return Err(anyhow!("Connection closed in the middle of a header"));
            }
            return Ok(None);
        }
        saw_header = true;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }

        if let Some((key, value)) = trimmed.split_once(':') {
            if key.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid Content-Length value: {}", value))?,
                );
            }
        }
    }

    let size = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;
    if size > MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "Message size {} exceeds maximum {} bytes",
            size,
            MAX_MESSAGE_SIZE
        ));
    }

    let mut body = vec![0u8; size];
    reader
        .read_exact(&mut body)
        .await
        .context("Failed to read message body")?;

    String::from_utf8(body)
        .map(Some)
        .context("Message body is not valid UTF-8")
}

/// Write one framed message and flush.
pub async fn write_message<W>(writer: &mut W, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    writer
        .write_all(header.as_bytes())
        .await
        .context("Failed to write message header")?;
    writer
        .write_all(body.as_bytes())
        .await
        .context("Failed to write message body")?;
    writer.flush().await.context("Failed to flush message")?;

    Ok(())
}
