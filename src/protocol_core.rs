//! Shared framing logic for the session handlers and the client
//!
//! Text messages are newline-terminated lines; file bodies travel as chunk
//! frames: LENGTH (4, big-endian) | PAYLOAD, ended by a zero-length frame.

use crate::error::{SessionError, SessionResult};
use crate::protocol::{KEY_SEPARATOR, MAX_FRAME_SIZE, MAX_LINE};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Zero-length frame marking the end of a file stream
pub const END_FRAME: [u8; 4] = [0u8; 4];

/// Build chunk header (4 bytes, big-endian payload length)
pub fn build_chunk_header(payload_len: u32) -> [u8; 4] {
    payload_len.to_be_bytes()
}

/// Parse chunk header, returns payload length (0 = end of stream)
pub fn parse_chunk_header(header: &[u8; 4]) -> usize {
    u32::from_be_bytes(*header) as usize
}

/// Validate chunk payload size against protocol::MAX_FRAME_SIZE
pub fn validate_frame_size(size: usize) -> SessionResult<()> {
    if size > MAX_FRAME_SIZE {
        return Err(SessionError::framing(format!(
            "frame payload too large: {} bytes (max: {})",
            size, MAX_FRAME_SIZE
        )));
    }
    Ok(())
}

/// Check a display or owner name before it becomes part of an on-disk path.
/// Rejects empty names, path separators, NUL and the `.`/`..` components,
/// plus ':' on Windows (ADS defense).
pub fn validate_name(name: &str) -> SessionResult<()> {
    if name.is_empty() {
        return Err(SessionError::protocol("empty name"));
    }
    if name == "." || name == ".." {
        return Err(SessionError::protocol(format!("reserved name {:?}", name)));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(SessionError::protocol(format!(
            "name {:?} contains a path separator or NUL",
            name
        )));
    }
    #[cfg(windows)]
    if name.contains(':') {
        return Err(SessionError::protocol(format!(
            "name {:?} contains a colon (potential ADS attack)",
            name
        )));
    }
    Ok(())
}

/// On-disk filename of `display_name` uploaded by `owner`
pub fn storage_key(owner: &str, display_name: &str) -> String {
    format!("{}{}{}", owner, KEY_SEPARATOR, display_name)
}

/// Split a download request `"<displayName>,<owner>"` on the first comma.
pub fn parse_download_request(line: &str) -> SessionResult<(&str, &str)> {
    if line.is_empty() {
        return Err(SessionError::protocol("empty download request"));
    }
    let (name, owner) = line
        .split_once(',')
        .ok_or_else(|| SessionError::protocol("download request missing ','"))?;
    Ok((name, owner))
}

/// Run an I/O step under a deadline. `None` waits forever.
pub async fn with_deadline<T, F>(limit: Option<Duration>, fut: F) -> SessionResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(d) => match timeout(d, fut).await {
            Ok(res) => res.map_err(SessionError::from),
            Err(_) => Err(SessionError::Timeout(d)),
        },
        None => fut.await.map_err(SessionError::from),
    }
}

/// Read one newline-terminated text line, trimmed.
/// Returns `None` when the peer closed the connection before sending anything.
/// A line that is not UTF-8 is consumed and reported as a protocol error.
pub async fn read_line<R>(reader: &mut R, limit: Option<Duration>) -> SessionResult<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(64);
    let n = with_deadline(limit, async {
        let mut capped = (&mut *reader).take(MAX_LINE as u64 + 1);
        capped.read_until(b'\n', &mut buf).await
    })
    .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.len() > MAX_LINE && !buf.ends_with(b"\n") {
        return Err(SessionError::framing(format!(
            "line exceeds {} bytes",
            MAX_LINE
        )));
    }
    let text = String::from_utf8(buf)
        .map_err(|_| SessionError::protocol("line is not valid UTF-8"))?;
    Ok(Some(text.trim().to_string()))
}

/// Read the next chunk header. `Ok(0)` is the end-of-stream marker.
pub async fn read_chunk_len<R>(reader: &mut R, limit: Option<Duration>) -> SessionResult<usize>
where
    R: AsyncRead + Unpin,
{
    let mut hdr = [0u8; 4];
    with_deadline(limit, reader.read_exact(&mut hdr)).await?;
    let len = parse_chunk_header(&hdr);
    validate_frame_size(len)?;
    Ok(len)
}

/// Read exactly `len` payload bytes, looping on partial reads.
pub async fn read_chunk<R>(reader: &mut R, len: usize, limit: Option<Duration>) -> SessionResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut payload = vec![0u8; len];
    if len > 0 {
        with_deadline(limit, reader.read_exact(&mut payload)).await?;
    }
    Ok(payload)
}

/// Write one chunk frame (header + payload).
pub async fn write_chunk<W>(writer: &mut W, payload: &[u8], limit: Option<Duration>) -> SessionResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| SessionError::protocol("chunk larger than 4GB"))?;
    let hdr = build_chunk_header(len);
    with_deadline(limit, async {
        writer.write_all(&hdr).await?;
        if !payload.is_empty() {
            writer.write_all(payload).await?;
        }
        Ok::<(), std::io::Error>(())
    })
    .await
}

/// Write the zero-length end-of-stream frame.
pub async fn write_end<W>(writer: &mut W, limit: Option<Duration>) -> SessionResult<()>
where
    W: AsyncWrite + Unpin,
{
    with_deadline(limit, writer.write_all(&END_FRAME)).await
}

/// Write a text message as-is and flush.
pub async fn write_text<W>(writer: &mut W, text: &str, limit: Option<Duration>) -> SessionResult<()>
where
    W: AsyncWrite + Unpin,
{
    with_deadline(limit, async {
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await
    })
    .await
}
