//! DAP wire framing
//!
//! Each message is a block of `Name: value` header lines terminated by an
//! empty line, followed by exactly `Content-Length` bytes of JSON.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{Error, Result};

/// Upper bound on a single message body
const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

fn eof_as_crash(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::AdapterCrashed
    } else {
        Error::Io(e)
    }
}

/// Parse one header line. Returns `Ok(Some(len))` for Content-Length,
/// `Ok(None)` for headers we ignore.
fn parse_header_line(line: &str) -> Result<Option<usize>> {
    let Some((name, value)) = line.split_once(':') else {
        return Err(Error::DapProtocol(format!("Malformed header: {:?}", line)));
    };
    if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Ok(None);
    }
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| Error::DapProtocol(format!("Invalid Content-Length: {}", value.trim())))
}

/// Read one framed message body from the stream
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut content_length = None;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await.map_err(eof_as_crash)? == 0 {
            return Err(Error::AdapterCrashed);
        }
        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            break;
        }
        if let Some(len) = parse_header_line(header)? {
            content_length = Some(len);
        }
    }

    let len = content_length
        .ok_or_else(|| Error::DapProtocol("Missing Content-Length header".to_string()))?;
    if len > MAX_MESSAGE_BYTES {
        return Err(Error::DapProtocol(format!(
            "Content-Length too large: {} bytes",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(eof_as_crash)?;
    String::from_utf8(body).map_err(|e| Error::DapProtocol(format!("Invalid UTF-8: {}", e)))
}

/// Write one framed message body to the stream and flush it
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<()> {
    let mut frame = format!("{}: {}\r\n\r\n", CONTENT_LENGTH, json.len()).into_bytes();
    frame.extend_from_slice(json.as_bytes());
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
