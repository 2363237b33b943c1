//! RESP wire codec.
//!
//! Requests arrive as arrays of bulk strings (`*2\r\n$3\r\nGET\r\n...`);
//! bare text lines are accepted as inline commands for telnet-style use.
//! Replies cover the forms the command set needs: simple strings, errors,
//! integers, bulk strings, null, and arrays of bulk strings.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// One decoded request: the command name followed by its arguments.
pub type Request = Vec<Vec<u8>>;

/// Reads the next request frame. Returns `Ok(None)` on a clean end of
/// stream; malformed frames fail with [`Error::CorruptRecord`] and the
/// connection is dropped.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>>
where
    R: AsyncBufRead + Unpin,
{
    let line = match read_line(reader).await? {
        Some(line) => line,
        None => return Ok(None),
    };

    if let Some(rest) = line.strip_prefix(b"*" as &[u8]) {
        let count = parse_decimal(rest)?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(read_bulk(reader).await?);
        }
        return Ok(Some(args));
    }

    // Inline command: whitespace-separated words on one line.
    let text = String::from_utf8_lossy(&line);
    Ok(Some(
        text.split_whitespace()
            .map(|word| word.as_bytes().to_vec())
            .collect(),
    ))
}

async fn read_line<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(line))
}

async fn read_bulk<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader)
        .await?
        .ok_or_else(|| Error::CorruptRecord("stream ended inside a frame".to_string()))?;
    let rest = line
        .strip_prefix(b"$" as &[u8])
        .ok_or_else(|| Error::CorruptRecord("expected a bulk string header".to_string()))?;
    let len = parse_decimal(rest)?;

    let mut buf = vec![0u8; len + 2];
    reader.read_exact(&mut buf).await?;
    if &buf[len..] != b"\r\n" {
        return Err(Error::CorruptRecord(
            "bulk string is missing its terminator".to_string(),
        ));
    }
    buf.truncate(len);
    Ok(buf)
}

fn parse_decimal(bytes: &[u8]) -> Result<usize> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| Error::CorruptRecord("malformed frame length".to_string()))
}

/// A reply to send back to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(&'static str),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Null,
    Array(Vec<Vec<u8>>),
}

impl Reply {
    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        writer.write_all(&buf).await?;
        writer.flush().await
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Simple(text) => {
                buf.extend_from_slice(format!("+{text}\r\n").as_bytes());
            }
            Reply::Error(msg) => {
                buf.extend_from_slice(format!("-{msg}\r\n").as_bytes());
            }
            Reply::Integer(n) => {
                buf.extend_from_slice(format!(":{n}\r\n").as_bytes());
            }
            Reply::Bulk(bytes) => {
                buf.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
                buf.extend_from_slice(bytes);
                buf.extend_from_slice(b"\r\n");
            }
            Reply::Null => buf.extend_from_slice(b"$-1\r\n"),
            Reply::Array(items) => {
                buf.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    buf.extend_from_slice(format!("${}\r\n", item.len()).as_bytes());
                    buf.extend_from_slice(item);
                    buf.extend_from_slice(b"\r\n");
                }
            }
        }
    }
}
