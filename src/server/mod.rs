//! Redis-style TCP front-end.
//!
//! One tokio task per connection: read a RESP request, run it against the
//! store, write the reply. The engine bounds its own concurrency with its
//! reader-writer lock, so connection tasks call it directly.

pub mod commands;
pub mod resp;

use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;
use crate::store::Store;
use resp::Reply;

/// Serves the operation surface of a store over RESP.
pub struct Server {
    addr: String,
    store: Arc<dyn Store>,
}

impl Server {
    pub fn new(addr: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self {
            addr: addr.into(),
            store,
        }
    }

    /// Accept loop; runs until the listener fails or the task is dropped.
    pub async fn serve(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        tracing::info!(addr = %self.addr, "listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!(%peer, "client connected");
            let store = Arc::clone(&self.store);
            tokio::spawn(async move {
                handle_connection(stream, store).await;
                tracing::debug!(%peer, "client disconnected");
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, store: Arc<dyn Store>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        match resp::read_request(&mut reader).await {
            Ok(Some(request)) if request.is_empty() => continue,
            Ok(Some(request)) => {
                let (reply, close) = commands::dispatch(&request, &store);
                if reply.write_to(&mut write_half).await.is_err() {
                    break;
                }
                if close {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "dropping connection on protocol error");
                let reply = Reply::Error(format!("ERR protocol error: {e}"));
                let _ = reply.write_to(&mut write_half).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::lsht::LshtStore;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start_server(dir: &TempDir) -> String {
        let store: Arc<dyn Store> = Arc::new(LshtStore::open(Config::new(dir.path())).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let store = Arc::clone(&store);
                tokio::spawn(handle_connection(stream, store));
            }
        });

        addr
    }

    async fn roundtrip(stream: &mut TcpStream, request: &[u8], expected: &[u8]) {
        stream.write_all(request).await.unwrap();
        let mut buf = vec![0u8; expected.len()];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_end_to_end_session() {
        let dir = TempDir::new().unwrap();
        let addr = start_server(&dir).await;
        let mut stream = TcpStream::connect(&addr).await.unwrap();

        roundtrip(&mut stream, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
        roundtrip(
            &mut stream,
            b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n",
            b"+OK\r\n",
        )
        .await;
        roundtrip(
            &mut stream,
            b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n",
            b"$3\r\nbar\r\n",
        )
        .await;
        roundtrip(&mut stream, b"*2\r\n$3\r\nDEL\r\n$3\r\nfoo\r\n", b":1\r\n").await;
        roundtrip(&mut stream, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n", b"$-1\r\n").await;

        // QUIT acknowledges and closes.
        roundtrip(&mut stream, b"*1\r\n$4\r\nQUIT\r\n", b"+OK\r\n").await;
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_inline_commands() {
        let dir = TempDir::new().unwrap();
        let addr = start_server(&dir).await;
        let mut stream = TcpStream::connect(&addr).await.unwrap();

        roundtrip(&mut stream, b"SET greeting hello\r\n", b"+OK\r\n").await;
        roundtrip(&mut stream, b"GET greeting\r\n", b"$5\r\nhello\r\n").await;
        roundtrip(&mut stream, b"EXISTS greeting\r\n", b":1\r\n").await;
    }
}
