//! Minimal JSONL client for driving channels in tests.

use std::net::SocketAddr;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Client holding one connection open across requests.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(address: SocketAddr) -> Self {
        let stream = TcpStream::connect(address).await.expect("connect to channel");
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    /// Sends a raw line (a newline is appended).
    pub async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write request");
    }

    /// Reads one response, or `None` once the server closed the connection.
    pub async fn read_response(&mut self) -> Option<Value> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).await.unwrap_or(0);
        if read == 0 {
            return None;
        }
        Some(serde_json::from_str(&line).expect("response is JSON"))
    }

    /// Sends a command and waits for its response.
    pub async fn request(&mut self, command: &str) -> Option<Value> {
        self.send_line(&format!(r#"{{"command":"{command}"}}"#)).await;
        self.read_response().await
    }
}
