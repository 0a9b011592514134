//! Response serialization helpers for the dispatch loop.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::errors::{DispatchError, ErrorCategory};

/// Response line sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseMessage {
    /// Command completed.
    Result {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        payload: Value,
    },
    /// Command failed.
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        category: ErrorCategory,
        message: String,
    },
}

impl ResponseMessage {
    /// Builds an error line from a dispatch error.
    #[must_use]
    pub fn from_error(id: Option<u64>, error: &DispatchError) -> Self {
        Self::Error {
            id,
            category: error.category(),
            message: error.to_string(),
        }
    }
}

/// Writer that serializes responses as JSONL lines and flushes each one.
pub struct ResponseWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> ResponseWriter<W> {
    /// Creates a new response writer wrapping the given output stream.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a message as a JSONL line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub async fn write_message(&mut self, message: &ResponseMessage) -> Result<(), DispatchError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Writes a result line.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub async fn write_result(&mut self, id: Option<u64>, payload: Value) -> Result<(), DispatchError> {
        self.write_message(&ResponseMessage::Result { id, payload })
            .await
    }

    /// Writes an error line.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub async fn write_error(
        &mut self,
        id: Option<u64>,
        error: &DispatchError,
    ) -> Result<(), DispatchError> {
        self.write_message(&ResponseMessage::from_error(id, error))
            .await
    }
}
