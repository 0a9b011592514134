//! Request deserialization for the dispatch loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::DispatchError;

/// Parsed command request from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Client-chosen correlation id echoed in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Command name.
    pub command: String,
    /// Command arguments, forwarded verbatim to the executor.
    #[serde(default)]
    pub arguments: Value,
}

impl CommandRequest {
    /// Builds a request without arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: None,
            command: command.into(),
            arguments: Value::Null,
        }
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the arguments.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    /// Parses a JSONL line into a command request.
    ///
    /// Trailing whitespace (including the newline delimiter) is trimmed before
    /// parsing.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::MalformedJsonl` if the line is empty or cannot
    /// be parsed as a request.
    pub fn parse(line: &[u8]) -> Result<Self, DispatchError> {
        let trimmed = line.trim_ascii_end();
        if trimmed.is_empty() {
            return Err(DispatchError::malformed("empty request line"));
        }

        serde_json::from_slice(trimmed).map_err(DispatchError::from_json_error)
    }

    /// Validates that the command name is present.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidStructure` if the command is blank.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.command.trim().is_empty() {
            return Err(DispatchError::invalid_structure("command field is empty"));
        }
        Ok(())
    }

    /// Returns the normalised command name (trimmed).
    #[must_use]
    pub fn command(&self) -> &str {
        self.command.trim()
    }
}
