//! Error types for request dispatch failures.

use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::events::OutcomeKind;
use crate::executor::CommandFailure;

/// Coarse failure class reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The request could not be decoded.
    Protocol,
    /// The executor rejected or failed the command.
    Command,
    /// The server could not complete the dispatch.
    Internal,
    /// The command stopped after cooperative cancellation.
    Cancelled,
}

/// Errors surfaced during request parsing and dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request line could not be parsed as valid JSON.
    #[error("malformed JSONL: {message}")]
    MalformedJsonl {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Request JSON does not match the request schema.
    #[error("invalid request structure: {message}")]
    InvalidStructure { message: String },

    /// Request exceeds the maximum allowed size.
    #[error("request too large: {size} bytes exceeds {max_size} byte limit")]
    RequestTooLarge { size: usize, max_size: usize },

    /// The executor reported a failure.
    #[error("{source}")]
    Command {
        command: String,
        #[source]
        source: CommandFailure,
    },

    /// The grace period elapsed before the command finished.
    #[error("command '{command}' was force-cancelled during shutdown")]
    ForceCancelled { command: String },

    /// The server is no longer admitting requests.
    #[error("companion is shutting down")]
    Unavailable,

    /// IO error during read or write.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Response serialization failed.
    #[error("failed to serialize response: {0}")]
    SerializeResponse(#[from] serde_json::Error),
}

impl DispatchError {
    /// Failure class reported to the client.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedJsonl { .. }
            | Self::InvalidStructure { .. }
            | Self::RequestTooLarge { .. } => ErrorCategory::Protocol,
            Self::Command {
                source: CommandFailure::Cancelled,
                ..
            } => ErrorCategory::Cancelled,
            Self::Command { .. } => ErrorCategory::Command,
            Self::ForceCancelled { .. }
            | Self::Unavailable
            | Self::Io(_)
            | Self::SerializeResponse(_) => ErrorCategory::Internal,
        }
    }

    /// Outcome recorded in the dispatch event.
    #[must_use]
    pub const fn outcome(&self) -> OutcomeKind {
        match self.category() {
            ErrorCategory::Protocol => OutcomeKind::ProtocolError,
            ErrorCategory::Command => OutcomeKind::CommandError,
            ErrorCategory::Internal => OutcomeKind::InternalError,
            ErrorCategory::Cancelled => OutcomeKind::Cancelled,
        }
    }

    /// Whether the connection must close after reporting this error.
    #[must_use]
    pub const fn closes_connection(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Protocol | ErrorCategory::Internal
        )
    }

    /// Creates a malformed JSONL error from a serde error.
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::MalformedJsonl {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a malformed JSONL error with a custom message.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedJsonl {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Creates a request too large error.
    #[must_use]
    pub const fn request_too_large(size: usize, max_size: usize) -> Self {
        Self::RequestTooLarge { size, max_size }
    }

    /// Wraps an executor failure.
    pub fn command(command: impl Into<String>, source: CommandFailure) -> Self {
        Self::Command {
            command: command.into(),
            source,
        }
    }

    /// Creates a force-cancellation error.
    pub fn force_cancelled(command: impl Into<String>) -> Self {
        Self::ForceCancelled {
            command: command.into(),
        }
    }
}
