//! Boundary between the dispatcher and the code that actually runs commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::dispatch::CommandRequest;
use crate::target::Target;

/// Failure reported by a [`CommandExecutor`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandFailure {
    /// The executor does not know the command.
    #[error("unsupported command: {command}")]
    Unsupported { command: String },
    /// The command's arguments were rejected.
    #[error("invalid arguments for '{command}': {message}")]
    InvalidArguments { command: String, message: String },
    /// The target refused or failed the operation.
    #[error("target error: {message}")]
    Target { message: String },
    /// The command observed cooperative cancellation and stopped.
    #[error("command cancelled")]
    Cancelled,
}

impl CommandFailure {
    /// Builds an [`CommandFailure::InvalidArguments`] failure.
    #[must_use]
    pub fn invalid_arguments(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            command: command.into(),
            message: message.into(),
        }
    }
}

/// Context handed to an executor for one request.
#[derive(Clone)]
pub struct Invocation {
    target: Arc<dyn Target>,
    scratch: PathBuf,
    cancellation: CancellationToken,
}

impl Invocation {
    pub(crate) fn new(
        target: Arc<dyn Target>,
        scratch: PathBuf,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            target,
            scratch,
            cancellation,
        }
    }

    /// Attached target.
    #[must_use]
    pub fn target(&self) -> &dyn Target {
        self.target.as_ref()
    }

    /// Scratch directory owned by the server.
    #[must_use]
    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    /// Fires when the server starts draining.
    ///
    /// Executors should stop at the next safe point and return
    /// [`CommandFailure::Cancelled`]. Executors that ignore it are dropped
    /// once the grace period elapses.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// Runs validated commands against the target.
#[async_trait]
pub trait CommandExecutor: Send + Sync + 'static {
    /// Executes one request and returns its JSON payload.
    async fn execute(
        &self,
        request: CommandRequest,
        invocation: Invocation,
    ) -> Result<Value, CommandFailure>;
}
