//! Host target and the built-in command set served by the daemon binary.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::dispatch::CommandRequest;
use crate::executor::{CommandExecutor, CommandFailure, Invocation};
use crate::target::{Target, TargetDescription, TargetKind, TargetLoss};

/// Target representing the machine the daemon runs on. Never lost.
#[derive(Debug, Clone)]
pub struct HostTarget {
    udid: String,
    name: String,
}

impl HostTarget {
    /// Builds a host target with the given udid.
    pub fn new(udid: impl Into<String>) -> Self {
        let name = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned());
        Self {
            udid: udid.into(),
            name,
        }
    }
}

#[async_trait]
impl Target for HostTarget {
    fn udid(&self) -> &str {
        &self.udid
    }

    fn description(&self) -> TargetDescription {
        TargetDescription {
            udid: self.udid.clone(),
            name: self.name.clone(),
            kind: TargetKind::Host,
            os_version: Some(std::env::consts::OS.to_owned()),
        }
    }

    async fn lost(&self) -> TargetLoss {
        std::future::pending().await
    }
}

#[derive(Debug, Deserialize)]
struct SleepArguments {
    millis: u64,
}

/// Executor for the commands every companion understands.
///
/// | command    | payload                         |
/// |------------|---------------------------------|
/// | `ping`     | `{"pong": true}`                |
/// | `describe` | the target description          |
/// | `sleep`    | `{"slept_ms": N}` after N ms    |
/// | `scratch`  | `{"path": "<scratch dir>"}`     |
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinExecutor;

impl BuiltinExecutor {
    /// Builds the executor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for BuiltinExecutor {
    async fn execute(
        &self,
        request: CommandRequest,
        invocation: Invocation,
    ) -> Result<Value, CommandFailure> {
        let command = request.command().to_owned();
        match command.as_str() {
            "ping" => Ok(json!({ "pong": true })),
            "describe" => serde_json::to_value(invocation.target().description()).map_err(|error| {
                CommandFailure::Target {
                    message: error.to_string(),
                }
            }),
            "sleep" => {
                let arguments: SleepArguments = serde_json::from_value(request.arguments)
                    .map_err(|error| CommandFailure::invalid_arguments("sleep", error.to_string()))?;
                tokio::select! {
                    biased;
                    () = invocation.cancellation().cancelled() => Err(CommandFailure::Cancelled),
                    () = tokio::time::sleep(Duration::from_millis(arguments.millis)) => {
                        Ok(json!({ "slept_ms": arguments.millis }))
                    }
                }
            }
            "scratch" => Ok(json!({ "path": invocation.scratch().display().to_string() })),
            other => Err(CommandFailure::Unsupported {
                command: other.to_owned(),
            }),
        }
    }
}
