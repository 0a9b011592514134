//! Executor double with commands that block until the test releases them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::dispatch::CommandRequest;
use crate::executor::{CommandExecutor, CommandFailure, Invocation};

const FLOOD_BYTES: usize = 32 * 1024 * 1024;

/// Scripted command set:
///
/// - `ping` answers `{"pong": true}`;
/// - `fail` reports a target failure;
/// - `flood` answers with a payload far larger than socket buffers;
/// - `block` waits for [`ScriptedExecutor::release`], returning early on
///   cooperative cancellation unless the executor is stubborn.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    started: AtomicUsize,
    stubborn: AtomicBool,
    release: CancellationToken,
}

impl ScriptedExecutor {
    /// Makes `block` ignore cooperative cancellation.
    pub fn ignore_cancellation(&self) {
        self.stubborn.store(true, Ordering::SeqCst);
    }

    /// Lets every blocked command finish.
    pub fn release(&self) {
        self.release.cancel();
    }

    /// Number of `block` commands that have started.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        request: CommandRequest,
        invocation: Invocation,
    ) -> Result<Value, CommandFailure> {
        match request.command() {
            "ping" => Ok(json!({ "pong": true })),
            "flood" => Ok(Value::String("x".repeat(FLOOD_BYTES))),
            "fail" => Err(CommandFailure::Target {
                message: "scripted failure".to_owned(),
            }),
            "block" => {
                self.started.fetch_add(1, Ordering::SeqCst);
                if self.stubborn.load(Ordering::SeqCst) {
                    self.release.cancelled().await;
                    return Ok(json!({ "released": true }));
                }
                tokio::select! {
                    () = invocation.cancellation().cancelled() => Err(CommandFailure::Cancelled),
                    () = self.release.cancelled() => Ok(json!({ "released": true })),
                }
            }
            other => Err(CommandFailure::Unsupported {
                command: other.to_owned(),
            }),
        }
    }
}
