//! Test harness utilities shared by the companion suites.

mod client;
mod executor;
mod reporter;
mod target;
mod lifecycle_world;

use std::sync::Arc;
use std::time::Duration;

use companion_config::GRPC_CHANNEL;

use crate::ports::PortSet;
use crate::scratch::TemporaryDirectory;
use crate::server::{CompanionServer, ServerOptions, TerminationCause};

pub use client::TestClient;
pub use executor::ScriptedExecutor;
pub use reporter::RecordingEventReporter;
pub use target::ControlledTarget;
pub use lifecycle_world::{LifecycleWorld, world};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Reserves a port that is free at the time of the call.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("reserve free port")
}

/// Holds a port open so binding it fails.
pub fn occupy_port() -> (std::net::TcpListener, u16) {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("occupy port");
    let port = listener.local_addr().expect("occupied address").port();
    (listener, port)
}

/// Polls `condition` until it holds or the wait times out.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    condition()
}

/// Builds an idle companion with a required primary channel on a free port.
pub fn build_companion(
    target: Arc<ControlledTarget>,
    executor: Arc<ScriptedExecutor>,
    reporter: Arc<RecordingEventReporter>,
) -> CompanionServer {
    build_companion_with(target, executor, reporter, ServerOptions::default())
}

/// Same as [`build_companion`] with explicit options.
pub fn build_companion_with(
    target: Arc<ControlledTarget>,
    executor: Arc<ScriptedExecutor>,
    reporter: Arc<RecordingEventReporter>,
    options: ServerOptions,
) -> CompanionServer {
    let ports = PortSet::builder()
        .required(GRPC_CHANNEL, u32::from(free_port()))
        .build()
        .expect("valid port set");
    CompanionServer::builder(target)
        .ports(ports)
        .executor(executor)
        .reporter(reporter)
        .temporary_directory(TemporaryDirectory::create().expect("scratch directory"))
        .options(options)
        .build()
        .expect("server builds")
}

/// Requests termination and waits for the signal.
pub async fn shut_down(server: &CompanionServer) -> TerminationCause {
    server.terminate();
    tokio::time::timeout(WAIT_TIMEOUT, server.termination_signal().wait())
        .await
        .expect("termination signal fired in time")
}
