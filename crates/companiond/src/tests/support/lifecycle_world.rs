//! World shared by the lifecycle scenarios.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use rstest::fixture;
use serde_json::Value;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use companion_config::{DEBUGSERVER_CHANNEL, GRPC_CHANNEL};

use crate::events::ServerEvent;
use crate::ports::PortSet;
use crate::scratch::TemporaryDirectory;
use crate::server::{
    CompanionServer, ServerHandle, ServerOptions, ServerState, StartError, TerminationCause,
};

use super::{
    ControlledTarget, RecordingEventReporter, ScriptedExecutor, TestClient, WAIT_TIMEOUT,
    free_port, occupy_port,
};

/// Drives one companion server through a scenario.
pub struct LifecycleWorld {
    pub target: Arc<ControlledTarget>,
    pub executor: Arc<ScriptedExecutor>,
    pub reporter: Arc<RecordingEventReporter>,
    primary_port: Option<u16>,
    debug_port: Option<u16>,
    occupants: Vec<std::net::TcpListener>,
    grace_period: Duration,
    server: Option<CompanionServer>,
    pub start_results: Vec<Result<ServerHandle, StartError>>,
    clients: Vec<JoinHandle<Option<Value>>>,
    pub responses: Vec<Option<Value>>,
    pub cause: Option<TerminationCause>,
    runtime: Runtime,
}

impl LifecycleWorld {
    fn new() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("build runtime");
        Self {
            target: Arc::new(ControlledTarget::default()),
            executor: Arc::new(ScriptedExecutor::default()),
            reporter: Arc::new(RecordingEventReporter::default()),
            primary_port: None,
            debug_port: None,
            occupants: Vec::new(),
            grace_period: Duration::from_secs(5),
            server: None,
            start_results: Vec::new(),
            clients: Vec::new(),
            responses: Vec::new(),
            cause: None,
            runtime,
        }
    }

    pub fn use_free_primary_port(&mut self) {
        self.primary_port = Some(free_port());
    }

    pub fn use_free_debug_port(&mut self) {
        self.debug_port = Some(free_port());
    }

    pub fn occupy_primary_port(&mut self) {
        let (occupant, port) = occupy_port();
        self.occupants.push(occupant);
        self.primary_port = Some(port);
    }

    pub fn occupy_debug_port(&mut self) {
        let (occupant, port) = occupy_port();
        self.occupants.push(occupant);
        self.debug_port = Some(port);
    }

    pub fn set_grace_period(&mut self, grace_period: Duration) {
        self.grace_period = grace_period;
    }

    /// The server under test, built on first use.
    pub fn server(&mut self) -> CompanionServer {
        if let Some(server) = &self.server {
            return server.clone();
        }
        let mut ports = PortSet::builder().required(
            GRPC_CHANNEL,
            u32::from(self.primary_port.expect("primary port configured")),
        );
        if let Some(port) = self.debug_port {
            ports = ports.optional(DEBUGSERVER_CHANNEL, u32::from(port));
        }
        let server = CompanionServer::builder(self.target.clone())
            .ports(ports.build().expect("valid port set"))
            .executor(self.executor.clone())
            .reporter(self.reporter.clone())
            .temporary_directory(TemporaryDirectory::create().expect("scratch directory"))
            .options(ServerOptions::default().with_grace_period(self.grace_period))
            .build()
            .expect("server builds");
        self.server = Some(server.clone());
        server
    }

    pub fn start(&mut self, attempts: usize) {
        let server = self.server();
        let results = self.runtime.block_on(async move {
            let starts = (0..attempts).map(|_| server.start());
            futures::future::join_all(starts).await
        });
        self.start_results.extend(results);
    }

    pub fn primary_address(&self) -> std::net::SocketAddr {
        self.start_results
            .iter()
            .find_map(|result| result.as_ref().ok())
            .and_then(|handle| handle.address(GRPC_CHANNEL))
            .expect("primary channel bound")
    }

    /// Opens `count` connections, each sending one blocking command.
    pub fn send_blocking_requests(&mut self, count: usize) {
        let address = self.primary_address();
        for _ in 0..count {
            self.clients.push(self.runtime.spawn(async move {
                let mut client = TestClient::connect(address).await;
                client.request("block").await
            }));
        }
        let executor = Arc::clone(&self.executor);
        let started = self
            .runtime
            .block_on(super::wait_until(|| executor.started() >= count));
        assert!(started, "blocking requests never reached the executor");
    }

    pub fn ping(&mut self) -> Option<Value> {
        let address = self.primary_address();
        self.runtime.block_on(async move {
            let mut client = TestClient::connect(address).await;
            client.request("ping").await
        })
    }

    pub fn terminate(&mut self) {
        self.server().terminate();
    }

    /// Waits for the termination signal and collects pending responses.
    pub fn await_termination(&mut self) {
        let signal = self.server().termination_signal();
        let cause = self
            .runtime
            .block_on(async move { tokio::time::timeout(WAIT_TIMEOUT, signal.wait()).await })
            .expect("termination signal fired in time");
        self.cause = Some(cause);
        let clients = std::mem::take(&mut self.clients);
        for client in clients {
            let response = self
                .runtime
                .block_on(async move { tokio::time::timeout(WAIT_TIMEOUT, client).await })
                .expect("client finished in time")
                .expect("client task completed");
            self.responses.push(response);
        }
    }

    pub fn state(&mut self) -> ServerState {
        self.server().state()
    }

    /// Waits until the forwarder has delivered the final event.
    pub fn settled_events(&self) -> Vec<ServerEvent> {
        let reporter = Arc::clone(&self.reporter);
        self.runtime.block_on(super::wait_until(|| {
            reporter.count(|event| matches!(event, ServerEvent::Terminated { .. })) > 0
        }));
        self.reporter.events()
    }
}

#[fixture]
pub fn world() -> RefCell<LifecycleWorld> {
    RefCell::new(LifecycleWorld::new())
}
