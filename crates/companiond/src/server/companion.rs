//! The companion server: bring-up, supervision, drain and teardown.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::builtin::BuiltinExecutor;
use crate::dispatch::CommandDispatcher;
use crate::events::{EventReporter, EventSink, ServerEvent};
use crate::executor::CommandExecutor;
use crate::ports::{ChannelName, ConfigurationError, PortSet, required_names};
use crate::scratch::TemporaryDirectory;
use crate::target::Target;
use crate::transport::{ConnectionHandler, ListenerGroup};

use super::cell::LifecycleCell;
use super::state::TerminationRequest;
use super::{
    ChannelSnapshot, LIFECYCLE_TARGET, ServerOptions, ServerSnapshot, ServerState, StartError,
    TerminationCause, TerminationSignal,
};

/// Upper bound on delivering buffered events at termination.
const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Time force-cancelled dispatches get to unwind before they are abandoned.
const FORCE_CANCEL_TIMEOUT: Duration = Duration::from_secs(1);

type StartOutcome = Result<BTreeMap<ChannelName, SocketAddr>, StartError>;

/// Result of a successful start.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    addresses: BTreeMap<ChannelName, SocketAddr>,
    signal: TerminationSignal,
}

impl ServerHandle {
    /// Address a channel listens on.
    #[must_use]
    pub fn address(&self, channel: &str) -> Option<SocketAddr> {
        self.addresses.get(&ChannelName::new(channel)).copied()
    }

    /// Every bound channel.
    #[must_use]
    pub const fn addresses(&self) -> &BTreeMap<ChannelName, SocketAddr> {
        &self.addresses
    }

    /// Termination signal of the started server.
    #[must_use]
    pub fn termination_signal(&self) -> TerminationSignal {
        self.signal.clone()
    }
}

/// Companion server attached to one target.
///
/// Cloning yields another handle on the same server.
#[derive(Clone)]
pub struct CompanionServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    target: Arc<dyn Target>,
    ports: PortSet,
    options: ServerOptions,
    executor: Arc<dyn CommandExecutor>,
    events: Arc<EventSink>,
    scratch: TemporaryDirectory,
    cell: Arc<LifecycleCell>,
    stop: CancellationToken,
    start_outcome: watch::Sender<Option<StartOutcome>>,
    span: Span,
}

impl CompanionServer {
    /// Starts building a server for `target`.
    pub fn builder(target: Arc<dyn Target>) -> CompanionServerBuilder {
        CompanionServerBuilder {
            target,
            ports: None,
            executor: None,
            reporter: None,
            scratch: None,
            options: ServerOptions::default(),
        }
    }

    /// Builds a server for `target` running the built-in command set.
    ///
    /// # Errors
    ///
    /// Construction cannot fail once the collaborators exist; the `Result`
    /// mirrors [`CompanionServerBuilder::build`].
    pub fn for_target(
        target: Arc<dyn Target>,
        scratch: TemporaryDirectory,
        ports: PortSet,
        reporter: Arc<dyn EventReporter>,
    ) -> Result<Self, ConfigurationError> {
        Self::builder(target)
            .ports(ports)
            .temporary_directory(scratch)
            .reporter(reporter)
            .build()
    }

    /// Binds every channel and begins serving.
    ///
    /// Idempotent: concurrent and repeated calls share one bring-up and
    /// observe the same outcome.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::MandatoryBind`] when a required channel cannot
    /// bind, and [`StartError::Terminated`] when the server was terminated
    /// before it started.
    pub async fn start(&self) -> Result<ServerHandle, StartError> {
        let mut outcome = self.inner.start_outcome.subscribe();
        let owner = self.inner.cell.lock().claim_start();
        if owner {
            let inner = Arc::clone(&self.inner);
            let span = inner.span.clone();
            tokio::spawn(inner.bring_up().instrument(span));
        }

        let published = match outcome.wait_for(Option::is_some).await {
            Ok(current) => (*current).clone(),
            Err(_) => None,
        };
        match published {
            Some(Ok(addresses)) => Ok(ServerHandle {
                addresses,
                signal: self.termination_signal(),
            }),
            Some(Err(error)) => Err(error),
            None => Err(StartError::Interrupted),
        }
    }

    /// Requests a normal shutdown. Safe to call any number of times.
    pub fn terminate(&self) {
        let _entered = self.inner.span.enter();
        let request = self
            .inner
            .cell
            .lock()
            .request_termination(TerminationCause::Normal);
        match request {
            TerminationRequest::Immediate => self.inner.terminate_idle(),
            TerminationRequest::Deferred => {
                debug!(target: LIFECYCLE_TARGET, "termination deferred until startup completes");
            }
            TerminationRequest::Signal => self.inner.stop.cancel(),
            TerminationRequest::AlreadyTerminating => {
                debug!(target: LIFECYCLE_TARGET, "termination already in progress");
            }
        }
    }

    /// Signal that fires once the server reaches `Terminated`.
    #[must_use]
    pub fn termination_signal(&self) -> TerminationSignal {
        TerminationSignal::new(self.inner.cell.termination())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.inner.cell.lock().state()
    }

    /// Serializable view of the server.
    #[must_use]
    pub fn snapshot(&self) -> ServerSnapshot {
        let lifecycle = self.inner.cell.lock();
        let channels = self
            .inner
            .ports
            .iter()
            .map(|(name, spec)| {
                (
                    name.to_string(),
                    ChannelSnapshot {
                        port: spec.port,
                        required: spec.required,
                        bound: lifecycle.bound(name),
                    },
                )
            })
            .collect();
        ServerSnapshot {
            udid: self.inner.target.udid().to_owned(),
            state: lifecycle.state(),
            channels,
            in_flight: lifecycle.pending_len(),
            termination: lifecycle.cause().cloned(),
        }
    }

    /// Configured ports.
    #[must_use]
    pub fn ports(&self) -> &PortSet {
        &self.inner.ports
    }

    /// Scratch directory handed to executors.
    #[must_use]
    pub fn scratch_path(&self) -> &Path {
        self.inner.scratch.path()
    }
}

impl ServerInner {
    async fn bring_up(self: Arc<Self>) {
        self.events.spawn_forwarder();
        self.events.emit(ServerEvent::StartRequested {
            udid: self.target.udid().to_owned(),
        });
        info!(
            target: LIFECYCLE_TARGET,
            channels = self.ports.len(),
            required = ?required_names(&self.ports),
            host = %self.options.bind_host,
            "binding channels"
        );

        let outcome = ListenerGroup::bind_all(
            &self.ports,
            &self.options.bind_host,
            self.options.bind_timeout,
        )
        .await;
        for listener in &outcome.listeners {
            self.events.emit(ServerEvent::ChannelBound {
                channel: listener.channel().clone(),
                address: listener.local_addr(),
            });
        }
        for failure in &outcome.failures {
            self.events.emit(ServerEvent::ChannelBindFailed {
                channel: failure.channel.clone(),
                port: failure.spec.port,
                required: failure.spec.required,
                message: failure.error.to_string(),
            });
        }

        if let Some(failure) = outcome.required_failure().cloned() {
            drop(outcome);
            let error = StartError::MandatoryBind {
                channel: failure.channel.clone(),
                source: Arc::clone(&failure.error),
            };
            error!(target: LIFECYCLE_TARGET, %error, "companion failed to start");
            self.events.emit(ServerEvent::StartFailed {
                message: error.to_string(),
            });
            self.cell.lock().fail_start(TerminationCause::BindFailure {
                channel: failure.channel,
                message: failure.error.to_string(),
            });
            self.finish_termination().await;
            self.start_outcome.send_replace(Some(Err(error)));
            return;
        }

        let dispatcher: Arc<dyn ConnectionHandler> = Arc::new(CommandDispatcher::new(
            Arc::clone(&self.executor),
            Arc::clone(&self.target),
            self.scratch.path().to_path_buf(),
            Arc::clone(&self.cell),
            Arc::clone(&self.events),
        ));
        let group = ListenerGroup::serve(outcome.listeners, &dispatcher);
        let addresses = group.addresses();
        let entered = self.cell.lock().enter_running(addresses.clone());
        let deferred = entered.unwrap_or_else(|violation| {
            error!(target: LIFECYCLE_TARGET, %violation, "lifecycle out of step during startup");
            self.cell
                .lock()
                .record_cause(TerminationCause::internal(violation.to_string()));
            true
        });
        self.events.emit(ServerEvent::Running {
            channels: addresses.keys().cloned().collect(),
        });
        self.start_outcome.send_replace(Some(Ok(addresses)));
        if deferred {
            self.stop.cancel();
        }

        self.supervise(group).await;
    }

    async fn supervise(&self, group: ListenerGroup) {
        let fault = group.fault();
        let trigger = tokio::select! {
            biased;
            () = self.stop.cancelled() => None,
            loss = self.target.lost() => Some(TerminationCause::TargetLost {
                reason: loss.reason().to_owned(),
            }),
            () = fault.cancelled() => Some(TerminationCause::internal(
                "a required channel stopped accepting connections",
            )),
        };
        if let Some(cause) = trigger {
            warn!(target: LIFECYCLE_TARGET, %cause, "companion terminating");
            self.cell.lock().record_cause(cause);
        }
        self.drain(group).await;
    }

    async fn drain(&self, group: ListenerGroup) {
        let began = self.cell.lock().begin_drain();
        let (cause, in_flight) = began.unwrap_or_else(|violation| {
            error!(target: LIFECYCLE_TARGET, %violation, "lifecycle out of step at drain");
            (TerminationCause::internal(violation.to_string()), 0)
        });
        info!(target: LIFECYCLE_TARGET, %cause, in_flight, "draining companion");
        self.events.emit(ServerEvent::DrainStarted { cause, in_flight });

        group.shutdown().await;
        self.cell.cancel_cooperatively();

        let mut pending = self.cell.in_flight();
        let grace = self.options.grace_period;
        if tokio::time::timeout(grace, pending.wait_for(|count| *count == 0))
            .await
            .is_err()
        {
            let stuck = self.cell.lock().describe_pending();
            warn!(
                target: LIFECYCLE_TARGET,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                pending = ?stuck,
                "grace period elapsed; force-cancelling dispatches"
            );
            self.cell.force_cancel();
            match tokio::time::timeout(FORCE_CANCEL_TIMEOUT, pending.wait_for(|count| *count == 0))
                .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(_)) => {
                    error!(target: LIFECYCLE_TARGET, "in-flight counter closed during drain");
                    self.cell.abandon_pending();
                }
                Err(_) => {
                    let abandoned = self.cell.abandon_pending();
                    error!(
                        target: LIFECYCLE_TARGET,
                        abandoned,
                        "dispatches ignored force cancellation; abandoning them"
                    );
                }
            }
        }

        self.finish_termination().await;
    }

    /// Releases resources, flushes events and fires the termination signal.
    async fn finish_termination(&self) {
        self.release_scratch();
        self.emit_terminated();
        self.events.close(SINK_CLOSE_TIMEOUT).await;
        self.fire();
    }

    /// Termination of a server that never started.
    fn terminate_idle(&self) {
        self.release_scratch();
        self.emit_terminated();
        self.events.close_now();
        if let Some(cause) = self.fire() {
            self.start_outcome
                .send_replace(Some(Err(StartError::Terminated { cause })));
        }
    }

    fn release_scratch(&self) {
        if let Err(error) = self.scratch.release() {
            warn!(
                target: LIFECYCLE_TARGET,
                path = %self.scratch.path().display(),
                %error,
                "failed to remove scratch directory"
            );
        }
    }

    fn emit_terminated(&self) {
        let (cause, report) = {
            let lifecycle = self.cell.lock();
            (
                lifecycle.cause().cloned().unwrap_or(TerminationCause::Normal),
                lifecycle.report(),
            )
        };
        self.events.emit(ServerEvent::Terminated { cause, report });
    }

    fn fire(&self) -> Option<TerminationCause> {
        match self.cell.finish() {
            Ok((cause, report)) => {
                info!(
                    target: LIFECYCLE_TARGET,
                    %cause,
                    in_flight_at_drain = report.in_flight_at_drain,
                    force_cancelled = report.force_cancelled,
                    "companion terminated"
                );
                Some(cause)
            }
            Err(violation) => {
                error!(target: LIFECYCLE_TARGET, %violation, "termination refused");
                None
            }
        }
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        let request = self
            .cell
            .lock()
            .request_termination(TerminationCause::Normal);
        if request == TerminationRequest::Immediate {
            self.terminate_idle();
        }
    }
}

/// Collects the collaborators a [`CompanionServer`] needs.
pub struct CompanionServerBuilder {
    target: Arc<dyn Target>,
    ports: Option<PortSet>,
    executor: Option<Arc<dyn CommandExecutor>>,
    reporter: Option<Arc<dyn EventReporter>>,
    scratch: Option<TemporaryDirectory>,
    options: ServerOptions,
}

impl CompanionServerBuilder {
    /// Sets the channel layout.
    #[must_use]
    pub fn ports(mut self, ports: PortSet) -> Self {
        self.ports = Some(ports);
        self
    }

    /// Replaces the built-in command set.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Sets the event reporter.
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn EventReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Sets the scratch directory released at termination.
    #[must_use]
    pub fn temporary_directory(mut self, scratch: TemporaryDirectory) -> Self {
        self.scratch = Some(scratch);
        self
    }

    /// Overrides the runtime options.
    #[must_use]
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds an idle server. Nothing is bound until `start`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingCollaborator`] when the port set,
    /// the temporary directory or the event reporter was not supplied.
    pub fn build(self) -> Result<CompanionServer, ConfigurationError> {
        let ports = self
            .ports
            .ok_or_else(|| ConfigurationError::missing("port set"))?;
        let scratch = self
            .scratch
            .ok_or_else(|| ConfigurationError::missing("temporary directory"))?;
        let reporter = self
            .reporter
            .ok_or_else(|| ConfigurationError::missing("event reporter"))?;
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(BuiltinExecutor::new()));
        let span = tracing::info_span!(
            target: LIFECYCLE_TARGET,
            "companion",
            udid = %self.target.udid()
        );
        let events = Arc::new(EventSink::new(reporter, self.options.event_buffer));
        let (start_outcome, _) = watch::channel(None);
        Ok(CompanionServer {
            inner: Arc::new(ServerInner {
                target: self.target,
                ports,
                options: self.options,
                executor,
                events,
                scratch,
                cell: Arc::new(LifecycleCell::new()),
                stop: CancellationToken::new(),
                start_outcome,
                span,
            }),
        })
    }
}
