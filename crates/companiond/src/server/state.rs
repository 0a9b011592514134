//! Lifecycle state machine shared by the server, its supervisor and every
//! dispatch.
//!
//! [`Lifecycle`] holds no async machinery; callers hold its mutex only for
//! the duration of a single transition, so every transition is atomic with
//! respect to the others.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::ports::ChannelName;

/// Externally visible lifecycle state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Constructed, nothing bound.
    #[default]
    Idle,
    /// Binding channels.
    Starting,
    /// Accepting and dispatching requests.
    Running,
    /// No longer accepting; waiting for in-flight work.
    Draining,
    /// Every resource released. Terminal.
    Terminated,
}

impl ServerState {
    /// Lower-case state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Why the server terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum TerminationCause {
    /// Termination was requested explicitly.
    Normal,
    /// The attached target became unreachable.
    TargetLost { reason: String },
    /// A required channel failed to bind during startup.
    BindFailure {
        channel: ChannelName,
        message: String,
    },
    /// The server hit an unrecoverable internal fault.
    InternalError { message: String },
}

impl TerminationCause {
    /// Whether the server shut down on request.
    #[must_use]
    pub const fn is_normal(&self) -> bool {
        matches!(self, Self::Normal)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => formatter.write_str("normal"),
            Self::TargetLost { reason } => write!(formatter, "target lost: {reason}"),
            Self::BindFailure { channel, message } => {
                write!(formatter, "bind failure on '{channel}': {message}")
            }
            Self::InternalError { message } => write!(formatter, "internal error: {message}"),
        }
    }
}

/// Summary of the drain that preceded termination.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Dispatches pending when draining began.
    pub in_flight_at_drain: usize,
    /// Dispatches dropped after the grace period.
    pub force_cancelled: usize,
}

/// Identifier of an admitted dispatch.
pub(crate) type DispatchId = u64;

#[derive(Debug)]
struct PendingDispatch {
    channel: ChannelName,
    peer: SocketAddr,
    command: String,
    admitted: Instant,
    force_cancelled: bool,
}

/// What a termination request must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TerminationRequest {
    /// The server never started; finish termination right away.
    Immediate,
    /// Startup is in progress; the request applies once it completes.
    Deferred,
    /// The server is running; wake the supervisor.
    Signal,
    /// Draining or terminated already; nothing to do.
    AlreadyTerminating,
}

/// Transition refused because it would break a lifecycle guarantee.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub(crate) enum LifecycleViolation {
    #[error("termination already signalled")]
    AlreadyTerminated,
    #[error("{pending} dispatches still pending at termination")]
    PendingDispatches { pending: usize },
    #[error("cannot {action} while {state}")]
    UnexpectedState {
        action: &'static str,
        state: ServerState,
    },
}

/// Mutable lifecycle record.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    state: ServerState,
    cause: Option<TerminationCause>,
    pending: BTreeMap<DispatchId, PendingDispatch>,
    next_dispatch: DispatchId,
    bound: BTreeMap<ChannelName, SocketAddr>,
    report: DrainReport,
    fired: bool,
}

impl Lifecycle {
    pub(crate) const fn state(&self) -> ServerState {
        self.state
    }

    pub(crate) const fn cause(&self) -> Option<&TerminationCause> {
        self.cause.as_ref()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn bound(&self, channel: &ChannelName) -> Option<SocketAddr> {
        self.bound.get(channel).copied()
    }

    pub(crate) const fn report(&self) -> DrainReport {
        self.report
    }

    /// Moves `Idle` to `Starting`. Returns true for the caller that owns
    /// bring-up; false once startup or termination has been claimed.
    pub(crate) fn claim_start(&mut self) -> bool {
        if self.state == ServerState::Idle && self.cause.is_none() {
            self.state = ServerState::Starting;
            true
        } else {
            false
        }
    }

    /// Records a cause unless one is already recorded.
    pub(crate) fn record_cause(&mut self, cause: TerminationCause) -> bool {
        if self.cause.is_some() {
            return false;
        }
        self.cause = Some(cause);
        true
    }

    pub(crate) fn request_termination(&mut self, cause: TerminationCause) -> TerminationRequest {
        match self.state {
            ServerState::Idle if self.cause.is_some() => TerminationRequest::AlreadyTerminating,
            ServerState::Idle => {
                self.record_cause(cause);
                TerminationRequest::Immediate
            }
            ServerState::Starting => {
                self.record_cause(cause);
                TerminationRequest::Deferred
            }
            ServerState::Running => {
                self.record_cause(cause);
                TerminationRequest::Signal
            }
            ServerState::Draining | ServerState::Terminated => TerminationRequest::AlreadyTerminating,
        }
    }

    /// Startup failed; the failure replaces any deferred request.
    pub(crate) fn fail_start(&mut self, cause: TerminationCause) {
        self.cause = Some(cause);
    }

    /// Moves `Starting` to `Running`. Returns true when a termination was
    /// requested during startup.
    pub(crate) fn enter_running(
        &mut self,
        bound: BTreeMap<ChannelName, SocketAddr>,
    ) -> Result<bool, LifecycleViolation> {
        if self.state != ServerState::Starting {
            return Err(LifecycleViolation::UnexpectedState {
                action: "enter running",
                state: self.state,
            });
        }
        self.state = ServerState::Running;
        self.bound = bound;
        Ok(self.cause.is_some())
    }

    /// Moves `Running` to `Draining` and returns the recorded cause with the
    /// number of dispatches still pending.
    pub(crate) fn begin_drain(&mut self) -> Result<(TerminationCause, usize), LifecycleViolation> {
        if self.state != ServerState::Running {
            return Err(LifecycleViolation::UnexpectedState {
                action: "drain",
                state: self.state,
            });
        }
        self.state = ServerState::Draining;
        let cause = self.cause.get_or_insert(TerminationCause::Normal).clone();
        self.report.in_flight_at_drain = self.pending.len();
        Ok((cause, self.report.in_flight_at_drain))
    }

    /// Admits a dispatch. Refused unless the server is running.
    pub(crate) fn admit(
        &mut self,
        channel: &ChannelName,
        peer: SocketAddr,
        command: &str,
    ) -> Option<DispatchId> {
        if self.state != ServerState::Running {
            return None;
        }
        let id = self.next_dispatch;
        self.next_dispatch = self.next_dispatch.wrapping_add(1);
        self.pending.insert(
            id,
            PendingDispatch {
                channel: channel.clone(),
                peer,
                command: command.to_owned(),
                admitted: Instant::now(),
                force_cancelled: false,
            },
        );
        Some(id)
    }

    /// Removes a completed dispatch and returns how many remain.
    pub(crate) fn release(&mut self, id: DispatchId) -> usize {
        self.pending.remove(&id);
        self.pending.len()
    }

    /// Counts a dispatch as force-cancelled. Repeat calls for the same
    /// dispatch, or calls after it was released, count nothing.
    pub(crate) fn record_force_cancel(&mut self, id: DispatchId) {
        let Some(pending) = self.pending.get_mut(&id) else {
            return;
        };
        if !pending.force_cancelled {
            pending.force_cancelled = true;
            self.report.force_cancelled = self.report.force_cancelled.saturating_add(1);
        }
    }

    /// Drops every dispatch still pending, counting those not yet marked as
    /// force-cancelled. Returns how many were dropped.
    pub(crate) fn abandon_pending(&mut self) -> usize {
        let unmarked = self
            .pending
            .values()
            .filter(|pending| !pending.force_cancelled)
            .count();
        self.report.force_cancelled = self.report.force_cancelled.saturating_add(unmarked);
        let abandoned = self.pending.len();
        self.pending.clear();
        abandoned
    }

    /// Summary of the dispatches still pending, for drain logging.
    pub(crate) fn describe_pending(&self) -> Vec<String> {
        self.pending
            .values()
            .map(|pending| {
                format!(
                    "{} from {} on {} ({}ms)",
                    pending.command,
                    pending.peer,
                    pending.channel,
                    pending.admitted.elapsed().as_millis()
                )
            })
            .collect()
    }

    /// Enters `Terminated`. Succeeds exactly once, and only with no pending
    /// dispatches.
    pub(crate) fn finish(&mut self) -> Result<(TerminationCause, DrainReport), LifecycleViolation> {
        if self.fired {
            return Err(LifecycleViolation::AlreadyTerminated);
        }
        if !self.pending.is_empty() {
            return Err(LifecycleViolation::PendingDispatches {
                pending: self.pending.len(),
            });
        }
        self.state = ServerState::Terminated;
        self.fired = true;
        self.bound.clear();
        let cause = self.cause.get_or_insert(TerminationCause::Normal).clone();
        Ok((cause, self.report))
    }
}
