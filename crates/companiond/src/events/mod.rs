//! Lifecycle and dispatch events surfaced to the embedding code.
//!
//! Events flow through a bounded [`EventSink`] so a slow reporter never
//! stalls a dispatch. When the buffer overflows the oldest events are
//! dropped and the loss is logged.

mod reporter;
mod sink;

use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;

use crate::ports::ChannelName;
use crate::server::{DrainReport, TerminationCause};

pub use reporter::{EventReporter, StructuredEventReporter};
pub(crate) use sink::EventSink;

pub(crate) const EVENTS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::events");

/// How a single dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The executor returned a payload.
    Success,
    /// The request could not be decoded.
    ProtocolError,
    /// The executor reported a failure.
    CommandError,
    /// The dispatch was force-cancelled or hit a transport fault.
    InternalError,
    /// The executor stopped after cooperative cancellation.
    Cancelled,
}

/// Record of one completed dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchRecord {
    /// Channel the request arrived on.
    pub channel: ChannelName,
    /// Remote peer.
    pub peer: SocketAddr,
    /// Command name, when the request decoded far enough to have one.
    pub command: Option<String>,
    /// Wall time from receipt to response.
    pub duration: Duration,
    /// Outcome classification.
    pub outcome: OutcomeKind,
}

/// Observable server event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// `start` was called on an idle server.
    StartRequested { udid: String },
    /// A channel listener bound its port.
    ChannelBound {
        channel: ChannelName,
        address: SocketAddr,
    },
    /// A channel listener failed to bind.
    ChannelBindFailed {
        channel: ChannelName,
        port: u16,
        required: bool,
        message: String,
    },
    /// Every required channel is listening.
    Running { channels: Vec<ChannelName> },
    /// Startup aborted.
    StartFailed { message: String },
    /// A request completed.
    Dispatched(DispatchRecord),
    /// The server stopped accepting work.
    DrainStarted {
        cause: TerminationCause,
        in_flight: usize,
    },
    /// The server released its resources.
    Terminated {
        cause: TerminationCause,
        report: DrainReport,
    },
}

impl ServerEvent {
    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartRequested { .. } => "start_requested",
            Self::ChannelBound { .. } => "channel_bound",
            Self::ChannelBindFailed { .. } => "channel_bind_failed",
            Self::Running { .. } => "running",
            Self::StartFailed { .. } => "start_failed",
            Self::Dispatched(_) => "dispatched",
            Self::DrainStarted { .. } => "drain_started",
            Self::Terminated { .. } => "terminated",
        }
    }
}
