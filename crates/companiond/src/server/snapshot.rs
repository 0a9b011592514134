//! Point-in-time view of a server, for status reporting.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use serde::Serialize;

use super::{ServerState, TerminationCause};

/// Per-channel view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    /// Configured port.
    pub port: u16,
    /// Whether the channel is mandatory.
    pub required: bool,
    /// Address the channel listens on, while running.
    pub bound: Option<SocketAddr>,
}

/// Serializable server status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSnapshot {
    /// Target udid.
    pub udid: String,
    /// Current lifecycle state.
    pub state: ServerState,
    /// Channels keyed by name.
    pub channels: BTreeMap<String, ChannelSnapshot>,
    /// Dispatches currently pending.
    pub in_flight: usize,
    /// Termination cause, once terminating.
    pub termination: Option<TerminationCause>,
}
