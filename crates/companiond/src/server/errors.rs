//! Error types returned by lifecycle operations.

use std::sync::Arc;

use thiserror::Error;

use crate::ports::ChannelName;
use crate::transport::ListenerError;

use super::TerminationCause;

/// Why `start` did not reach `Running`.
#[derive(Debug, Clone, Error)]
pub enum StartError {
    /// A required channel could not bind.
    #[error("required channel '{channel}' failed to bind: {source}")]
    MandatoryBind {
        channel: ChannelName,
        #[source]
        source: Arc<ListenerError>,
    },
    /// The server terminated before or instead of starting.
    #[error("companion already terminated ({cause})")]
    Terminated { cause: TerminationCause },
    /// Startup was interrupted before reporting an outcome.
    #[error("companion startup was interrupted")]
    Interrupted,
}

impl StartError {
    /// Channel whose bind failure aborted startup, if any.
    #[must_use]
    pub const fn channel(&self) -> Option<&ChannelName> {
        match self {
            Self::MandatoryBind { channel, .. } => Some(channel),
            Self::Terminated { .. } | Self::Interrupted => None,
        }
    }
}
