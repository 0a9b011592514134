//! Companion server lifecycle.
//!
//! A server moves through `Idle → Starting → Running → Draining →
//! Terminated`. Startup may also go straight from `Starting` to `Terminated`
//! when a required channel cannot bind, and an idle server that is asked to
//! terminate skips directly to `Terminated`. The termination signal fires
//! exactly once, after the event sink has been flushed and every resource
//! released.

mod cell;
mod companion;
mod errors;
mod options;
mod signal;
mod snapshot;
mod state;

use async_trait::async_trait;

pub(crate) use self::cell::{DispatchGuard, LifecycleCell};
pub use self::companion::{CompanionServer, CompanionServerBuilder, ServerHandle};
pub use self::errors::StartError;
pub use self::options::ServerOptions;
pub use self::signal::TerminationSignal;
pub use self::snapshot::{ChannelSnapshot, ServerSnapshot};
pub use self::state::{DrainReport, ServerState, TerminationCause};

pub(crate) const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Lifecycle surface of a companion, for code that embeds one.
#[async_trait]
pub trait Companion: Send + Sync {
    /// Binds every channel and begins serving.
    async fn start(&self) -> Result<ServerHandle, StartError>;

    /// Requests a normal shutdown.
    fn terminate(&self);

    /// Signal that fires once the server reaches `Terminated`.
    fn termination_signal(&self) -> TerminationSignal;

    /// Current lifecycle state.
    fn state(&self) -> ServerState;

    /// Serializable view of the server.
    fn snapshot(&self) -> ServerSnapshot;
}

#[async_trait]
impl Companion for CompanionServer {
    async fn start(&self) -> Result<ServerHandle, StartError> {
        Self::start(self).await
    }

    fn terminate(&self) {
        Self::terminate(self);
    }

    fn termination_signal(&self) -> TerminationSignal {
        Self::termination_signal(self)
    }

    fn state(&self) -> ServerState {
        Self::state(self)
    }

    fn snapshot(&self) -> ServerSnapshot {
        Self::snapshot(self)
    }
}
