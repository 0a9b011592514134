//! Companion server for a single device or simulator.
//!
//! A companion attaches to one [`Target`] and exposes it over several TCP
//! channels: a primary command channel plus optional auxiliary channels such
//! as a debug server. Clients speak newline-delimited JSON on every channel;
//! each request is handed to a [`CommandExecutor`] and answered with one
//! response line.
//!
//! The [`CompanionServer`] owns the lifecycle. Startup binds every channel
//! concurrently and fails only when a required channel cannot bind.
//! Shutdown, whether requested, caused by losing the target or by an
//! internal fault, stops accepting work, gives in-flight requests a grace
//! period, force-cancels stragglers, releases the scratch directory and then
//! fires the [`TerminationSignal`] exactly once.
//!
//! Lifecycle and dispatch events are delivered to an [`EventReporter`]
//! through a bounded buffer so a slow reporter never stalls a request.

mod builtin;
mod dispatch;
mod events;
mod executor;
mod ports;
mod process;
mod scratch;
mod server;
mod target;
pub mod telemetry;
mod transport;

pub use builtin::{BuiltinExecutor, HostTarget};
pub use dispatch::{CommandRequest, DispatchError, ErrorCategory, ResponseMessage, ResponseWriter};
pub use events::{DispatchRecord, EventReporter, OutcomeKind, ServerEvent, StructuredEventReporter};
pub use executor::{CommandExecutor, CommandFailure, Invocation};
pub use ports::{ChannelName, ChannelSpec, ConfigurationError, PortSet, PortSetBuilder};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_companion};
pub use scratch::TemporaryDirectory;
pub use server::{
    ChannelSnapshot, Companion, CompanionServer, CompanionServerBuilder, DrainReport,
    ServerHandle, ServerOptions, ServerSnapshot, ServerState, StartError, TerminationCause,
    TerminationSignal,
};
pub use target::{Target, TargetDescription, TargetKind, TargetLoss};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
