//! Process entry point: wiring configuration, telemetry and signals around
//! a companion server.

mod errors;
mod launch;
mod report;
mod shutdown;

pub use errors::LaunchError;
pub use launch::run_companion;
#[cfg(test)]
pub(crate) use launch::{LaunchPlan, run_companion_with};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
