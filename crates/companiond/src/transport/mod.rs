//! Channel listeners for the companion's network ports.
//!
//! Each channel in the port set gets its own TCP listener. Listeners bind
//! concurrently, run one accept loop per channel, and hand every accepted
//! connection to a shared handler on its own task.

mod errors;
mod group;
mod handler;
mod listener;
#[cfg(test)]
mod test_utils;

pub use self::errors::ListenerError;
pub(crate) use self::group::{BindFailure, ListenerGroup};
pub(crate) use self::handler::{Connection, ConnectionHandler};
pub(crate) use self::listener::ChannelListener;
#[cfg(test)]
pub(crate) use self::test_utils::CountingHandler;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
