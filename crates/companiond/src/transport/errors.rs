//! Error types for channel listener operations.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced while binding a channel listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty { host: String, port: u16 },
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("binding {host}:{port} did not complete within {}ms", timeout.as_millis())]
    BindTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },
    #[error("failed to read bound address: {source}")]
    LocalAddress {
        #[source]
        source: io::Error,
    },
}

impl ListenerError {
    /// Whether the failure means another process owns the port.
    #[must_use]
    pub fn is_address_in_use(&self) -> bool {
        matches!(
            self,
            Self::BindTcp { source, .. } if source.kind() == io::ErrorKind::AddrInUse
        )
    }
}
