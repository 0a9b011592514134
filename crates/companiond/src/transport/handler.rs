//! Connection handling abstractions for channel listeners.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::ports::ChannelName;

/// Accepted connection together with the channel it arrived on.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) stream: TcpStream,
    pub(crate) peer: SocketAddr,
    pub(crate) channel: ChannelName,
}

/// Handles accepted connections.
#[async_trait]
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Serves a single connection until it closes. Implementations should
    /// avoid panicking.
    async fn handle(&self, connection: Connection);
}
