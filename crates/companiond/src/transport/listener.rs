//! Listener implementation for a single channel.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ports::{ChannelName, ChannelSpec};

use super::{Connection, ConnectionHandler, LISTENER_TARGET, ListenerError};

const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Bound listener for one channel, not yet accepting.
#[derive(Debug)]
pub(crate) struct ChannelListener {
    channel: ChannelName,
    spec: ChannelSpec,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ChannelListener {
    /// Resolves `host` and binds the channel's port, giving up after `timeout`.
    pub(crate) async fn bind(
        channel: ChannelName,
        spec: ChannelSpec,
        host: &str,
        timeout: Duration,
    ) -> Result<Self, ListenerError> {
        let listener = tokio::time::timeout(timeout, bind_tcp(host, spec.port))
            .await
            .map_err(|_| ListenerError::BindTimeout {
                host: host.to_owned(),
                port: spec.port,
                timeout,
            })??;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::LocalAddress { source })?;
        Ok(Self {
            channel,
            spec,
            listener,
            local_addr,
        })
    }

    pub(crate) fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub(crate) fn spec(&self) -> ChannelSpec {
        self.spec
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `shutdown` fires, then closes the socket.
    pub(crate) async fn run(self, handler: Arc<dyn ConnectionHandler>, shutdown: CancellationToken) {
        info!(
            target: LISTENER_TARGET,
            channel = %self.channel,
            address = %self.local_addr,
            "channel listener active"
        );
        let mut last_error = None::<io::ErrorKind>;
        loop {
            let accepted = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    last_error = None;
                    debug!(
                        target: LISTENER_TARGET,
                        channel = %self.channel,
                        peer = %peer,
                        "accepted connection"
                    );
                    let handler = Arc::clone(&handler);
                    let connection = Connection {
                        stream,
                        peer,
                        channel: self.channel.clone(),
                    };
                    tokio::spawn(async move { handler.handle(connection).await });
                }
                Err(error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(
                            target: LISTENER_TARGET,
                            channel = %self.channel,
                            error = %error,
                            "channel accept error"
                        );
                    }
                    last_error = Some(kind);
                    tokio::select! {
                        biased;
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        info!(
            target: LISTENER_TARGET,
            channel = %self.channel,
            address = %self.local_addr,
            "channel listener stopped"
        );
    }
}

async fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::BindTcp { addr, source })
}
