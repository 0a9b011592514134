//! Concurrent binding and supervision of every channel listener.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::ports::{ChannelName, ChannelSpec, PortSet};

use super::{ChannelListener, ConnectionHandler, LISTENER_TARGET, ListenerError};

/// Channel that could not be bound.
#[derive(Debug, Clone)]
pub(crate) struct BindFailure {
    pub(crate) channel: ChannelName,
    pub(crate) spec: ChannelSpec,
    pub(crate) error: Arc<ListenerError>,
}

/// Result of binding every channel in a port set.
#[derive(Debug, Default)]
pub(crate) struct BindOutcome {
    pub(crate) listeners: Vec<ChannelListener>,
    pub(crate) failures: Vec<BindFailure>,
}

impl BindOutcome {
    /// First failure on a required channel, if any.
    pub(crate) fn required_failure(&self) -> Option<&BindFailure> {
        self.failures.iter().find(|failure| failure.spec.required)
    }
}

struct RunningChannel {
    channel: ChannelName,
    address: SocketAddr,
    task: JoinHandle<()>,
}

/// Accept loops for every bound channel.
///
/// The group owns the listening sockets. Shutting it down stops every accept
/// loop and releases every port before returning.
pub(crate) struct ListenerGroup {
    shutdown: CancellationToken,
    fault: CancellationToken,
    channels: Vec<RunningChannel>,
}

impl ListenerGroup {
    /// Binds every channel concurrently.
    ///
    /// Each bind is bounded by `timeout`, so the whole step takes at most
    /// one timeout regardless of the number of channels.
    pub(crate) async fn bind_all(ports: &PortSet, host: &str, timeout: Duration) -> BindOutcome {
        let attempts = ports.iter().map(|(channel, spec)| {
            let channel = channel.clone();
            async move {
                let result = ChannelListener::bind(channel.clone(), spec, host, timeout).await;
                (channel, spec, result)
            }
        });

        let mut outcome = BindOutcome::default();
        for (channel, spec, result) in join_all(attempts).await {
            match result {
                Ok(listener) => outcome.listeners.push(listener),
                Err(error) => outcome.failures.push(BindFailure {
                    channel,
                    spec,
                    error: Arc::new(error),
                }),
            }
        }
        outcome
    }

    /// Starts an accept loop per listener.
    pub(crate) fn serve(listeners: Vec<ChannelListener>, handler: &Arc<dyn ConnectionHandler>) -> Self {
        let shutdown = CancellationToken::new();
        let fault = CancellationToken::new();
        let channels = listeners
            .into_iter()
            .map(|listener| {
                let channel = listener.channel().clone();
                let address = listener.local_addr();
                let required = listener.spec().required;
                let accept = tokio::spawn(listener.run(Arc::clone(handler), shutdown.clone()));
                let task = tokio::spawn(watch_accept_loop(
                    accept,
                    channel.clone(),
                    required,
                    shutdown.clone(),
                    fault.clone(),
                ));
                RunningChannel {
                    channel,
                    address,
                    task,
                }
            })
            .collect();
        Self {
            shutdown,
            fault,
            channels,
        }
    }

    /// Bound address per channel.
    pub(crate) fn addresses(&self) -> BTreeMap<ChannelName, SocketAddr> {
        self.channels
            .iter()
            .map(|running| (running.channel.clone(), running.address))
            .collect()
    }

    /// Fires when a required channel stops accepting on its own.
    pub(crate) fn fault(&self) -> CancellationToken {
        self.fault.clone()
    }

    /// Stops every accept loop and waits for the sockets to close.
    pub(crate) async fn shutdown(self) {
        self.shutdown.cancel();
        for running in self.channels {
            if let Err(join_error) = running.task.await {
                error!(
                    target: LISTENER_TARGET,
                    channel = %running.channel,
                    error = %join_error,
                    "listener supervisor task failed"
                );
            }
        }
    }
}

async fn watch_accept_loop(
    accept: JoinHandle<()>,
    channel: ChannelName,
    required: bool,
    shutdown: CancellationToken,
    fault: CancellationToken,
) {
    let result = accept.await;
    if shutdown.is_cancelled() {
        return;
    }
    match result {
        Ok(()) => error!(
            target: LISTENER_TARGET,
            channel = %channel,
            required,
            "accept loop stopped without shutdown"
        ),
        Err(join_error) => error!(
            target: LISTENER_TARGET,
            channel = %channel,
            required,
            error = %join_error,
            "accept loop panicked"
        ),
    }
    if required {
        fault.cancel();
    }
}
