//! Bounded, drop-oldest event buffer in front of the reporter.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EVENTS_TARGET, EventReporter, ServerEvent};

enum Forwarder {
    Pending(broadcast::Receiver<ServerEvent>),
    Running(JoinHandle<()>),
    Closed,
}

/// Buffers events between emitters and the reporter.
///
/// Emitting never blocks. Events are delivered in emission order by a single
/// forwarding task; when the buffer is full the oldest undelivered events are
/// discarded.
pub(crate) struct EventSink {
    sender: broadcast::Sender<ServerEvent>,
    forwarder: Mutex<Forwarder>,
    closing: CancellationToken,
    reporter: Arc<dyn EventReporter>,
}

impl EventSink {
    pub(crate) fn new(reporter: Arc<dyn EventReporter>, capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            forwarder: Mutex::new(Forwarder::Pending(receiver)),
            closing: CancellationToken::new(),
            reporter,
        }
    }

    /// Queues an event. Events emitted after close are discarded.
    pub(crate) fn emit(&self, event: ServerEvent) {
        if self.sender.send(event).is_err() {
            debug!(target: EVENTS_TARGET, "event sink closed; event discarded");
        }
    }

    /// Starts delivering queued events. Must run inside a Tokio runtime.
    pub(crate) fn spawn_forwarder(&self) {
        let mut forwarder = self.lock();
        let Forwarder::Pending(receiver) = mem::replace(&mut *forwarder, Forwarder::Closed) else {
            *forwarder = Forwarder::Closed;
            return;
        };
        let reporter = Arc::clone(&self.reporter);
        let closing = self.closing.clone();
        *forwarder = Forwarder::Running(tokio::spawn(forward(receiver, reporter, closing)));
    }

    /// Delivers everything still buffered and stops the forwarder.
    ///
    /// Waits at most `timeout` for the forwarder to finish.
    pub(crate) async fn close(&self, timeout: Duration) {
        let state = mem::replace(&mut *self.lock(), Forwarder::Closed);
        self.closing.cancel();
        match state {
            Forwarder::Pending(mut receiver) => drain_ready(&mut receiver, self.reporter.as_ref()),
            Forwarder::Running(handle) => match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(target: EVENTS_TARGET, error = %error, "event forwarder failed");
                }
                Err(_) => {
                    warn!(
                        target: EVENTS_TARGET,
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "event forwarder did not finish before timeout"
                    );
                }
            },
            Forwarder::Closed => {}
        }
    }

    /// Synchronous close used when no forwarder was ever started.
    pub(crate) fn close_now(&self) {
        let state = mem::replace(&mut *self.lock(), Forwarder::Closed);
        self.closing.cancel();
        match state {
            Forwarder::Pending(mut receiver) => drain_ready(&mut receiver, self.reporter.as_ref()),
            // The forwarder drains and exits once it observes the closing token.
            Forwarder::Running(_) | Forwarder::Closed => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, Forwarder> {
        self.forwarder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn forward(
    mut receiver: broadcast::Receiver<ServerEvent>,
    reporter: Arc<dyn EventReporter>,
    closing: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            received = receiver.recv() => match received {
                Ok(event) => reporter.report(&event),
                Err(RecvError::Lagged(skipped)) => report_overflow(skipped),
                Err(RecvError::Closed) => break,
            },
            () = closing.cancelled() => {
                drain_ready(&mut receiver, reporter.as_ref());
                break;
            }
        }
    }
}

fn drain_ready(receiver: &mut broadcast::Receiver<ServerEvent>, reporter: &dyn EventReporter) {
    loop {
        match receiver.try_recv() {
            Ok(event) => reporter.report(&event),
            Err(TryRecvError::Lagged(skipped)) => report_overflow(skipped),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

fn report_overflow(skipped: u64) {
    warn!(
        target: EVENTS_TARGET,
        dropped = skipped,
        "event buffer overflowed; oldest events dropped"
    );
}
