//! Shared lifecycle record plus the signals derived from it.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::ports::ChannelName;

use super::state::{DispatchId, DrainReport, Lifecycle, LifecycleViolation, TerminationCause};

/// Lifecycle record guarded by one mutex, with watch channels for the
/// in-flight count and the termination cause.
///
/// The termination channel is written only inside [`LifecycleCell::finish`]
/// while the mutex is held, so it fires at most once.
pub(crate) struct LifecycleCell {
    lifecycle: Mutex<Lifecycle>,
    in_flight: watch::Sender<usize>,
    termination: watch::Sender<Option<TerminationCause>>,
    drain: CancellationToken,
    abort: CancellationToken,
}

impl LifecycleCell {
    pub(crate) fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        let (termination, _) = watch::channel(None);
        Self {
            lifecycle: Mutex::new(Lifecycle::default()),
            in_flight,
            termination,
            drain: CancellationToken::new(),
            abort: CancellationToken::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a dispatch, or refuses it when the server is not running.
    pub(crate) fn admit(
        self: &Arc<Self>,
        channel: &ChannelName,
        peer: SocketAddr,
        command: &str,
    ) -> Option<DispatchGuard> {
        let mut lifecycle = self.lock();
        let id = lifecycle.admit(channel, peer, command)?;
        self.in_flight.send_replace(lifecycle.pending_len());
        Some(DispatchGuard {
            cell: Arc::clone(self),
            id,
        })
    }

    /// Fires when the server starts draining.
    pub(crate) fn drain_token(&self) -> CancellationToken {
        self.drain.clone()
    }

    /// Asks every dispatch to stop cooperatively.
    pub(crate) fn cancel_cooperatively(&self) {
        self.drain.cancel();
    }

    /// Drops every dispatch still running.
    pub(crate) fn force_cancel(&self) {
        self.abort.cancel();
    }

    /// Forgets dispatches that outlived force cancellation so termination
    /// can complete. Returns how many were dropped.
    pub(crate) fn abandon_pending(&self) -> usize {
        let mut lifecycle = self.lock();
        let abandoned = lifecycle.abandon_pending();
        self.in_flight.send_replace(lifecycle.pending_len());
        abandoned
    }

    pub(crate) fn in_flight(&self) -> watch::Receiver<usize> {
        self.in_flight.subscribe()
    }

    pub(crate) fn termination(&self) -> watch::Receiver<Option<TerminationCause>> {
        self.termination.subscribe()
    }

    /// Enters `Terminated` and publishes the cause.
    pub(crate) fn finish(&self) -> Result<(TerminationCause, DrainReport), LifecycleViolation> {
        let mut lifecycle = self.lock();
        let (cause, report) = lifecycle.finish()?;
        self.termination.send_replace(Some(cause.clone()));
        Ok((cause, report))
    }
}

/// Keeps a dispatch in the pending set until dropped.
pub(crate) struct DispatchGuard {
    cell: Arc<LifecycleCell>,
    id: DispatchId,
}

impl DispatchGuard {
    /// Cooperative cancellation handed to the executor.
    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cell.drain.clone()
    }

    /// Resolves when the grace period has elapsed during a drain.
    pub(crate) fn aborted(&self) -> WaitForCancellationFuture<'_> {
        self.cell.abort.cancelled()
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.cell.abort.is_cancelled()
    }

    pub(crate) fn record_force_cancel(&self) {
        self.cell.lock().record_force_cancel(self.id);
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        let mut lifecycle = self.cell.lock();
        let remaining = lifecycle.release(self.id);
        self.cell.in_flight.send_replace(remaining);
    }
}
