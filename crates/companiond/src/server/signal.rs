//! Single-fire notification of termination.

use tokio::sync::watch;

use super::TerminationCause;

/// Fires exactly once, when the server reaches `Terminated`.
///
/// Every clone observes the same cause. Waiting after the signal fired
/// returns immediately.
#[derive(Debug, Clone)]
pub struct TerminationSignal {
    receiver: watch::Receiver<Option<TerminationCause>>,
}

impl TerminationSignal {
    pub(crate) const fn new(receiver: watch::Receiver<Option<TerminationCause>>) -> Self {
        Self { receiver }
    }

    /// Cause, when the signal has fired.
    #[must_use]
    pub fn cause(&self) -> Option<TerminationCause> {
        self.receiver.borrow().clone()
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Waits for termination and returns its cause.
    pub async fn wait(mut self) -> TerminationCause {
        let fired = self
            .receiver
            .wait_for(Option::is_some)
            .await
            .map(|cause| (*cause).clone());
        match fired {
            Ok(Some(cause)) => cause,
            Ok(None) | Err(_) => TerminationCause::internal("termination signal dropped"),
        }
    }
}
