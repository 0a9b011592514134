//! Reporter trait and the default tracing-backed implementation.

use std::sync::Arc;

use super::{EVENTS_TARGET, OutcomeKind, ServerEvent};

/// Observer receiving server events in emission order.
pub trait EventReporter: Send + Sync {
    /// Invoked once per delivered event.
    fn report(&self, event: &ServerEvent);
}

impl<T> EventReporter for Arc<T>
where
    T: EventReporter + ?Sized,
{
    fn report(&self, event: &ServerEvent) {
        (**self).report(event);
    }
}

/// Default reporter that records events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredEventReporter;

impl StructuredEventReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EventReporter for StructuredEventReporter {
    fn report(&self, event: &ServerEvent) {
        match event {
            ServerEvent::StartRequested { udid } => tracing::info!(
                target: EVENTS_TARGET,
                event = event.name(),
                udid = %udid,
                "companion start requested"
            ),
            ServerEvent::ChannelBound { channel, address } => tracing::info!(
                target: EVENTS_TARGET,
                event = event.name(),
                channel = %channel,
                address = %address,
                "channel bound"
            ),
            ServerEvent::ChannelBindFailed {
                channel,
                port,
                required,
                message,
            } => {
                if *required {
                    tracing::error!(
                        target: EVENTS_TARGET,
                        event = event.name(),
                        channel = %channel,
                        port,
                        message = %message,
                        "required channel failed to bind"
                    );
                } else {
                    tracing::warn!(
                        target: EVENTS_TARGET,
                        event = event.name(),
                        channel = %channel,
                        port,
                        message = %message,
                        "optional channel failed to bind; continuing without it"
                    );
                }
            }
            ServerEvent::Running { channels } => tracing::info!(
                target: EVENTS_TARGET,
                event = event.name(),
                channels = ?channels,
                "companion running"
            ),
            ServerEvent::StartFailed { message } => tracing::error!(
                target: EVENTS_TARGET,
                event = event.name(),
                message = %message,
                "companion failed to start"
            ),
            ServerEvent::Dispatched(record) => {
                let duration_ms = u64::try_from(record.duration.as_millis()).unwrap_or(u64::MAX);
                if record.outcome == OutcomeKind::Success {
                    tracing::debug!(
                        target: EVENTS_TARGET,
                        event = event.name(),
                        channel = %record.channel,
                        peer = %record.peer,
                        command = record.command.as_deref().unwrap_or("-"),
                        duration_ms,
                        "dispatch completed"
                    );
                } else {
                    tracing::warn!(
                        target: EVENTS_TARGET,
                        event = event.name(),
                        channel = %record.channel,
                        peer = %record.peer,
                        command = record.command.as_deref().unwrap_or("-"),
                        outcome = ?record.outcome,
                        duration_ms,
                        "dispatch did not succeed"
                    );
                }
            }
            ServerEvent::DrainStarted { cause, in_flight } => tracing::info!(
                target: EVENTS_TARGET,
                event = event.name(),
                cause = %cause,
                in_flight,
                "companion draining"
            ),
            ServerEvent::Terminated { cause, report } => tracing::info!(
                target: EVENTS_TARGET,
                event = event.name(),
                cause = %cause,
                in_flight_at_drain = report.in_flight_at_drain,
                force_cancelled = report.force_cancelled,
                "companion terminated"
            ),
        }
    }
}
