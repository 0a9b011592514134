//! Test double for [`EventReporter`] that records events for assertions.

use std::sync::Mutex;

use crate::events::{EventReporter, OutcomeKind, ServerEvent};

/// Records every delivered event.
#[derive(Debug, Default)]
pub struct RecordingEventReporter {
    events: Mutex<Vec<ServerEvent>>,
}

impl RecordingEventReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<ServerEvent> {
        self.events
            .lock()
            .expect("event reporter mutex poisoned")
            .clone()
    }

    /// Counts events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&ServerEvent) -> bool) -> usize {
        self.events().iter().filter(|event| predicate(event)).count()
    }

    /// Outcomes of every recorded dispatch, in delivery order.
    pub fn outcomes(&self) -> Vec<OutcomeKind> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                ServerEvent::Dispatched(record) => Some(record.outcome),
                _ => None,
            })
            .collect()
    }
}

impl EventReporter for RecordingEventReporter {
    fn report(&self, event: &ServerEvent) {
        self.events
            .lock()
            .expect("event reporter mutex poisoned")
            .push(event.clone());
    }
}
