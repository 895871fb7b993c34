//! Board-level event log used to check how views and mutations behave in practice.

#[cfg(feature = "telemetry")]
use std::collections::VecDeque;

#[cfg(feature = "telemetry")]
use parking_lot::Mutex;

/// Oldest events are dropped past this many.
pub const MAX_EVENTS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ViewLoaded { view: String, count: usize },
    FiltersChanged(String),
    MutationApplied { id: u64, action: String },
    MutationSettled { id: u64, action: String },
    MutationRolledBack { id: u64, action: String, error: String },
    RefetchRequested { view: String },
    RemoteInsert(String),
}

#[derive(Debug, Default)]
pub struct Handle {
    #[cfg(feature = "telemetry")]
    events: Mutex<VecDeque<Event>>,
}

impl Handle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: Event) {
        #[cfg(feature = "telemetry")]
        {
            match &event {
                Event::ViewLoaded { view, count } => {
                    tracing::debug!(view = view.as_str(), count, "board view loaded")
                }
                Event::FiltersChanged(summary) => {
                    tracing::debug!(filters = summary.as_str(), "board filters changed")
                }
                Event::MutationApplied { id, action } => {
                    tracing::debug!(mutation = id, action = action.as_str(), "mutation applied")
                }
                Event::MutationSettled { id, action } => {
                    tracing::debug!(mutation = id, action = action.as_str(), "mutation settled")
                }
                Event::MutationRolledBack { id, action, error } => tracing::debug!(
                    mutation = id,
                    action = action.as_str(),
                    error = %error,
                    "mutation rolled back"
                ),
                Event::RefetchRequested { view } => {
                    tracing::debug!(view = view.as_str(), "board refetch requested")
                }
                Event::RemoteInsert(id) => {
                    tracing::debug!(task_id = id.as_str(), "remote insert merged")
                }
            }
            let mut events = self.events.lock();
            if events.len() == MAX_EVENTS {
                events.pop_front();
            }
            events.push_back(event);
        }
        #[cfg(not(feature = "telemetry"))]
        {
            let _ = event;
        }
    }

    pub fn is_enabled(&self) -> bool {
        cfg!(feature = "telemetry")
    }

    /// Copy of the retained events, oldest first; empty when the feature is off.
    pub fn events(&self) -> Vec<Event> {
        #[cfg(feature = "telemetry")]
        {
            self.events.lock().iter().cloned().collect()
        }
        #[cfg(not(feature = "telemetry"))]
        {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_events_when_enabled() {
        let handle = Handle::new();
        handle.record(Event::ViewLoaded {
            view: "today".into(),
            count: 2,
        });
        if handle.is_enabled() {
            assert_eq!(handle.events().len(), 1);
        } else {
            assert!(handle.events().is_empty());
        }
    }

    #[test]
    fn keeps_only_the_latest_events() {
        let handle = Handle::new();
        for n in 0..MAX_EVENTS + 10 {
            handle.record(Event::RemoteInsert(format!("t{n}")));
        }
        let events = handle.events();
        if handle.is_enabled() {
            assert_eq!(events.len(), MAX_EVENTS);
            assert_eq!(events[0], Event::RemoteInsert("t10".into()));
            assert_eq!(
                events.last(),
                Some(&Event::RemoteInsert(format!("t{}", MAX_EVENTS + 9)))
            );
        } else {
            assert!(events.is_empty());
        }
    }
}
