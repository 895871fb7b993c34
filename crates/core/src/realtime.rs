//! Row-level change notifications.

use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

use crate::model::Task;

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "task", rename_all = "snake_case")]
pub enum RowEvent {
    Inserted(Task),
    Updated(Task),
}

impl RowEvent {
    pub fn task(&self) -> &Task {
        match self {
            RowEvent::Inserted(task) | RowEvent::Updated(task) => task,
        }
    }
}

/// Which rows a subscriber wants to hear about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RowFilter {
    #[default]
    All,
    /// Rows the user owns or is assigned to.
    VisibleTo(String),
}

impl RowFilter {
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::VisibleTo(user) => task.is_visible_to(user),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<RowEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self { sender }
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: RowEvent) -> usize {
        let id = event.task().id.clone();
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(task = %id, receivers, "published row event");
                receivers
            }
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self, filter: RowFilter) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
        }
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<RowEvent>,
    filter: RowFilter,
}

impl Subscription {
    /// Next matching event without blocking; `None` once the queue is empty.
    pub fn try_next(&mut self) -> Option<RowEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(event.task()) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "change feed subscriber lagged; events dropped");
                    continue;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn drain(&mut self) -> Vec<RowEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Wait for the next matching event; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<RowEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(event.task()) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change feed subscriber lagged; events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
