//! Engine events
//!
//! Components publish what changed; a presentation layer (or a test)
//! subscribes and receives every event on its own `flume` channel.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::types::{DraftId, InboxError, MessageId, ThreadId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// Fresh remote state was merged for these threads
    ThreadsUpdated { thread_ids: Vec<ThreadId> },
    MutationCommitted { thread_id: ThreadId, mutation: String },
    /// An optimistic change was undone after the remote refused it
    MutationRolledBack {
        thread_id: ThreadId,
        mutation: String,
        error: InboxError,
    },
    FoldersChanged,
    DraftSaved { draft_id: DraftId },
    DraftDeleted { draft_id: DraftId },
    MessageSent { message_id: MessageId, thread_id: ThreadId },
    Error { message: String },
}

/// Fan-out of engine events to any number of subscribers
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<flume::Sender<SyncEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> flume::Receiver<SyncEvent> {
        let (tx, rx) = flume::unbounded();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        rx
    }

    /// Deliver to every live subscriber, forgetting disconnected ones
    pub fn emit(&self, event: SyncEvent) {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Event bus lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnected_subscribers_are_dropped() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        drop(rx2);

        bus.emit(SyncEvent::FoldersChanged);
        assert_eq!(rx1.try_recv().unwrap(), SyncEvent::FoldersChanged);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
