use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use ulid::Ulid;

use crate::collab::Notifier;
use crate::model::{Event, Notice};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub of committed events, one channel per session.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a session's committed events. Creates the channel if needed.
    pub fn subscribe(&self, session_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, session_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&session_id) {
            let _ = sender.send(event.clone());
        }
    }
}

/// Hands notices to the notification collaborator from a background task so
/// delivery never blocks or fails a transition. Notices are delivered in the
/// order they were dispatched.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Notice>,
}

impl Dispatcher {
    /// Spawns the delivery task; must be called inside a tokio runtime.
    pub fn spawn(notifier: Arc<dyn Notifier>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(delivery_loop(notifier, rx));
        Self { tx }
    }

    pub fn dispatch(&self, notice: Notice) {
        if self.tx.send(notice).is_err() {
            tracing::warn!("notice dropped: delivery task has stopped");
        }
    }
}

async fn delivery_loop(notifier: Arc<dyn Notifier>, mut rx: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = rx.recv().await {
        if let Err(e) = notifier.notify(&notice).await {
            metrics::counter!(crate::observability::NOTICES_FAILED_TOTAL).increment(1);
            tracing::warn!(
                "notice {:?} for booking {} not delivered: {e}",
                notice.kind,
                notice.booking_id
            );
        }
    }
}
