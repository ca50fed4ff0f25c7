//! Realtime change notifications.

use super::Record;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Topic that matches every record of a collection.
pub const ALL_RECORDS: &str = "*";

/// Kind of change carried by a [`RecordEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    /// Record was created
    Create,
    /// Record was updated
    Update,
    /// Record was deleted
    Delete,
}

/// A change to one record, as pushed by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEvent {
    /// What happened
    pub action: RecordAction,
    /// Record state after the change (before it, for deletes)
    pub record: Record,
}

impl RecordEvent {
    /// Identifier of the affected record.
    #[must_use]
    pub fn record_id(&self) -> Option<&str> {
        super::record_id(&self.record)
    }
}

/// Whether `topic` covers `record`: `*` covers everything, otherwise the
/// topic is a record id.
#[must_use]
pub fn topic_matches(topic: &str, record: &Record) -> bool {
    topic == ALL_RECORDS || super::record_id(record) == Some(topic)
}

type EventStream = Pin<Box<dyn Stream<Item = RecordEvent> + Send>>;
type CancelHook = Box<dyn FnOnce() + Send>;

/// Live subscription to changes in one collection.
///
/// Yields [`RecordEvent`]s as a [`Stream`]. The subscription is a scoped
/// resource: calling [`cancel`](Self::cancel) or dropping it releases the
/// server-side registration exactly once.
pub struct Subscription {
    collection: String,
    topic: String,
    events: EventStream,
    on_cancel: Option<CancelHook>,
}

impl Subscription {
    /// Wrap a stream of events together with its release hook.
    pub fn new<S, F>(
        collection: impl Into<String>,
        topic: impl Into<String>,
        events: S,
        on_cancel: F,
    ) -> Self
    where
        S: Stream<Item = RecordEvent> + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        Self {
            collection: collection.into(),
            topic: topic.into(),
            events: Box::pin(events),
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Collection this subscription listens to.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Topic (`*` or a record id).
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Release the subscription.
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(hook) = self.on_cancel.take() {
            hook();
        }
    }
}

impl Stream for Subscription {
    type Item = RecordEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.as_mut().poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("collection", &self.collection)
            .field("topic", &self.topic)
            .field("active", &self.on_cancel.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(id: &str) -> RecordEvent {
        let mut record = Record::new();
        record.insert("id".to_string(), id.into());
        RecordEvent {
            action: RecordAction::Update,
            record,
        }
    }

    #[tokio::test]
    async fn yields_events_then_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let mut sub = Subscription::new(
            "attendees",
            ALL_RECORDS,
            futures::stream::iter(vec![event("a1"), event("a2")]),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert_eq!(sub.next().await.unwrap().record_id(), Some("a1"));
        assert_eq!(sub.next().await.unwrap().record_id(), Some("a2"));
        assert!(sub.next().await.is_none());

        sub.cancel();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        {
            let _sub = Subscription::new("parties", "p1", futures::stream::empty(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn topics() {
        let record = event("a1").record;
        assert!(topic_matches("*", &record));
        assert!(topic_matches("a1", &record));
        assert!(!topic_matches("a2", &record));
    }
}
