//! Session lifecycle events and the sinks that receive them.

use std::fmt;

use tokio::sync::mpsc;
use tracing::warn;

use crate::cache::RemovalCause;
use crate::record::Record;

/// What happened to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A new session was saved for the first time.
    Created,
    /// A session timed out or was evicted by the store.
    Expired,
    /// A session was deleted by a caller.
    Deleted,
}

impl EventKind {
    /// The event a cache removal should produce, if any.
    ///
    /// Overwrites (including id rotation) are not lifecycle changes.
    pub fn for_removal(cause: RemovalCause) -> Option<Self> {
        match cause {
            RemovalCause::Explicit => Some(EventKind::Deleted),
            RemovalCause::Replaced => None,
            RemovalCause::Expired | RemovalCause::Capacity | RemovalCause::Collected => {
                Some(EventKind::Expired)
            }
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Created => write!(f, "created"),
            EventKind::Expired => write!(f, "expired"),
            EventKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// A lifecycle event for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    /// What happened.
    pub kind: EventKind,

    /// Id of the session the event is about.
    pub session_id: String,

    /// Copy of the session as it was when the event occurred.
    pub record: Record,
}

impl SessionEvent {
    pub fn new(kind: EventKind, record: Record) -> Self {
        Self {
            kind,
            session_id: record.id().to_string(),
            record,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn record(&self) -> &Record {
        &self.record
    }
}

/// Receives session lifecycle events.
///
/// Removal events are published from the repository's executor, not from the
/// thread whose operation caused the removal.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: SessionEvent);
}

impl<F> EventPublisher for F
where
    F: Fn(SessionEvent) + Send + Sync,
{
    fn publish(&self, event: SessionEvent) {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: SessionEvent) {}
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// Create a publisher along with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!(session_id = %e.0.session_id, kind = %e.0.kind, "Event receiver dropped, discarding event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_mapping() {
        assert_eq!(
            EventKind::for_removal(RemovalCause::Explicit),
            Some(EventKind::Deleted)
        );
        assert_eq!(EventKind::for_removal(RemovalCause::Replaced), None);
        for cause in [
            RemovalCause::Expired,
            RemovalCause::Capacity,
            RemovalCause::Collected,
        ] {
            assert_eq!(EventKind::for_removal(cause), Some(EventKind::Expired));
        }
    }

    #[test]
    fn test_event_carries_record_id() {
        let record = Record::with_id("session-1");
        let event = SessionEvent::new(EventKind::Created, record.clone());

        assert_eq!(event.session_id(), "session-1");
        assert_eq!(event.kind(), EventKind::Created);
        assert_eq!(event.record(), &record);
        assert_eq!(event.kind.to_string(), "created");
    }

    #[test]
    fn test_channel_publisher() {
        let (publisher, mut rx) = ChannelPublisher::channel();
        publisher.publish(SessionEvent::new(
            EventKind::Deleted,
            Record::with_id("session-1"),
        ));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Deleted);
        assert_eq!(event.session_id, "session-1");
    }

    #[test]
    fn test_channel_publisher_tolerates_dropped_receiver() {
        let (publisher, rx) = ChannelPublisher::channel();
        drop(rx);
        publisher.publish(SessionEvent::new(EventKind::Created, Record::new()));
    }

    #[test]
    fn test_closure_publisher() {
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        let publisher = move |event: SessionEvent| sink.lock().push(event.kind);

        publisher.publish(SessionEvent::new(EventKind::Expired, Record::new()));
        NoopPublisher.publish(SessionEvent::new(EventKind::Created, Record::new()));

        assert_eq!(*seen.lock(), vec![EventKind::Expired]);
    }
}
