//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use lodge_session::{EventKind, RepositoryConfig, SessionEvent, SessionRepository};
use parking_lot::{Condvar, Mutex};

/// How long to wait for an event that is expected to arrive.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait before concluding an event will not arrive.
pub const NO_EVENT_TIMEOUT: Duration = Duration::from_millis(300);

/// Records published events and lets tests wait for them.
#[derive(Default)]
pub struct EventRegistry {
    events: Mutex<Vec<SessionEvent>>,
    arrived: Condvar,
}

impl EventRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, event: SessionEvent) {
        self.events.lock().push(event);
        self.arrived.notify_all();
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Every event recorded so far for `session_id`, oldest first.
    pub fn events_for(&self, session_id: &str) -> Vec<SessionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Kinds of every event recorded so far for `session_id`, oldest first.
    pub fn kinds_for(&self, session_id: &str) -> Vec<EventKind> {
        self.events_for(session_id)
            .into_iter()
            .map(|event| event.kind)
            .collect()
    }

    /// Wait until an event for `session_id` has been recorded, returning the latest.
    pub fn wait_for(&self, session_id: &str, timeout: Duration) -> Option<SessionEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        loop {
            if let Some(event) = events.iter().rev().find(|e| e.session_id == session_id) {
                return Some(event.clone());
            }
            if self.arrived.wait_until(&mut events, deadline).timed_out() {
                return events
                    .iter()
                    .rev()
                    .find(|e| e.session_id == session_id)
                    .cloned();
            }
        }
    }

    /// Wait until an event of `kind` for `session_id` has been recorded.
    pub fn wait_for_kind(&self, session_id: &str, kind: EventKind, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        loop {
            if events
                .iter()
                .any(|e| e.session_id == session_id && e.kind == kind)
            {
                return true;
            }
            if self.arrived.wait_until(&mut events, deadline).timed_out() {
                return events
                    .iter()
                    .any(|e| e.session_id == session_id && e.kind == kind);
            }
        }
    }
}

/// Build a repository publishing into a fresh registry, using the default executor.
pub fn repository_with(config: RepositoryConfig) -> (SessionRepository, Arc<EventRegistry>) {
    init_tracing();
    let registry = EventRegistry::new();
    let sink = Arc::clone(&registry);
    let repository = SessionRepository::builder()
        .config(config)
        .event_publisher(move |event: SessionEvent| sink.record(event))
        .build()
        .expect("repository build failed");
    (repository, registry)
}

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
