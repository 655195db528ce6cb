//! Session repository backed by an [`ExpiringCache`].
//!
//! The repository hands out [`Session`] handles, decides on save what kind of
//! write each handle needs, and turns cache removals into lifecycle events:
//!
//! - first save of a new session: [`EventKind::Created`]
//! - explicit delete: [`EventKind::Deleted`]
//! - timeout or capacity eviction: [`EventKind::Expired`]
//! - overwrite or id rotation: no event
//!
//! Concurrent saves of the same session are not coordinated: the last write
//! wins. Callers needing stronger guarantees must serialize access themselves.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::cache::{CacheStats, ExpiringCache, spawn_cleanup_task};
use crate::config::RepositoryConfig;
use crate::error::{Error, Result};
use crate::event::{EventKind, EventPublisher, NoopPublisher, SessionEvent};
use crate::executor::Executor;
use crate::expiry::{Deadline, SessionExpiry};
use crate::index::{
    DelegatingIndexResolver, IndexResolver, PRINCIPAL_NAME_ATTRIBUTE, PRINCIPAL_NAME_INDEX_NAME,
};
use crate::record::Record;
use crate::session::Session;

/// Builder for [`SessionRepository`].
pub struct SessionRepositoryBuilder {
    config: RepositoryConfig,
    publisher: Arc<dyn EventPublisher>,
    resolver: Arc<dyn IndexResolver>,
    executor: Option<Arc<dyn Executor>>,
    scheduler: Option<Handle>,
}

impl Default for SessionRepositoryBuilder {
    fn default() -> Self {
        Self {
            config: RepositoryConfig::default(),
            publisher: Arc::new(NoopPublisher),
            resolver: Arc::new(DelegatingIndexResolver::default()),
            executor: None,
            scheduler: None,
        }
    }
}

impl SessionRepositoryBuilder {
    /// Use `config` for defaults, capacity and cleanup settings.
    pub fn config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Publish lifecycle events to `publisher`. Defaults to discarding them.
    pub fn event_publisher(mut self, publisher: impl EventPublisher + 'static) -> Self {
        self.publisher = Arc::new(publisher);
        self
    }

    /// Resolve secondary indexes with `resolver`.
    pub fn index_resolver(mut self, resolver: impl IndexResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Run removal notifications on `executor`.
    /// Defaults to a dedicated dispatcher thread.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Run the periodic cleanup task on `handle`'s runtime.
    /// Defaults to the runtime `build` is called from, if any.
    pub fn scheduler(mut self, handle: Handle) -> Self {
        self.scheduler = Some(handle);
        self
    }

    /// Validate the configuration and build the repository.
    pub fn build(self) -> Result<SessionRepository> {
        self.config.validate()?;

        let publisher = Arc::clone(&self.publisher);
        let mut cache = ExpiringCache::builder(SessionExpiry).removal_listener(
            move |session_id: String, record: Record, cause| {
                if let Some(kind) = EventKind::for_removal(cause) {
                    publisher.publish(SessionEvent {
                        kind,
                        session_id,
                        record,
                    });
                }
            },
        );
        if let Some(capacity) = self.config.max_sessions.and_then(NonZeroUsize::new) {
            cache = cache.max_capacity(capacity);
        }
        if let Some(executor) = self.executor {
            cache = cache.executor(executor);
        }
        let sessions = Arc::new(cache.build()?);

        let cleanup_task = if self.config.enable_cleanup_task {
            let handle = self
                .scheduler
                .or_else(|| Handle::try_current().ok())
                .ok_or_else(|| {
                    Error::InvalidConfig(
                        "cleanup task enabled but no tokio runtime is available to run it"
                            .to_string(),
                    )
                })?;
            let interval = self.config.cleanup_interval();
            info!(interval = ?interval, "Starting session cleanup task");
            Some(spawn_cleanup_task(&sessions, &handle, interval))
        } else {
            None
        };

        Ok(SessionRepository {
            sessions,
            publisher: self.publisher,
            resolver: self.resolver,
            config: self.config,
            cleanup_task,
        })
    }
}

/// In-memory session repository with per-session expiry.
///
/// Each stored session expires `max_inactive_interval` after it was last
/// saved with changes. Looking a session up does not extend its life.
pub struct SessionRepository {
    sessions: Arc<ExpiringCache<Record>>,
    publisher: Arc<dyn EventPublisher>,
    resolver: Arc<dyn IndexResolver>,
    config: RepositoryConfig,
    cleanup_task: Option<JoinHandle<()>>,
}

impl SessionRepository {
    /// Start building a repository.
    pub fn builder() -> SessionRepositoryBuilder {
        SessionRepositoryBuilder::default()
    }

    /// Build a repository from `config` with default collaborators.
    pub fn new(config: RepositoryConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Get the repository configuration.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Create a new, unsaved session with the configured inactivity window.
    pub fn create_session(&self) -> Session {
        let mut record = Record::new();
        record.set_max_inactive_interval(self.config.max_inactive_interval());
        Session::new(record, true, Arc::clone(&self.resolver))
    }

    /// Write back whatever `session` needs, then clear its tracked changes.
    ///
    /// - a new session is inserted and a created event published;
    /// - a rotated id moves the stored entry to the new id, silently;
    /// - other changes overwrite the stored entry only if it still exists,
    ///   so saving a session deleted in the meantime does not resurrect it;
    /// - an unchanged session is not written at all.
    pub fn save(&self, session: &mut Session) {
        if session.is_new() {
            let record = session.record().clone();
            self.sessions.put(record.id(), record.clone());
            session.mark_id_persisted();
            debug!(session_id = %record.id(), "Session created");
            self.publisher
                .publish(SessionEvent::new(EventKind::Created, record));
        } else if session.changes().id_rotated {
            self.sessions.rekey(
                session.original_id(),
                session.id(),
                session.record().clone(),
            );
            debug!(
                original_id = %session.original_id(),
                session_id = %session.id(),
                "Session id rotated"
            );
            session.mark_id_persisted();
        } else if session.has_pending_changes() {
            if !self
                .sessions
                .replace_if_present(session.id(), session.record().clone())
            {
                debug!(session_id = %session.id(), "Session no longer stored, discarding update");
            }
        } else {
            trace!(session_id = %session.id(), "No changes to save");
        }

        session.clear_dirty_state();
    }

    /// Load a session by id.
    ///
    /// Returns `None` if the session does not exist or has expired. A session
    /// found expired by its own timestamps is expired on the spot, unless a
    /// concurrent save refreshed it in the meantime.
    pub fn find_by_id(&self, id: &str) -> Option<Session> {
        let saved = self.sessions.get_if_present(id)?;
        if saved.is_expired() {
            if self.sessions.expire_if(id, Record::is_expired) {
                debug!(session_id = %id, "Session expired, removed");
            }
            return None;
        }
        Some(Session::new(saved, false, Arc::clone(&self.resolver)))
    }

    /// Delete a session. Deleting a missing session is a no-op.
    pub fn delete_by_id(&self, id: &str) {
        self.sessions.invalidate(id);
    }

    /// Find sessions by secondary index, keyed by session id.
    ///
    /// Only [`PRINCIPAL_NAME_INDEX_NAME`] is supported; any other name, or an
    /// absent value, yields an empty map.
    pub fn find_by_index_name_and_value(
        &self,
        index_name: &str,
        index_value: Option<&str>,
    ) -> HashMap<String, Session> {
        let Some(index_value) = index_value else {
            return HashMap::new();
        };
        if index_name != PRINCIPAL_NAME_INDEX_NAME {
            return HashMap::new();
        }

        self.sessions
            .scan(|_, record| {
                record
                    .attribute(PRINCIPAL_NAME_ATTRIBUTE)
                    .and_then(Value::as_str)
                    == Some(index_value)
            })
            .into_iter()
            .map(|(id, record)| (id, Session::new(record, false, Arc::clone(&self.resolver))))
            .collect()
    }

    /// Find sessions belonging to the principal `name`, keyed by session id.
    pub fn find_by_principal_name(&self, name: &str) -> HashMap<String, Session> {
        self.find_by_index_name_and_value(PRINCIPAL_NAME_INDEX_NAME, Some(name))
    }

    /// When the stored session `id` will expire, if it is live.
    /// Does not count as a read.
    pub fn deadline(&self, id: &str) -> Option<Deadline> {
        self.sessions.deadline(id)
    }

    /// Number of stored sessions, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if no sessions are stored.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Reclaim expired sessions now, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        self.sessions.cleanup_expired()
    }

    /// Get store statistics.
    pub fn stats(&self) -> CacheStats {
        self.sessions.stats()
    }
}

impl Drop for SessionRepository {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup_task.take() {
            task.abort();
        }
    }
}
