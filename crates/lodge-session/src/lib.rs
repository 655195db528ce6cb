//! In-memory session repository with per-session TTL.
//!
//! This crate provides a session store with:
//! - Expiry driven by each session's own inactivity window, reset only by saves
//! - Change-tracked session handles, so unchanged sessions are never rewritten
//! - Session id rotation that keeps the session's content
//! - Lookup by principal name through a pluggable index resolver
//! - Created / expired / deleted lifecycle events
//!
//! # Example
//!
//! ```rust,ignore
//! use lodge_session::{ChannelPublisher, RepositoryConfig, SessionRepository};
//!
//! let (publisher, mut events) = ChannelPublisher::channel();
//! let repository = SessionRepository::builder()
//!     .config(RepositoryConfig::new().with_max_inactive_interval_secs(1800))
//!     .event_publisher(publisher)
//!     .build()?;
//!
//! let mut session = repository.create_session();
//! session.set_attribute("cart", serde_json::json!(["book"]));
//! repository.save(&mut session);
//!
//! let found = repository.find_by_id(session.id());
//! ```

mod cache;
mod config;
mod error;
mod event;
mod executor;
mod expiry;
mod index;
mod record;
mod repository;
mod session;

pub use cache::{
    CacheBuilder, CacheStats, ExpiringCache, RemovalCause, RemovalListener, spawn_cleanup_task,
};
pub use config::{DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_MAX_INACTIVE_INTERVAL_SECS, RepositoryConfig};
pub use error::{Error, Result};
pub use event::{ChannelPublisher, EventKind, EventPublisher, NoopPublisher, SessionEvent};
pub use executor::{CallerRuns, DispatchThread, Executor, Task, TokioExecutor};
pub use expiry::{Deadline, Expiry, SessionExpiry, interval_to_duration};
pub use index::{
    Authentication, DelegatingIndexResolver, IndexResolver, PRINCIPAL_NAME_ATTRIBUTE,
    PRINCIPAL_NAME_INDEX_NAME, PrincipalNameIndexResolver, SECURITY_CONTEXT_ATTRIBUTE,
    SecurityContext,
};
pub use record::Record;
pub use repository::{SessionRepository, SessionRepositoryBuilder};
pub use session::{ChangeSet, Session};
