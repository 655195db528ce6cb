//! Change-tracked session handle.
//!
//! A [`Session`] is what callers hold between loading a record and saving it.
//! It owns a private copy of the record and remembers which facets were
//! touched, so the repository can tell an insert from a rename, an update,
//! or nothing at all.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::trace;

use crate::index::{
    IndexResolver, PRINCIPAL_NAME_ATTRIBUTE, PRINCIPAL_NAME_INDEX_NAME, SECURITY_CONTEXT_ATTRIBUTE,
};
use crate::record::Record;

/// Facets of a session modified since it was loaded or last saved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// The id was rotated.
    pub id_rotated: bool,
    /// The last accessed time was set.
    pub last_accessed_time: bool,
    /// The inactivity window was set.
    pub max_inactive_interval: bool,
    /// An attribute was set or removed.
    pub attributes: bool,
}

impl ChangeSet {
    /// Whether any content facet changed. Id rotation alone does not count.
    pub fn has_pending_changes(&self) -> bool {
        self.last_accessed_time || self.max_inactive_interval || self.attributes
    }
}

/// A session being read or modified by a caller.
///
/// Obtained from [`SessionRepository::create_session`](crate::SessionRepository::create_session)
/// or [`SessionRepository::find_by_id`](crate::SessionRepository::find_by_id) and written back with
/// [`SessionRepository::save`](crate::SessionRepository::save). Changes are invisible to other
/// callers until saved.
pub struct Session {
    /// Working copy, never shared with the cache.
    delegate: Record,

    /// Never saved yet.
    is_new: bool,

    /// Id the stored entry lives under.
    original_id: String,

    changes: ChangeSet,

    resolver: Arc<dyn IndexResolver>,
}

impl Session {
    /// Wrap `snapshot`, which must already be a private copy of any stored record.
    pub(crate) fn new(snapshot: Record, is_new: bool, resolver: Arc<dyn IndexResolver>) -> Self {
        Self {
            original_id: snapshot.id().to_string(),
            delegate: snapshot,
            is_new,
            changes: ChangeSet::default(),
            resolver,
        }
    }

    pub fn id(&self) -> &str {
        self.delegate.id()
    }

    /// Give the session a new random id and return it.
    ///
    /// May be called repeatedly before saving; only the latest id is stored.
    pub fn rotate_id(&mut self) -> String {
        let new_id = self.delegate.change_id();
        self.changes.id_rotated = true;
        trace!(original_id = %self.original_id, session_id = %new_id, "Session id rotated");
        new_id
    }

    /// Get an attribute value by name.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.delegate.attribute(name)
    }

    /// Names of all attributes currently set.
    pub fn attribute_names(&self) -> Vec<String> {
        self.delegate.attribute_names()
    }

    /// Set an attribute. A JSON `null` removes it.
    ///
    /// Writing the security context attribute also refreshes the
    /// denormalized principal name used by index lookups.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.write_attribute(name.into(), value.into());
    }

    /// Remove an attribute.
    pub fn remove_attribute(&mut self, name: &str) {
        self.write_attribute(name.to_string(), Value::Null);
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.delegate.creation_time()
    }

    pub fn last_accessed_time(&self) -> DateTime<Utc> {
        self.delegate.last_accessed_time()
    }

    pub fn set_last_accessed_time(&mut self, at: DateTime<Utc>) {
        self.delegate.set_last_accessed_time(at);
        self.changes.last_accessed_time = true;
    }

    pub fn max_inactive_interval(&self) -> TimeDelta {
        self.delegate.max_inactive_interval()
    }

    /// Set the inactivity window. Negative means never expire.
    pub fn set_max_inactive_interval(&mut self, interval: TimeDelta) {
        self.delegate.set_max_inactive_interval(interval);
        self.changes.max_inactive_interval = true;
    }

    pub fn is_expired(&self) -> bool {
        self.delegate.is_expired()
    }

    /// Whether the session has never been saved.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Facets modified since load or last save.
    pub fn changes(&self) -> ChangeSet {
        self.changes
    }

    /// Whether saving would write content changes.
    pub fn has_pending_changes(&self) -> bool {
        self.changes.has_pending_changes()
    }

    /// Read-only view of the working copy.
    pub fn record(&self) -> &Record {
        &self.delegate
    }

    pub(crate) fn original_id(&self) -> &str {
        &self.original_id
    }

    /// Record that the stored entry now lives under the current id.
    pub(crate) fn mark_id_persisted(&mut self) {
        self.original_id = self.delegate.id().to_string();
    }

    /// Forget all tracked changes. Called once per save.
    pub(crate) fn clear_dirty_state(&mut self) {
        self.is_new = false;
        self.changes = ChangeSet::default();
    }

    fn write_attribute(&mut self, name: String, value: Value) {
        let refresh_principal = name == SECURITY_CONTEXT_ATTRIBUTE;
        self.delegate.set_attribute(name, value);
        self.changes.attributes = true;

        if refresh_principal {
            self.refresh_principal_name();
        }
    }

    fn refresh_principal_name(&mut self) {
        let principal = match self.delegate.attribute(SECURITY_CONTEXT_ATTRIBUTE) {
            Some(_) => self
                .resolver
                .resolve_indexes_for(&self.delegate)
                .remove(PRINCIPAL_NAME_INDEX_NAME),
            None => None,
        };

        match principal {
            Some(name) => self
                .delegate
                .set_attribute(PRINCIPAL_NAME_ATTRIBUTE, Value::String(name)),
            None => {
                self.delegate.remove_attribute(PRINCIPAL_NAME_ATTRIBUTE);
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("delegate", &self.delegate)
            .field("is_new", &self.is_new)
            .field("original_id", &self.original_id)
            .field("changes", &self.changes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{PrincipalNameIndexResolver, SecurityContext};
    use serde_json::json;

    fn new_session() -> Session {
        Session::new(Record::new(), true, Arc::new(PrincipalNameIndexResolver))
    }

    fn loaded_session(record: &Record) -> Session {
        Session::new(record.clone(), false, Arc::new(PrincipalNameIndexResolver))
    }

    #[test]
    fn test_fresh_session_is_clean() {
        let record = Record::new();
        let session = loaded_session(&record);

        assert!(!session.is_new());
        assert_eq!(session.id(), record.id());
        assert_eq!(session.original_id(), record.id());
        assert_eq!(session.changes(), ChangeSet::default());
        assert!(!session.has_pending_changes());
    }

    #[test]
    fn test_working_copy_is_detached() {
        let record = Record::new();
        let mut session = loaded_session(&record);

        session.set_attribute("a", "b");

        assert_eq!(session.attribute("a"), Some(&json!("b")));
        assert_eq!(record.attribute("a"), None);
    }

    #[test]
    fn test_each_setter_sets_its_flag() {
        let mut session = new_session();
        session.set_last_accessed_time(Utc::now());
        assert!(session.changes().last_accessed_time);
        assert!(session.has_pending_changes());

        let mut session = new_session();
        session.set_max_inactive_interval(TimeDelta::seconds(1));
        assert!(session.changes().max_inactive_interval);
        assert!(session.has_pending_changes());

        let mut session = new_session();
        session.remove_attribute("missing");
        assert!(session.changes().attributes);
        assert!(session.has_pending_changes());
    }

    #[test]
    fn test_rotation_is_not_a_pending_change() {
        let record = Record::new();
        let mut session = loaded_session(&record);

        let first = session.rotate_id();
        let second = session.rotate_id();

        assert_ne!(first, second);
        assert_eq!(session.id(), second);
        assert_eq!(session.original_id(), record.id());
        assert!(session.changes().id_rotated);
        assert!(!session.has_pending_changes());
    }

    #[test]
    fn test_rotation_keeps_content() {
        let mut record = Record::new();
        record.set_attribute("a", json!(1));
        let mut session = loaded_session(&record);

        session.rotate_id();

        assert_eq!(session.attribute("a"), Some(&json!(1)));
        assert_eq!(session.creation_time(), record.creation_time());
    }

    #[test]
    fn test_clear_dirty_state() {
        let mut session = new_session();
        session.set_attribute("a", "b");
        session.rotate_id();

        session.clear_dirty_state();

        assert!(!session.is_new());
        assert_eq!(session.changes(), ChangeSet::default());
    }

    #[test]
    fn test_mark_id_persisted() {
        let mut session = loaded_session(&Record::new());
        let new_id = session.rotate_id();
        session.mark_id_persisted();
        assert_eq!(session.original_id(), new_id);
    }

    #[test]
    fn test_security_context_sets_principal_name() {
        let mut session = new_session();
        session.set_attribute(
            SECURITY_CONTEXT_ATTRIBUTE,
            SecurityContext::authenticated("alice", vec![]),
        );

        assert_eq!(
            session.attribute(PRINCIPAL_NAME_ATTRIBUTE),
            Some(&json!("alice"))
        );
    }

    #[test]
    fn test_clearing_security_context_clears_principal_name() {
        let mut session = new_session();
        session.set_attribute(
            SECURITY_CONTEXT_ATTRIBUTE,
            SecurityContext::authenticated("alice", vec![]),
        );

        session.set_attribute(SECURITY_CONTEXT_ATTRIBUTE, Value::Null);
        assert_eq!(session.attribute(SECURITY_CONTEXT_ATTRIBUTE), None);
        assert_eq!(session.attribute(PRINCIPAL_NAME_ATTRIBUTE), None);

        session.set_attribute(
            SECURITY_CONTEXT_ATTRIBUTE,
            SecurityContext::authenticated("bob", vec![]),
        );
        session.remove_attribute(SECURITY_CONTEXT_ATTRIBUTE);
        assert_eq!(session.attribute(PRINCIPAL_NAME_ATTRIBUTE), None);
    }

    #[test]
    fn test_unauthenticated_context_has_no_principal() {
        let mut session = new_session();
        session.set_attribute(SECURITY_CONTEXT_ATTRIBUTE, SecurityContext::default());
        assert_eq!(session.attribute(PRINCIPAL_NAME_ATTRIBUTE), None);
    }

    #[test]
    fn test_other_attributes_do_not_resolve() {
        let mut session = new_session();
        session.set_attribute(PRINCIPAL_NAME_INDEX_NAME, "carol");
        assert_eq!(session.attribute(PRINCIPAL_NAME_ATTRIBUTE), None);
    }

    #[test]
    fn test_attribute_names_and_remove() {
        let mut session = new_session();
        session.set_attribute("attribute1", "value1");
        session.set_attribute("attribute2", "value2");

        for name in session.attribute_names() {
            session.remove_attribute(&name);
        }

        assert!(session.attribute_names().is_empty());
    }
}
